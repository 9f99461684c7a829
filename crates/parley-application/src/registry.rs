//! Agent and variable registration.

use parley_core::agent::{AgentMetadata, ChatAgent, VariableResolver};
use parley_core::parser::ParserContext;
use std::collections::HashMap;
use std::sync::Arc;

/// Registered chat agents, in registration order.
#[derive(Default, Clone)]
pub struct AgentRegistry {
    agents: Vec<Arc<dyn ChatAgent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `agent`, replacing an earlier agent with the same id.
    pub fn register(&mut self, agent: Arc<dyn ChatAgent>) {
        let id = agent.metadata().id.clone();
        if let Some(existing) = self.agents.iter_mut().find(|a| a.metadata().id == id) {
            tracing::warn!("[AgentRegistry] Replacing agent '{}'", id);
            *existing = agent;
        } else {
            tracing::debug!("[AgentRegistry] Registered agent '{}'", id);
            self.agents.push(agent);
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ChatAgent>> {
        self.agents.iter().find(|a| a.metadata().id == id).cloned()
    }

    /// The first agent flagged as default.
    pub fn default_agent(&self) -> Option<Arc<dyn ChatAgent>> {
        self.agents.iter().find(|a| a.metadata().is_default).cloned()
    }

    pub fn metadata(&self) -> Vec<AgentMetadata> {
        self.agents.iter().map(|a| a.metadata().clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

/// Resolvers for `#name` mentions, keyed by name.
#[derive(Default, Clone)]
pub struct VariableRegistry {
    resolvers: HashMap<String, Arc<dyn VariableResolver>>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, resolver: Arc<dyn VariableResolver>) {
        self.resolvers.insert(name.into(), resolver);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn VariableResolver>> {
        self.resolvers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.resolvers.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Borrowed view over both registries for the request parser.
pub struct ParseScope<'a> {
    pub agents: &'a AgentRegistry,
    pub variables: &'a VariableRegistry,
}

impl ParserContext for ParseScope<'_> {
    fn agent(&self, id: &str) -> Option<&AgentMetadata> {
        self.agents
            .agents
            .iter()
            .find(|a| a.metadata().id == id)
            .map(|a| a.metadata())
    }

    fn default_agent(&self) -> Option<&AgentMetadata> {
        self.agents
            .agents
            .iter()
            .find(|a| a.metadata().is_default)
            .map(|a| a.metadata())
    }

    fn has_variable(&self, name: &str) -> bool {
        self.variables.resolvers.contains_key(name)
    }
}
