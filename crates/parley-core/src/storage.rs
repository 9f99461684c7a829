//! Key-value blob storage contract.

use async_trait::async_trait;

/// A string blob store scoped to a workspace or to the whole application.
///
/// # Implementation Notes
///
/// Writes replace the whole value for a key; readers never observe a
/// partially written value.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// - `Ok(Some(value))`: key present
    /// - `Ok(None)`: key absent
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn store(&self, key: &str, value: &str) -> anyhow::Result<()>;

    /// Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> anyhow::Result<()>;
}
