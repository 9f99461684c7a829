pub mod chat;
pub mod context;
pub mod edit;
pub mod history;
