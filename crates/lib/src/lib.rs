//! IdeaSketch core library: chat sessions, the streaming prediction client, persistence,
//! and export, shared by the CLI and any other front end.

pub mod chat;
pub mod config;
pub mod events;
pub mod export;
pub mod init;
pub mod llm;
pub mod pagination;
pub mod registry;
pub mod session;
pub mod status;
pub mod store;
pub mod stream;
