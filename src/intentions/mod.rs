//! Reactive handlers that drive the intention phases forward.

pub mod chat;
pub mod init;

pub use chat::InitializeChatService;
pub use init::{InitService, InitState};
