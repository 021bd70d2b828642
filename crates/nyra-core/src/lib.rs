#![doc = include_str!(concat!(env!("OUT_DIR"), "/README_GENERATED.md"))]
#![deny(unused_crate_dependencies)]

pub mod chat;

// Re-export commonly used types for convenience
pub use chat::{ChatRole, ConversationTurn, HistoryMessage, HistoryRole, Transcript, TurnId};
