//! Signal Relay: validates trading signals from source chats with an LLM
//! and relays them, reformatted, to a destination chat.

pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod logging;
pub mod relay;
pub mod signal;
