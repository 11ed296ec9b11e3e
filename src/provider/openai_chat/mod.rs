//! OpenAI Chat Completions (`/v1/chat/completions`).

mod error;
mod provider;
mod request;
mod response;
mod types;

pub use provider::OpenAiChatProvider;
