//! Google Gemini (`/v1beta/models/{model}:generateContent`).

mod error;
mod provider;
mod request;
mod response;
mod types;

pub use provider::GoogleGeminiProvider;
