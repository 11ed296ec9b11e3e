//! Environment-driven provider configuration, project-aware logging and a uniform
//! chat client for OpenAI, Anthropic and Google Gemini.
//!
//! ```no_run
//! use langchain_llm::config::{EnvConfigProvider, build_client_from_env, load_env_config};
//! use langchain_llm::http::default_dyn_transport;
//! use langchain_llm::logging::{LoggingOptions, setup_logging};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! load_env_config(None)?;
//! setup_logging(LoggingOptions::new())?;
//!
//! let client = build_client_from_env(&EnvConfigProvider::new(), default_dyn_transport()?)?;
//! let reply = client.invoke("openai", "What is Rust?").await?;
//! println!("{}", reply.content);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod model;
pub mod provider;
pub mod stream;
pub mod types;
pub mod usage;

pub use client::{LLMClient, LLMClientBuilder};
pub use config::{ConfigProvider, EnvConfigProvider, ModelConfig, Provider};
pub use error::{ConfigError, LLMError, LoggingError};
pub use model::{ChatModel, Prompt, RetryPolicy};
pub use provider::{ChatStream, LLMProvider};
pub use types::*;
pub use usage::{ModelPricing, UsageSummary, UsageTracker};
