use langchain_llm::error::LoggingError;
use langchain_llm::logging::{LoggingOptions, setup_logging};

#[test]
fn foreign_global_subscriber_is_reported() {
    tracing::subscriber::set_global_default(tracing_subscriber::registry()).unwrap();

    let options = LoggingOptions::new()
        .with_env_prefix("IT_FOREIGN_LOGGING")
        .with_console(false);
    assert!(matches!(
        setup_logging(options),
        Err(LoggingError::AlreadyInitialized)
    ));
}
