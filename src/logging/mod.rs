//! Project-aware log formatting on top of `tracing`.
//!
//! Library code emits ordinary `tracing` events, passing
//! `context = short_type_name::<Self>()` from methods. [`setup_logging`] installs a
//! subscriber that renders each event through a [`ProjectFormatter`], e.g.
//!
//! ```text
//! INFO     2024-05-01 09:30:00 src.client.LLMClient.invoke.57: dispatching request
//! ```

use std::env;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::level_filters::LevelFilter;
use tracing::{Dispatch, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::DefaultFields;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{Registry, reload};

use crate::config::DEFAULT_ENV_PREFIX;
use crate::error::LoggingError;

mod event;
mod formatter;
mod template;

pub use event::{CONTEXT_FIELD, ProjectEventFormat};
pub use formatter::{
    DEFAULT_DATE_FORMAT, DEFAULT_TEMPLATE, LogFormatter, LogRecord, ProjectFormatter,
    find_project_root, find_project_root_from, short_type_name,
};
pub use template::LogTemplate;

/// Settings for [`setup_logging`] and [`build_dispatch`].
///
/// Level and log file fall back to `<PREFIX>_LOG_LEVEL` and `<PREFIX>_LOG_FILE`
/// when not set explicitly.
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    pub level: Option<String>,
    pub log_file: Option<PathBuf>,
    pub template: Option<String>,
    pub date_format: Option<String>,
    pub project_root: Option<PathBuf>,
    pub env_prefix: String,
    /// Write to stderr in addition to the log file.
    pub console: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: None,
            log_file: None,
            template: None,
            date_format: None,
            project_root: None,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            console: true,
        }
    }
}

impl LoggingOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_date_format(mut self, date_format: impl Into<String>) -> Self {
        self.date_format = Some(date_format.into());
        self
    }

    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = Some(root.into());
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn with_console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    /// Effective level: explicit, then `<PREFIX>_LOG_LEVEL`, then `INFO`.
    pub fn resolve_level(&self) -> Result<LevelFilter, LoggingError> {
        match self
            .level
            .clone()
            .or_else(|| self.env_value("LOG_LEVEL"))
        {
            Some(level) => parse_level(&level),
            None => Ok(LevelFilter::INFO),
        }
    }

    /// Effective log file: explicit, then `<PREFIX>_LOG_FILE`.
    pub fn resolve_log_file(&self) -> Option<PathBuf> {
        self.log_file
            .clone()
            .or_else(|| self.env_value("LOG_FILE").map(PathBuf::from))
    }

    /// Formatter described by these options.
    pub fn formatter(&self) -> ProjectFormatter {
        let mut formatter = ProjectFormatter::new();
        if let Some(template) = &self.template {
            formatter = formatter.with_template(template);
        }
        if let Some(date_format) = &self.date_format {
            formatter = formatter.with_date_format(date_format);
        }
        if let Some(root) = &self.project_root {
            formatter = formatter.with_project_root(root);
        }
        formatter
    }

    fn env_value(&self, suffix: &str) -> Option<String> {
        env::var(format!("{}_{suffix}", self.env_prefix))
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

/// Parses a severity name, case-insensitively.
///
/// `WARNING` and `CRITICAL` are accepted as aliases of `WARN` and `ERROR`.
pub fn parse_level(level: &str) -> Result<LevelFilter, LoggingError> {
    match level.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Ok(LevelFilter::TRACE),
        "DEBUG" => Ok(LevelFilter::DEBUG),
        "INFO" => Ok(LevelFilter::INFO),
        "WARN" | "WARNING" => Ok(LevelFilter::WARN),
        "ERROR" | "CRITICAL" => Ok(LevelFilter::ERROR),
        _ => Err(LoggingError::InvalidLevel(level.to_string())),
    }
}

/// Level filter plus console and file output, as one swappable layer.
type PipelineLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Reload handle of the pipeline installed by [`setup_logging`].
static INSTALLED: Mutex<Option<reload::Handle<PipelineLayer, Registry>>> = Mutex::new(None);

/// Builds a dispatcher for `options` without installing it.
pub fn build_dispatch(options: &LoggingOptions) -> Result<Dispatch, LoggingError> {
    let pipeline = pipeline_layer(options)?;
    Ok(Dispatch::new(tracing_subscriber::registry().with(pipeline)))
}

/// Installs the logging pipeline as the process-wide default.
///
/// The first call installs a global subscriber. Later calls replace its level,
/// format and outputs in place, closing the previous log file.
///
/// # Errors
///
/// Fails on an invalid level or an unwritable log file, leaving the current
/// configuration untouched. Fails with [`LoggingError::AlreadyInitialized`] when a
/// global subscriber was installed by something other than this function.
pub fn setup_logging(options: LoggingOptions) -> Result<(), LoggingError> {
    let pipeline = pipeline_layer(&options)?;
    let mut installed = INSTALLED.lock().unwrap_or_else(PoisonError::into_inner);

    match installed.as_ref() {
        Some(handle) => handle
            .reload(pipeline)
            .map_err(|err| LoggingError::Reload(err.to_string()))?,
        None => {
            let (layer, handle) = reload::Layer::new(pipeline);
            let subscriber = tracing_subscriber::registry().with(layer);
            tracing::subscriber::set_global_default(subscriber)
                .map_err(|_| LoggingError::AlreadyInitialized)?;
            *installed = Some(handle);
        }
    }
    drop(installed);

    tracing::debug!(
        level = ?options.resolve_level().ok(),
        log_file = ?options.resolve_log_file(),
        "logging configured"
    );
    Ok(())
}

fn pipeline_layer(options: &LoggingOptions) -> Result<PipelineLayer, LoggingError> {
    let level = options.resolve_level()?;
    let formatter: Arc<dyn LogFormatter> = Arc::new(options.formatter());

    let file = options
        .resolve_log_file()
        .map(|path| open_log_file(&path).map(Mutex::new))
        .transpose()?;

    let console = options
        .console
        .then(|| project_layer(formatter.clone(), io::stderr));
    let file = file.map(|file| project_layer(formatter, file));

    Ok(<LevelFilter as Layer<Registry>>::and_then(level, console)
        .and_then(file)
        .boxed())
}

fn project_layer<S, W>(
    formatter: Arc<dyn LogFormatter>,
    writer: W,
) -> tracing_subscriber::fmt::Layer<S, DefaultFields, ProjectEventFormat, W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + 'static,
{
    tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .event_format(ProjectEventFormat::new(formatter))
}

fn open_log_file(path: &std::path::Path) -> Result<File, LoggingError> {
    let wrap = |source| LoggingError::LogFile {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(wrap)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(wrap)
}
