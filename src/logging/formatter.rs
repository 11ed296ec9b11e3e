use std::borrow::Cow;
use std::env;
use std::fmt::Write;
use std::path::{Component, Path, PathBuf};

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use tracing::Level;

use super::template::{Field, LogTemplate};

/// Template used when none is configured.
pub const DEFAULT_TEMPLATE: &str =
    "{level:<8} {timestamp} {relative_path}.{context}{function}{line}: {message}";

/// `strftime` pattern used for `{timestamp}` when none is configured.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Files or directories whose presence marks a project root.
const PROJECT_MARKERS: [&str; 2] = ["Cargo.toml", ".git"];

/// One log event as seen by a [`LogFormatter`].
#[derive(Debug, Clone)]
pub struct LogRecord<'a> {
    pub level: Level,
    pub timestamp: DateTime<Local>,
    pub target: &'a str,
    pub module_path: Option<&'a str>,
    /// Source file as recorded by the event, usually the output of `file!()`.
    pub file: Option<&'a str>,
    pub line: Option<u32>,
    /// Name of the innermost active span.
    pub function: Option<&'a str>,
    /// Name of the type whose method emitted the event.
    pub context: Option<&'a str>,
    /// Rendered message including any extra `key=value` fields.
    pub message: &'a str,
}

impl<'a> LogRecord<'a> {
    /// Record stamped with the current local time and no location data.
    pub fn new(level: Level, message: &'a str) -> Self {
        Self {
            level,
            timestamp: Local::now(),
            target: "",
            module_path: None,
            file: None,
            line: None,
            function: None,
            context: None,
            message,
        }
    }
}

/// Turns a [`LogRecord`] into one line of text.
///
/// Implementations must not panic; anything they cannot derive degrades to an empty
/// or fallback value.
pub trait LogFormatter: Send + Sync {
    fn format(&self, record: &LogRecord<'_>) -> String;
}

/// [`LogFormatter`] that labels each line with the emitting file's path relative to
/// the project root (`src/config/mod.rs` becomes `src.config.mod`) and the
/// enclosing type passed as `context`.
///
/// ```
/// use langchain_llm::logging::{LogFormatter, LogRecord, ProjectFormatter};
/// use tracing::Level;
///
/// let formatter = ProjectFormatter::new()
///     .with_template("{level} {relative_path}.{context}{line}: {message}");
/// let mut record = LogRecord::new(Level::INFO, "ready");
/// record.file = Some("src/client.rs");
/// record.line = Some(12);
/// record.context = Some("LLMClient");
/// assert_eq!(formatter.format(&record), "INFO src.client.LLMClient.12: ready");
/// ```
#[derive(Debug, Clone)]
pub struct ProjectFormatter {
    template: LogTemplate,
    date_format: String,
    project_root: PathBuf,
}

impl ProjectFormatter {
    /// Formatter with the default template and date format, rooted at
    /// [`find_project_root`].
    pub fn new() -> Self {
        Self {
            template: LogTemplate::parse(DEFAULT_TEMPLATE),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            project_root: find_project_root(),
        }
    }

    pub fn with_template(mut self, template: &str) -> Self {
        self.template = LogTemplate::parse(template);
        self
    }

    /// Sets the `strftime` pattern; an invalid pattern keeps the default.
    pub fn with_date_format(mut self, date_format: &str) -> Self {
        let valid = StrftimeItems::new(date_format).all(|item| !matches!(item, Item::Error));
        self.date_format = if valid {
            date_format.to_string()
        } else {
            DEFAULT_DATE_FORMAT.to_string()
        };
        self
    }

    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = root.into();
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn template(&self) -> &LogTemplate {
        &self.template
    }

    /// Dotted path of the record's source file relative to the project root.
    ///
    /// Absolute paths must lie under the root. Relative paths, which is what
    /// `file!()` yields under cargo, are taken as root-relative. Anything else falls
    /// back to the last segment of the module path, then to the target.
    pub fn relative_path(&self, record: &LogRecord<'_>) -> String {
        record
            .file
            .and_then(|file| self.dotted_relative(Path::new(file)))
            .unwrap_or_else(|| fallback_label(record).to_string())
    }

    fn dotted_relative(&self, file: &Path) -> Option<String> {
        let relative = if file.is_absolute() {
            file.strip_prefix(&self.project_root).ok()?
        } else {
            file
        };

        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str()?),
                Component::CurDir => {}
                _ => return None,
            }
        }
        let last = parts.pop()?;
        parts.push(last.strip_suffix(".rs").unwrap_or(last));
        Some(parts.join("."))
    }

    fn timestamp(&self, record: &LogRecord<'_>) -> String {
        let mut out = String::new();
        if write!(out, "{}", record.timestamp.format(&self.date_format)).is_err() {
            out.clear();
            let _ = write!(out, "{}", record.timestamp.format(DEFAULT_DATE_FORMAT));
        }
        out
    }
}

impl Default for ProjectFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl LogFormatter for ProjectFormatter {
    fn format(&self, record: &LogRecord<'_>) -> String {
        self.template.render(|field| match field {
            Field::Level => Cow::Borrowed(record.level.as_str()),
            Field::Timestamp => Cow::Owned(self.timestamp(record)),
            Field::Target => Cow::Borrowed(record.target),
            Field::Module => Cow::Borrowed(record.module_path.unwrap_or(record.target)),
            Field::RelativePath => Cow::Owned(self.relative_path(record)),
            Field::Context => dotted(record.context),
            Field::Function => dotted(record.function),
            Field::Line => record
                .line
                .map_or(Cow::Borrowed(""), |line| Cow::Owned(line.to_string())),
            Field::Message => Cow::Borrowed(record.message),
        })
    }
}

/// `Some("Name")` renders as `Name.`; absent or empty renders as nothing.
fn dotted(value: Option<&str>) -> Cow<'_, str> {
    match value {
        Some(name) if !name.is_empty() => Cow::Owned(format!("{name}.")),
        _ => Cow::Borrowed(""),
    }
}

fn fallback_label<'a>(record: &LogRecord<'a>) -> &'a str {
    record
        .module_path
        .and_then(|path| path.rsplit("::").next())
        .filter(|name| !name.is_empty())
        .unwrap_or(record.target)
}

/// Unqualified name of `T`, without module path or generic arguments.
///
/// Pass it as the `context` field to label a log line with the enclosing type:
///
/// ```
/// use langchain_llm::logging::short_type_name;
///
/// struct Worker<T>(T);
/// assert_eq!(short_type_name::<Worker<u8>>(), "Worker");
/// ```
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Nearest ancestor of the current directory that contains a project marker.
pub fn find_project_root() -> PathBuf {
    match env::current_dir() {
        Ok(cwd) => find_project_root_from(&cwd),
        Err(_) => PathBuf::from("."),
    }
}

/// Walks up from `start` to the first directory holding `Cargo.toml` or `.git`,
/// returning `start` itself when none does.
pub fn find_project_root_from(start: &Path) -> PathBuf {
    for dir in start.ancestors() {
        if PROJECT_MARKERS
            .iter()
            .any(|marker| dir.join(marker).exists())
        {
            return dir.to_path_buf();
        }
    }
    start.to_path_buf()
}
