use std::fmt::Write;

/// Field a template placeholder can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Field {
    Level,
    Timestamp,
    Target,
    Module,
    RelativePath,
    Context,
    Function,
    Line,
    Message,
}

impl Field {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "level" => Field::Level,
            "timestamp" => Field::Timestamp,
            "target" => Field::Target,
            "module" => Field::Module,
            "relative_path" => Field::RelativePath,
            "context" => Field::Context,
            "function" => Field::Function,
            "line" => Field::Line,
            "message" => Field::Message,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field {
        field: Field,
        align: Option<(Align, usize)>,
    },
}

/// Parsed log line template.
///
/// Placeholders are `{field}`, `{field:<N}` (pad right to `N`) and `{field:>N}` (pad
/// left). `{{` and `}}` produce literal braces. Placeholders naming an unknown field
/// are kept verbatim, so a typo shows up in the output instead of failing.
///
/// ```
/// use langchain_llm::logging::LogTemplate;
///
/// let template = LogTemplate::parse("[{level:<5}] {message} {{ok}} {nope}");
/// assert_eq!(template.placeholder_count(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl LogTemplate {
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(pos) = rest.find(['{', '}']) {
            literal.push_str(&rest[..pos]);
            let tail = &rest[pos..];
            if let Some(after) = tail.strip_prefix("{{") {
                literal.push('{');
                rest = after;
            } else if let Some(after) = tail.strip_prefix("}}") {
                literal.push('}');
                rest = after;
            } else if tail.starts_with('}') {
                literal.push('}');
                rest = &tail[1..];
            } else {
                let Some(end) = tail.find('}') else {
                    literal.push_str(tail);
                    rest = "";
                    break;
                };
                let inner = &tail[1..end];
                match parse_placeholder(inner) {
                    Some((field, align)) => {
                        if !literal.is_empty() {
                            segments.push(Segment::Literal(std::mem::take(&mut literal)));
                        }
                        segments.push(Segment::Field { field, align });
                    }
                    None => literal.push_str(&tail[..=end]),
                }
                rest = &tail[end + 1..];
            }
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Self {
            source: source.to_string(),
            segments,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Number of recognised placeholders.
    pub fn placeholder_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|segment| matches!(segment, Segment::Field { .. }))
            .count()
    }

    /// Renders the template, asking `value` for each placeholder's text.
    pub(crate) fn render<'v>(&self, mut value: impl FnMut(Field) -> std::borrow::Cow<'v, str>) -> String {
        let mut out = String::with_capacity(self.source.len() + 64);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field { field, align } => {
                    let text = value(*field);
                    // Writing into a String cannot fail.
                    let _ = match align {
                        Some((Align::Left, width)) => write!(out, "{text:<width$}"),
                        Some((Align::Right, width)) => write!(out, "{text:>width$}"),
                        None => write!(out, "{text}"),
                    };
                }
            }
        }
        out
    }
}

fn parse_placeholder(inner: &str) -> Option<(Field, Option<(Align, usize)>)> {
    let (name, spec) = match inner.split_once(':') {
        Some((name, spec)) => (name, Some(spec)),
        None => (inner, None),
    };
    let field = Field::parse(name.trim())?;
    let align = match spec {
        None => None,
        Some(spec) => {
            let (align, width) = if let Some(width) = spec.strip_prefix('<') {
                (Align::Left, width)
            } else if let Some(width) = spec.strip_prefix('>') {
                (Align::Right, width)
            } else {
                (Align::Left, spec)
            };
            // Format widths above u16::MAX panic at render time.
            let width: u16 = width.parse().ok()?;
            Some((align, usize::from(width)))
        }
    };
    Some((field, align))
}
