// Parse error type with source context
// Carries line/column info, the offending lines, and a fix suggestion

use std::fmt;

/// Detailed parse error with location and context
#[derive(Debug, Clone)]
pub struct ParseError {
    /// Error message
    pub message: String,
    /// Line number (1-indexed)
    pub line: usize,
    /// Column number (1-indexed)
    pub column: usize,
    /// Surrounding source lines, rendered with a marker on the error line
    pub context: String,
    /// Optional suggestion for fixing the error
    pub suggestion: Option<String>,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
            context: String::new(),
            suggestion: None,
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(message, 0, 0)
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Render a context window around the error line.
    pub fn with_source_context(mut self, source: &str, context_lines: usize) -> Self {
        let lines: Vec<&str> = source.lines().collect();
        let start = self.line.saturating_sub(context_lines + 1);
        let end = (self.line + context_lines).min(lines.len());

        let mut context = String::new();
        for (i, line) in lines.iter().enumerate().take(end).skip(start) {
            let line_num = i + 1;
            let prefix = if line_num == self.line { ">" } else { " " };
            context.push_str(&format!("{} {:4} | {}\n", prefix, line_num, line));

            if line_num == self.line && self.column > 0 {
                let indicator = " ".repeat(self.column + 7) + "^";
                context.push_str(&format!("       | {}\n", indicator));
            }
        }

        self.context = context;
        self
    }

    /// Build from a serde_yaml error, cleaning up the message and attaching
    /// context plus a suggestion where a common mistake is recognizable.
    pub fn from_yaml_error(err: &serde_yaml::Error, source: &str) -> Self {
        let (line, column) = err
            .location()
            .map(|loc| (loc.line(), loc.column()))
            .unwrap_or((1, 1));

        let message = tidy_yaml_message(&err.to_string());
        let mut parsed = ParseError::new(message, line, column).with_source_context(source, 2);
        parsed.suggestion = suggest_fix(&err.to_string(), source, line);
        parsed
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "error: {}", self.message)?;
        writeln!(f, "  --> line {}:{}", self.line, self.column)?;

        if !self.context.is_empty() {
            writeln!(f)?;
            write!(f, "{}", self.context)?;
        }

        if let Some(suggestion) = &self.suggestion {
            writeln!(f)?;
            writeln!(f, "help: {}", suggestion)?;
        }

        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// Result type for parser operations
pub type ParseResult<T> = Result<T, ParseError>;

/// Clean up the more cryptic serde_yaml message patterns.
fn tidy_yaml_message(msg: &str) -> String {
    if let Some(field) = between(msg, "missing field `", "`") {
        return format!("missing required field '{}'", field);
    }
    if let Some(field) = between(msg, "unknown field `", "`") {
        return format!("unknown field '{}'", field);
    }
    if msg.contains("untagged enum StepAction") {
        return "step must be either a 'script:' step or a 'task:' step".to_string();
    }
    msg.to_string()
}

fn between(msg: &str, prefix: &str, suffix: &str) -> Option<String> {
    let start = msg.find(prefix)? + prefix.len();
    let end = msg[start..].find(suffix)? + start;
    Some(msg[start..end].to_string())
}

/// Suggest fixes for mistakes we see often in hand-written definitions.
fn suggest_fix(msg: &str, source: &str, line: usize) -> Option<String> {
    let lines: Vec<&str> = source.lines().collect();
    let error_line = lines.get(line.saturating_sub(1)).copied().unwrap_or("");

    if msg.contains("untagged enum StepAction") {
        return Some(
            "each step needs exactly one action key: 'script: <text>' or 'task: Kind@Version'"
                .to_string(),
        );
    }

    if error_line.starts_with('\t') {
        return Some(
            "YAML prefers spaces over tabs for indentation. Replace tabs with spaces.".to_string(),
        );
    }

    let typo_suggestions = [
        ("dependson", "dependsOn"),
        ("displayname", "displayName"),
        ("continueonerror", "continueOnError"),
        ("workingdirectory", "workingDirectory"),
        ("timeout:", "timeoutInMinutes"),
    ];

    let lower_line = error_line.to_lowercase();
    for (typo, correct) in typo_suggestions {
        if lower_line.contains(typo) && !error_line.contains(correct) {
            return Some(format!("did you mean '{}'?", correct));
        }
    }

    None
}
