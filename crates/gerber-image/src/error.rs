use thiserror::Error;

/// Longest slice of a command echoed back in a parse error.
const MAX_ECHO_LEN: usize = 40;

#[derive(Error, Debug)]
pub enum GerberError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("execution error on line {line}: {message}")]
    Execution { line: usize, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GerberError {
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        GerberError::Parse {
            line,
            message: message.into(),
        }
    }

    pub fn execution(line: usize, message: impl Into<String>) -> Self {
        GerberError::Execution {
            line,
            message: message.into(),
        }
    }

    /// Parse error quoting the offending command text.
    pub fn unparsable(line: usize, text: &str, reason: &str) -> Self {
        GerberError::parse(line, format!("{reason}: \"{}\"", truncate(text)))
    }
}

/// Cut `text` down to [`MAX_ECHO_LEN`] characters, marking the cut.
pub fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_ECHO_LEN {
        text.to_string()
    } else {
        let head: String = text.chars().take(MAX_ECHO_LEN).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_text_untouched() {
        assert_eq!(truncate("ADD10C,1"), "ADD10C,1");
    }

    #[test]
    fn test_truncate_long_text() {
        let long = "X".repeat(100);
        let cut = truncate(&long);
        assert_eq!(cut.len(), MAX_ECHO_LEN + 3);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn test_unparsable_message_names_line_and_text() {
        let err = GerberError::unparsable(12, "QQ99", "unknown command");
        assert_eq!(
            err.to_string(),
            "parse error on line 12: unknown command: \"QQ99\""
        );
    }
}
