// ==============================================================================
// Error and Warning Types
// ==============================================================================
//
// Every failure in the compiler funnels through `IdlError`. Parse failures carry
// a `ParseDiagnostic` with the offending source text, a byte span, and the
// 1-based line number, so `miette` can render them with a labelled snippet.
// Non-fatal problems become `Warning`s, which are collected on the parser
// session and handed to the caller as `miette::Report`s.

use std::path::PathBuf;

use miette::{LabeledSpan, NamedSource, Severity, SourceSpan};

/// A parse error with source location information for rich diagnostics.
#[derive(Debug)]
pub struct ParseDiagnostic {
    pub src: NamedSource<String>,
    pub span: SourceSpan,
    /// 1-based line of the token the error was raised on.
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ParseDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.src.name(), self.line, self.message)
    }
}

impl std::error::Error for ParseDiagnostic {}

impl miette::Diagnostic for ParseDiagnostic {
    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        Some(&self.src)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        Some(Box::new(std::iter::once(LabeledSpan::new_with_span(
            Some(self.message.clone()),
            self.span,
        ))))
    }
}

/// A non-fatal diagnostic, rendered by `miette` with `Severity::Warning`.
#[derive(Debug)]
pub struct Warning {
    pub src: NamedSource<String>,
    pub span: SourceSpan,
    pub message: String,
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Warning {}

impl miette::Diagnostic for Warning {
    fn severity(&self) -> Option<Severity> {
        Some(Severity::Warning)
    }

    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        Some(&self.src)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        Some(Box::new(std::iter::once(LabeledSpan::new_with_span(
            None,
            self.span,
        ))))
    }
}

/// The single error channel for schema and data compilation.
#[derive(Debug)]
pub enum IdlError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(Box<ParseDiagnostic>),
    Other(String),
}

pub type Result<T> = std::result::Result<T, IdlError>;

impl std::fmt::Display for IdlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdlError::Io { path, source } => write!(f, "read {}: {source}", path.display()),
            IdlError::Parse(diag) => write!(f, "{diag}"),
            IdlError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for IdlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IdlError::Io { source, .. } => Some(source),
            IdlError::Parse(_) | IdlError::Other(_) => None,
        }
    }
}

// Parse errors forward their source snippet and label so that wrapping a
// `ParseDiagnostic` in `IdlError` does not lose the rich rendering.
impl miette::Diagnostic for IdlError {
    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        match self {
            IdlError::Parse(diag) => diag.source_code(),
            IdlError::Io { .. } | IdlError::Other(_) => None,
        }
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        match self {
            IdlError::Parse(diag) => diag.labels(),
            IdlError::Io { .. } | IdlError::Other(_) => None,
        }
    }
}

impl From<ParseDiagnostic> for IdlError {
    fn from(diag: ParseDiagnostic) -> Self {
        IdlError::Parse(Box::new(diag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagnostic() -> ParseDiagnostic {
        ParseDiagnostic {
            src: NamedSource::new("monster.fbs", "table T { a:intt; }".to_string()),
            span: (12, 4).into(),
            line: 1,
            message: "type referenced but not defined: intt".to_string(),
        }
    }

    #[test]
    fn display_includes_file_and_line() {
        assert_eq!(
            diagnostic().to_string(),
            "monster.fbs:1: type referenced but not defined: intt"
        );
    }

    #[test]
    fn idl_error_forwards_source_code() {
        use miette::Diagnostic;

        let err = IdlError::from(diagnostic());
        assert!(err.source_code().is_some());
        assert_eq!(err.labels().map(|l| l.count()), Some(1));
        assert!(IdlError::Other("x".into()).source_code().is_none());
    }

    #[test]
    fn warnings_have_warning_severity() {
        use miette::Diagnostic;

        let w = Warning {
            src: NamedSource::new("<input>", String::new()),
            span: (0, 0).into(),
            message: "skipping unknown field: hp".to_string(),
        };
        assert_eq!(w.severity(), Some(Severity::Warning));
    }
}
