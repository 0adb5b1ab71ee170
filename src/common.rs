use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("Binary inspection tool not available: {0}")]
    ToolUnavailable(String),

    #[error("File not found: {0:?}")]
    PathNotFound(PathBuf),

    #[error("Not a PE image: {0:?}")]
    NotAnImage(PathBuf),

    #[error("Unsupported host architecture: {0}")]
    UnsupportedHost(String),

    #[error("{tool} failed on {path:?}: {message}")]
    ToolFailed {
        tool: String,
        path: PathBuf,
        message: String,
    },

    #[error("Tool output parse error: {0}")]
    ParseError(String),

    #[error("Lookup context building error: {0}")]
    ContextDeductionError(String),

    #[error("Scan error: {0}")]
    ScanError(String),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    PatternError(#[from] glob::PatternError),
}

impl LookupError {
    /// Errors that abort an analysis before the dependency walk starts
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ToolUnavailable(_)
                | Self::PathNotFound(_)
                | Self::NotAnImage(_)
                | Self::UnsupportedHost(_)
        )
    }
}

/// Strip the verbatim prefix that canonicalize() adds on Windows
pub fn decanonicalize(s: &str) -> String {
    s.strip_prefix(r"\\?\").unwrap_or(s).to_owned()
}

pub fn path_to_string<P: AsRef<Path>>(p: P) -> String {
    p.as_ref().to_string_lossy().into_owned()
}

pub fn readable_canonical_path<P: AsRef<Path>>(p: P) -> Result<String, LookupError> {
    Ok(decanonicalize(&path_to_string(fs_err::canonicalize(p)?)))
}

/// Anchor a relative path to the current directory, without touching the path itself
pub fn absolute_path<P: AsRef<Path>>(p: P) -> Result<PathBuf, LookupError> {
    let p = p.as_ref();
    if p.is_absolute() {
        Ok(p.to_owned())
    } else {
        Ok(std::env::current_dir()?.join(p))
    }
}

/// Key used to compare paths the way the Windows filesystem does
pub(crate) fn path_key<P: AsRef<Path>>(p: P) -> String {
    path_to_string(p).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decanonicalize_strips_verbatim_prefix() {
        assert_eq!(decanonicalize(r"\\?\C:\Windows"), r"C:\Windows");
        assert_eq!(decanonicalize(r"C:\Windows"), r"C:\Windows");
    }

    #[test]
    fn fatal_errors() {
        assert!(LookupError::ToolUnavailable("dumpbin".to_owned()).is_fatal());
        assert!(LookupError::PathNotFound(PathBuf::from("a.exe")).is_fatal());
        assert!(!LookupError::ParseError("x".to_owned()).is_fatal());
        assert!(!LookupError::ToolFailed {
            tool: "dumpbin".to_owned(),
            path: PathBuf::from("a.dll"),
            message: "exit code 1".to_owned(),
        }
        .is_fatal());
    }
}
