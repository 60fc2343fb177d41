use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub error: String,
    pub code: String,
    pub trace_id: String,
}

impl AppError {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            error: message.into(),
            code: code.into(),
            trace_id: trace_id.into(),
        }
    }

    /// Bad input or a failed precondition (package not installed, malformed mission).
    pub fn validation(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new("ERR_VALIDATION", message, trace_id)
    }

    /// A required external tool is missing (adb not on the path).
    pub fn dependency(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new("ERR_DEPENDENCY", message, trace_id)
    }

    /// Sample store I/O failure. Always fatal for the session.
    pub fn storage(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new("ERR_STORAGE", message, trace_id)
    }

    pub fn system(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new("ERR_SYSTEM", message, trace_id)
    }

    pub fn from_sqlite(err: rusqlite::Error, trace_id: impl Into<String>) -> Self {
        Self::storage(err.to_string(), trace_id)
    }

    pub fn is_storage(&self) -> bool {
        self.code == "ERR_STORAGE"
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.code)
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_codes() {
        assert_eq!(AppError::validation("bad", "t").code, "ERR_VALIDATION");
        assert_eq!(AppError::dependency("gone", "t").code, "ERR_DEPENDENCY");
        assert_eq!(AppError::storage("disk", "t").code, "ERR_STORAGE");
        assert_eq!(AppError::system("boom", "t").code, "ERR_SYSTEM");
    }

    #[test]
    fn display_includes_code() {
        let err = AppError::storage("insert failed", "trace-1");
        assert_eq!(err.to_string(), "insert failed (ERR_STORAGE)");
        assert!(err.is_storage());
    }
}
