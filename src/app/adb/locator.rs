use std::path::Path;

use crate::app::error::AppError;

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    if let Some(inner) = trimmed
        .strip_prefix('"')
        .and_then(|candidate| candidate.strip_suffix('"'))
    {
        return inner.trim().to_string();
    }
    if let Some(inner) = trimmed
        .strip_prefix('\'')
        .and_then(|candidate| candidate.strip_suffix('\''))
    {
        return inner.trim().to_string();
    }
    trimmed.to_string()
}

pub fn resolve_adb_program(configured: &str) -> String {
    let normalized = normalize_command_path(configured);
    if normalized.is_empty() {
        "adb".to_string()
    } else {
        normalized
    }
}

/// Missing adb is fatal before any session starts.
pub fn validate_adb_program(program: &str, trace_id: &str) -> Result<(), AppError> {
    if program.trim().is_empty() {
        return Err(AppError::dependency("adb command is empty", trace_id));
    }
    if program == "adb" {
        // Bare name resolves through PATH; the first real invocation surfaces absence.
        return Ok(());
    }
    let path = Path::new(program);
    if path.is_dir() {
        return Err(AppError::dependency(
            "adb path must point to an executable file",
            trace_id,
        ));
    }
    if !path.exists() {
        return Err(AppError::dependency(
            "adb executable not found at the configured path",
            trace_id,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_wrapping_quotes() {
        assert_eq!(
            normalize_command_path("  \"/opt/platform-tools/adb\"  "),
            "/opt/platform-tools/adb"
        );
        assert_eq!(
            normalize_command_path("  '/opt/platform-tools/adb'  "),
            "/opt/platform-tools/adb"
        );
    }

    #[test]
    fn resolves_empty_to_default_adb() {
        assert_eq!(resolve_adb_program(""), "adb");
        assert_eq!(resolve_adb_program("   "), "adb");
    }

    #[test]
    fn rejects_nonexistent_path_as_dependency_error() {
        let err = validate_adb_program("/this/path/should/not/exist/adb", "t").unwrap_err();
        assert_eq!(err.code, "ERR_DEPENDENCY");
        assert!(err.error.to_lowercase().contains("not found"));
    }
}
