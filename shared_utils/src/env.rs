use thiserror::Error;

/// An environment variable required by the application is not set (or is blank).
#[derive(Debug, Error)]
#[error("Missing environment variable: {0}")]
pub struct MissingEnvVarError(pub String);

/// Reads a required environment variable.
///
/// Blank values count as missing, so `DATABASE_URL=` in a shell profile fails
/// loudly instead of producing an empty path downstream.
pub fn get_env_var(name: &str) -> Result<String, MissingEnvVarError> {
    get_env_override(name).ok_or_else(|| MissingEnvVarError(name.to_string()))
}

/// Reads an optional environment override, trimming whitespace.
///
/// Returns `None` when the variable is unset, blank, or not valid unicode.
pub fn get_env_override(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
