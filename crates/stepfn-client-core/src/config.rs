pub const DEFAULT_API_BASE_URL: &str = "https://api.stepfn.dev";
pub const DEFAULT_SHARE_ORIGIN: &str = "https://stepfn.dev";
pub const ENV_API_BASE_URL: &str = "STEPFN_API_BASE_URL";
pub const ENV_EXECUTE_PATH: &str = "STEPFN_EXECUTE_PATH";
pub const API_BASE_SOURCE_DEFAULT: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("base url must not be empty")]
    EmptyBaseUrl,
    #[error("base url must use http:// or https:// and include a host")]
    InvalidBaseUrl,
}

/// Where the execution service accepts execute requests. Deployments differ:
/// the API gateway exposes `/execute`, the single-function deployment reuses `/sfn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutePath {
    #[default]
    Execute,
    Sfn,
}

impl ExecutePath {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Execute => "/execute",
            Self::Sfn => "/sfn",
        }
    }
}

#[must_use]
pub fn parse_execute_path(raw: &str) -> Option<ExecutePath> {
    let normalized = raw.trim().trim_matches('/').to_ascii_lowercase();
    match normalized.as_str() {
        "execute" => Some(ExecutePath::Execute),
        "sfn" => Some(ExecutePath::Sfn),
        _ => None,
    }
}

pub fn resolve_api_base_url() -> Result<(String, &'static str), ConfigError> {
    if let Some(base_url) = env_setting(ENV_API_BASE_URL) {
        return normalize_base_url(&base_url).map(|normalized| (normalized, ENV_API_BASE_URL));
    }
    normalize_base_url(DEFAULT_API_BASE_URL).map(|normalized| (normalized, API_BASE_SOURCE_DEFAULT))
}

#[must_use]
pub fn resolve_execute_path() -> (ExecutePath, String) {
    if let Some(raw) = env_setting(ENV_EXECUTE_PATH) {
        if let Some(path) = parse_execute_path(&raw) {
            return (path, ENV_EXECUTE_PATH.to_string());
        }
        return (
            ExecutePath::default(),
            format!(
                "{}:invalid({raw})->{}",
                ENV_EXECUTE_PATH,
                ExecutePath::default().as_str()
            ),
        );
    }

    (ExecutePath::default(), API_BASE_SOURCE_DEFAULT.to_string())
}

/// Trims the base URL and drops trailing slashes so endpoint paths such as
/// `/sfn?id=` can be appended directly. A query or fragment on the base would
/// swallow those paths, so both are rejected.
pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let base = raw.trim().trim_end_matches('/');
    if base.is_empty() {
        return Err(ConfigError::EmptyBaseUrl);
    }
    let authority = ["https://", "http://"]
        .iter()
        .find_map(|scheme| base.strip_prefix(scheme))
        .ok_or(ConfigError::InvalidBaseUrl)?;
    let host = authority.split('/').next().unwrap_or_default();
    if host.trim().is_empty() || base.contains(['?', '#']) {
        return Err(ConfigError::InvalidBaseUrl);
    }
    Ok(base.to_string())
}

fn env_setting(key: &str) -> Option<String> {
    let value = std::env::var(key).ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}
