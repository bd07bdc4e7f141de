use thiserror::Error;
use tracing::{info, warn};
use url::Url;

pub const DEFAULT_API_BASE: &str = "http://localhost:8080";

/// Base URL baked in at build time, if any.
pub const BUILD_API_BASE: Option<&str> = option_env!("PCICHAT_API_BASE_URL");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid backend URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Which upstream pipeline a question is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Live,
    Mock,
}

impl Backend {
    pub fn path(self) -> &'static str {
        match self {
            Backend::Live => "/ask_full",
            Backend::Mock => "/ask_mock_full",
        }
    }
}

/// Resolved backend base URL, without a trailing slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiBase(String);

impl ApiBase {
    /// Precedence: explicit override, then the build-time value, then the
    /// local default. When `origin` is https and the backend is plain http
    /// on the same host, the backend is upgraded to https.
    pub fn resolve(
        explicit: Option<&str>,
        build: Option<&str>,
        origin: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let explicit = non_empty(explicit);
        let build = non_empty(build);
        let raw = explicit.or(build).unwrap_or(DEFAULT_API_BASE);

        if explicit.is_none() && build.is_none() {
            warn!(base = raw, "no backend configured; using default");
        }

        let mut base = strip_trailing_slash(raw).to_string();
        if let Some(origin) = non_empty(origin) {
            base = upgrade_for_origin(&base, origin)?;
        }

        info!(base = %base, "resolved backend base URL");
        Ok(Self(base))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn join(&self, path: &str) -> String {
        format!("{}/{}", self.0, path.trim_start_matches('/'))
    }
}

fn upgrade_for_origin(base: &str, origin: &str) -> Result<String, ConfigError> {
    let page = Url::parse(origin).map_err(|source| ConfigError::InvalidUrl {
        url: origin.to_string(),
        source,
    })?;
    let mut api = page.join(base).map_err(|source| ConfigError::InvalidUrl {
        url: base.to_string(),
        source,
    })?;

    if page.scheme() == "https" && api.scheme() == "http" && page.host_str() == api.host_str() {
        // Only fails for schemes that cannot carry a host, which http never is.
        if api.set_scheme("https").is_ok() {
            return Ok(strip_trailing_slash(api.as_str()).to_string());
        }
    }

    Ok(base.to_string())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != "undefined")
}

fn strip_trailing_slash(value: &str) -> &str {
    value.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_beats_build_value() {
        let base = ApiBase::resolve(Some("http://a:1"), Some("http://b:2"), None).unwrap();
        assert_eq!(base.as_str(), "http://a:1");
    }

    #[test]
    fn build_value_beats_default() {
        let base = ApiBase::resolve(None, Some("https://api.example.com/"), None).unwrap();
        assert_eq!(base.as_str(), "https://api.example.com");
    }

    #[test]
    fn blank_values_fall_through_to_default() {
        let base = ApiBase::resolve(Some("  "), Some("undefined"), None).unwrap();
        assert_eq!(base.as_str(), DEFAULT_API_BASE);
    }

    #[test]
    fn join_avoids_double_slashes() {
        let base = ApiBase::resolve(Some("http://host:8080///"), None, None).unwrap();
        assert_eq!(base.join("/ask_full"), "http://host:8080/ask_full");
        assert_eq!(base.join("ask_mock_full"), "http://host:8080/ask_mock_full");
    }

    #[test]
    fn upgrades_http_on_same_host_under_https_origin() {
        let base = ApiBase::resolve(
            Some("http://app.example.com/api/"),
            None,
            Some("https://app.example.com/chat"),
        )
        .unwrap();
        assert_eq!(base.as_str(), "https://app.example.com/api");
    }

    #[test]
    fn leaves_other_hosts_alone() {
        let base = ApiBase::resolve(
            Some("http://backend.internal:8080"),
            None,
            Some("https://app.example.com"),
        )
        .unwrap();
        assert_eq!(base.as_str(), "http://backend.internal:8080");
    }

    #[test]
    fn http_origin_does_not_upgrade() {
        let base = ApiBase::resolve(
            Some("http://app.example.com:8080"),
            None,
            Some("http://app.example.com"),
        )
        .unwrap();
        assert_eq!(base.as_str(), "http://app.example.com:8080");
    }

    #[test]
    fn invalid_origin_is_an_error() {
        let err = ApiBase::resolve(Some("http://a"), None, Some("not a url")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn backend_paths() {
        assert_eq!(Backend::Live.path(), "/ask_full");
        assert_eq!(Backend::Mock.path(), "/ask_mock_full");
    }
}
