// packages/engine/src/utils/config.rs
//! Environment configuration for the shim
//!
//! Settings are read once per process from `SSHTUNNEL_*` variables:
//! - `SSHTUNNEL_PROXY`: proxy URL (`http://localhost:<port>` or `http://127.0.0.1:<port>`)
//! - `SSHTUNNEL_DEBUG`: `1` enables diagnostics on stderr
//! - `SSHTUNNEL_TIMEOUT_MS`: optional read deadline for proxy responses
//! - `SSHTUNNEL_LOG`: optional tracing filter directive
//!
//! Every field is parsed leniently. A bad value disables that one setting and
//! never the host program. Variables whose name or value is not UTF-8 are
//! skipped, whoever owns them.

use crate::utils::errors::Result;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, Map};
use serde::Deserialize;
use std::ffi::OsString;
use std::time::Duration;

/// Prefix shared by every variable the shim reads
pub const ENV_PREFIX: &str = "SSHTUNNEL";

/// Variable carrying the proxy URL
pub const PROXY_VAR: &str = "SSHTUNNEL_PROXY";

/// Variable enabling debug output
pub const DEBUG_VAR: &str = "SSHTUNNEL_DEBUG";

/// Variable carrying the read deadline in milliseconds
pub const TIMEOUT_VAR: &str = "SSHTUNNEL_TIMEOUT_MS";

/// Variable overriding the tracing filter
pub const LOG_VAR: &str = "SSHTUNNEL_LOG";

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    proxy: Option<String>,
    debug: Option<String>,
    timeout_ms: Option<String>,
    log: Option<String>,
}

/// Shim configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShimConfig {
    /// Raw proxy URL, validated later by `ProxyTarget::parse`
    pub proxy: Option<String>,

    /// Emit diagnostics to stderr
    pub debug: bool,

    /// Upper bound for a whole proxy response; `None` waits forever
    pub read_timeout: Option<Duration>,

    /// Tracing filter directive used when debug output is on
    pub log_filter: Option<String>,
}

impl ShimConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::from_vars(std::env::vars_os())
    }

    /// Load configuration from an explicit set of environment variables
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        let prefix = format!("{}_", ENV_PREFIX);
        let source: Map<String, String> = vars
            .into_iter()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .filter(|(key, _)| key.starts_with(&prefix))
            .collect();

        Self::from_builder(Config::builder().add_source(Environment::with_prefix(ENV_PREFIX).source(Some(source))))
    }

    /// Whether `SSHTUNNEL_DEBUG=1` is set, read without the config layer
    pub fn debug_requested() -> bool {
        std::env::var_os(DEBUG_VAR).is_some_and(|value| value.to_str() == Some("1"))
    }

    /// Load configuration from an arbitrary builder (overrides, files, env)
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let raw: RawSettings = builder.build()?.try_deserialize()?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawSettings) -> Self {
        let read_timeout = raw
            .timeout_ms
            .as_deref()
            .and_then(|ms| ms.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        Self {
            proxy: raw.proxy,
            debug: raw.debug.as_deref() == Some("1"),
            read_timeout,
            log_filter: raw.log.filter(|f| !f.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_with(pairs: &[(&str, &str)]) -> ShimConfig {
        let mut builder = Config::builder();
        for (key, value) in pairs {
            builder = builder.set_override(*key, *value).unwrap();
        }
        ShimConfig::from_builder(builder).unwrap()
    }

    #[test]
    fn test_empty_config_is_inactive() {
        let config = load_with(&[]);
        assert_eq!(config, ShimConfig::default());
        assert!(config.proxy.is_none());
        assert!(!config.debug);
    }

    #[test]
    fn test_full_config() {
        let config = load_with(&[
            ("proxy", "http://localhost:8080"),
            ("debug", "1"),
            ("timeout_ms", "250"),
            ("log", "tunnelhook_engine=trace"),
        ]);

        assert_eq!(config.proxy.as_deref(), Some("http://localhost:8080"));
        assert!(config.debug);
        assert_eq!(config.read_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.log_filter.as_deref(), Some("tunnelhook_engine=trace"));
    }

    #[test]
    fn test_debug_requires_exact_one() {
        assert!(!load_with(&[("debug", "true")]).debug);
        assert!(!load_with(&[("debug", "0")]).debug);
        assert!(load_with(&[("debug", "1")]).debug);
    }

    fn os_var(key: &[u8], value: &[u8]) -> (OsString, OsString) {
        use std::os::unix::ffi::OsStrExt;
        (
            std::ffi::OsStr::from_bytes(key).to_os_string(),
            std::ffi::OsStr::from_bytes(value).to_os_string(),
        )
    }

    #[test]
    fn test_from_vars() {
        let config = ShimConfig::from_vars(vec![
            os_var(b"SSHTUNNEL_PROXY", b"http://localhost:8080"),
            os_var(b"SSHTUNNEL_TIMEOUT_MS", b"750"),
            os_var(b"PATH", b"/usr/bin"),
        ])
        .unwrap();

        assert_eq!(config.proxy.as_deref(), Some("http://localhost:8080"));
        assert_eq!(config.read_timeout, Some(Duration::from_millis(750)));
        assert!(!config.debug);
    }

    #[test]
    fn test_non_utf8_variables_are_skipped() {
        let config = ShimConfig::from_vars(vec![
            os_var(b"UNRELATED", b"\xff\xfe"),
            os_var(b"\xff\xfe", b"x"),
            os_var(b"SSHTUNNEL_PROXY", b"http://localhost:8080"),
            os_var(b"SSHTUNNEL_LOG", b"\xc3\x28"),
        ])
        .unwrap();

        assert_eq!(config.proxy.as_deref(), Some("http://localhost:8080"));
        assert_eq!(config.log_filter, None);
    }

    #[test]
    fn test_load_with_non_utf8_process_variable() {
        use std::os::unix::ffi::OsStrExt;
        let name = "TUNNELHOOK_CONFIG_TEST_NON_UTF8";
        std::env::set_var(name, std::ffi::OsStr::from_bytes(b"\xff\xfe"));

        let loaded = std::panic::catch_unwind(ShimConfig::load);
        std::env::remove_var(name);

        assert!(loaded.expect("loading must not panic").is_ok());
    }

    #[test]
    fn test_bad_timeout_disables_only_timeout() {
        let config = load_with(&[("proxy", "http://localhost:9000"), ("timeout_ms", "soon")]);
        assert_eq!(config.read_timeout, None);
        assert_eq!(config.proxy.as_deref(), Some("http://localhost:9000"));

        assert_eq!(load_with(&[("timeout_ms", "0")]).read_timeout, None);
    }
}
