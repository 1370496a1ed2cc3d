// packages/engine/src/interception/context.rs
//! Process-wide shim context: the proxy target and the activation gate
//!
//! A [`ShimContext`] is built once and passed by reference into every
//! interceptor. It is never mutated after construction.

use crate::observability::init_tracing;
use crate::tunnel::target::ProxyTarget;
use crate::utils::config::ShimConfig;
use crate::utils::errors::Result;
use std::time::Duration;
use tracing::{debug, warn};

/// Immutable interception context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShimContext {
    target: Option<ProxyTarget>,
    read_timeout: Option<Duration>,
}

impl ShimContext {
    pub fn new(target: Option<ProxyTarget>) -> Self {
        Self {
            target,
            read_timeout: None,
        }
    }

    /// A context that passes every call through
    pub fn inactive() -> Self {
        Self::default()
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Build the context from loaded configuration
    pub fn from_config(config: &ShimConfig) -> Self {
        let target = config.proxy.as_deref().and_then(ProxyTarget::parse);
        Self::new(target).with_read_timeout(config.read_timeout)
    }

    /// Read the environment, set up diagnostics and build the context
    ///
    /// Any configuration failure leaves the shim inactive.
    pub fn from_env() -> Self {
        Self::from_loaded(ShimConfig::load())
    }

    fn from_loaded(loaded: Result<ShimConfig>) -> Self {
        let (config, failure) = match loaded {
            Ok(config) => (config, None),
            Err(e) => {
                let fallback = ShimConfig {
                    debug: ShimConfig::debug_requested(),
                    ..Default::default()
                };
                (fallback, Some(e))
            }
        };

        init_tracing(config.debug, config.log_filter.as_deref());
        if let Some(e) = failure {
            warn!("Ignoring shim configuration: {}", e);
        }
        debug!("# app: {}", std::env::args_os().next().unwrap_or_default().to_string_lossy());
        debug!("# prx: {:?}", config.proxy);

        let context = Self::from_config(&config);
        match context.target {
            Some(target) => debug!("Tunneling through proxy at {}", target),
            None => debug!("No usable proxy target, interception disabled"),
        }
        context
    }

    /// The activation gate
    pub fn is_active(&self) -> bool {
        self.target.is_some()
    }

    pub fn target(&self) -> Option<ProxyTarget> {
        self.target
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }
}
