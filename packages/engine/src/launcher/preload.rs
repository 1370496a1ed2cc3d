// packages/engine/src/launcher/preload.rs
//! Preload library discovery and child environment
//!
//! The library is looked up in order:
//! - an explicit path
//! - `TUNNELHOOK_LIBRARY`
//! - the launcher's own directory
//! - standard install locations

use crate::tunnel::target::ProxyTarget;
use crate::utils::config::{DEBUG_VAR, PROXY_VAR, TIMEOUT_VAR};
use crate::utils::errors::{HookError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Variable that overrides library discovery
pub const LIBRARY_ENV: &str = "TUNNELHOOK_LIBRARY";

/// File name of the injectable library
#[cfg(target_os = "macos")]
pub const LIBRARY_FILE: &str = "libtunnelhook.dylib";
#[cfg(not(target_os = "macos"))]
pub const LIBRARY_FILE: &str = "libtunnelhook.so";

/// Variable the dynamic linker reads injected libraries from
#[cfg(target_os = "macos")]
pub const INJECT_VAR: &str = "DYLD_INSERT_LIBRARIES";
#[cfg(not(target_os = "macos"))]
pub const INJECT_VAR: &str = "LD_PRELOAD";

const STANDARD_DIRS: [&str; 3] = ["/usr/local/lib/tunnelhook", "/usr/lib/tunnelhook", "./target/release"];

/// Injection configuration
#[derive(Debug, Clone, Default)]
pub struct PreloadConfig {
    /// Proxy URL handed to the shim
    pub proxy: String,

    /// Enable shim diagnostics in the child
    pub debug: bool,

    /// Read deadline for proxy responses
    pub read_timeout: Option<Duration>,

    /// Explicit library path
    pub library_path: Option<PathBuf>,
}

/// Builds the environment that injects the shim into a child process
pub struct PreloadInjector {
    config: PreloadConfig,
}

impl PreloadInjector {
    pub fn new(config: PreloadConfig) -> Self {
        Self { config }
    }

    /// Whether the shim will activate with this proxy URL
    pub fn is_active(&self) -> bool {
        ProxyTarget::parse(&self.config.proxy).is_some()
    }

    /// Locate the library using the process environment
    pub fn locate_library(&self) -> Result<PathBuf> {
        let from_env = std::env::var_os(LIBRARY_ENV).map(PathBuf::from);
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        self.locate_library_in(from_env, exe_dir)
    }

    /// Locate the library from explicit discovery inputs
    pub fn locate_library_in(&self, from_env: Option<PathBuf>, exe_dir: Option<PathBuf>) -> Result<PathBuf> {
        if let Some(path) = &self.config.library_path {
            return if path.is_file() {
                debug!("Using preload library: {:?}", path);
                Ok(path.clone())
            } else {
                Err(HookError::LibraryNotFound(format!("{:?}", path)))
            };
        }

        let candidates = from_env
            .into_iter()
            .chain(exe_dir.map(|dir| dir.join(LIBRARY_FILE)))
            .chain(STANDARD_DIRS.iter().map(|dir| Path::new(dir).join(LIBRARY_FILE)));

        for candidate in candidates {
            if candidate.is_file() {
                debug!("Found preload library at: {:?}", candidate);
                return Ok(candidate);
            }
        }

        warn!("No {} found", LIBRARY_FILE);
        Err(HookError::LibraryNotFound(LIBRARY_FILE.to_string()))
    }

    /// Environment variables for the child process
    ///
    /// `existing_preload` is the current value of the injection variable; the
    /// shim is put in front of it.
    pub fn get_env_vars(&self, library: &Path, existing_preload: Option<&str>) -> Vec<(String, String)> {
        let library = library.to_string_lossy().into_owned();
        let preload = match existing_preload.filter(|value| !value.is_empty()) {
            Some(existing) => format!("{}:{}", library, existing),
            None => library,
        };

        let mut env_vars = vec![
            (INJECT_VAR.to_string(), preload),
            (PROXY_VAR.to_string(), self.config.proxy.clone()),
        ];

        if self.config.debug {
            env_vars.push((DEBUG_VAR.to_string(), "1".to_string()));
        }

        if let Some(timeout) = self.config.read_timeout {
            env_vars.push((TIMEOUT_VAR.to_string(), timeout.as_millis().to_string()));
        }

        env_vars
    }
}
