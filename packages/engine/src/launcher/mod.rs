// packages/engine/src/launcher/mod.rs
//! Launching programs with the shim injected
//!
//! - **Preload**: locating the injectable library and building the child's
//!   environment (`LD_PRELOAD` / `DYLD_INSERT_LIBRARIES` plus `SSHTUNNEL_*`)
//! - **Process**: spawning the child, forwarding Ctrl-C, reporting its exit code

pub mod preload;
pub mod process;

// Re-export commonly used types
pub use preload::{PreloadConfig, PreloadInjector};
pub use process::{LaunchSpec, ProcessLauncher};
