//! Compiler and bundler for instrumentation agents.
//!
//! Takes a TypeScript or JavaScript entrypoint, closes the module graph over
//! its static and dynamic dependencies, and emits one self-describing bundle
//! artifact an instrumentation runtime can load. A watch mode layers
//! incremental recompilation on the same core.
#![warn(missing_docs)]

pub mod bundle;
pub mod bundler;
pub mod catalog;
pub mod cli;
pub mod error;
pub mod frontend;
pub mod json_module;
pub mod manifest;
pub mod minifier;
pub mod paths;
pub mod resolver;
pub mod scanner;
pub mod system;
pub mod watch;

pub use bundle::Bundle;
pub use bundler::{Bundler, Options};
pub use error::CompilerError;
pub use frontend::{Diagnostic, Severity};
pub use system::{FsEvent, HostSystem, MemorySystem, System};
pub use watch::{WatchNotification, WatchSession};

/// Compile an agent once, yielding its bundle.
///
/// Diagnostics are delivered through the callback as they are produced; any
/// error-severity diagnostic fails the pass with
/// [`CompilerError::CompilationFailed`].
pub fn compile(
    sys: &dyn System,
    options: Options,
    diagnostics: &mut dyn FnMut(Diagnostic),
) -> Result<Bundle, CompilerError> {
    Bundler::new(sys, options).bundle(diagnostics)
}
