//! Error kinds surfaced by the compiler and bundler.

use thiserror::Error;

/// Errors produced while compiling and bundling an agent.
///
/// Resolution failures and CommonJS detections are accumulated over a whole
/// bundling pass and reported together, so a single run surfaces every
/// actionable problem at once.
#[derive(Debug, Error)]
pub enum CompilerError {
    /// The front-end reported one or more error-severity diagnostics.
    ///
    /// The diagnostics themselves are delivered through the diagnostic
    /// callback; this variant only signals that the pass failed.
    #[error("compilation failed")]
    CompilationFailed,

    /// One or more module references could not be resolved to a file.
    #[error("unable to resolve: {}", .0.join(", "))]
    Unresolvable(Vec<String>),

    /// One or more reachable modules use CommonJS semantics.
    #[error("commonjs modules are not supported: {}", .0.join(", "))]
    CommonJsDetected(Vec<String>),

    /// A file the resolver believed to exist could not be read or written.
    #[error("{path}: {source}")]
    Io {
        /// POSIX-form path of the offending file.
        path: String,
        /// The underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A source file could not be parsed.
    #[error("{path}: {message}")]
    Parse {
        /// POSIX-form path of the offending file.
        path: String,
        /// The parser's message.
        message: String,
    },

    /// A JSON file routed into the module graph is not valid JSON.
    #[error("{path}: {message}")]
    Json {
        /// POSIX-form path of the offending file.
        path: String,
        /// The JSON parser's message.
        message: String,
    },

    /// The minifier rejected an asset.
    #[error("minification failed: {0}")]
    Minifier(String),

    /// A source map could not be produced or rewritten.
    #[error("source map error: {0}")]
    SourceMap(String),

    /// Base64 data in an inline source map URL could not be decoded.
    #[error("invalid base64 data: {0}")]
    Base64(String),

    /// The file watcher could not subscribe or deliver events.
    #[error("watch error: {0}")]
    Watch(String),
}

impl CompilerError {
    pub(crate) fn io(path: &str, source: std::io::Error) -> Self {
        CompilerError::Io {
            path: path.to_string(),
            source,
        }
    }
}
