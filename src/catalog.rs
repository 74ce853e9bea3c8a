//! Asset catalog: shim packages and dependency roots.
//!
//! Bundles must be self-contained, so references to Node built-ins are
//! interposed with replacement packages shipped alongside the compiler.
//! The catalog maps each interposed bare specifier, including its
//! `node:`-prefixed alias, to the shim's location under the compiler's
//! `node_modules` tree.

use crate::paths;

/// Shim packages for Node built-ins.
///
/// Entries ending in `.js` point directly at the final file; every other
/// entry is a package root that resolution continues into.
const BUILTIN_SHIMS: &[(&str, &str)] = &[
    ("assert", "@frida/assert"),
    ("base64-js", "@frida/base64-js"),
    ("buffer", "@frida/buffer"),
    ("crypto", "@frida/crypto"),
    ("diagnostics_channel", "@frida/diagnostics_channel"),
    ("events", "@frida/events"),
    ("fs", "frida-fs"),
    ("http", "@frida/http"),
    ("https", "@frida/https"),
    ("net", "@frida/net"),
    ("os", "@frida/os"),
    ("path", "@frida/path"),
    ("process", "@frida/process"),
    ("punycode", "punycode/punycode.es6.js"),
    ("querystring", "@frida/querystring"),
    ("readable-stream", "@frida/stream"),
    ("stream", "@frida/stream"),
    ("string_decoder", "@frida/string_decoder"),
    ("timers", "@frida/timers"),
    ("tty", "@frida/tty"),
    ("url", "@frida/url"),
    ("util", "@frida/util"),
    ("vm", "@frida/vm"),
    ("zlib", "@frida/zlib"),
];

/// Resolved locations of the shim packages and the `node_modules` roots the
/// resolver searches.
#[derive(Debug)]
pub struct AssetCatalog {
    project_root: String,
    compiler_root: String,
}

impl AssetCatalog {
    /// Build a catalog for the given project and compiler roots, both in
    /// POSIX form without trailing separators.
    pub fn new(project_root: &str, compiler_root: &str) -> Self {
        AssetCatalog {
            project_root: project_root.trim_end_matches('/').to_string(),
            compiler_root: compiler_root.trim_end_matches('/').to_string(),
        }
    }

    /// The project root.
    pub fn project_root(&self) -> &str {
        &self.project_root
    }

    /// The compiler root.
    pub fn compiler_root(&self) -> &str {
        &self.compiler_root
    }

    /// The project's dependency root.
    pub fn project_node_modules(&self) -> String {
        paths::join(&self.project_root, "node_modules")
    }

    /// The compiler's dependency root, home of the shim packages.
    pub fn compiler_node_modules(&self) -> String {
        paths::join(&self.compiler_root, "node_modules")
    }

    /// Location of the compiler package inside the project's dependencies.
    pub fn project_local_compiler(&self) -> String {
        paths::join(&self.project_root, "node_modules/frida-compile")
    }

    /// Look up the shim root for a bare package name.
    ///
    /// `node:`-prefixed forms of the interposed names resolve to the same
    /// shim. Roots ending in `.js` are final files, not package directories.
    pub fn shim_root(&self, package: &str) -> Option<String> {
        let bare = package.strip_prefix("node:").unwrap_or(package);
        BUILTIN_SHIMS
            .iter()
            .find(|(name, _)| *name == bare)
            .map(|(_, shim)| paths::join(&self.compiler_node_modules(), shim))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_builtins_to_shim_roots() {
        let catalog = AssetCatalog::new("/p", "/opt/frida-compile");
        assert_eq!(
            catalog.shim_root("buffer").as_deref(),
            Some("/opt/frida-compile/node_modules/@frida/buffer")
        );
        assert_eq!(
            catalog.shim_root("node:buffer"),
            catalog.shim_root("buffer")
        );
        assert_eq!(catalog.shim_root("left-pad"), None);
    }

    #[test]
    fn file_shims_keep_their_extension() {
        let catalog = AssetCatalog::new("/p", "/opt/frida-compile");
        assert_eq!(
            catalog.shim_root("punycode").as_deref(),
            Some("/opt/frida-compile/node_modules/punycode/punycode.es6.js")
        );
    }
}
