//! Compiler front-end contract.
//!
//! The bundler drives a front-end through a narrow capability set: build a
//! program from an entrypoint, emit JavaScript (plus source maps) through a
//! write hook while applying `after` AST passes, and report diagnostics by
//! severity. [`SwcFrontEnd`] is the swc-based implementation shipped with
//! the crate.

use std::fmt;

use swc_core::ecma::ast::{EsVersion, Expr, Lit, Module, ModuleItem, Stmt};

use crate::error::CompilerError;
use crate::paths;
use crate::system::System;

mod swc;

pub use self::swc::SwcFrontEnd;
pub(crate) use self::swc::{parse_source, print_module};

/// Diagnostic severity classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Fails the pass in one-shot mode.
    Error,
    /// Reported but non-fatal.
    Warning,
}

/// A front-end diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Severity class.
    pub severity: Severity,
    /// POSIX path of the offending file, when known.
    pub file: Option<String>,
    /// One-based line number, when a position is available.
    pub line: Option<usize>,
    /// One-based column number, when a position is available.
    pub column: Option<usize>,
    /// Human-readable message.
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match (&self.file, self.line, self.column) {
            (Some(file), Some(line), Some(column)) => {
                write!(f, "{}:{}:{}: {}: {}", file, line, column, severity, self.message)
            }
            (Some(file), _, _) => write!(f, "{}: {}: {}", file, severity, self.message),
            _ => write!(f, "{}: {}", severity, self.message),
        }
    }
}

/// A file produced by the front-end's emit, captured through the write hook.
#[derive(Debug, Clone)]
pub struct EmittedFile {
    /// Asset name: a leading-`/` POSIX path relative to the output root.
    pub name: String,
    /// UTF-8 contents.
    pub text: String,
}

/// An AST transformer applied after type stripping, before emit.
pub trait ModulePass {
    /// Rewrite the module in place.
    fn process(&mut self, module: &mut Module);
}

/// Deletes top-level expression statements consisting of the string literal
/// `"use strict"`. Installed on every emit.
pub struct UseStrictRemover;

impl ModulePass for UseStrictRemover {
    fn process(&mut self, module: &mut Module) {
        module.body.retain(|item| !is_use_strict(item));
    }
}

fn is_use_strict(item: &ModuleItem) -> bool {
    let stmt = match item {
        ModuleItem::Stmt(Stmt::Expr(stmt)) => stmt,
        _ => return false,
    };
    matches!(&*stmt.expr, Expr::Lit(Lit::Str(value)) if value.value.as_ref() == "use strict")
}

/// Compiler options handed to the front-end.
///
/// The baseline is fixed by the bundle contract; a project `tsconfig.json`
/// may override only the soft options (`target`, `lib`, `strict`).
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// ECMAScript emit target.
    pub target: EsVersion,
    /// Libraries assumed present, carried for the front-end contract.
    pub lib: Vec<String>,
    /// Strict type-checking switch, carried for the front-end contract.
    pub strict: bool,
    /// Whether to emit external source maps.
    pub source_maps: bool,
    /// Root of the compiled project; asset names are derived from it.
    pub root_dir: String,
    /// Output root; always `/` so asset names are root-relative.
    pub out_dir: String,
    /// Compile plain JavaScript sources as well.
    pub allow_js: bool,
}

impl CompilerOptions {
    /// The fixed ES2020 baseline for a project root.
    pub fn baseline(root_dir: &str, source_maps: bool) -> Self {
        CompilerOptions {
            target: EsVersion::Es2020,
            lib: vec!["es2020".to_string()],
            strict: true,
            source_maps,
            root_dir: root_dir.trim_end_matches('/').to_string(),
            out_dir: "/".to_string(),
            allow_js: true,
        }
    }

    /// Apply the soft overrides from `<root>/tsconfig.json`, if present.
    ///
    /// `module`, `moduleResolution`, `rootDir`, `outDir`, `sourceMap`,
    /// `inlineSourceMap` and `noEmit` are never taken from the project.
    pub fn overlay_tsconfig(&mut self, sys: &dyn System) {
        let config_path = paths::join(&self.root_dir, "tsconfig.json");
        if !sys.is_file(&paths::from_posix(&config_path)) {
            return;
        }
        let text = match sys.read_text(&paths::from_posix(&config_path)) {
            Ok(text) => text,
            Err(_) => return,
        };
        let value: serde_json::Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(error) => {
                log::warn!("{}: ignoring malformed tsconfig: {}", config_path, error);
                return;
            }
        };
        let Some(options) = value.get("compilerOptions") else {
            return;
        };
        if let Some(target) = options.get("target").and_then(|v| v.as_str()) {
            match parse_target(target) {
                Some(parsed) => self.target = parsed,
                None => log::warn!("{}: unsupported target {:?}", config_path, target),
            }
        }
        if let Some(lib) = options.get("lib").and_then(|v| v.as_array()) {
            self.lib = lib
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect();
        }
        if let Some(strict) = options.get("strict").and_then(|v| v.as_bool()) {
            self.strict = strict;
        }
    }
}

fn parse_target(name: &str) -> Option<EsVersion> {
    Some(match name.to_ascii_lowercase().as_str() {
        "es5" => EsVersion::Es5,
        "es6" | "es2015" => EsVersion::Es2015,
        "es2016" => EsVersion::Es2016,
        "es2017" => EsVersion::Es2017,
        "es2018" => EsVersion::Es2018,
        "es2019" => EsVersion::Es2019,
        "es2020" => EsVersion::Es2020,
        "es2021" => EsVersion::Es2021,
        "es2022" => EsVersion::Es2022,
        "esnext" => EsVersion::EsNext,
        _ => return None,
    })
}

/// A project source compiled by the front-end.
pub struct ProjectModule {
    /// Absolute POSIX path of the source file.
    pub source_path: String,
    /// Asset name of the emitted JavaScript.
    pub asset_name: String,
    /// The compiled AST, after type stripping and `after` passes.
    pub module: Module,
}

/// The result of a front-end compile pass.
pub struct FrontEndOutput {
    /// Compiled project sources, ordered by asset name.
    pub modules: Vec<ProjectModule>,
    /// Every project source file the pass read, including ones that failed
    /// to parse. The watch layer keeps watching these.
    pub sources: Vec<String>,
}

/// The front-end capability set the bundler consumes.
pub trait FrontEnd {
    /// Compile every project source reachable from `entry`.
    ///
    /// Emitted JavaScript and source maps are delivered through `write`;
    /// diagnostics through `diagnostics`. Parse failures are reported as
    /// error diagnostics rather than terminating the pass, so one invocation
    /// surfaces every problem.
    fn compile(
        &mut self,
        entry: &str,
        options: &CompilerOptions,
        after: &mut [Box<dyn ModulePass>],
        diagnostics: &mut dyn FnMut(Diagnostic),
        write: &mut dyn FnMut(EmittedFile),
    ) -> Result<FrontEndOutput, CompilerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::MemorySystem;

    #[test]
    fn baseline_targets_es2020() {
        let options = CompilerOptions::baseline("/p", true);
        assert_eq!(options.target, EsVersion::Es2020);
        assert_eq!(options.out_dir, "/");
        assert!(options.allow_js);
        assert!(options.strict);
    }

    #[test]
    fn tsconfig_overrides_soft_options_only() {
        let sys = MemorySystem::new();
        sys.add_file(
            "/p/tsconfig.json",
            r#"{
                "compilerOptions": {
                    "target": "ES2019",
                    "strict": false,
                    "outDir": "dist",
                    "module": "commonjs"
                }
            }"#,
        );
        let mut options = CompilerOptions::baseline("/p", true);
        options.overlay_tsconfig(&sys);
        assert_eq!(options.target, EsVersion::Es2019);
        assert!(!options.strict);
        assert_eq!(options.out_dir, "/", "outDir is not overridable");
    }

    #[test]
    fn diagnostics_render_with_positions() {
        let diag = Diagnostic {
            severity: Severity::Error,
            file: Some("/p/agent/index.ts".to_string()),
            line: Some(3),
            column: Some(7),
            message: "unexpected token".to_string(),
        };
        assert_eq!(
            diag.to_string(),
            "/p/agent/index.ts:3:7: error: unexpected token"
        );
    }
}
