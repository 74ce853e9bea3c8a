//! Bundler core.
//!
//! Owns the module table and the traversal loop: the front-end emits the
//! project's JavaScript, the scanner and resolver close the graph over
//! external dependencies, JSON files become synthesized modules, assets are
//! rewritten (source-map trimming, minification) and finally serialized.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use swc_core::ecma::ast::Module;

use crate::bundle::{self, Bundle};
use crate::catalog::AssetCatalog;
use crate::error::CompilerError;
use crate::frontend::{
    parse_source, print_module, CompilerOptions, Diagnostic, FrontEnd, ModulePass,
    Severity, SwcFrontEnd, UseStrictRemover,
};
use crate::json_module;
use crate::manifest::{self, ModuleKind};
use crate::minifier::{Minifier, MinifyInput, MinifyMapOptions, SwcMinifier};
use crate::paths;
use crate::resolver::Resolver;
use crate::scanner;
use crate::system::System;

/// Options controlling a bundling pass.
#[derive(Debug, Clone)]
pub struct Options {
    /// Absolute POSIX path of the entrypoint source.
    pub entrypoint: String,
    /// Project root; asset names are derived relative to it.
    pub project_root: String,
    /// Root of the compiler installation, home of the shim packages.
    pub compiler_root: String,
    /// Emit source maps alongside compiled assets.
    pub source_maps: bool,
    /// Minify JavaScript assets.
    pub compress: bool,
}

impl Options {
    /// Options with source maps enabled and compression disabled.
    pub fn new(entrypoint: &str, project_root: &str, compiler_root: &str) -> Self {
        Options {
            entrypoint: paths::normalize(entrypoint),
            project_root: paths::normalize(project_root),
            compiler_root: paths::normalize(compiler_root),
            source_maps: true,
            compress: false,
        }
    }
}

/// A module participating in the bundle.
struct ModuleRecord {
    kind: ModuleKind,
    path: String,
    module: Module,
    aliases: BTreeSet<String>,
    external: bool,
}

/// Cached parse of an externally discovered source, reused across passes.
struct ExternalSource {
    text: String,
    module: Module,
    kind: ModuleKind,
}

/// A normalized module reference.
enum Reference {
    /// Routed to the deferred JSON set.
    Json(String),
    /// Enqueued for resolution.
    Module(String),
}

fn normalize_reference(name: &str, referrer: &str) -> Reference {
    let resolved = if name.starts_with('.') {
        paths::join(paths::dirname(referrer), name)
    } else {
        name.to_string()
    };
    if resolved.ends_with(".json") {
        Reference::Json(resolved)
    } else {
        Reference::Module(resolved)
    }
}

/// Drives one or more bundling passes over a project.
///
/// The bundler owns the external-sources cache; [`Bundler::invalidate`]
/// drops a single cached file so the next pass re-reads it.
pub struct Bundler<'a> {
    sys: &'a dyn System,
    options: Options,
    catalog: AssetCatalog,
    frontend: Box<dyn FrontEnd + 'a>,
    minifier: Option<Box<dyn Minifier + 'a>>,
    cjs_transform: Option<Box<dyn ModulePass + 'a>>,
    external_cache: BTreeMap<String, ExternalSource>,
    external_files: BTreeSet<String>,
    project_files: BTreeSet<String>,
}

impl<'a> Bundler<'a> {
    /// Create a bundler over the given system.
    pub fn new(sys: &'a dyn System, options: Options) -> Self {
        let catalog = AssetCatalog::new(&options.project_root, &options.compiler_root);
        let minifier: Option<Box<dyn Minifier>> = if options.compress {
            Some(Box::new(SwcMinifier))
        } else {
            None
        };
        Bundler {
            sys,
            options,
            catalog,
            frontend: Box::new(SwcFrontEnd::new(sys)),
            minifier,
            cjs_transform: None,
            external_cache: BTreeMap::new(),
            external_files: BTreeSet::new(),
            project_files: BTreeSet::new(),
        }
    }

    /// Replace the compiler front-end.
    pub fn set_frontend(&mut self, frontend: Box<dyn FrontEnd + 'a>) {
        self.frontend = frontend;
    }

    /// Replace the minifier used when compression is enabled.
    pub fn set_minifier(&mut self, minifier: Box<dyn Minifier + 'a>) {
        self.minifier = Some(minifier);
    }

    /// Install the optional CommonJS conversion stage.
    ///
    /// When present, reachable CommonJS modules are fed through the pass and
    /// reclassified as ESM instead of failing the pass.
    pub fn set_cjs_transform(&mut self, pass: Box<dyn ModulePass + 'a>) {
        self.cjs_transform = Some(pass);
    }

    /// Externally discovered source files loaded so far.
    ///
    /// The watch controller subscribes file watches for these; the
    /// front-end's own watcher covers project sources.
    pub fn external_files(&self) -> Vec<String> {
        self.external_files.iter().cloned().collect()
    }

    /// Project source files compiled by the most recent pass.
    pub fn project_files(&self) -> Vec<String> {
        self.project_files.iter().cloned().collect()
    }

    /// Drop the cached parse of a changed file so the next pass re-reads it.
    pub fn invalidate(&mut self, path: &str) {
        let path = paths::normalize(path);
        self.external_cache.remove(&path);
    }

    /// Run one bundling pass.
    pub fn bundle(
        &mut self,
        diagnostics: &mut dyn FnMut(Diagnostic),
    ) -> Result<Bundle, CompilerError> {
        let entry = paths::normalize(&self.options.entrypoint);
        let mut compiler_options =
            CompilerOptions::baseline(self.catalog.project_root(), self.options.source_maps);
        compiler_options.overlay_tsconfig(self.sys);

        // Front-end emit, captured through the write hook.
        let mut assets: BTreeMap<String, String> = BTreeMap::new();
        let mut had_error = false;
        let output = {
            let mut after: Vec<Box<dyn ModulePass>> = vec![Box::new(UseStrictRemover)];
            let mut write = |file: crate::frontend::EmittedFile| {
                assets.insert(file.name, file.text);
            };
            let mut forward = |diagnostic: Diagnostic| {
                if diagnostic.severity == Severity::Error {
                    had_error = true;
                }
                diagnostics(diagnostic);
            };
            self.frontend
                .compile(&entry, &compiler_options, &mut after, &mut forward, &mut write)?
        };
        self.project_files = output.sources.iter().cloned().collect();
        if had_error {
            return Err(CompilerError::CompilationFailed);
        }
        let entry_asset = output
            .modules
            .iter()
            .find(|m| m.source_path == entry)
            .map(|m| m.asset_name.clone())
            .ok_or(CompilerError::CompilationFailed)?;

        // Seed the module table and the pending queue from project sources.
        let mut records: BTreeMap<String, ModuleRecord> = BTreeMap::new();
        let mut processed: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<(String, String)> = VecDeque::new();
        let mut json_paths: BTreeSet<String> = BTreeSet::new();
        let mut missing: BTreeSet<String> = BTreeSet::new();

        for project in output.modules {
            processed.insert(project.asset_name.clone());
            processed.insert(project.source_path.clone());
            for reference in scanner::scan(&project.module, ModuleKind::Esm) {
                match normalize_reference(&reference, &project.source_path) {
                    Reference::Json(path) => {
                        json_paths.insert(path);
                    }
                    Reference::Module(name) => queue.push_back((name, project.source_path.clone())),
                }
            }
            records.insert(
                project.asset_name,
                ModuleRecord {
                    kind: ModuleKind::Esm,
                    path: project.source_path,
                    module: project.module,
                    aliases: BTreeSet::new(),
                    external: false,
                },
            );
        }

        // Drain loop: close the graph over external dependencies. Failures
        // accumulate so one pass reports them all.
        while let Some((name, referrer)) = queue.pop_front() {
            if !processed.insert(name.clone()) {
                continue;
            }
            // References into the compiled project are satisfied by emitted
            // assets; the loader probes the missing `.js` extension itself.
            if name.starts_with('/') && self.project_asset_hit(&records, &name).is_some() {
                continue;
            }
            let resolver = Resolver::new(self.sys, &self.catalog);
            let resolution = match resolver.resolve(&name, &referrer) {
                Ok(resolution) => resolution,
                Err(CompilerError::Unresolvable(names)) => {
                    missing.extend(names);
                    continue;
                }
                Err(other) => return Err(other),
            };
            let mut path = resolution.path;
            if let Some(real) = self.sys.real_path(&paths::from_posix(&path)) {
                path = paths::to_posix(&real);
            }
            if path.ends_with(".json") {
                json_paths.insert(path);
                continue;
            }
            let Some(asset_name) = self.asset_name_for(&path) else {
                missing.insert(name);
                continue;
            };
            if !records.contains_key(&asset_name) {
                let (text, module, kind) =
                    self.load_external(&path, compiler_options.target)?;
                for reference in scanner::scan(&module, kind) {
                    match normalize_reference(&reference, &path) {
                        Reference::Json(json) => {
                            json_paths.insert(json);
                        }
                        Reference::Module(dep) => {
                            if !processed.contains(&dep) {
                                queue.push_back((dep, path.clone()));
                            }
                        }
                    }
                }
                processed.insert(path.clone());
                assets.insert(asset_name.clone(), text);
                records.insert(
                    asset_name.clone(),
                    ModuleRecord {
                        kind,
                        path: path.clone(),
                        module,
                        aliases: BTreeSet::new(),
                        external: true,
                    },
                );
            }
            if resolution.needs_alias {
                let alias = match paths::strip_root(&name, self.catalog.project_root()) {
                    Some(stripped) if name.starts_with('/') => stripped.to_string(),
                    _ => name.clone(),
                };
                if let Some(record) = records.get_mut(&asset_name) {
                    record.aliases.insert(alias);
                }
            }
        }

        if !missing.is_empty() {
            return Err(CompilerError::Unresolvable(missing.into_iter().collect()));
        }

        // CommonJS handling: reject, unless a conversion stage is installed.
        let cjs_assets: Vec<String> = records
            .iter()
            .filter(|(_, record)| record.kind == ModuleKind::Cjs)
            .map(|(name, _)| name.clone())
            .collect();
        if !cjs_assets.is_empty() {
            match self.cjs_transform.as_mut() {
                Some(pass) => {
                    for name in &cjs_assets {
                        let record = records.get_mut(name).expect("cjs record");
                        pass.process(&mut record.module);
                        record.kind = ModuleKind::Esm;
                        let code = print_module(
                            &record.module,
                            compiler_options.target,
                            &record.path,
                        )?;
                        assets.insert(name.clone(), code);
                    }
                }
                None => {
                    let mut paths: Vec<String> = cjs_assets
                        .iter()
                        .filter_map(|name| records.get(name).map(|r| r.path.clone()))
                        .collect();
                    paths.sort();
                    return Err(CompilerError::CommonJsDetected(paths));
                }
            }
        }

        // Deferred JSON modularization.
        for path in &json_paths {
            let text = self
                .sys
                .read_text(&paths::from_posix(path))
                .map_err(|_| CompilerError::Unresolvable(vec![path.clone()]))?;
            let Some(asset_name) = self.asset_name_for(path) else {
                return Err(CompilerError::Unresolvable(vec![path.clone()]));
            };
            assets.insert(asset_name, json_module::synthesize(path, &text)?);
        }

        // Per-asset rewrite: map trimming, directive hygiene, minification.
        let js_names: Vec<String> = assets
            .keys()
            .filter(|name| name.ends_with(".js"))
            .cloned()
            .collect();
        for name in js_names {
            let mut code = assets.get(&name).cloned().unwrap_or_default();
            let origin = records
                .get(&name)
                .map(|record| record.path.clone())
                .unwrap_or_else(|| name.clone());
            let external = records.get(&name).map_or(false, |record| record.external);

            if let Some((trimmed, reference)) = trim_source_map_reference(&code) {
                code = trimmed;
                let map_name = format!("{}.map", name);
                if self.options.source_maps && !assets.contains_key(&map_name) {
                    if let Some(map_text) = self.materialize_map(&reference, &origin)? {
                        assets.insert(map_name, map_text);
                    }
                }
            }
            if external {
                code = strip_leading_use_strict(&code);
            }
            if let Some(minifier) = self.minifier.as_ref() {
                let existing_map = assets.get(&format!("{}.map", name)).cloned();
                let map_options = if self.options.source_maps {
                    Some(MinifyMapOptions {
                        root: format!("{}/", paths::dirname(&origin)),
                        filename: paths::file_name(&name).to_string(),
                        content: existing_map.as_deref(),
                    })
                } else {
                    None
                };
                let minified = minifier.minify(MinifyInput {
                    filename: &origin,
                    code: &code,
                    source_map: map_options,
                })?;
                code = minified.code;
                if let Some(map) = minified.map {
                    assets.insert(format!("{}.map", name), map);
                }
            }
            assets.insert(name, code);
        }

        let aliases: BTreeMap<String, BTreeSet<String>> = records
            .iter()
            .filter(|(_, record)| !record.aliases.is_empty())
            .map(|(name, record)| (name.clone(), record.aliases.clone()))
            .collect();
        Ok(bundle::assemble(&assets, &aliases, &entry_asset))
    }

    /// Find the emitted project asset a source-rooted reference lands on.
    fn project_asset_hit(
        &self,
        records: &BTreeMap<String, ModuleRecord>,
        name: &str,
    ) -> Option<String> {
        let rel = paths::strip_root(name, self.catalog.project_root())?;
        let candidates = [
            rel.to_string(),
            format!("{}.js", rel),
            paths::join(rel, "index.js"),
        ];
        candidates
            .into_iter()
            .find(|candidate| records.contains_key(candidate))
    }

    /// Derive the asset name for a resolved file path.
    fn asset_name_for(&self, path: &str) -> Option<String> {
        if let Some(rel) = paths::strip_root(path, self.catalog.project_root()) {
            return Some(rel.to_string());
        }
        paths::strip_root(path, self.catalog.compiler_root())
            .map(|rel| rel.to_string())
    }

    /// Read and parse an external source, reusing the cross-pass cache.
    fn load_external(
        &mut self,
        path: &str,
        target: swc_core::ecma::ast::EsVersion,
    ) -> Result<(String, Module, ModuleKind), CompilerError> {
        if let Some(cached) = self.external_cache.get(path) {
            return Ok((cached.text.clone(), cached.module.clone(), cached.kind));
        }
        let text = self.sys.read_text(&paths::from_posix(path))?;
        let module = parse_source(path, &text, target)?;
        let kind = manifest::detect_module_kind(self.sys, path);
        log::debug!("external source added: {}", path);
        self.external_files.insert(path.to_string());
        self.external_cache.insert(
            path.to_string(),
            ExternalSource {
                text: text.clone(),
                module: module.clone(),
                kind,
            },
        );
        Ok((text, module, kind))
    }

    /// Materialize the source map referenced by a trimmed
    /// `sourceMappingURL` line.
    fn materialize_map(
        &self,
        reference: &str,
        origin: &str,
    ) -> Result<Option<String>, CompilerError> {
        if let Some(data) = reference.strip_prefix("data:application/json;base64,") {
            let bytes = self.sys.decode_base64(data)?;
            let text = String::from_utf8(bytes)
                .map_err(|e| CompilerError::SourceMap(e.to_string()))?;
            return Ok(Some(text));
        }
        if reference.starts_with("data:") {
            return Ok(None);
        }
        let sibling = paths::join(paths::dirname(origin), reference);
        if self.sys.is_file(&paths::from_posix(&sibling)) {
            return Ok(Some(self.sys.read_text(&paths::from_posix(&sibling))?));
        }
        Ok(None)
    }
}

/// Split a trailing `//# sourceMappingURL=` line off a JavaScript asset.
fn trim_source_map_reference(code: &str) -> Option<(String, String)> {
    let trimmed_end = code.trim_end_matches('\n');
    let start = trimmed_end.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let last = &trimmed_end[start..];
    let reference = last.strip_prefix("//# sourceMappingURL=")?;
    Some((trimmed_end[..start].to_string(), reference.trim().to_string()))
}

/// Drop a leading `"use strict";` directive from externally sourced text.
fn strip_leading_use_strict(code: &str) -> String {
    let lead = code.len() - code.trim_start().len();
    let trimmed = &code[lead..];
    for directive in ["\"use strict\";", "'use strict';"] {
        if let Some(rest) = trimmed.strip_prefix(directive) {
            return rest.trim_start_matches(['\r', '\n']).to_string();
        }
    }
    code.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_source_map_references() {
        let (code, reference) =
            trim_source_map_reference("const x = 1;\n//# sourceMappingURL=index.js.map\n")
                .unwrap();
        assert_eq!(code, "const x = 1;\n");
        assert_eq!(reference, "index.js.map");

        assert!(trim_source_map_reference("const x = 1;\n").is_none());
    }

    #[test]
    fn trims_inline_map_references() {
        let (_, reference) = trim_source_map_reference(
            "x;\n//# sourceMappingURL=data:application/json;base64,e30=",
        )
        .unwrap();
        assert_eq!(reference, "data:application/json;base64,e30=");
    }

    #[test]
    fn strips_leading_use_strict_directives() {
        assert_eq!(
            strip_leading_use_strict("\"use strict\";\nconst x = 1;\n"),
            "const x = 1;\n"
        );
        assert_eq!(
            strip_leading_use_strict("'use strict';const x = 1;"),
            "const x = 1;"
        );
        assert_eq!(strip_leading_use_strict("const x = 1;"), "const x = 1;");
    }

    #[test]
    fn normalizes_relative_references() {
        match normalize_reference("./data.json", "/p/agent/index.js") {
            Reference::Json(path) => assert_eq!(path, "/p/agent/data.json"),
            _ => panic!("expected a JSON reference"),
        }
        match normalize_reference("../lib/util", "/p/agent/index.js") {
            Reference::Module(name) => assert_eq!(name, "/p/lib/util"),
            _ => panic!("expected a module reference"),
        }
        match normalize_reference("buffer", "/p/agent/index.js") {
            Reference::Module(name) => assert_eq!(name, "buffer"),
            _ => panic!("expected a module reference"),
        }
    }
}
