//! swc-based implementation of the front-end contract.
//!
//! Parses TypeScript and JavaScript project sources, strips types, applies
//! the caller's `after` passes and emits ES2020 JavaScript with external
//! source maps.

use std::collections::BTreeSet;
use std::collections::VecDeque;

use swc_core::common::source_map::SourceMapGenConfig;
use swc_core::common::sync::Lrc;
use swc_core::common::{FileName, Globals, Mark, SourceMap, Spanned, GLOBALS};
use swc_core::ecma::ast::{EsVersion, Module, Pass, Program};
use swc_core::ecma::codegen::{text_writer::JsWriter, Config as CodegenConfig, Emitter};
use swc_core::ecma::parser::{lexer::Lexer, Parser, StringInput, Syntax};
use swc_core::ecma::transforms::base::resolver;
use swc_core::ecma::transforms::typescript::strip;

use crate::error::CompilerError;
use crate::manifest::ModuleKind;
use crate::paths;
use crate::scanner;
use crate::system::System;

use super::{
    CompilerOptions, Diagnostic, EmittedFile, FrontEnd, FrontEndOutput, ModulePass,
    ProjectModule, Severity,
};

/// Front-end driving the swc parser, type stripper and code generator.
pub struct SwcFrontEnd<'a> {
    sys: &'a dyn System,
}

impl<'a> SwcFrontEnd<'a> {
    /// Create a front-end reading sources through `sys`.
    pub fn new(sys: &'a dyn System) -> Self {
        SwcFrontEnd { sys }
    }

    /// Locate the project source a relative reference points at.
    ///
    /// Follows the compiler's resolution order: a `.js` reference may name a
    /// `.ts` source, an extensionless reference tries `.ts`, `.js` and the
    /// directory index files.
    fn find_project_source(&self, target: &str, allow_js: bool) -> Option<String> {
        let mut candidates = Vec::new();
        if target.ends_with(".ts") {
            candidates.push(target.to_string());
        } else if let Some(stem) = target.strip_suffix(".js") {
            candidates.push(format!("{}.ts", stem));
            if allow_js {
                candidates.push(target.to_string());
            }
        } else {
            candidates.push(format!("{}.ts", target));
            if allow_js {
                candidates.push(format!("{}.js", target));
            }
            candidates.push(paths::join(target, "index.ts"));
            if allow_js {
                candidates.push(paths::join(target, "index.js"));
            }
        }
        candidates
            .into_iter()
            .find(|candidate| self.sys.is_file(&paths::from_posix(candidate)))
    }

    fn compile_program(
        &mut self,
        entry: &str,
        options: &CompilerOptions,
        after: &mut [Box<dyn ModulePass>],
        diagnostics: &mut dyn FnMut(Diagnostic),
        write: &mut dyn FnMut(EmittedFile),
    ) -> Result<FrontEndOutput, CompilerError> {
        let cm: Lrc<SourceMap> = Default::default();
        let mut pending = VecDeque::new();
        pending.push_back(paths::normalize(entry));
        let mut seen = BTreeSet::new();
        let mut modules = Vec::new();
        let mut sources = Vec::new();

        while let Some(path) = pending.pop_front() {
            if !seen.insert(path.clone()) {
                continue;
            }
            sources.push(path.clone());
            let text = self.sys.read_text(&paths::from_posix(&path))?;
            let (parsed, parse_diagnostics) = parse_in(&cm, &path, &text, options.target);
            for diagnostic in parse_diagnostics {
                diagnostics(diagnostic);
            }
            let Some(module) = parsed else {
                continue;
            };

            let typescript = path.ends_with(".ts");
            let mut program = Program::Module(module);
            let unresolved_mark = Mark::new();
            let top_level_mark = Mark::new();
            let mut pass = resolver(unresolved_mark, top_level_mark, typescript);
            pass.process(&mut program);
            if typescript {
                let mut pass = strip(unresolved_mark, top_level_mark);
                pass.process(&mut program);
            }
            let mut module = match program {
                Program::Module(module) => module,
                Program::Script(_) => unreachable!("sources are parsed as modules"),
            };
            for pass in after.iter_mut() {
                pass.process(&mut module);
            }

            for reference in scanner::scan(&module, ModuleKind::Esm) {
                if !reference.starts_with('.') {
                    continue;
                }
                let target = paths::join(paths::dirname(&path), &reference);
                if target.ends_with(".json") {
                    continue;
                }
                if paths::strip_root(&target, &options.root_dir).is_none() {
                    continue;
                }
                if let Some(found) = self.find_project_source(&target, options.allow_js) {
                    if !seen.contains(&found) {
                        pending.push_back(found);
                    }
                }
            }

            let Some(asset_name) = asset_name_for(&path, options) else {
                diagnostics(Diagnostic {
                    severity: Severity::Error,
                    file: Some(path.clone()),
                    line: None,
                    column: None,
                    message: "source lies outside the project root".to_string(),
                });
                continue;
            };
            let (code, map) = emit_module(&cm, &module, options, &path, &asset_name)?;
            write(EmittedFile {
                name: asset_name.clone(),
                text: code,
            });
            if let Some(map_text) = map {
                write(EmittedFile {
                    name: format!("{}.map", asset_name),
                    text: map_text,
                });
            }
            modules.push(ProjectModule {
                source_path: path,
                asset_name,
                module,
            });
        }

        modules.sort_by(|a, b| a.asset_name.cmp(&b.asset_name));
        sources.sort();
        Ok(FrontEndOutput { modules, sources })
    }
}

impl FrontEnd for SwcFrontEnd<'_> {
    fn compile(
        &mut self,
        entry: &str,
        options: &CompilerOptions,
        after: &mut [Box<dyn ModulePass>],
        diagnostics: &mut dyn FnMut(Diagnostic),
        write: &mut dyn FnMut(EmittedFile),
    ) -> Result<FrontEndOutput, CompilerError> {
        let globals = Globals::new();
        GLOBALS.set(&globals, || {
            self.compile_program(entry, options, after, diagnostics, write)
        })
    }
}

/// Derive the emitted asset name for a project source path.
fn asset_name_for(path: &str, options: &CompilerOptions) -> Option<String> {
    let rel = paths::strip_root(path, &options.root_dir)?;
    let renamed = match rel.strip_suffix(".ts") {
        Some(stem) => format!("{}.js", stem),
        None => rel.to_string(),
    };
    if options.out_dir == "/" {
        Some(renamed)
    } else {
        Some(paths::join(&options.out_dir, renamed.trim_start_matches('/')))
    }
}

fn parse_in(
    cm: &Lrc<SourceMap>,
    path: &str,
    text: &str,
    target: EsVersion,
) -> (Option<Module>, Vec<Diagnostic>) {
    let fm = cm.new_source_file(
        FileName::Real(paths::from_posix(path)).into(),
        text.to_string(),
    );
    let syntax = if path.ends_with(".ts") {
        Syntax::Typescript(Default::default())
    } else {
        Syntax::Es(Default::default())
    };
    let lexer = Lexer::new(syntax, target, StringInput::from(&*fm), None);
    let mut parser = Parser::new_from(lexer);
    let mut diagnostics = Vec::new();
    let module = match parser.parse_module() {
        Ok(module) => Some(module),
        Err(error) => {
            diagnostics.push(to_diagnostic(cm, path, error));
            None
        }
    };
    for error in parser.take_errors() {
        diagnostics.push(to_diagnostic(cm, path, error));
    }
    (module, diagnostics)
}

fn to_diagnostic(
    cm: &Lrc<SourceMap>,
    path: &str,
    error: swc_core::ecma::parser::error::Error,
) -> Diagnostic {
    let span = error.span();
    let message = error.into_kind().msg().to_string();
    let (line, column) = if span.lo.0 == 0 {
        (None, None)
    } else {
        let loc = cm.lookup_char_pos(span.lo);
        (Some(loc.line), Some(loc.col_display + 1))
    };
    Diagnostic {
        severity: Severity::Error,
        file: Some(path.to_string()),
        line,
        column,
        message,
    }
}

/// Parse a single externally discovered source, without emitting it.
pub(crate) fn parse_source(
    path: &str,
    text: &str,
    target: EsVersion,
) -> Result<Module, CompilerError> {
    let cm: Lrc<SourceMap> = Default::default();
    let (module, diagnostics) = parse_in(&cm, path, text, target);
    match module {
        Some(module) => {
            for diagnostic in diagnostics {
                log::debug!("{}", diagnostic);
            }
            Ok(module)
        }
        None => Err(CompilerError::Parse {
            path: path.to_string(),
            message: diagnostics
                .first()
                .map(|d| d.message.clone())
                .unwrap_or_else(|| "parse error".to_string()),
        }),
    }
}

/// Print a module back to JavaScript without a source map.
pub(crate) fn print_module(
    module: &Module,
    target: EsVersion,
    path: &str,
) -> Result<String, CompilerError> {
    let cm: Lrc<SourceMap> = Default::default();
    let mut buf = Vec::new();
    {
        let mut cfg = CodegenConfig::default();
        cfg.target = target;
        let wr = JsWriter::new(cm.clone(), "\n", &mut buf, None);
        let mut emitter = Emitter {
            cfg,
            cm: cm.clone(),
            comments: None,
            wr,
        };
        emitter
            .emit_module(module)
            .map_err(|e| CompilerError::io(path, e))?;
    }
    String::from_utf8(buf).map_err(|e| CompilerError::Parse {
        path: path.to_string(),
        message: e.to_string(),
    })
}

struct MapGenConfig;

impl SourceMapGenConfig for MapGenConfig {
    fn file_name_to_source(&self, f: &FileName) -> String {
        f.to_string()
    }

    fn inline_sources_content(&self, _f: &FileName) -> bool {
        false
    }
}

fn emit_module(
    cm: &Lrc<SourceMap>,
    module: &Module,
    options: &CompilerOptions,
    source_path: &str,
    asset_name: &str,
) -> Result<(String, Option<String>), CompilerError> {
    let mut buf = Vec::new();
    let mut srcmap = Vec::new();
    {
        let mut cfg = CodegenConfig::default();
        cfg.target = options.target;
        let wr = JsWriter::new(
            cm.clone(),
            "\n",
            &mut buf,
            if options.source_maps {
                Some(&mut srcmap)
            } else {
                None
            },
        );
        let mut emitter = Emitter {
            cfg,
            cm: cm.clone(),
            comments: None,
            wr,
        };
        emitter
            .emit_module(module)
            .map_err(|e| CompilerError::io(source_path, e))?;
    }
    let mut code = String::from_utf8(buf).map_err(|e| CompilerError::Parse {
        path: source_path.to_string(),
        message: e.to_string(),
    })?;

    if !options.source_maps {
        return Ok((code, None));
    }

    let map = cm.build_source_map(&srcmap, None, MapGenConfig);
    let mut map_buf = Vec::new();
    map.to_writer(&mut map_buf)
        .map_err(|e| CompilerError::SourceMap(e.to_string()))?;
    let map_text = finalize_map(&map_buf, options, asset_name)?;

    if !code.ends_with('\n') {
        code.push('\n');
    }
    code.push_str(&format!(
        "//# sourceMappingURL={}.map",
        paths::file_name(asset_name)
    ));
    Ok((code, Some(map_text)))
}

/// Root the generated map at the project and relativize its sources.
fn finalize_map(
    bytes: &[u8],
    options: &CompilerOptions,
    asset_name: &str,
) -> Result<String, CompilerError> {
    let mut value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| CompilerError::SourceMap(e.to_string()))?;
    if let Some(object) = value.as_object_mut() {
        object.insert(
            "file".to_string(),
            serde_json::Value::String(paths::file_name(asset_name).to_string()),
        );
        object.insert(
            "sourceRoot".to_string(),
            serde_json::Value::String(options.root_dir.clone()),
        );
        if let Some(sources) = object.get_mut("sources").and_then(|v| v.as_array_mut()) {
            for source in sources.iter_mut() {
                if let Some(text) = source.as_str() {
                    if let Some(rel) = paths::strip_root(text, &options.root_dir) {
                        *source = serde_json::Value::String(
                            rel.trim_start_matches('/').to_string(),
                        );
                    }
                }
            }
        }
    }
    serde_json::to_string(&value).map_err(|e| CompilerError::SourceMap(e.to_string()))
}
