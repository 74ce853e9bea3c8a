//! Minification of individual JavaScript assets.
//!
//! The bundler talks to the minifier through a contract mirroring the usual
//! JS tooling shape: a named source plus options in, rewritten code and an
//! optional source map out. [`SwcMinifier`] implements it with
//! `swc_ecma_minifier`.

use swc_core::common::source_map::SourceMapGenConfig;
use swc_core::common::sync::Lrc;
use swc_core::common::{FileName, Globals, Mark, SourceMap, DUMMY_SP, GLOBALS};
use swc_core::ecma::ast::{
    Bool, EsVersion, Expr, Lit, MemberProp, Pass, Program,
};
use swc_core::ecma::codegen::{text_writer::JsWriter, Config as CodegenConfig, Emitter};
use swc_core::ecma::minifier::optimize;
use swc_core::ecma::minifier::option::{
    CompressOptions, ExtraOptions, MangleOptions, MinifyOptions,
};
use swc_core::ecma::parser::{lexer::Lexer, Parser, StringInput, Syntax};
use swc_core::ecma::transforms::base::resolver;
use swc_core::ecma::visit::{VisitMut, VisitMutWith};

use crate::error::CompilerError;
use crate::paths;

/// Source-map options accompanying a minification request.
pub struct MinifyMapOptions<'a> {
    /// Directory of the originating file, with a trailing separator.
    pub root: String,
    /// Basename of the asset being minified.
    pub filename: String,
    /// A pre-existing map for the input, to be chained through.
    pub content: Option<&'a str>,
}

/// A single asset handed to the minifier.
pub struct MinifyInput<'a> {
    /// POSIX path identifying the source.
    pub filename: &'a str,
    /// JavaScript text to minify.
    pub code: &'a str,
    /// When present, a source map is produced.
    pub source_map: Option<MinifyMapOptions<'a>>,
}

/// Minified code plus its map, when requested.
pub struct MinifyOutput {
    /// The rewritten JavaScript.
    pub code: String,
    /// Serialized source map.
    pub map: Option<String>,
}

/// Minifier contract: synchronous, one asset at a time.
pub trait Minifier {
    /// Minify one asset.
    fn minify(&self, input: MinifyInput<'_>) -> Result<MinifyOutput, CompilerError>;
}

/// `swc_ecma_minifier`-backed implementation.
///
/// Compresses in module mode with the `process.env.FRIDA_COMPILE` build flag
/// defined to `true`, mangles top-level names, and emits ES2020.
pub struct SwcMinifier;

impl Minifier for SwcMinifier {
    fn minify(&self, input: MinifyInput<'_>) -> Result<MinifyOutput, CompilerError> {
        let globals = Globals::new();
        GLOBALS.set(&globals, || minify_inner(input))
    }
}

fn minify_inner(input: MinifyInput<'_>) -> Result<MinifyOutput, CompilerError> {
    let cm: Lrc<SourceMap> = Default::default();
    let fm = cm.new_source_file(
        FileName::Real(paths::from_posix(input.filename)).into(),
        input.code.to_string(),
    );
    let lexer = Lexer::new(
        Syntax::Es(Default::default()),
        EsVersion::Es2020,
        StringInput::from(&*fm),
        None,
    );
    let module = Parser::new_from(lexer)
        .parse_module()
        .map_err(|e| CompilerError::Minifier(format!("{}: {:?}", input.filename, e)))?;

    let unresolved_mark = Mark::new();
    let top_level_mark = Mark::new();
    let mut program = Program::Module(module);
    let mut pass = resolver(unresolved_mark, top_level_mark, false);
    pass.process(&mut program);
    program.visit_mut_with(&mut BuildDefines);

    let program = optimize(
        program,
        cm.clone(),
        None,
        None,
        &MinifyOptions {
            compress: Some(CompressOptions {
                module: true,
                ..Default::default()
            }),
            mangle: Some(MangleOptions {
                top_level: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        },
        &ExtraOptions {
            unresolved_mark,
            top_level_mark,
            mangle_name_cache: Default::default(),
        },
    );
    let module = match program {
        Program::Module(module) => module,
        Program::Script(_) => {
            return Err(CompilerError::Minifier(
                "minifier produced a script for a module input".to_string(),
            ))
        }
    };

    let mut buf = Vec::new();
    let mut srcmap = Vec::new();
    {
        let mut cfg = CodegenConfig::default();
        cfg.target = EsVersion::Es2020;
        cfg.minify = true;
        let wr = JsWriter::new(
            cm.clone(),
            "\n",
            &mut buf,
            if input.source_map.is_some() {
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
            .emit_module(&module)
            .map_err(|e| CompilerError::Minifier(e.to_string()))?;
    }
    let code = String::from_utf8(buf).map_err(|e| CompilerError::Minifier(e.to_string()))?;

    let map = match input.source_map {
        Some(options) => {
            let orig = match options.content {
                Some(text) => Some(
                    swc_sourcemap::SourceMap::from_slice(text.as_bytes())
                        .map_err(|e| CompilerError::SourceMap(e.to_string()))?,
                ),
                None => None,
            };
            let map = cm.build_source_map(&srcmap, orig, MinifyMapConfig);
            let mut bytes = Vec::new();
            map.to_writer(&mut bytes)
                .map_err(|e| CompilerError::SourceMap(e.to_string()))?;
            Some(rewrite_map(&bytes, &options)?)
        }
        None => None,
    };

    Ok(MinifyOutput { code, map })
}

struct MinifyMapConfig;

impl SourceMapGenConfig for MinifyMapConfig {
    fn file_name_to_source(&self, f: &FileName) -> String {
        f.to_string()
    }

    fn inline_sources_content(&self, _f: &FileName) -> bool {
        false
    }
}

/// Strip the common source-root prefix from the generated map's sources.
fn rewrite_map(
    bytes: &[u8],
    options: &MinifyMapOptions<'_>,
) -> Result<String, CompilerError> {
    let mut value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| CompilerError::SourceMap(e.to_string()))?;
    if let Some(object) = value.as_object_mut() {
        object.insert(
            "file".to_string(),
            serde_json::Value::String(options.filename.clone()),
        );
        if let Some(sources) = object.get_mut("sources").and_then(|v| v.as_array_mut()) {
            for source in sources.iter_mut() {
                if let Some(text) = source.as_str() {
                    if let Some(rest) = text.strip_prefix(options.root.as_str()) {
                        *source = serde_json::Value::String(rest.to_string());
                    }
                }
            }
        }
    }
    serde_json::to_string(&value).map_err(|e| CompilerError::SourceMap(e.to_string()))
}

/// Rewrites `process.env.FRIDA_COMPILE` to `true` ahead of compression, so
/// conditioned branches fold away.
struct BuildDefines;

impl VisitMut for BuildDefines {
    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        expr.visit_mut_children_with(self);
        if is_frida_compile_flag(expr) {
            *expr = Expr::Lit(Lit::Bool(Bool {
                span: DUMMY_SP,
                value: true,
            }));
        }
    }
}

fn is_frida_compile_flag(expr: &Expr) -> bool {
    let member = match expr {
        Expr::Member(member) => member,
        _ => return false,
    };
    if !prop_named(&member.prop, "FRIDA_COMPILE") {
        return false;
    }
    let env = match &*member.obj {
        Expr::Member(inner) => inner,
        _ => return false,
    };
    if !prop_named(&env.prop, "env") {
        return false;
    }
    matches!(&*env.obj, Expr::Ident(ident) if ident.sym.as_ref() == "process")
}

fn prop_named(prop: &MemberProp, name: &str) -> bool {
    matches!(prop, MemberProp::Ident(ident) if ident.sym.as_ref() == name)
}
