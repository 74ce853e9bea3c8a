//! Dependency extraction from parsed modules.
//!
//! Emits the module specifiers referenced by static imports, re-exports and,
//! for CommonJS modules only, unambiguous `require("…")` call sites.

use swc_core::ecma::ast::{
    CallExpr, Callee, ExportAll, Expr, ImportDecl, Lit, Module, NamedExport,
};
use swc_core::ecma::visit::{Visit, VisitWith};

use crate::manifest::ModuleKind;

/// Collect every dependency reference in `module`.
///
/// References are returned in source order and may contain duplicates; the
/// bundler's processed set deduplicates them.
pub fn scan(module: &Module, kind: ModuleKind) -> Vec<String> {
    let mut scanner = ImportScanner {
        kind,
        references: Vec::new(),
    };
    module.visit_with(&mut scanner);
    scanner.references
}

struct ImportScanner {
    kind: ModuleKind,
    references: Vec<String>,
}

impl Visit for ImportScanner {
    fn visit_import_decl(&mut self, n: &ImportDecl) {
        if !n.type_only {
            self.references.push(format!("{}", n.src.value));
        }
    }

    fn visit_named_export(&mut self, n: &NamedExport) {
        if !n.type_only {
            if let Some(src) = &n.src {
                self.references.push(format!("{}", src.value));
            }
        }
    }

    fn visit_export_all(&mut self, n: &ExportAll) {
        self.references.push(format!("{}", n.src.value));
    }

    fn visit_call_expr(&mut self, n: &CallExpr) {
        if self.kind == ModuleKind::Cjs {
            if let Some(name) = require_argument(n) {
                self.references.push(name);
            }
        }
        // Descend unconditionally so `require(require("x"))` yields both.
        n.visit_children_with(self);
    }
}

/// The argument of an unambiguous `require` call: an identifier callee named
/// `require` applied to exactly one string literal.
fn require_argument(call: &CallExpr) -> Option<String> {
    let callee = match &call.callee {
        Callee::Expr(expr) => expr,
        _ => return None,
    };
    let ident = match &**callee {
        Expr::Ident(ident) => ident,
        _ => return None,
    };
    if ident.sym.as_ref() != "require" || call.args.len() != 1 {
        return None;
    }
    let arg = &call.args[0];
    if arg.spread.is_some() {
        return None;
    }
    match &*arg.expr {
        Expr::Lit(Lit::Str(value)) => Some(format!("{}", value.value)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swc_core::common::sync::Lrc;
    use swc_core::common::{FileName, SourceMap};
    use swc_core::ecma::ast::EsVersion;
    use swc_core::ecma::parser::{lexer::Lexer, Parser, StringInput, Syntax};

    fn parse(code: &str) -> Module {
        let cm: Lrc<SourceMap> = Default::default();
        let fm = cm.new_source_file(FileName::Anon.into(), code.to_string());
        let lexer = Lexer::new(
            Syntax::Es(Default::default()),
            EsVersion::Es2020,
            StringInput::from(&*fm),
            None,
        );
        Parser::new_from(lexer)
            .parse_module()
            .expect("test snippet should parse")
    }

    #[test]
    fn collects_static_imports_and_reexports() {
        let module = parse(
            r#"
            import { greet } from "./greet";
            import "side-effect";
            export { x } from "./x.js";
            export * from "buffer";
            export const local = 1;
            "#,
        );
        let refs = scan(&module, ModuleKind::Esm);
        assert_eq!(refs, vec!["./greet", "side-effect", "./x.js", "buffer"]);
    }

    #[test]
    fn ignores_require_in_esm_modules() {
        let module = parse(r#"const x = require("./x");"#);
        assert!(scan(&module, ModuleKind::Esm).is_empty());
    }

    #[test]
    fn collects_require_calls_in_cjs_modules() {
        let module = parse(
            r#"
            const a = require("./a");
            function later() { return require("b"); }
            "#,
        );
        let refs = scan(&module, ModuleKind::Cjs);
        assert_eq!(refs, vec!["./a", "b"]);
    }

    #[test]
    fn descends_into_nested_require_calls() {
        let module = parse(r#"const x = require(require("x"));"#);
        let refs = scan(&module, ModuleKind::Cjs);
        assert_eq!(refs, vec!["x"]);
    }

    #[test]
    fn skips_ambiguous_require_forms() {
        let module = parse(
            r#"
            require(dynamic);
            require("a", "b");
            obj.require("c");
            "#,
        );
        assert!(scan(&module, ModuleKind::Cjs).is_empty());
    }
}
