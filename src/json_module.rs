//! JSON-to-module synthesis.
//!
//! Rewrites a JSON document into an ECMAScript module exporting the parsed
//! value as `default`, plus named exports for each own key that is usable
//! as a binding name.

use serde_json::Value;

use crate::error::CompilerError;

/// Words that cannot be used as a binding name in an ES2015 module.
const RESERVED_WORDS: &[&str] = &[
    "await",
    "break",
    "case",
    "catch",
    "class",
    "const",
    "continue",
    "debugger",
    "default",
    "delete",
    "do",
    "else",
    "enum",
    "export",
    "extends",
    "false",
    "finally",
    "for",
    "function",
    "if",
    "implements",
    "import",
    "in",
    "instanceof",
    "interface",
    "let",
    "new",
    "null",
    "package",
    "private",
    "protected",
    "public",
    "return",
    "static",
    "super",
    "switch",
    "this",
    "throw",
    "true",
    "try",
    "typeof",
    "var",
    "void",
    "while",
    "with",
    "yield",
];

/// Synthesize an ECMAScript module from the JSON document at `path`.
///
/// The JSON text is embedded verbatim, trimmed of surrounding whitespace.
pub fn synthesize(path: &str, text: &str) -> Result<String, CompilerError> {
    let value: Value = serde_json::from_str(text).map_err(|e| CompilerError::Json {
        path: path.to_string(),
        message: e.to_string(),
    })?;
    let verbatim = text.trim();

    let keys: Vec<&String> = match &value {
        Value::Object(map) => map.keys().collect(),
        Value::Array(_) => Vec::new(),
        _ => return Ok(format!("export default {};\n", verbatim)),
    };

    let binding = select_binding(&keys);
    let mut out = String::new();
    out.push_str(&format!("const {} = {};\n", binding, verbatim));
    out.push_str(&format!("export default {};\n", binding));
    for key in keys {
        if is_exportable(key) {
            out.push_str(&format!("export const {} = {}.{};\n", key, binding, key));
        }
    }
    Ok(out)
}

/// The shortest binding of the form `d`, `d1`, `d2`, … that does not shadow
/// an own property of the document.
fn select_binding(keys: &[&String]) -> String {
    if !keys.iter().any(|key| key.as_str() == "d") {
        return "d".to_string();
    }
    let mut index = 1u32;
    loop {
        let candidate = format!("d{}", index);
        if !keys.iter().any(|key| **key == candidate) {
            return candidate;
        }
        index += 1;
    }
}

fn is_exportable(key: &str) -> bool {
    is_identifier(key) && !RESERVED_WORDS.contains(&key)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let first = match chars.next() {
        Some(ch) => ch,
        None => return false,
    };
    if !(first.is_ascii_alphabetic() || first == '_' || first == '$') {
        return false;
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '$')
}
