//! Bundle container and assembly.
//!
//! A bundle is a UTF-8 envelope: a manifest opened by `📦` and closed by a
//! `✄` line, followed by the asset payloads separated by `✄` lines. The
//! sentinel characters are load-bearing for the loader and must be
//! preserved byte-for-byte.

use std::collections::{BTreeMap, BTreeSet};

/// A serialized bundle artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    bytes: Vec<u8>,
}

impl Bundle {
    /// The serialized envelope.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the bundle, yielding its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Byte length of the envelope.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the envelope is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Serialize the asset table into a bundle.
///
/// Emission order: the entrypoint's compiled asset first, every other
/// primary in lexicographic order, each preceded by its `.map` peer when one
/// exists. Alias lines follow their asset's manifest line.
pub(crate) fn assemble(
    assets: &BTreeMap<String, String>,
    aliases: &BTreeMap<String, BTreeSet<String>>,
    entry_name: &str,
) -> Bundle {
    let mut entry_pair = Vec::new();
    let mut rest = Vec::new();
    for name in assets.keys() {
        if name.ends_with(".map") {
            continue;
        }
        let target = if name == entry_name {
            &mut entry_pair
        } else {
            &mut rest
        };
        let map_name = format!("{}.map", name);
        if assets.contains_key(&map_name) {
            target.push(map_name);
        }
        target.push(name.clone());
    }
    let names: Vec<String> = entry_pair.into_iter().chain(rest).collect();

    let mut bytes = Vec::new();
    bytes.extend_from_slice("📦\n".as_bytes());
    for name in &names {
        let contents = &assets[name];
        bytes.extend_from_slice(format!("{} {}\n", contents.len(), name).as_bytes());
        if let Some(alias_set) = aliases.get(name) {
            for alias in alias_set {
                bytes.extend_from_slice(format!("↻ {}\n", alias).as_bytes());
            }
        }
    }
    bytes.extend_from_slice("✄\n".as_bytes());
    for (index, name) in names.iter().enumerate() {
        if index > 0 {
            bytes.extend_from_slice("\n✄\n".as_bytes());
        }
        bytes.extend_from_slice(assets[name].as_bytes());
    }

    Bundle { bytes }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn serializes_bit_exactly() {
        let assets = table(&[
            ("/agent/index.js", "code"),
            ("/agent/index.js.map", "{}"),
            ("/lib/util.js", "u"),
        ]);
        let bundle = assemble(&assets, &BTreeMap::new(), "/agent/index.js");
        let expected = "\u{1F4E6}\n\
                        2 /agent/index.js.map\n\
                        4 /agent/index.js\n\
                        1 /lib/util.js\n\
                        \u{2704}\n\
                        {}\n\
                        \u{2704}\n\
                        code\n\
                        \u{2704}\n\
                        u";
        assert_eq!(bundle.as_bytes(), expected.as_bytes());
    }

    #[test]
    fn entry_pair_moves_to_the_front() {
        let assets = table(&[
            ("/agent/index.js", "i"),
            ("/agent/index.js.map", "m"),
            ("/agent/aaa.js", "a"),
        ]);
        let bundle = assemble(&assets, &BTreeMap::new(), "/agent/index.js");
        let text = String::from_utf8(bundle.into_bytes()).unwrap();
        let manifest: Vec<&str> = text.lines().skip(1).take(3).collect();
        assert_eq!(
            manifest,
            vec!["1 /agent/index.js.map", "1 /agent/index.js", "1 /agent/aaa.js"]
        );
    }

    #[test]
    fn alias_lines_follow_their_asset() {
        let assets = table(&[("/node_modules/@frida/buffer/index.js", "b")]);
        let mut aliases = BTreeMap::new();
        aliases.insert(
            "/node_modules/@frida/buffer/index.js".to_string(),
            ["buffer", "node:buffer"]
                .iter()
                .map(|s| s.to_string())
                .collect::<BTreeSet<_>>(),
        );
        let bundle = assemble(&assets, &aliases, "/agent/index.js");
        let text = String::from_utf8(bundle.into_bytes()).unwrap();
        assert!(text.contains(
            "1 /node_modules/@frida/buffer/index.js\n\u{21BB} buffer\n\u{21BB} node:buffer\n"
        ));
    }

    #[test]
    fn utf8_lengths_are_byte_lengths() {
        let assets = table(&[("/agent/index.js", "émoji 📦")]);
        let bundle = assemble(&assets, &BTreeMap::new(), "/agent/index.js");
        let text = String::from_utf8(bundle.into_bytes()).unwrap();
        assert!(text.contains(&format!("{} /agent/index.js\n", "émoji 📦".len())));
    }
}
