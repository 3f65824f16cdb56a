//! Source annotations for configuration nodes
//!
//! The YAML loader records the file and line every key and sequence item
//! came from. Annotations live in a sidecar map keyed by the node's path, so
//! configuration values stay plain [`serde_yaml::Value`]s and compare as
//! usual.

use serde_yaml::{Mapping, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// One step of a path into the configuration tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Path from the root of a configuration tree to a node
pub type ConfigPath = Vec<PathSegment>;

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => f.write_str(key),
            PathSegment::Index(index) => write!(f, "{}", index),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        PathSegment::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

/// Build a [`ConfigPath`] from mixed keys and indices
#[macro_export]
macro_rules! config_path {
    ($($segment:expr),* $(,)?) => {
        vec![$($crate::PathSegment::from($segment)),*]
    };
}

/// Render a path as `a->b->0`
pub fn format_path(path: &[PathSegment]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("->")
}

/// File and line a node was parsed from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: usize,
}

impl SourceLocation {
    pub fn new(file: impl Into<PathBuf>, line: usize) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)
    }
}

/// Sidecar map from node path to source location
///
/// For a mapping entry the location is the line of its key; for a sequence
/// item it is the line of its `-` marker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotations {
    entries: HashMap<ConfigPath, SourceLocation>,
}

impl Annotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: ConfigPath, location: SourceLocation) {
        self.entries.insert(path, location);
    }

    pub fn get(&self, path: &[PathSegment]) -> Option<&SourceLocation> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of the entries below `prefix`, re-rooted at `prefix`
    pub fn subtree(&self, prefix: &[PathSegment]) -> Annotations {
        let entries = self
            .entries
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, loc)| (path[prefix.len()..].to_vec(), loc.clone()))
            .collect();
        Annotations { entries }
    }

    /// Drop every entry at or below `prefix`
    pub fn remove_subtree(&mut self, prefix: &[PathSegment]) {
        self.entries.retain(|path, _| !path.starts_with(prefix));
    }

    /// Insert `other` below `prefix` without overwriting existing entries
    ///
    /// `index_offset` shifts a leading sequence index of `other`, which is
    /// how items appended to an existing list are re-keyed.
    pub fn graft(&mut self, prefix: &[PathSegment], other: &Annotations, index_offset: usize) {
        for (path, loc) in &other.entries {
            let mut target = prefix.to_vec();
            match path.split_first() {
                Some((PathSegment::Index(i), rest)) => {
                    target.push(PathSegment::Index(i + index_offset));
                    target.extend_from_slice(rest);
                }
                _ => target.extend_from_slice(path),
            }
            self.entries.entry(target).or_insert_with(|| loc.clone());
        }
    }
}

/// A configuration tree together with its source annotations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigTree {
    pub data: Value,
    pub annotations: Annotations,
}

impl ConfigTree {
    /// Wrap a value that has no source annotations
    pub fn new(data: Value) -> Self {
        Self {
            data,
            annotations: Annotations::new(),
        }
    }

    pub fn with_annotations(data: Value, annotations: Annotations) -> Self {
        Self { data, annotations }
    }

    /// The root mapping, if the tree is a mapping
    pub fn as_mapping(&self) -> Option<&Mapping> {
        self.data.as_mapping()
    }

    /// Node at `path`
    pub fn get(&self, path: &[PathSegment]) -> Option<&Value> {
        get_by_path(&self.data, path)
    }

    /// Location of the tree's root node
    pub fn location(&self) -> Option<&SourceLocation> {
        self.annotations.get(&[])
    }

    /// Sub-tree at `path` with re-rooted annotations
    pub fn subtree(&self, path: &[PathSegment]) -> Option<ConfigTree> {
        self.get(path).map(|data| ConfigTree {
            data: data.clone(),
            annotations: self.annotations.subtree(path),
        })
    }

    /// See [`find_annotation`]
    pub fn find_annotation(&self, path: &[PathSegment]) -> Option<SourceLocation> {
        find_annotation(&self.data, &self.annotations, path)
    }
}

/// String form of a mapping key
pub fn key_to_string(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => serde_yaml::to_string(other)
            .unwrap_or_default()
            .trim()
            .to_string(),
    }
}

/// Look up a key in a mapping by its string form
pub fn mapping_get<'a>(map: &'a Mapping, key: &str) -> Option<&'a Value> {
    map.get(key)
        .or_else(|| map.iter().find(|(k, _)| key_to_string(k) == key).map(|(_, v)| v))
}

/// Access a nested node; missing keys, out of range indices and type
/// mismatches resolve to `None`
pub fn get_by_path<'a>(data: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    path.iter().try_fold(data, |node, segment| match segment {
        PathSegment::Key(key) => mapping_get(node.as_mapping()?, key),
        PathSegment::Index(index) => node.as_sequence()?.get(*index),
    })
}

/// Find the file/line annotation for the node `path` points to
///
/// The annotation of an existing node is the location of its key in the
/// parent mapping (or its `-` marker in a sequence). Nodes that do not
/// exist or carry no annotation defer to their parent, up to the root.
pub fn find_annotation(
    config: &Value,
    annotations: &Annotations,
    path: &[PathSegment],
) -> Option<SourceLocation> {
    let mut len = path.len();
    loop {
        let current = &path[..len];
        if get_by_path(config, current).is_some() {
            if let Some(location) = annotations.get(current) {
                return Some(location.clone());
            }
        }
        if len == 0 {
            return None;
        }
        len -= 1;
    }
}

struct Frame {
    indent: usize,
    segment: PathSegment,
    item: bool,
}

/// Locate block-style keys and sequence items in YAML source
///
/// Returns `(path, line)` pairs with 1-based lines; the root is always
/// reported at line 1. Flow collections are not descended into and block
/// scalar bodies are skipped.
pub(crate) fn scan_locations(content: &str) -> Vec<(ConfigPath, usize)> {
    let mut found = vec![(Vec::new(), 1)];
    let mut stack: Vec<Frame> = Vec::new();
    let mut block_scalar_parent: Option<usize> = None;

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw.trim_start();
        let mut col = raw.len() - trimmed.len();

        if let Some(parent) = block_scalar_parent {
            if trimmed.is_empty() || col > parent {
                continue;
            }
            block_scalar_parent = None;
        }

        if trimmed.is_empty()
            || trimmed.starts_with('#')
            || trimmed.starts_with("---")
            || trimmed.starts_with("...")
        {
            continue;
        }

        let mut rest = trimmed;
        loop {
            if rest == "-" || rest.starts_with("- ") {
                while stack.last().is_some_and(|f| f.indent > col) {
                    stack.pop();
                }
                let previous = match stack.last() {
                    Some(frame) if frame.item && frame.indent == col => match frame.segment {
                        PathSegment::Index(i) => Some(i),
                        PathSegment::Key(_) => None,
                    },
                    _ => None,
                };
                let index = match previous {
                    Some(i) => {
                        stack.pop();
                        i + 1
                    }
                    None => 0,
                };
                stack.push(Frame {
                    indent: col,
                    segment: PathSegment::Index(index),
                    item: true,
                });
                found.push((stack_path(&stack), line_no));

                let after = &rest[1..];
                let after_trimmed = after.trim_start();
                col += 1 + (after.len() - after_trimmed.len());
                rest = after_trimmed;
                if rest.is_empty() || rest.starts_with('#') {
                    break;
                }
                continue;
            }

            if let Some((key, value)) = split_key(rest) {
                while stack.last().is_some_and(|f| f.indent >= col) {
                    stack.pop();
                }
                stack.push(Frame {
                    indent: col,
                    segment: PathSegment::Key(key),
                    item: false,
                });
                found.push((stack_path(&stack), line_no));

                let value = value.trim_start();
                if value.starts_with('|') || value.starts_with('>') {
                    block_scalar_parent = Some(col);
                }
            }
            break;
        }
    }

    found
}

fn stack_path(stack: &[Frame]) -> ConfigPath {
    stack.iter().map(|f| f.segment.clone()).collect()
}

/// Split `key: value` into the unquoted key and the remainder
fn split_key(line: &str) -> Option<(String, &str)> {
    let first = line.chars().next()?;
    if matches!(first, '{' | '[' | '?' | '&' | '*' | '!' | '|' | '>') {
        return None;
    }

    if first == '"' || first == '\'' {
        let close = line[1..].find(first)? + 1;
        let after = &line[close + 1..];
        let after = after.trim_start();
        let value = after.strip_prefix(':')?;
        if !value.is_empty() && !value.starts_with(' ') {
            return None;
        }
        return Some((line[1..close].to_string(), value));
    }

    let bytes = line.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'#' && i > 0 && bytes[i - 1] == b' ' {
            return None;
        }
        if b == b':' && (i + 1 == bytes.len() || bytes[i + 1] == b' ') {
            let key = line[..i].trim_end();
            if key.is_empty() {
                return None;
            }
            return Some((key.to_string(), &line[i + 1..]));
        }
    }
    None
}

/// Annotations for `content`, located in `file`
pub(crate) fn annotate_source(content: &str, file: &Path) -> Annotations {
    let mut annotations = Annotations::new();
    for (path, line) in scan_locations(content) {
        annotations
            .entries
            .entry(path)
            .or_insert_with(|| SourceLocation::new(file, line));
    }
    annotations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(content: &str) -> HashMap<ConfigPath, usize> {
        scan_locations(content).into_iter().collect()
    }

    #[test]
    fn test_scan_nested_mappings_and_sequences() {
        let content = "\
homeassistant:
  name: Home
  customize:
    light.kitchen:
      hidden: true
sensor:
  - platform: template
    name: one
  - platform: rest
# comment
automation: []
";
        let found = lines(content);
        assert_eq!(found[&config_path!["homeassistant"]], 1);
        assert_eq!(found[&config_path!["homeassistant", "name"]], 2);
        assert_eq!(
            found[&config_path!["homeassistant", "customize", "light.kitchen", "hidden"]],
            5
        );
        assert_eq!(found[&config_path!["sensor", 0]], 7);
        assert_eq!(found[&config_path!["sensor", 0, "platform"]], 7);
        assert_eq!(found[&config_path!["sensor", 0, "name"]], 8);
        assert_eq!(found[&config_path!["sensor", 1, "platform"]], 9);
        assert_eq!(found[&config_path!["automation"]], 11);
    }

    #[test]
    fn test_scan_sequence_at_key_indent_and_block_scalars() {
        let content = "\
list:
- a
- b: |
    not: a key
    - nor an item
other: 'x: y'
\"quoted key\": 1
";
        let found = lines(content);
        assert_eq!(found[&config_path!["list", 0]], 2);
        assert_eq!(found[&config_path!["list", 1]], 3);
        assert_eq!(found[&config_path!["list", 1, "b"]], 3);
        assert_eq!(found[&config_path!["other"]], 6);
        assert_eq!(found[&config_path!["quoted key"]], 7);
        assert!(!found.contains_key(&config_path!["list", 1, "b", "not"]));
    }

    #[test]
    fn test_get_by_path_missing_resolves_to_none() {
        let value: Value = serde_yaml::from_str("a: [1, {b: 2}]\n3: x").unwrap();
        assert_eq!(get_by_path(&value, &config_path!["a", 1, "b"]), Some(&Value::from(2)));
        assert_eq!(get_by_path(&value, &config_path!["3"]), Some(&Value::from("x")));
        assert_eq!(get_by_path(&value, &config_path!["a", 7]), None);
        assert_eq!(get_by_path(&value, &config_path!["a", "b"]), None);
        assert_eq!(get_by_path(&value, &config_path!["missing", 0]), None);
    }

    #[test]
    fn test_find_annotation_prefers_node_key() {
        let content = "homeassistant:\n  name: Home\nsensor:\n  - platform: template\n";
        let value: Value = serde_yaml::from_str(content).unwrap();
        let annotations = annotate_source(content, Path::new("configuration.yaml"));

        let found = find_annotation(&value, &annotations, &config_path!["sensor", 0, "platform"]);
        assert_eq!(found, Some(SourceLocation::new("configuration.yaml", 4)));

        let list = find_annotation(&value, &annotations, &config_path!["sensor"]);
        assert_eq!(list, Some(SourceLocation::new("configuration.yaml", 3)));
    }

    #[test]
    fn test_find_annotation_walks_up_for_missing_nodes() {
        let content = "sensor:\n  - platform: template\n";
        let value: Value = serde_yaml::from_str(content).unwrap();
        let annotations = annotate_source(content, Path::new("c.yaml"));

        let found = find_annotation(&value, &annotations, &config_path!["sensor", 0, "missing"]);
        assert_eq!(found, Some(SourceLocation::new("c.yaml", 2)));

        let found = find_annotation(&value, &annotations, &config_path!["nope", 3, "x"]);
        assert_eq!(found, Some(SourceLocation::new("c.yaml", 1)));

        assert_eq!(find_annotation(&value, &Annotations::new(), &config_path!["sensor"]), None);
    }

    #[test]
    fn test_graft_with_offset_and_subtree() {
        let mut annotations = Annotations::new();
        annotations.insert(config_path!["sensor", 0], SourceLocation::new("a.yaml", 2));

        let mut package = Annotations::new();
        package.insert(config_path![0], SourceLocation::new("p.yaml", 5));
        package.insert(config_path![0, "name"], SourceLocation::new("p.yaml", 6));
        annotations.graft(&config_path!["sensor"], &package, 1);

        assert_eq!(annotations.get(&config_path!["sensor", 1, "name"]).unwrap().line, 6);
        assert_eq!(annotations.get(&config_path!["sensor", 0]).unwrap().line, 2);

        let sub = annotations.subtree(&config_path!["sensor", 1]);
        assert_eq!(sub.get(&[]).unwrap().line, 5);
        assert_eq!(sub.len(), 2);

        annotations.remove_subtree(&config_path!["sensor"]);
        assert!(annotations.is_empty());
    }
}
