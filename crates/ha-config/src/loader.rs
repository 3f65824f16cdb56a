//! YAML configuration loader with custom tag support
//!
//! Supports Home Assistant's custom YAML tags:
//! - `!include path` - Include another YAML file
//! - `!include_dir_list dir` - Include all YAML files in a directory as a list
//! - `!include_dir_merge_list dir` - Merge lists from all YAML files in a directory
//! - `!include_dir_named dir` - Include all YAML files as a mapping keyed by filename
//! - `!include_dir_merge_named dir` - Merge mappings from all YAML files
//! - `!secret key` - Substitute from secrets.yaml
//! - `!env_var VAR [default]` - Environment variable substitution
//!
//! Every loaded tree comes with [`Annotations`] locating block-style keys and
//! sequence items in their source file, including nodes that were pulled in
//! through an include tag.

use crate::annotation::{annotate_source, Annotations, ConfigPath, ConfigTree, PathSegment};
use crate::error::{ConfigError, ConfigResult};
use crate::secrets::{Secrets, SECRET_YAML};
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// YAML loader with support for Home Assistant custom tags
pub struct YamlLoader {
    /// Base directory for resolving relative paths
    config_dir: PathBuf,
    /// Secrets store
    secrets: Secrets,
    /// Track included files to detect circular includes
    include_stack: HashSet<PathBuf>,
}

impl YamlLoader {
    /// Create a new YAML loader for the given config directory
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        let secrets = Secrets::new(&config_dir);
        Self::with_secrets(config_dir, secrets)
    }

    /// Create a loader sharing an existing secrets store
    pub fn with_secrets(config_dir: impl Into<PathBuf>, secrets: Secrets) -> Self {
        Self {
            config_dir: config_dir.into(),
            secrets,
            include_stack: HashSet::new(),
        }
    }

    /// Load and process a YAML file
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        self.load_tree(path).map(|tree| tree.data)
    }

    /// Load and process a YAML file together with its source annotations
    pub fn load_tree(&mut self, path: impl AsRef<Path>) -> ConfigResult<ConfigTree> {
        let path = self.resolve_path(path.as_ref());
        debug!("Loading YAML file: {:?}", path);

        if self.include_stack.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
            path: path.clone(),
            source: e,
        })?;

        self.include_stack.insert(path.clone());
        let result = self.load_string(&content, &path);
        self.include_stack.remove(&path);

        result
    }

    /// Load and process YAML from a string
    pub fn load_string(&mut self, content: &str, source_path: &Path) -> ConfigResult<ConfigTree> {
        let value: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseYaml {
            path: source_path.to_path_buf(),
            source: e,
        })?;

        let mut annotations = annotate_source(content, source_path);
        let mut path = Vec::new();
        let data = self.process_value(value, source_path, &mut path, &mut annotations)?;
        Ok(ConfigTree::with_annotations(data, annotations))
    }

    /// Process a YAML value, handling custom tags
    fn process_value(
        &mut self,
        value: Value,
        source_path: &Path,
        path: &mut ConfigPath,
        annotations: &mut Annotations,
    ) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.process_tagged(*tagged, source_path, path, annotations),
            Value::Mapping(map) => {
                let mut result = Mapping::new();
                for (k, v) in map {
                    path.push(PathSegment::Key(crate::annotation::key_to_string(&k)));
                    let processed = self.process_value(v, source_path, path, annotations);
                    path.pop();
                    result.insert(k, processed?);
                }
                Ok(Value::Mapping(result))
            }
            Value::Sequence(seq) => {
                let mut result = Vec::with_capacity(seq.len());
                for (i, v) in seq.into_iter().enumerate() {
                    path.push(PathSegment::Index(i));
                    let processed = self.process_value(v, source_path, path, annotations);
                    path.pop();
                    result.push(processed?);
                }
                Ok(Value::Sequence(result))
            }
            _ => Ok(value),
        }
    }

    /// Process a tagged value
    fn process_tagged(
        &mut self,
        tagged: serde_yaml::value::TaggedValue,
        source_path: &Path,
        path: &mut ConfigPath,
        annotations: &mut Annotations,
    ) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        let value = tagged.value;

        trace!("Processing tag '{}' with value {:?}", tag, value);

        match tag.as_str() {
            "!include" => {
                let include_path = self.value_to_path(&value, source_path)?;
                debug!("Including file: {:?}", include_path);
                let tree = self.load_tree(&include_path)?;
                annotations.graft(path, &tree.annotations, 0);
                Ok(tree.data)
            }
            "!include_dir_list" => self.include_dir_list(value, source_path, path, annotations),
            "!include_dir_merge_list" => {
                self.include_dir_merge_list(value, source_path, path, annotations)
            }
            "!include_dir_named" => self.include_dir_named(value, source_path, path, annotations),
            "!include_dir_merge_named" => {
                self.include_dir_merge_named(value, source_path, path, annotations)
            }
            "!secret" => self.process_secret(value, source_path),
            "!env_var" => self.process_env_var(value),
            _ => {
                // Unknown tag, keep it as-is but process the inner value
                let processed = self.process_value(value, source_path, path, annotations)?;
                Ok(Value::Tagged(Box::new(serde_yaml::value::TaggedValue {
                    tag: tagged.tag,
                    value: processed,
                })))
            }
        }
    }

    /// `!include_dir_list`: one list item per file
    fn include_dir_list(
        &mut self,
        value: Value,
        source_path: &Path,
        path: &ConfigPath,
        annotations: &mut Annotations,
    ) -> ConfigResult<Value> {
        let dir_path = self.value_to_path(&value, source_path)?;
        debug!("Including directory as list: {:?}", dir_path);

        let mut result = Vec::new();
        for file in self.get_yaml_files(&dir_path)? {
            let tree = self.load_tree(&file)?;
            let mut item_path = path.clone();
            item_path.push(PathSegment::Index(result.len()));
            annotations.graft(&item_path, &tree.annotations, 0);
            result.push(tree.data);
        }

        Ok(Value::Sequence(result))
    }

    /// `!include_dir_merge_list`: concatenate the lists of all files
    fn include_dir_merge_list(
        &mut self,
        value: Value,
        source_path: &Path,
        path: &ConfigPath,
        annotations: &mut Annotations,
    ) -> ConfigResult<Value> {
        let dir_path = self.value_to_path(&value, source_path)?;
        debug!("Including directory as merged list: {:?}", dir_path);

        let mut result = Vec::new();
        for file in self.get_yaml_files(&dir_path)? {
            let tree = self.load_tree(&file)?;
            match tree.data {
                Value::Sequence(seq) => {
                    annotations.graft(path, &tree.annotations, result.len());
                    result.extend(seq);
                }
                other => {
                    let mut item_path = path.clone();
                    item_path.push(PathSegment::Index(result.len()));
                    annotations.graft(&item_path, &tree.annotations, 0);
                    result.push(other);
                }
            }
        }

        Ok(Value::Sequence(result))
    }

    /// `!include_dir_named`: mapping from file stem to file content
    fn include_dir_named(
        &mut self,
        value: Value,
        source_path: &Path,
        path: &ConfigPath,
        annotations: &mut Annotations,
    ) -> ConfigResult<Value> {
        let dir_path = self.value_to_path(&value, source_path)?;
        debug!("Including directory as named mapping: {:?}", dir_path);

        let mut result = Mapping::new();
        for file in self.get_yaml_files(&dir_path)? {
            let name = file
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let tree = self.load_tree(&file)?;
            let mut entry_path = path.clone();
            entry_path.push(PathSegment::Key(name.clone()));
            annotations.remove_subtree(&entry_path);
            annotations.graft(&entry_path, &tree.annotations, 0);
            result.insert(Value::String(name), tree.data);
        }

        Ok(Value::Mapping(result))
    }

    /// `!include_dir_merge_named`: merge the mappings of all files
    fn include_dir_merge_named(
        &mut self,
        value: Value,
        source_path: &Path,
        path: &ConfigPath,
        annotations: &mut Annotations,
    ) -> ConfigResult<Value> {
        let dir_path = self.value_to_path(&value, source_path)?;
        debug!("Including directory as merged mapping: {:?}", dir_path);

        let mut result = Mapping::new();
        for file in self.get_yaml_files(&dir_path)? {
            let tree = self.load_tree(&file)?;
            if let Value::Mapping(map) = tree.data {
                for (k, v) in map {
                    let mut entry_path = path.clone();
                    entry_path.push(PathSegment::Key(crate::annotation::key_to_string(&k)));
                    annotations.remove_subtree(&entry_path);
                    result.insert(k, v);
                }
                annotations.graft(path, &tree.annotations, 0);
            }
        }

        Ok(Value::Mapping(result))
    }

    /// Process !secret tag
    fn process_secret(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        let key = match value {
            Value::String(s) => s,
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "!secret".to_string(),
                    reason: "secret key must be a string".to_string(),
                })
            }
        };

        let requester = self.resolve_path(source_path);
        self.secrets.get(&requester, &key)
    }

    /// Process !env_var tag, `VAR` or `VAR default`
    fn process_env_var(&self, value: Value) -> ConfigResult<Value> {
        let spec = match value {
            Value::String(s) => s,
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "!env_var".to_string(),
                    reason: "environment variable name must be a string".to_string(),
                })
            }
        };

        let mut parts = spec.splitn(2, char::is_whitespace);
        let var_name = parts.next().unwrap_or_default();
        let default = parts.next().map(str::trim);

        match (std::env::var(var_name), default) {
            (Ok(env_value), _) => {
                debug!("Substituted env var: {}", var_name);
                Ok(Value::String(env_value))
            }
            (Err(_), Some(default)) => Ok(serde_yaml::from_str(default)
                .unwrap_or_else(|_| Value::String(default.to_string()))),
            (Err(_), None) => Err(ConfigError::EnvVarNotFound {
                var: var_name.to_string(),
            }),
        }
    }

    /// Convert a YAML value to a path, resolving relative to source file
    fn value_to_path(&self, value: &Value, source_path: &Path) -> ConfigResult<PathBuf> {
        let path_str = match value {
            Value::String(s) => s.clone(),
            _ => {
                return Err(ConfigError::InvalidIncludePath {
                    path: format!("{:?}", value),
                    reason: "path must be a string".to_string(),
                })
            }
        };

        // Resolve relative to the source file's directory
        let base_dir = source_path.parent().unwrap_or(&self.config_dir);
        let resolved = if Path::new(&path_str).is_absolute() {
            PathBuf::from(&path_str)
        } else {
            base_dir.join(&path_str)
        };

        Ok(resolved)
    }

    /// Resolve a path relative to the config directory
    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }

    /// All YAML files below a directory, sorted by path
    ///
    /// Hidden entries and secrets files are skipped.
    fn get_yaml_files(&self, dir: &Path) -> ConfigResult<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(ConfigError::DirectoryNotFound {
                path: dir.to_path_buf(),
            });
        }

        let mut files = Vec::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            let entries = fs::read_dir(&current).map_err(|e| ConfigError::ReadFile {
                path: current.clone(),
                source: e,
            })?;
            for entry in entries.filter_map(|entry| entry.ok()) {
                let path = entry.path();
                let hidden = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map_or(true, |n| n.starts_with('.'));
                if hidden {
                    continue;
                }
                if path.is_dir() {
                    pending.push(path);
                } else if path
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
                    && path.file_name().map_or(true, |n| n != SECRET_YAML)
                {
                    files.push(path);
                }
            }
        }

        files.sort();
        Ok(files)
    }

    /// Get a reference to the secrets store
    pub fn secrets(&self) -> &Secrets {
        &self.secrets
    }

    /// Get the config directory
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}

/// Load a YAML file with full tag processing
pub fn load_yaml(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(config_dir).load_file(file)
}

/// Load a YAML file with full tag processing and source annotations
pub fn load_yaml_annotated(
    config_dir: impl Into<PathBuf>,
    file: impl AsRef<Path>,
) -> ConfigResult<ConfigTree> {
    YamlLoader::new(config_dir).load_tree(file)
}

/// Load a YAML string with tag processing
pub fn load_yaml_string(
    config_dir: impl Into<PathBuf>,
    content: &str,
    source_name: &str,
) -> ConfigResult<Value> {
    let config_dir = config_dir.into();
    let source = config_dir.join(source_name);
    YamlLoader::new(config_dir)
        .load_string(content, &source)
        .map(|tree| tree.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::SourceLocation;
    use crate::config_path;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut file = fs::File::create(path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_load_simple_yaml() {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "config.yaml",
            r#"
key: value
number: 42
list:
  - one
  - two
"#,
        );

        let value = load_yaml(dir.path(), "config.yaml").unwrap();
        assert!(value.is_mapping());
    }

    #[test]
    fn test_include() {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "included.yaml",
            "included_key: included_value\n",
        );
        write_file(
            dir.path(),
            "config.yaml",
            "main_key: main_value\nincluded: !include included.yaml\n",
        );

        let value = load_yaml(dir.path(), "config.yaml").unwrap();
        let included = value.get("included").unwrap();
        assert_eq!(
            included.get("included_key"),
            Some(&Value::String("included_value".to_string()))
        );
    }

    #[test]
    fn test_include_annotations() {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "sensors.yaml",
            "- platform: template\n- platform: demo\n  name: x\n",
        );
        write_file(
            dir.path(),
            "config.yaml",
            "homeassistant:\n  name: Home\nsensor: !include sensors.yaml\n",
        );

        let tree = load_yaml_annotated(dir.path(), "config.yaml").unwrap();
        let main = dir.path().join("config.yaml");
        let sensors = dir.path().join("sensors.yaml");

        assert_eq!(
            tree.annotations.get(&config_path!["sensor"]),
            Some(&SourceLocation::new(&main, 3))
        );
        assert_eq!(
            tree.annotations.get(&config_path!["sensor", 1, "name"]),
            Some(&SourceLocation::new(&sensors, 3))
        );
        assert_eq!(
            tree.find_annotation(&config_path!["sensor", 1, "missing"]),
            Some(SourceLocation::new(&sensors, 2))
        );
    }

    #[test]
    fn test_merge_list_annotations_are_offset() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "automations/a.yaml", "- alias: One\n- alias: Two\n");
        write_file(dir.path(), "automations/b.yaml", "- alias: Three\n");
        write_file(
            dir.path(),
            "config.yaml",
            "automation: !include_dir_merge_list automations\n",
        );

        let tree = load_yaml_annotated(dir.path(), "config.yaml").unwrap();
        assert_eq!(tree.get(&config_path!["automation"]).unwrap().as_sequence().unwrap().len(), 3);
        assert_eq!(
            tree.annotations.get(&config_path!["automation", 2, "alias"]),
            Some(&SourceLocation::new(dir.path().join("automations/b.yaml"), 1))
        );
    }

    #[test]
    fn test_secret() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "secrets.yaml", "my_password: secret123\n");
        write_file(dir.path(), "config.yaml", "password: !secret my_password\n");

        let value = load_yaml(dir.path(), "config.yaml").unwrap();
        assert_eq!(
            value.get("password"),
            Some(&Value::String("secret123".to_string()))
        );
    }

    #[test]
    fn test_secret_from_included_directory() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "secrets.yaml", "token: root\n");
        write_file(dir.path(), "packages/secrets.yaml", "token: nested\n");
        write_file(dir.path(), "packages/pkg.yaml", "token: !secret token\n");
        write_file(dir.path(), "config.yaml", "pkg: !include packages/pkg.yaml\n");

        let value = load_yaml(dir.path(), "config.yaml").unwrap();
        assert_eq!(
            value.get("pkg").and_then(|p| p.get("token")),
            Some(&Value::String("nested".to_string()))
        );
    }

    #[test]
    fn test_env_var() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("TEST_HA_CONFIG_VAR", "env_value");
        write_file(
            dir.path(),
            "config.yaml",
            "from_env: !env_var TEST_HA_CONFIG_VAR\nfallback: !env_var TEST_HA_CONFIG_UNSET 5\n",
        );

        let value = load_yaml(dir.path(), "config.yaml").unwrap();
        assert_eq!(
            value.get("from_env"),
            Some(&Value::String("env_value".to_string()))
        );
        assert_eq!(value.get("fallback"), Some(&Value::from(5u64)));

        std::env::remove_var("TEST_HA_CONFIG_VAR");
    }

    #[test]
    fn test_include_dir_list() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "automations/auto1.yaml", "alias: Automation 1\n");
        write_file(dir.path(), "automations/auto2.yaml", "alias: Automation 2\n");
        write_file(dir.path(), "automations/.hidden.yaml", "alias: Hidden\n");
        write_file(
            dir.path(),
            "config.yaml",
            "automation: !include_dir_list automations\n",
        );

        let value = load_yaml(dir.path(), "config.yaml").unwrap();
        let seq = value.get("automation").unwrap().as_sequence().unwrap();
        assert_eq!(seq.len(), 2);
    }

    #[test]
    fn test_include_dir_named() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "lights/bedroom.yaml", "brightness: 100\n");
        write_file(dir.path(), "lights/kitchen.yaml", "brightness: 50\n");
        write_file(
            dir.path(),
            "config.yaml",
            "lights: !include_dir_named lights\n",
        );

        let value = load_yaml(dir.path(), "config.yaml").unwrap();
        let lights = value.get("lights").unwrap().as_mapping().unwrap();
        assert!(lights.contains_key("bedroom"));
        assert!(lights.contains_key("kitchen"));
    }

    #[test]
    fn test_include_dir_merge_named() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "packages/a.yaml", "pkg_a:\n  light: {}\n");
        write_file(dir.path(), "packages/sub/b.yaml", "pkg_b:\n  switch: {}\n");
        write_file(
            dir.path(),
            "config.yaml",
            "packages: !include_dir_merge_named packages\n",
        );

        let value = load_yaml(dir.path(), "config.yaml").unwrap();
        let packages = value.get("packages").unwrap().as_mapping().unwrap();
        assert_eq!(packages.len(), 2);
    }

    #[test]
    fn test_circular_include_detection() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "a.yaml", "include_b: !include b.yaml\n");
        write_file(dir.path(), "b.yaml", "include_a: !include a.yaml\n");

        let result = load_yaml(dir.path(), "a.yaml");
        assert!(matches!(result, Err(ConfigError::CircularInclude { .. })));
    }

    #[test]
    fn test_missing_secret() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "secrets.yaml", "existing: value\n");
        write_file(dir.path(), "config.yaml", "password: !secret nonexistent\n");

        let result = load_yaml(dir.path(), "config.yaml");
        assert!(matches!(result, Err(ConfigError::SecretNotFound { .. })));
    }
}
