//! Document loader with custom tag support
//!
//! Supported tags:
//! - `!include path` - Replace the node with another document
//! - `!include_dir_merge_list dir` - Concatenate the lists of every YAML file in a directory
//! - `!secret key` - Substitute from `secrets.yaml`
//! - `!env_var VAR` - Substitute an environment variable
//!
//! JSON documents load unchanged, since JSON is a subset of YAML.

use crate::error::{ConfigError, ConfigResult};
use crate::secrets::Secrets;
use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Loads a configuration document and resolves its tags
pub struct DocumentLoader {
    config_dir: PathBuf,
    secrets: Secrets,
    /// Files currently being loaded, for cycle detection
    loading: HashSet<PathBuf>,
}

impl DocumentLoader {
    /// Create a loader rooted at `config_dir`, reading its `secrets.yaml`
    pub fn new(config_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let config_dir = config_dir.into();
        let secrets = Secrets::load(&config_dir)?;
        Ok(Self::with_secrets(config_dir, secrets))
    }

    pub fn with_secrets(config_dir: impl Into<PathBuf>, secrets: Secrets) -> Self {
        Self {
            config_dir: config_dir.into(),
            secrets,
            loading: HashSet::new(),
        }
    }

    /// Load a file, relative paths resolved against the config directory
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = if path.as_ref().is_absolute() {
            path.as_ref().to_path_buf()
        } else {
            self.config_dir.join(path)
        };
        debug!(?path, "Loading configuration document");

        if self.loading.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
            path: path.clone(),
            source,
        })?;

        self.loading.insert(path.clone());
        let result = self.load_str(&content, &path);
        self.loading.remove(&path);
        result
    }

    /// Parse a document from a string; `source` is used for errors and includes
    pub fn load_str(&mut self, content: &str, source: &Path) -> ConfigResult<Value> {
        let value: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            path: source.to_path_buf(),
            source: e,
        })?;
        self.resolve(value, source)
    }

    fn resolve(&mut self, value: Value, source: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.resolve_tag(*tagged, source),
            Value::Mapping(map) => {
                let mut resolved = Mapping::with_capacity(map.len());
                for (k, v) in map {
                    resolved.insert(k, self.resolve(v, source)?);
                }
                Ok(Value::Mapping(resolved))
            }
            Value::Sequence(seq) => seq
                .into_iter()
                .map(|v| self.resolve(v, source))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            other => Ok(other),
        }
    }

    fn resolve_tag(&mut self, tagged: TaggedValue, source: &Path) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        trace!(%tag, "Resolving tag");

        match tag.as_str() {
            "!include" => {
                let path = self.relative_path(&tag, &tagged.value, source)?;
                self.load_file(path)
            }
            "!include_dir_merge_list" => {
                let dir = self.relative_path(&tag, &tagged.value, source)?;
                self.merge_dir_lists(&dir)
            }
            "!secret" => {
                let key = expect_str(&tag, &tagged.value)?;
                Ok(Value::String(self.secrets.get(key)?.to_string()))
            }
            "!env_var" => {
                let var = expect_str(&tag, &tagged.value)?;
                std::env::var(var)
                    .map(Value::String)
                    .map_err(|_| ConfigError::EnvVarNotFound {
                        var: var.to_string(),
                    })
            }
            _ => {
                warn!(%tag, "Unknown tag, keeping the untagged value");
                self.resolve(tagged.value, source)
            }
        }
    }

    fn merge_dir_lists(&mut self, dir: &Path) -> ConfigResult<Value> {
        if !dir.is_dir() {
            return Err(ConfigError::DirectoryNotFound {
                path: dir.to_path_buf(),
            });
        }

        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|source| ConfigError::ReadFile {
                path: dir.to_path_buf(),
                source,
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yaml" | "yml")))
            .collect();
        files.sort();

        let mut merged = Vec::new();
        for file in files {
            match self.load_file(&file)? {
                Value::Sequence(items) => merged.extend(items),
                Value::Null => {}
                single => merged.push(single),
            }
        }
        Ok(Value::Sequence(merged))
    }

    fn relative_path(&self, tag: &str, value: &Value, source: &Path) -> ConfigResult<PathBuf> {
        let raw = Path::new(expect_str(tag, value)?);
        if raw.is_absolute() {
            return Ok(raw.to_path_buf());
        }
        let base = source.parent().unwrap_or(&self.config_dir);
        Ok(base.join(raw))
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}

fn expect_str<'a>(tag: &str, value: &'a Value) -> ConfigResult<&'a str> {
    value.as_str().ok_or_else(|| ConfigError::InvalidValue {
        key: tag.to_string(),
        reason: "expected a string argument".to_string(),
    })
}

/// Load a document from `path`, resolving tags relative to its directory
pub fn load_document(path: impl AsRef<Path>) -> ConfigResult<Value> {
    let path = path.as_ref();
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut loader = DocumentLoader::new(dir)?;
    loader.load_file(path.file_name().map(Path::new).unwrap_or(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn get<'a>(value: &'a Value, key: &str) -> &'a Value {
        value.get(key).unwrap()
    }

    #[test]
    fn test_json_document_loads() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "config.json",
            r#"{"bridges": [{"type": "hue", "name": "h1"}], "rules": []}"#,
        );

        let value = load_document(dir.path().join("config.json")).unwrap();
        assert_eq!(get(&get(&value, "bridges")[0], "name").as_str(), Some("h1"));
    }

    #[test]
    fn test_include_and_secret() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "secrets.yaml", "smtp_password: hunter2\n");
        write(dir.path(), "mail.yaml", "password: !secret smtp_password\n");
        write(dir.path(), "config.yaml", "mail: !include mail.yaml\n");

        let value = load_document(dir.path().join("config.yaml")).unwrap();
        assert_eq!(
            get(get(&value, "mail"), "password").as_str(),
            Some("hunter2")
        );
    }

    #[test]
    fn test_env_var() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("HUB_CONFIG_TEST_BROKER", "broker.local");
        write(dir.path(), "config.yaml", "host: !env_var HUB_CONFIG_TEST_BROKER\n");

        let value = load_document(dir.path().join("config.yaml")).unwrap();
        assert_eq!(get(&value, "host").as_str(), Some("broker.local"));
        std::env::remove_var("HUB_CONFIG_TEST_BROKER");
    }

    #[test]
    fn test_missing_env_var() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "config.yaml", "host: !env_var HUB_CONFIG_TEST_UNSET\n");

        let result = load_document(dir.path().join("config.yaml"));
        assert!(matches!(result, Err(ConfigError::EnvVarNotFound { .. })));
    }

    #[test]
    fn test_include_dir_merge_list() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "rules/a.yaml", "- regex: a\n- regex: b\n");
        write(dir.path(), "rules/b.yml", "- regex: c\n");
        write(dir.path(), "rules/notes.txt", "ignored");
        write(dir.path(), "config.yaml", "rules: !include_dir_merge_list rules\n");

        let value = load_document(dir.path().join("config.yaml")).unwrap();
        let rules = get(&value, "rules").as_sequence().unwrap();
        assert_eq!(rules.len(), 3);
        assert_eq!(get(&rules[2], "regex").as_str(), Some("c"));
    }

    #[test]
    fn test_circular_include() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.yaml", "b: !include b.yaml\n");
        write(dir.path(), "b.yaml", "a: !include a.yaml\n");

        let result = load_document(dir.path().join("a.yaml"));
        assert!(matches!(result, Err(ConfigError::CircularInclude { .. })));
    }
}
