use std::path::{Path, PathBuf};

use serde_json::Value as JsonValue;
use toml::Value as TomlValue;

/// Flat `(composite key, template)` pairs, in loader order.
pub type ResourceEntries = Vec<(String, String)>;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("resource '{key}' is not a string")]
    NonString { key: String },
    #[error("resource loader panicked: {0}")]
    Panicked(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Source of the raw catalog. Keys are already qualified (`name.culture`).
///
/// Called on the first build and on every reload; it may block.
pub trait ResourceLoader: Send + Sync {
    fn load(&self) -> Result<ResourceEntries, LoadError>;

    fn describe(&self) -> String {
        "custom".to_string()
    }
}

impl<F> ResourceLoader for F
where
    F: Fn() -> Result<ResourceEntries, LoadError> + Send + Sync,
{
    fn load(&self) -> Result<ResourceEntries, LoadError> {
        self()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyLoader;

impl ResourceLoader for EmptyLoader {
    fn load(&self) -> Result<ResourceEntries, LoadError> {
        Ok(Vec::new())
    }

    fn describe(&self) -> String {
        "empty".to_string()
    }
}

/// Fixed entries, mostly useful for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticLoader {
    entries: ResourceEntries,
}

impl StaticLoader {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl ResourceLoader for StaticLoader {
    fn load(&self) -> Result<ResourceEntries, LoadError> {
        Ok(self.entries.clone())
    }

    fn describe(&self) -> String {
        format!("static ({} entries)", self.entries.len())
    }
}

/// Reads a TOML or JSON resource file (picked by extension, TOML otherwise).
///
/// Nested tables are flattened with `.`, so these are equivalent:
///
/// ```toml
/// "greet.en-US" = "Hello {0}"
///
/// [greet]
/// en-US = "Hello {0}"
/// ```
#[derive(Debug, Clone)]
pub struct FileResourceLoader {
    path: PathBuf,
}

impl FileResourceLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_json(&self) -> bool {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"))
    }
}

impl ResourceLoader for FileResourceLoader {
    fn load(&self) -> Result<ResourceEntries, LoadError> {
        let text = std::fs::read_to_string(&self.path).map_err(|source| LoadError::Io {
            path: self.path.clone(),
            source,
        })?;
        let mut out = Vec::new();
        if text.trim().is_empty() {
            return Ok(out);
        }
        if self.is_json() {
            let value: JsonValue =
                serde_json::from_str(&text).map_err(|e| LoadError::Parse {
                    path: self.path.clone(),
                    message: e.to_string(),
                })?;
            let JsonValue::Object(map) = value else {
                return Err(LoadError::Parse {
                    path: self.path.clone(),
                    message: "top-level value must be an object".to_string(),
                });
            };
            for (k, v) in map {
                flatten_json(&k, v, &mut out)?;
            }
        } else {
            let table = text
                .parse::<toml::Table>()
                .map_err(|e| LoadError::Parse {
                    path: self.path.clone(),
                    message: e.to_string(),
                })?;
            for (k, v) in table {
                flatten_toml(&k, v, &mut out)?;
            }
        }
        Ok(out)
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

fn join_key(prefix: &str, key: &str) -> String {
    format!("{prefix}.{key}")
}

fn flatten_json(key: &str, value: JsonValue, out: &mut ResourceEntries) -> Result<(), LoadError> {
    match value {
        JsonValue::String(s) => out.push((key.to_string(), s)),
        JsonValue::Object(map) => {
            for (k, v) in map {
                flatten_json(&join_key(key, &k), v, out)?;
            }
        }
        _ => {
            return Err(LoadError::NonString {
                key: key.to_string(),
            });
        }
    }
    Ok(())
}

fn flatten_toml(key: &str, value: TomlValue, out: &mut ResourceEntries) -> Result<(), LoadError> {
    match value {
        TomlValue::String(s) => out.push((key.to_string(), s)),
        TomlValue::Table(table) => {
            for (k, v) in table {
                flatten_toml(&join_key(key, &k), v, out)?;
            }
        }
        _ => {
            return Err(LoadError::NonString {
                key: key.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn temp_file(name: &str, content: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dynamic-localizer-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join(name);
        std::fs::write(&path, content).expect("write resource file");
        path
    }

    fn sorted(mut entries: ResourceEntries) -> ResourceEntries {
        entries.sort();
        entries
    }

    #[test]
    fn toml_tables_flatten_to_composite_keys() {
        let path = temp_file(
            "strings.toml",
            r#"
"bye.en-US" = "Goodbye"

[greet]
en-US = "Hello {0}"
zh_CN = "你好{0}"

[menu.file]
en-US = "File"
"#,
        );
        let entries = FileResourceLoader::new(&path).load().expect("load");
        assert_eq!(
            sorted(entries),
            vec![
                ("bye.en-US".to_string(), "Goodbye".to_string()),
                ("greet.en-US".to_string(), "Hello {0}".to_string()),
                ("greet.zh_CN".to_string(), "你好{0}".to_string()),
                ("menu.file.en-US".to_string(), "File".to_string()),
            ]
        );
    }

    #[test]
    fn json_flat_and_nested_keys() {
        let path = temp_file(
            "strings.json",
            r#"{ "greet.en-US": "Hello", "menu": { "file": { "zh_CN": "文件" } } }"#,
        );
        let entries = FileResourceLoader::new(&path).load().expect("load");
        assert_eq!(
            sorted(entries),
            vec![
                ("greet.en-US".to_string(), "Hello".to_string()),
                ("menu.file.zh_CN".to_string(), "文件".to_string()),
            ]
        );
    }

    #[test]
    fn non_string_values_are_rejected() {
        let path = temp_file("bad.json", r#"{ "count.en-US": 3 }"#);
        let err = FileResourceLoader::new(&path).load().expect_err("non-string");
        assert!(matches!(err, LoadError::NonString { ref key } if key == "count.en-US"));
    }

    #[test]
    fn missing_and_malformed_files_fail() {
        let missing = std::env::temp_dir().join(format!("missing-{}.toml", uuid::Uuid::new_v4()));
        assert!(matches!(
            FileResourceLoader::new(&missing).load(),
            Err(LoadError::Io { .. })
        ));

        let path = temp_file("broken.toml", "this is = = not toml");
        assert!(matches!(
            FileResourceLoader::new(&path).load(),
            Err(LoadError::Parse { .. })
        ));

        let path = temp_file("array.json", "[1, 2]");
        assert!(matches!(
            FileResourceLoader::new(&path).load(),
            Err(LoadError::Parse { .. })
        ));
    }

    #[test]
    fn empty_file_yields_no_entries() {
        let path = temp_file("empty.toml", "  \n");
        assert!(FileResourceLoader::new(&path).load().expect("load").is_empty());
    }

    #[test]
    fn closures_are_loaders() {
        let loader = || -> Result<ResourceEntries, LoadError> {
            Ok(vec![("a.en".to_string(), "A".to_string())])
        };
        assert_eq!(loader.load().expect("load").len(), 1);
        assert_eq!(loader.describe(), "custom");
        assert!(EmptyLoader.load().expect("load").is_empty());
        assert_eq!(StaticLoader::new([("k.en", "v")]).load().expect("load").len(), 1);
    }
}
