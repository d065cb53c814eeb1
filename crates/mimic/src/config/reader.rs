//! Configuration readers.
//!
//! A [`Reader`] turns a URL into a parsed document plus its origin info. The schema
//! registry uses it to fetch documents named by external `$ref`s; the CLI uses it to
//! load OpenAPI and workflow files.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Serialization format of a configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// Guess the format from a path or URL suffix. Unknown suffixes are treated as YAML,
    /// which also accepts JSON.
    pub fn from_path(path: &str) -> Self {
        if path.to_ascii_lowercase().ends_with(".json") {
            DocumentFormat::Json
        } else {
            DocumentFormat::Yaml
        }
    }
}

/// Origin information of a loaded document.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigInfo {
    pub url: Url,
    pub format: DocumentFormat,
}

/// A parsed configuration document.
#[derive(Debug, Clone)]
pub struct ConfigDocument {
    pub info: ConfigInfo,
    pub value: Value,
}

/// Errors raised by readers.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("config not found: {url}")]
    NotFound { url: String },

    #[error("cannot read {url}: {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {url}: {reason}")]
    Parse { url: String, reason: String },

    #[error("unsupported URL scheme in {url}")]
    UnsupportedScheme { url: String },
}

/// Fetches and parses configuration documents.
pub trait Reader: Send + Sync {
    /// Given a URL, return the parsed config plus its origin info.
    fn read(&self, url: &Url) -> Result<ConfigDocument, ReadError>;
}

/// Parse document text in the given format.
pub fn parse_document(url: &Url, text: &str, format: DocumentFormat) -> Result<ConfigDocument, ReadError> {
    let value = match format {
        DocumentFormat::Json => serde_json::from_str::<Value>(text).map_err(|e| ReadError::Parse {
            url: url.to_string(),
            reason: e.to_string(),
        })?,
        DocumentFormat::Yaml => serde_yaml::from_str::<Value>(text).map_err(|e| ReadError::Parse {
            url: url.to_string(),
            reason: e.to_string(),
        })?,
    };
    Ok(ConfigDocument {
        info: ConfigInfo {
            url: url.clone(),
            format,
        },
        value,
    })
}

/// Build a `file://` URL for a path, making relative paths absolute.
pub fn file_url(path: &Path) -> Result<Url, ReadError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|source| ReadError::Io {
                url: path.display().to_string(),
                source,
            })?
            .join(path)
    };
    Url::from_file_path(&absolute).map_err(|_| ReadError::UnsupportedScheme {
        url: absolute.display().to_string(),
    })
}

// ============================================================================
// File system reader
// ============================================================================

/// Reads `file://` URLs from the local file system.
#[derive(Debug, Default, Clone)]
pub struct FileReader;

impl FileReader {
    pub fn new() -> Self {
        FileReader
    }
}

impl Reader for FileReader {
    fn read(&self, url: &Url) -> Result<ConfigDocument, ReadError> {
        if url.scheme() != "file" {
            return Err(ReadError::UnsupportedScheme { url: url.to_string() });
        }
        let path = url
            .to_file_path()
            .map_err(|_| ReadError::UnsupportedScheme { url: url.to_string() })?;
        if !path.exists() {
            return Err(ReadError::NotFound { url: url.to_string() });
        }
        debug!("Reading config {}", path.display());
        let text = std::fs::read_to_string(&path).map_err(|source| ReadError::Io {
            url: url.to_string(),
            source,
        })?;
        parse_document(url, &text, DocumentFormat::from_path(url.path()))
    }
}

// ============================================================================
// In-memory reader
// ============================================================================

/// Serves documents registered in memory, keyed by URL without fragment.
#[derive(Debug, Default)]
pub struct StaticReader {
    documents: RwLock<HashMap<String, Value>>,
}

impl StaticReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document. Returns `self` for chaining.
    pub fn with(self, url: &str, value: Value) -> Self {
        self.insert(url, value);
        self
    }

    pub fn insert(&self, url: &str, value: Value) {
        self.documents.write().insert(strip_fragment(url), value);
    }
}

impl Reader for StaticReader {
    fn read(&self, url: &Url) -> Result<ConfigDocument, ReadError> {
        let key = strip_fragment(url.as_str());
        let documents = self.documents.read();
        let value = documents
            .get(&key)
            .cloned()
            .ok_or_else(|| ReadError::NotFound { url: key.clone() })?;
        Ok(ConfigDocument {
            info: ConfigInfo {
                url: url.clone(),
                format: DocumentFormat::from_path(url.path()),
            },
            value,
        })
    }
}

/// Reader that never finds anything; for registries without external documents.
#[derive(Debug, Default, Clone)]
pub struct NoReader;

impl Reader for NoReader {
    fn read(&self, url: &Url) -> Result<ConfigDocument, ReadError> {
        Err(ReadError::NotFound { url: url.to_string() })
    }
}

fn strip_fragment(url: &str) -> String {
    url.split('#').next().unwrap_or(url).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_file_reader_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let yaml_path = dir.path().join("a.yaml");
        let mut file = std::fs::File::create(&yaml_path).unwrap();
        writeln!(file, "type: string\nminLength: 2").unwrap();

        let json_path = dir.path().join("b.json");
        std::fs::write(&json_path, r#"{"type": "integer"}"#).unwrap();

        let reader = FileReader::new();
        let doc = reader.read(&file_url(&yaml_path).unwrap()).unwrap();
        assert_eq!(doc.value, json!({"type": "string", "minLength": 2}));
        assert_eq!(doc.info.format, DocumentFormat::Yaml);

        let doc = reader.read(&file_url(&json_path).unwrap()).unwrap();
        assert_eq!(doc.value, json!({"type": "integer"}));
    }

    #[test]
    fn test_file_reader_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let url = file_url(&dir.path().join("missing.yaml")).unwrap();
        assert!(matches!(FileReader.read(&url), Err(ReadError::NotFound { .. })));
    }

    #[test]
    fn test_static_reader_ignores_fragment() {
        let reader = StaticReader::new().with("https://example.com/s.json", json!({"type": "string"}));
        let url = Url::parse("https://example.com/s.json#/definitions/a").unwrap();
        assert!(reader.read(&url).is_ok());
    }
}
