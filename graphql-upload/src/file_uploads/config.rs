use std::path::PathBuf;
use std::time::Duration;

use bytesize::ByteSize;
use schemars::JsonSchema;
use schemars::schema::RootSchema;
use serde::Deserialize;
use serde::Serialize;

/// Configuration for File Uploads
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct FileUploadsConfig {
    /// Whether multipart requests are rewritten at all. Disabled layers forward every request untouched.
    pub enabled: bool,

    /// Limits applied to a single multipart request.
    pub limits: MultipartRequestLimits,

    /// Maximum number of files persisted at the same time for one request.
    pub max_concurrency: usize,

    /// How path segments that traverse arrays are interpreted.
    pub array_indexing: ArrayIndexing,

    /// Where uploaded files are stored.
    pub storage: StorageConfig,
}

impl Default for FileUploadsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limits: MultipartRequestLimits::default(),
            max_concurrency: 4,
            array_indexing: ArrayIndexing::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl FileUploadsConfig {
    /// Parse a configuration from its YAML representation.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// JSON schema of the configuration, useful for editor validation.
    pub fn json_schema() -> RootSchema {
        schemars::schema_for!(FileUploadsConfig)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct MultipartRequestLimits {
    /// Maximum size of the whole multipart body, e.g. `64MiB`.
    #[schemars(with = "String")]
    pub max_request_size: ByteSize,

    /// Maximum time spent reading a single part of the body, e.g. `30s`. A client that stops
    /// sending in the middle of a part fails the request once it elapses.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub read_timeout: Duration,
}

impl Default for MultipartRequestLimits {
    fn default() -> Self {
        Self {
            max_request_size: ByteSize::mib(64),
            read_timeout: Duration::from_secs(30),
        }
    }
}

/// Interpretation of a path segment reached while standing on an array.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ArrayIndexing {
    /// The segment is a decimal index into the array, e.g. `variables.files.1`.
    #[default]
    Explicit,
    /// The element at the current depth of the walk is selected and the segment is consumed.
    /// Only useful for clients written against that historical behaviour.
    Positional,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct StorageConfig {
    /// Prefix of every temporary file name.
    pub prefix: String,
    /// Directory receiving the files. Defaults to the platform temporary directory.
    pub directory: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            prefix: "graphqlupload".to_string(),
            directory: None,
        }
    }
}

impl StorageConfig {
    pub(crate) fn directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(std::env::temp_dir)
    }
}
