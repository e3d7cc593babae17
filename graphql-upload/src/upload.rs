//! The `Upload` scalar.
//!
//! Once the upload layer ran, every file variable of the operation holds an object describing
//! the stored copy of the uploaded file:
//!
//! ```json
//! { "filename": "avatar.png", "mimetype": "image/png", "filepath": "/tmp/graphqlupload-Xa3f9Q.png" }
//! ```
//!
//! Resolvers turn it back into an [`Upload`] with [`Upload::from_graphql_input`] and read the
//! content with [`Upload::reader`]. The stored file belongs to whoever consumes the `Upload`:
//! it is never removed by this crate.

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::BufReader;

/// Name of the GraphQL scalar backed by [`Upload`].
pub const UPLOAD_SCALAR: &str = "Upload";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Cannot convert the received value into an Upload: {0}")]
    TypeMismatch(String),

    #[error("Cannot open uploaded file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Descriptor of an uploaded file stored on the local filesystem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Upload {
    filename: String,
    mimetype: String,
    filepath: PathBuf,
}

impl Upload {
    pub(crate) fn new(filename: String, mimetype: String, filepath: PathBuf) -> Self {
        Self {
            filename,
            mimetype,
            filepath,
        }
    }

    /// File name as sent by the client.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Content type declared by the client for this part, empty when none was sent.
    pub fn mimetype(&self) -> &str {
        &self.mimetype
    }

    /// Location of the stored copy.
    pub fn filepath(&self) -> &Path {
        &self.filepath
    }

    /// Whether `name` is the GraphQL scalar this type stands for.
    pub fn implements_graphql_type(name: &str) -> bool {
        name == UPLOAD_SCALAR
    }

    /// Rebuilds an `Upload` from a GraphQL input value.
    ///
    /// Only objects with exactly the `filename`, `mimetype` and `filepath` string fields are
    /// accepted.
    pub fn from_graphql_input(input: &Value) -> Result<Self, UploadError> {
        match input {
            Value::Object(_) => Upload::deserialize(input)
                .map_err(|error| UploadError::TypeMismatch(error.to_string())),
            Value::Null => Err(UploadError::TypeMismatch("found null".to_string())),
            Value::Bool(_) => Err(UploadError::TypeMismatch("found a boolean".to_string())),
            Value::Number(_) => Err(UploadError::TypeMismatch("found a number".to_string())),
            Value::String(_) => Err(UploadError::TypeMismatch("found a string".to_string())),
            Value::Array(_) => Err(UploadError::TypeMismatch("found a list".to_string())),
        }
    }

    /// Opens the stored copy for buffered reading.
    pub async fn reader(&self) -> Result<BufReader<File>, UploadError> {
        let file = File::open(&self.filepath)
            .await
            .map_err(|source| UploadError::Io {
                path: self.filepath.clone(),
                source,
            })?;
        Ok(BufReader::new(file))
    }
}
