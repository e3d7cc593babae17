use std::io::Write;
use std::path::Path;

use super::Result as UploadResult;
use super::config::StorageConfig;
use super::error::FileUploadError;
use super::multipart_request::FilePart;
use super::multipart_request::MultipartRequest;
use crate::upload::Upload;

/// Stores the file part named `field` into a fresh temporary file.
///
/// The file is named `<prefix>-<random><.ext>`, keeping the extension of the uploaded file,
/// and is created exclusively so two uploads can never share it. It is not removed once
/// the request is done: the returned [`Upload`] owns it.
pub(crate) async fn persist(
    request: &MultipartRequest,
    field: &str,
    storage: &StorageConfig,
) -> UploadResult<Upload> {
    let part = request.file(field)?.clone();
    let prefix = format!("{}-", storage.prefix);
    let directory = storage.directory();
    let field_name = field.to_string();

    tokio::task::spawn_blocking(move || {
        let FilePart {
            file_name,
            content_type,
            content,
        } = part;
        let suffix = Path::new(&file_name)
            .extension()
            .map(|extension| format!(".{}", extension.to_string_lossy()))
            .unwrap_or_default();
        let storage_error = |source: std::io::Error| FileUploadError::Storage {
            field: field_name.clone(),
            source,
        };

        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(&suffix)
            .tempfile_in(&directory)
            .map_err(storage_error)?;
        file.write_all(&content).map_err(storage_error)?;
        file.flush().map_err(storage_error)?;
        let (_, filepath) = file.keep().map_err(|error| storage_error(error.error))?;

        tracing::debug!(
            field = %field_name,
            path = %filepath.display(),
            size = content.len(),
            "stored uploaded file"
        );
        Ok(Upload::new(
            file_name,
            content_type.unwrap_or_default(),
            filepath,
        ))
    })
    .await?
}
