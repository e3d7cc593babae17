use serde_json::Value;

use super::Result as UploadResult;
use super::config::ArrayIndexing;
use super::multipart_request::MultipartRequest;
use super::path;
use super::path::Location;

/// A file that still has to be stored before its descriptor can replace the placeholder.
#[derive(Debug, Clone)]
pub(crate) struct PendingFileTask {
    pub(crate) field: String,
    pub(crate) location: Location,
}

#[derive(Debug)]
pub(crate) enum Substitution {
    /// A text field value was written at the location.
    Assigned(Location),
    Pending(PendingFileTask),
}

impl Substitution {
    pub(crate) fn location(&self) -> &Location {
        match self {
            Substitution::Assigned(location) => location,
            Substitution::Pending(task) => &task.location,
        }
    }
}

/// Handles one (field, path) pair of the map.
///
/// A non-empty text field named `field` is written straight into the operations. Anything
/// else is expected to be a file part and is left for the coordinator.
pub(crate) fn substitute(
    operations: &mut Value,
    field: &str,
    path: &str,
    request: &MultipartRequest,
    mode: ArrayIndexing,
) -> UploadResult<Substitution> {
    let location = path::resolve(operations, path, mode)?;

    match request.value(field) {
        Some(value) if !value.is_empty() => {
            tracing::trace!(%field, %path, "substituting text field");
            location.assign(operations, Value::String(value.to_string()))?;
            Ok(Substitution::Assigned(location))
        }
        _ => Ok(Substitution::Pending(PendingFileTask {
            field: field.to_string(),
            location,
        })),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::body;
    use crate::file_uploads::config::MultipartRequestLimits;
    use crate::file_uploads::error::FileUploadError;
    use crate::file_uploads::multipart_request::test_support::MultipartBody;

    async fn request() -> MultipartRequest {
        let body = MultipartBody::new()
            .field("title", "my test title")
            .field("empty", "")
            .file("file", "middleware.go", "text/plain", b"package upload")
            .finish();
        MultipartRequest::read(
            body::full(body),
            MultipartBody::BOUNDARY.to_string(),
            MultipartRequestLimits::default(),
        )
        .await
        .unwrap()
    }

    fn operations() -> Value {
        json!({ "variables": { "title": null, "file": null } })
    }

    #[tokio::test]
    async fn it_assigns_text_fields() {
        let request = request().await;
        let mut operations = operations();

        let substitution = substitute(
            &mut operations,
            "title",
            "variables.title",
            &request,
            ArrayIndexing::Explicit,
        )
        .unwrap();

        assert!(matches!(substitution, Substitution::Assigned(_)));
        assert_eq!(operations["variables"]["title"], json!("my test title"));
    }

    #[tokio::test]
    async fn it_defers_files() {
        let request = request().await;
        let mut operations = operations();

        let substitution = substitute(
            &mut operations,
            "file",
            "variables.file",
            &request,
            ArrayIndexing::Explicit,
        )
        .unwrap();

        let Substitution::Pending(task) = substitution else {
            panic!("expected a pending file task");
        };
        assert_eq!(task.field, "file");
        assert_eq!(task.location.to_string(), "variables.file");
        assert_eq!(operations["variables"]["file"], Value::Null);
    }

    #[tokio::test]
    async fn empty_text_fields_are_treated_as_files() {
        let request = request().await;
        let mut operations = operations();

        let substitution = substitute(
            &mut operations,
            "empty",
            "variables.title",
            &request,
            ArrayIndexing::Explicit,
        )
        .unwrap();

        assert!(matches!(substitution, Substitution::Pending(_)));
        assert_eq!(operations["variables"]["title"], Value::Null);
    }

    #[tokio::test]
    async fn it_fails_on_unknown_path() {
        let request = request().await;
        let mut operations = operations();

        let error = substitute(
            &mut operations,
            "title",
            "variables.input.title",
            &request,
            ArrayIndexing::Explicit,
        )
        .unwrap_err();

        assert!(matches!(error, FileUploadError::PathNotFound(path) if path == "variables.input.title"));
    }
}
