use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::BodyExt;
use multer::Constraints;
use multer::Multipart;
use multer::SizeLimit;

use super::Result as UploadResult;
use super::config::MultipartRequestLimits;
use super::error::FileUploadError;
use crate::body::RouterBody;

const OPERATIONS_FIELD: &str = "operations";
const MAP_FIELD: &str = "map";

/// A file part of the multipart request, fully buffered.
#[derive(Clone, Debug)]
pub(crate) struct FilePart {
    pub(crate) file_name: String,
    pub(crate) content_type: Option<String>,
    pub(crate) content: Bytes,
}

/// All fields of one multipart request.
///
/// Parts carrying a file name are file parts, every other part is a text field. When a name
/// is repeated the first part wins.
#[derive(Debug, Default)]
pub(crate) struct MultipartRequest {
    operations: Option<String>,
    map: Option<String>,
    values: HashMap<String, String>,
    files: HashMap<String, FilePart>,
}

impl MultipartRequest {
    pub(crate) async fn read(
        body: RouterBody,
        boundary: String,
        limits: MultipartRequestLimits,
    ) -> UploadResult<Self> {
        let constraints = Constraints::new()
            .size_limit(SizeLimit::new().whole_stream(limits.max_request_size.as_u64()));
        let mut multipart =
            Multipart::with_constraints(body.into_data_stream(), boundary, constraints);

        let timeout = limits.read_timeout;
        let mut request = Self::default();
        while let Some(field) = within(timeout, multipart.next_field()).await? {
            let Some(name) = field.name().map(str::to_owned) else {
                tracing::debug!("ignoring multipart field without a name");
                continue;
            };

            if name == OPERATIONS_FIELD || name == MAP_FIELD {
                let slot = if name == OPERATIONS_FIELD {
                    &mut request.operations
                } else {
                    &mut request.map
                };
                if slot.is_none() {
                    *slot = Some(within(timeout, field.text()).await?);
                } else {
                    tracing::debug!(field = %name, "ignoring repeated multipart field");
                }
                continue;
            }

            match field.file_name().map(str::to_owned) {
                Some(file_name) => {
                    let content_type = field.content_type().map(|mime| mime.to_string());
                    let content = within(timeout, field.bytes()).await?;
                    tracing::trace!(
                        field = %name,
                        file_name = %file_name,
                        size = content.len(),
                        "read file part"
                    );
                    request.files.entry(name).or_insert(FilePart {
                        file_name,
                        content_type,
                        content,
                    });
                }
                None => {
                    let value = within(timeout, field.text()).await?;
                    request.values.entry(name).or_insert(value);
                }
            }
        }

        Ok(request)
    }

    pub(crate) fn operations(&self) -> UploadResult<&str> {
        self.operations
            .as_deref()
            .ok_or(FileUploadError::MissingOperationsField)
    }

    pub(crate) fn map(&self) -> UploadResult<&str> {
        self.map.as_deref().ok_or(FileUploadError::MissingMapField)
    }

    /// Text value of a non-file field.
    pub(crate) fn value(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub(crate) fn file(&self, name: &str) -> UploadResult<&FilePart> {
        self.files
            .get(name)
            .ok_or_else(|| FileUploadError::FileAccess {
                field: name.to_string(),
                reason: "no file part with this name in the request".to_string(),
            })
    }
}

/// Bounds one read of the body, so a client stalling in the middle of a part cannot hold the
/// request forever.
async fn within<T>(
    timeout: Duration,
    read: impl Future<Output = Result<T, multer::Error>>,
) -> UploadResult<T> {
    match tokio::time::timeout(timeout, read).await {
        Ok(read) => Ok(read?),
        Err(_) => {
            tracing::debug!(?timeout, "multipart read timed out");
            Err(FileUploadError::ReadTimeout { timeout })
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use bytes::Bytes;
    use futures::StreamExt;
    use http_body::Frame;
    use http_body_util::BodyExt;
    use http_body_util::StreamBody;

    use crate::body::RouterBody;

    /// Builds a `multipart/form-data` body by hand.
    pub(crate) struct MultipartBody {
        boundary: &'static str,
        body: Vec<u8>,
    }

    impl MultipartBody {
        pub(crate) const BOUNDARY: &'static str = "------------------------3c7b2a5e1d9f";

        pub(crate) fn new() -> Self {
            Self {
                boundary: Self::BOUNDARY,
                body: Vec::new(),
            }
        }

        pub(crate) fn content_type(&self) -> String {
            format!("multipart/form-data; boundary={}", self.boundary)
        }

        pub(crate) fn field(mut self, name: &str, value: &str) -> Self {
            self.body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    self.boundary, name, value
                )
                .as_bytes(),
            );
            self
        }

        pub(crate) fn file(
            mut self,
            name: &str,
            file_name: &str,
            content_type: &str,
            content: &[u8],
        ) -> Self {
            self.body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                    self.boundary, name, file_name, content_type
                )
                .as_bytes(),
            );
            self.body.extend_from_slice(content);
            self.body.extend_from_slice(b"\r\n");
            self
        }

        /// Sends the parts added so far, then never sends anything again.
        pub(crate) fn stalled(self) -> RouterBody {
            let head = Ok::<_, axum::Error>(Frame::data(Bytes::from(self.body)));
            let frames = futures::stream::iter([head]).chain(futures::stream::pending());
            StreamBody::new(frames).boxed_unsync()
        }

        pub(crate) fn finish(mut self) -> Vec<u8> {
            self.body
                .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
            self.body
        }
    }
}
