//! GraphQL multipart requests.
//!
//! Rewrites requests following the
//! [GraphQL multipart request convention](https://github.com/jaydenseric/graphql-multipart-request-spec)
//! into plain JSON GraphQL requests. Text fields named by the `map` field are written into the
//! operations, uploaded files are stored on disk and replaced by an [`Upload`] descriptor.
//!
//! ```no_run
//! # use graphql_upload::FileUploadsConfig;
//! # use graphql_upload::FileUploadsLayer;
//! # use graphql_upload::services;
//! # fn test(service: services::BoxCloneService) {
//! let _ = tower::ServiceBuilder::new()
//!     .layer(FileUploadsLayer::new(FileUploadsConfig::default()))
//!     .service(service);
//! # }
//! ```
use std::ops::ControlFlow;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use http::HeaderMap;
use http::HeaderValue;
use http::Method;
use http::header::CONTENT_LENGTH;
use http::header::CONTENT_TYPE;
use mediatype::MediaType;
use mediatype::ReadParams;
use mediatype::names::BOUNDARY;
use mediatype::names::FORM_DATA;
use mediatype::names::MULTIPART;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::ServiceBuilder;

pub use self::config::ArrayIndexing;
pub use self::config::FileUploadsConfig;
pub use self::config::MultipartRequestLimits;
pub use self::config::StorageConfig;
pub use self::error::FileUploadError;
pub use self::map_field::MapFieldRaw;
use self::multipart_request::MultipartRequest;
use self::path::Location;
use self::substitute::Substitution;
use self::substitute::substitute;
use crate::body;
use crate::layers::ServiceBuilderExt;
use crate::layers::async_checkpoint::AsyncCheckpointService;
use crate::services;
use crate::upload::Upload;

mod config;
mod coordinator;
mod error;
mod map_field;
mod multipart_request;
mod path;
mod persist;
mod reassemble;
mod substitute;

type Result<T> = std::result::Result<T, error::FileUploadError>;

const APPLICATION_JSON: &str = "application/json";

type CheckpointFuture =
    BoxFuture<'static, std::result::Result<ControlFlow<services::Response, services::Request>, BoxError>>;

/// Files stored while rewriting a request, keyed by the multipart field they came from.
///
/// Inserted into the extensions of every rewritten request. The files belong to the services
/// handling the request from then on.
#[derive(Clone, Debug, Default)]
pub struct UploadedFiles {
    files: Vec<(String, Upload)>,
}

impl UploadedFiles {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Upload)> {
        self.files
            .iter()
            .map(|(field, upload)| (field.as_str(), upload))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// [`Layer`] rewriting GraphQL multipart requests before they reach the inner service.
///
/// Requests that are not `POST` `multipart/form-data` requests are forwarded untouched. When a
/// multipart request cannot be rewritten, a `text/plain` error response is returned and the
/// inner service is not called.
#[derive(Clone, Debug, Default)]
pub struct FileUploadsLayer {
    config: Arc<FileUploadsConfig>,
}

impl FileUploadsLayer {
    pub fn new(config: FileUploadsConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl<S> Layer<S> for FileUploadsLayer
where
    S: Service<services::Request, Response = services::Response, Error = BoxError>
        + Clone
        + Send
        + 'static,
    <S as Service<services::Request>>::Future: Send + 'static,
{
    type Service = AsyncCheckpointService<S, CheckpointFuture, services::Request>;

    fn layer(&self, service: S) -> Self::Service {
        let config = self.config.clone();
        ServiceBuilder::new()
            .checkpoint_async(move |req: services::Request| {
                let config = config.clone();
                async move {
                    Ok::<_, BoxError>(match router_layer(req, config).await {
                        Ok(req) => ControlFlow::Continue(req),
                        Err(err) => {
                            tracing::warn!(error = %err, "rejecting multipart request");
                            ControlFlow::Break(err.into())
                        }
                    })
                }
                .boxed()
            })
            .service(service)
    }
}

/// Whether the request follows the multipart request convention: a `POST` whose media type is
/// `multipart/form-data`, whatever its parameters.
pub fn is_eligible<B>(req: &http::Request<B>) -> bool {
    req.method() == Method::POST && get_multipart_mime(req.headers()).is_some()
}

fn get_multipart_mime(headers: &HeaderMap) -> Option<MediaType<'_>> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|header| header.to_str().ok())
        .and_then(|str| MediaType::parse(str).ok())
        .filter(|mime| mime.ty == MULTIPART && mime.subty == FORM_DATA)
}

#[tracing::instrument(skip_all, level = "debug", fields(uri = %req.uri()))]
async fn router_layer(
    req: services::Request,
    config: Arc<FileUploadsConfig>,
) -> Result<services::Request> {
    if !config.enabled || !is_eligible(&req) {
        tracing::trace!("not a multipart request, forwarding untouched");
        return Ok(req);
    }

    let boundary = get_multipart_mime(req.headers())
        .and_then(|mime| mime.get_param(BOUNDARY).map(|value| value.to_string()))
        .ok_or(FileUploadError::InvalidMultipartRequest(
            multer::Error::NoBoundary,
        ))?;

    let (mut request_parts, request_body) = req.into_parts();
    let multipart = MultipartRequest::read(request_body, boundary, config.limits).await?;
    let (mut operations, map) = map_field::parse(multipart.operations()?, multipart.map()?)?;

    let mut targets: Vec<Location> = Vec::new();
    let mut tasks = Vec::new();
    for (field, path) in map_field::entries(&map) {
        let substitution = substitute(
            &mut operations,
            field,
            path,
            &multipart,
            config.array_indexing,
        )?;
        let location = substitution.location();
        if targets.iter().any(|target| target.overlaps(location)) {
            return Err(FileUploadError::DuplicateTarget(path.to_string()));
        }
        targets.push(location.clone());
        if let Substitution::Pending(task) = substitution {
            tasks.push(task);
        }
    }

    tracing::debug!(
        entries = targets.len(),
        files = tasks.len(),
        "substituted text fields, storing files"
    );
    let uploads = coordinator::run(&mut operations, tasks, Arc::new(multipart), &config).await?;
    let body = match reassemble::build(&operations, &map) {
        Ok(body) => body,
        Err(err) => {
            coordinator::discard(uploads.into_iter().map(|(_, upload)| upload)).await;
            return Err(err);
        }
    };

    // the rewritten request is a regular JSON GraphQL request
    request_parts.headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(APPLICATION_JSON),
    );
    request_parts.headers.remove(CONTENT_LENGTH);
    request_parts
        .extensions
        .insert(UploadedFiles { files: uploads });

    Ok(http::Request::from_parts(request_parts, body::full(body)))
}
