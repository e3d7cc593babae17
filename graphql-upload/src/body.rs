use axum::Error as AxumError;
use bytes::Bytes;
use http_body_util::BodyExt;
use http_body_util::Empty;
use http_body_util::Full;
use http_body_util::combinators::UnsyncBoxBody;
use http_body::Body as HttpBody;

/// Body type of the requests and responses going through the upload layer.
pub type RouterBody = UnsyncBoxBody<Bytes, AxumError>;

pub(crate) async fn get_body_bytes<B: HttpBody>(body: B) -> Result<Bytes, B::Error> {
    Ok(body.collect().await?.to_bytes())
}

/// Body of an empty request or response.
pub fn empty() -> RouterBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Body holding `chunk` in a single frame.
pub fn full<T: Into<Bytes>>(chunk: T) -> RouterBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Convert any axum compatible body (e.g. [`axum::body::Body`]) into a RouterBody
pub fn from_axum(body: axum::body::Body) -> RouterBody {
    body.boxed_unsync()
}

/// Collect a RouterBody into bytes.
///
/// Mostly useful for tests and for services sitting behind the upload layer.
pub async fn into_bytes(body: RouterBody) -> Result<Bytes, AxumError> {
    get_body_bytes(body).await
}
