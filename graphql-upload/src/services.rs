//! Request and response types exchanged with the service sitting behind the upload layer.

use tower::BoxError;

use crate::body::RouterBody;

pub type Request = http::Request<RouterBody>;
pub type Response = http::Response<RouterBody>;

pub type BoxCloneService = tower::util::BoxCloneService<Request, Response, BoxError>;
