//! Layers shared by the upload middleware.
use std::future::Future;
use std::ops::ControlFlow;

use tower::BoxError;
use tower::ServiceBuilder;
use tower::layer::util::Stack;
use tower_service::Service;

use crate::layers::async_checkpoint::AsyncCheckpointLayer;

pub mod async_checkpoint;

/// Adds request gating to a [`ServiceBuilder`].
#[allow(clippy::type_complexity)]
pub trait ServiceBuilderExt<L>: Sized {
    /// Runs `checkpoint_fn` on every request before the wrapped [`Service`] sees it.
    ///
    /// `ControlFlow::Continue` forwards the (possibly rewritten) request to the service,
    /// `ControlFlow::Break` answers with the given response instead. The callback may await,
    /// e.g. to consume the request body, so the wrapped service has to be `Clone`.
    fn checkpoint_async<F, S, Fut, Request>(
        self,
        checkpoint_fn: F,
    ) -> ServiceBuilder<Stack<AsyncCheckpointLayer<S, Fut, Request>, L>>
    where
        S: Service<Request, Error = BoxError> + Clone + Send + 'static,
        Fut: Future<
            Output = Result<ControlFlow<<S as Service<Request>>::Response, Request>, BoxError>,
        >,
        F: Fn(Request) -> Fut + Send + Sync + 'static,
    {
        self.layer(AsyncCheckpointLayer::new(checkpoint_fn))
    }

    /// See [`ServiceBuilder::layer`].
    fn layer<T>(self, layer: T) -> ServiceBuilder<Stack<T, L>>;
}

#[allow(clippy::type_complexity)]
impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn layer<T>(self, layer: T) -> ServiceBuilder<Stack<T, L>> {
        ServiceBuilder::layer(self, layer)
    }
}
