// Middleware system for request/response processing

use crate::{Error, HttpRequest, HttpResponse};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use trestle_log::trace;

/// Boxed response future produced by every stage of a chain.
pub type ResponseFuture = Pin<Box<dyn Future<Output = Result<HttpResponse, Error>> + Send>>;

/// Type alias for the next handler in the middleware chain
pub type Next = Box<dyn FnOnce(HttpRequest) -> ResponseFuture + Send>;

/// Type alias for handler functions
pub type HandlerFn = Arc<dyn Fn(HttpRequest) -> ResponseFuture + Send + Sync>;

/// Middleware trait for processing requests before they reach the handler
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Process the request and optionally pass to next middleware
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error>;
}

/// Ordered, immutable-once-shared list of middleware.
///
/// A chain either ends in a [`HandlerFn`] ([`MiddlewareChain::apply`]) or
/// hands the request on to an outer pipeline's [`Next`]
/// ([`MiddlewareChain::run`]); the latter is how per-tenant branches rejoin
/// the main pipeline.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middlewares: Arc<Vec<Arc<dyn Middleware>>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a middleware to the chain
    pub fn use_middleware<M: Middleware + 'static>(&mut self, middleware: M) -> &mut Self {
        self.use_arc(Arc::new(middleware))
    }

    /// Add an already shared middleware to the chain
    pub fn use_arc(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        Arc::make_mut(&mut self.middlewares).push(middleware);
        self
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Execute the chain, terminating in `handler`.
    pub async fn apply(&self, req: HttpRequest, handler: HandlerFn) -> Result<HttpResponse, Error> {
        self.run(req, Box::new(move |req| handler(req))).await
    }

    /// Execute the chain, terminating in `next`.
    pub fn run(&self, req: HttpRequest, next: Next) -> ResponseFuture {
        trace!(
            "Executing middleware chain ({} stages) for {} {}",
            self.middlewares.len(),
            req.method,
            req.path
        );
        self.execute_from(0, req, next)
    }

    fn execute_from(&self, index: usize, req: HttpRequest, terminal: Next) -> ResponseFuture {
        match self.middlewares.get(index) {
            None => terminal(req),
            Some(middleware) => {
                let middleware = middleware.clone();
                let chain = self.clone();
                Box::pin(async move {
                    middleware
                        .handle(
                            req,
                            Box::new(move |req| chain.execute_from(index + 1, req, terminal)),
                        )
                        .await
                })
            }
        }
    }
}

/// Middleware built from a closure.
///
/// ```rust,ignore
/// chain.use_middleware(FnMiddleware::new(|req, next| async move {
///     let mut res = next(req).await?;
///     res.headers.insert("X-Stage".into(), "audit".into());
///     Ok(res)
/// }));
/// ```
pub struct FnMiddleware<F> {
    f: F,
}

impl<F, Fut> FnMiddleware<F>
where
    F: Fn(HttpRequest, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(HttpRequest, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
{
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
        (self.f)(req, next).await
    }
}

/// Wrap an async closure as a [`HandlerFn`].
///
/// ```
/// use trestle_core::{HttpRequest, HttpResponse, MiddlewareChain, handler_fn};
///
/// # tokio_test::block_on(async {
/// let handler = handler_fn(|req: HttpRequest| async move {
///     Ok(HttpResponse::ok().with_body(req.path.into_bytes()))
/// });
/// let res = MiddlewareChain::new()
///     .apply(HttpRequest::new("GET".into(), "/ping".into()), handler)
///     .await
///     .unwrap();
/// assert_eq!(res.text(), "/ping");
/// # });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn
where
    F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
{
    Arc::new(move |req| Box::pin(f(req)) as ResponseFuture)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tag(&'static str);

    #[async_trait]
    impl Middleware for Tag {
        async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
            let mut res = next(req).await?;
            let trail = res.headers.entry("x-trail".to_string()).or_default();
            trail.insert_str(0, self.0);
            Ok(res)
        }
    }

    struct Reject;

    #[async_trait]
    impl Middleware for Reject {
        async fn handle(&self, _req: HttpRequest, _next: Next) -> Result<HttpResponse, Error> {
            Ok(HttpResponse::new(418))
        }
    }

    fn request() -> HttpRequest {
        HttpRequest::new("GET".to_string(), "/orders".to_string())
    }

    #[tokio::test]
    async fn test_chain_runs_in_registration_order() {
        let mut chain = MiddlewareChain::new();
        chain.use_middleware(Tag("a")).use_middleware(Tag("b"));

        let res = chain
            .apply(request(), handler_fn(|_req| async { Ok(HttpResponse::ok()) }))
            .await
            .unwrap();

        assert_eq!(res.status, 200);
        assert_eq!(res.headers.get("x-trail"), Some(&"ab".to_string()));
    }

    #[tokio::test]
    async fn test_run_hands_off_to_outer_next() {
        let mut chain = MiddlewareChain::new();
        chain.use_middleware(Tag("t"));

        let outer: Next = Box::new(|req| {
            Box::pin(async move { Ok(HttpResponse::ok().with_body(req.path.into_bytes())) })
        });

        let res = chain.run(request(), outer).await.unwrap();
        assert_eq!(res.text(), "/orders");
        assert_eq!(res.headers.get("x-trail"), Some(&"t".to_string()));
    }

    #[tokio::test]
    async fn test_short_circuit_skips_handler() {
        let mut chain = MiddlewareChain::new();
        chain.use_middleware(Reject).use_middleware(Tag("never"));

        let res = chain
            .apply(request(), handler_fn(|_req| async { Ok(HttpResponse::ok()) }))
            .await
            .unwrap();

        assert_eq!(res.status, 418);
        assert!(res.headers.get("x-trail").is_none());
    }

    #[tokio::test]
    async fn test_empty_chain_calls_handler() {
        let chain = MiddlewareChain::new();
        assert!(chain.is_empty());

        let res = chain
            .apply(request(), handler_fn(|_req| async { Ok(HttpResponse::created()) }))
            .await
            .unwrap();
        assert_eq!(res.status, 201);
    }

    #[tokio::test]
    async fn test_fn_middleware() {
        let mut chain = MiddlewareChain::new();
        chain.use_middleware(FnMiddleware::new(|req: HttpRequest, next: Next| async move {
            let mut res = next(req).await?;
            res.status = 202;
            Ok(res)
        }));

        let res = chain
            .apply(request(), handler_fn(|_req| async { Ok(HttpResponse::ok()) }))
            .await
            .unwrap();
        assert_eq!(res.status, 202);
        assert_eq!(chain.len(), 1);
    }
}
