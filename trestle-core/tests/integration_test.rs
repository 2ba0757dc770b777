//! Integration tests for trestle-core

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use trestle_core::*;

#[test]
fn test_http_request_creation() {
    let req = HttpRequest::new("GET".to_string(), "/test".to_string());
    assert_eq!(req.method, "GET");
    assert_eq!(req.path, "/test");
    assert!(req.headers.is_empty());
    assert!(req.extensions.is_empty());
    assert!(!req.cancellation().is_cancelled());
}

#[test]
fn test_http_response_with_json() {
    let data = serde_json::json!({"order": 1});
    let res = HttpResponse::ok().with_json(&data).unwrap();

    assert_eq!(res.status, 200);
    assert_eq!(res.headers.get("Content-Type").unwrap(), "application/json");
    assert_eq!(res.text(), r#"{"order":1}"#);
}

#[test]
fn test_request_json_body() {
    #[derive(Debug, serde::Deserialize)]
    struct NewOrder {
        sku: String,
    }

    let mut req = HttpRequest::new("POST".to_string(), "/orders".to_string());
    req.body = br#"{"sku":"A-1"}"#.to_vec();
    let order: NewOrder = req.json().unwrap();
    assert_eq!(order.sku, "A-1");

    req.body = b"not json".to_vec();
    let err = req.json::<NewOrder>().unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn test_extensions_visible_downstream() {
    struct RequestTag(&'static str);

    let mut chain = MiddlewareChain::new();
    chain.use_middleware(FnMiddleware::new(|mut req: HttpRequest, next: Next| async move {
        req.extensions.insert(RequestTag("tagged"));
        next(req).await
    }));

    let handler = handler_fn(|req: HttpRequest| async move {
        let tag = req
            .extensions
            .get::<RequestTag>()
            .map(|t| t.0)
            .unwrap_or("missing");
        Ok(HttpResponse::ok().with_body(tag.as_bytes().to_vec()))
    });

    let res = chain
        .apply(HttpRequest::new("GET".into(), "/".into()), handler)
        .await
        .unwrap();
    assert_eq!(res.text(), "tagged");
}

#[tokio::test]
async fn test_shared_chain_is_reusable_across_requests() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let mut chain = MiddlewareChain::new();
    chain.use_middleware(FnMiddleware::new(move |req: HttpRequest, next: Next| {
        counter.fetch_add(1, Ordering::SeqCst);
        next(req)
    }));
    let chain = Arc::new(chain);

    let mut tasks = Vec::new();
    for i in 0..10 {
        let chain = chain.clone();
        tasks.push(tokio::spawn(async move {
            chain
                .apply(
                    HttpRequest::new("GET".into(), format!("/{}", i)),
                    handler_fn(|_req| async { Ok(HttpResponse::ok()) }),
                )
                .await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().status, 200);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn test_errors_propagate_through_chain() {
    let mut chain = MiddlewareChain::new();
    chain.use_middleware(FnMiddleware::new(|req: HttpRequest, next: Next| next(req)));

    let result = chain
        .apply(
            HttpRequest::new("GET".into(), "/".into()),
            handler_fn(|_req| async { Err(Error::Conflict("duplicate order".into())) }),
        )
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.status_code(), 409);
}
