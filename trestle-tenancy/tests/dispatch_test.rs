//! Request dispatch through resolution, per-tenant pipelines and eviction.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use trestle_core::{FnMiddleware, HttpRequest, HttpResponse, MiddlewareChain, Next, handler_fn};
use trestle_tenancy::prelude::*;

const REGISTRY: &str = r#"
[cache]
sliding_expiration = "30s"

[[tenants]]
id = "acme"
name = "acme"
hostnames = ["acme.example.com"]
connection_string = "db_a"
metadata = { plan = "premium" }

[[tenants]]
id = "globex"
name = "globex"
hostnames = ["globex.example.com"]
connection_string = "db_b"

[[tenants]]
id = "initech"
name = "initech"
hostnames = ["initech.example.com"]
connection_string = "db_c"
active = false
"#;

struct App {
    chain: MiddlewareChain,
    resolver: Arc<CachingTenantResolver<HostTenantResolver>>,
    pipelines: Arc<TenantPipelineMiddleware>,
    builds: Arc<AtomicUsize>,
}

fn app() -> App {
    let config = TenancyConfig::from_toml_str(REGISTRY).unwrap();
    config.validate().unwrap();
    let options = config.cache_options();
    let store: Arc<dyn TenantStore> = Arc::new(config.into_store());

    let resolver = Arc::new(CachingTenantResolver::new(HostTenantResolver::new(store), options));
    let builds = Arc::new(AtomicUsize::new(0));
    let counter = builds.clone();
    let pipelines = Arc::new(TenantPipelineMiddleware::new(move |tenant, chain| {
        counter.fetch_add(1, Ordering::SeqCst);
        let premium = tenant.tenant().metadata.get("plan").map(String::as_str) == Some("premium");
        chain.use_middleware(FnMiddleware::new(move |req, next: Next| async move {
            let res = next(req).await?;
            Ok(res.with_header("x-tier", if premium { "premium" } else { "standard" }))
        }));
    }));
    resolver.add_eviction_listener(pipelines.clone());

    let mut chain = MiddlewareChain::new();
    chain
        .use_middleware(TenantMiddleware::new(resolver.clone()))
        .use_arc(pipelines.clone());

    App {
        chain,
        resolver,
        pipelines,
        builds,
    }
}

fn request(host: &str) -> HttpRequest {
    HttpRequest::new("GET".to_string(), "/orders".to_string()).with_header("Host", host)
}

async fn send(app: &App, req: HttpRequest) -> HttpResponse {
    app.chain
        .apply(
            req,
            handler_fn(|req| async move {
                let tenant = req.tenant_id().unwrap_or_default();
                Ok(HttpResponse::ok().with_body(tenant.into_bytes()))
            }),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_requests_branch_per_tenant() {
    let app = app();

    let acme = send(&app, request("acme.example.com")).await;
    assert_eq!(acme.text(), "acme");
    assert_eq!(acme.headers.get("x-tier"), Some(&"premium".to_string()));

    let globex = send(&app, request("globex.example.com:8080")).await;
    assert_eq!(globex.text(), "globex");
    assert_eq!(globex.headers.get("x-tier"), Some(&"standard".to_string()));

    send(&app, request("acme.example.com")).await;
    assert_eq!(app.builds.load(Ordering::SeqCst), 2);
    assert_eq!(app.pipelines.built_pipelines(), 2);
    assert_eq!(app.resolver.backend_calls(), 2);
}

#[tokio::test]
async fn test_unknown_and_inactive_tenants_get_not_found() {
    let app = app();

    assert_eq!(send(&app, request("unknown.example.com")).await.status, 404);
    assert_eq!(send(&app, request("initech.example.com")).await.status, 404);
    assert_eq!(app.builds.load(Ordering::SeqCst), 0);
    assert!(app.resolver.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_expired_tenant_gets_fresh_context_and_pipeline() {
    let app = app();
    let contexts = Arc::new(parking_lot::Mutex::new(Vec::new()));

    for _ in 0..2 {
        let seen = contexts.clone();
        let res = app
            .chain
            .apply(
                request("acme.example.com"),
                handler_fn(move |req| {
                    let seen = seen.clone();
                    async move {
                        if let Some(context) = req.tenant_context() {
                            seen.lock().push(context.clone());
                        }
                        Ok(HttpResponse::ok())
                    }
                }),
            )
            .await
            .unwrap();
        assert_eq!(res.status, 200);
        tokio::time::advance(Duration::from_secs(31)).await;
    }

    let contexts = contexts.lock();
    assert_eq!(contexts.len(), 2);
    assert_ne!(contexts[0].id(), contexts[1].id());
    assert!(contexts[0].is_disposed());
    assert!(!contexts[1].is_disposed());
    assert_eq!(app.builds.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_manual_eviction_rebuilds_pipeline() {
    let app = app();

    send(&app, request("globex.example.com")).await;
    assert!(app.resolver.evict("globex"));
    assert_eq!(app.pipelines.built_pipelines(), 0);

    send(&app, request("globex.example.com")).await;
    assert_eq!(app.builds.load(Ordering::SeqCst), 2);
    assert_eq!(app.resolver.backend_calls(), 2);
}
