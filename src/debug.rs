//! Loopback introspection server.
//!
//! Serves read-only JSON views of the store plus the `/healthz` and
//! `/readyz` probes:
//!
//! - `GET /debug/config_dump/<kind>` lists all objects of a kind
//! - `GET /debug/config_dump/<kind>/<namespace>/<name>` shows one object
//! - `GET /debug/stats` returns store, scheduler and load counters

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;

use crate::model::{ObjectKey, ObjectKind};
use crate::routing::Router;

const CONFIG_DUMP: &str = "/debug/config_dump/";

/// Answers one introspection request.
pub fn handle(router: &Router, method: &Method, path: &str) -> Response<Full<Bytes>> {
    if *method != Method::GET {
        return text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    }

    match path {
        "/healthz" | "/readyz" => text(StatusCode::OK, "ok"),
        "/debug/stats" => json_response(&router.stats()),
        _ => match path.strip_prefix(CONFIG_DUMP) {
            Some(rest) => config_dump(router, rest),
            None => text(StatusCode::NOT_FOUND, "not found"),
        },
    }
}

fn config_dump(router: &Router, rest: &str) -> Response<Full<Bytes>> {
    let segments: Vec<&str> = rest.trim_end_matches('/').split('/').collect();
    let Some(kind) = segments.first().copied().and_then(ObjectKind::from_path_segment) else {
        return text(StatusCode::NOT_FOUND, "unknown kind");
    };

    match segments.as_slice() {
        [_] => {
            let items = router.store().snapshot(kind);
            json_response(&json!({ "kind": kind, "items": items }))
        }
        [_, namespace, name] if !namespace.is_empty() && !name.is_empty() => {
            let key = ObjectKey::new(*namespace, *name);
            match router.store().status(kind, &key) {
                Some(status) => json_response(&status),
                None => text(StatusCode::NOT_FOUND, &format!("{kind} {key} not found")),
            }
        }
        _ => text(StatusCode::NOT_FOUND, "not found"),
    }
}

fn json_response<T: Serialize>(value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec_pretty(value) {
        Ok(body) => {
            let mut response = Response::new(Full::new(Bytes::from(body)));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode debug response");
            text(StatusCode::INTERNAL_SERVER_ERROR, "encoding error")
        }
    }
}

fn text(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

/// Serves introspection requests on an already bound listener.
///
/// Runs until accepting fails.
pub async fn serve(listener: TcpListener, router: Arc<Router>) -> std::io::Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let router = Arc::clone(&router);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let response = handle(&router, req.method(), req.uri().path());
                async move { Ok::<_, Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(error = %e, "debug connection error");
            }
        });
    }
}

/// Binds `addr` and serves introspection requests.
pub async fn start_debug_server(addr: SocketAddr, router: Arc<Router>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "debug server listening");
    serve(listener, router).await
}
