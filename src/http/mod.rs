//! Coordinator HTTP surface: the entire external interface is plain HTTP,
//! dispatched by hand (no router crate) over a handful of routes. JSON
//! bodies use `serde_json`; file transfer uses multipart (`multer`) on the
//! way in and a raw byte stream on the way out.

mod handlers;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};

use crate::coordinator::Coordinator;
use crate::error::CoordinatorError;

pub async fn serve(coordinator: Arc<Coordinator>, addr: SocketAddr) -> anyhow::Result<()> {
    let make_svc = make_service_fn(move |_conn| {
        let coordinator = coordinator.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let coordinator = coordinator.clone();
                async move { Ok::<_, Infallible>(dispatch(coordinator, req).await) }
            }))
        }
    });

    log::info!("chunkvault coordinator listening on {addr}");
    Server::bind(&addr).serve(make_svc).await?;
    Ok(())
}

async fn dispatch(coordinator: Arc<Coordinator>, req: Request<Body>) -> Response<Body> {
    let method = req.method().clone();
    let path: Vec<String> = req
        .uri()
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    let segments: Vec<&str> = path.iter().map(|s| s.as_str()).collect();

    match (method.as_str(), segments.as_slice()) {
        ("POST", ["register"]) => handlers::register(&coordinator, req).await,
        ("POST", ["heartbeat"]) => handlers::heartbeat(&coordinator, req).await,
        ("GET", ["nodes"]) => handlers::list_nodes(&coordinator).await,
        ("GET", ["chunk", chunk_id]) => handlers::lookup_chunk(&coordinator, chunk_id).await,
        ("POST", ["chunk"]) => handlers::assign_chunk(&coordinator, req).await,
        ("POST", ["upload_file"]) => handlers::upload_file(&coordinator, req).await,
        ("GET", ["download_file", file_id]) => handlers::download_file(&coordinator, file_id).await,
        ("GET", ["manifest", file_id]) => handlers::get_manifest(&coordinator, file_id).await,
        ("GET", ["keys"]) => handlers::key_count(&coordinator).await,
        ("GET", ["status"]) => handlers::status(&coordinator).await,
        ("POST", ["heal_now"]) => handlers::heal_now(&coordinator).await,
        _ => not_found(),
    }
}

fn not_found() -> Response<Body> {
    json_error(http::StatusCode::NOT_FOUND, "route not found")
}

pub(crate) fn json_error(status: http::StatusCode, message: &str) -> Response<Body> {
    let body = serde_json::json!({ "error": message }).to_string();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::from(message.to_string())))
}

pub(crate) fn error_response(err: &CoordinatorError) -> Response<Body> {
    json_error(err.status_code(), &err.to_string())
}

pub(crate) fn json_response<T: serde::Serialize>(value: &T) -> Response<Body> {
    match serde_json::to_string(value) {
        Ok(body) => Response::builder()
            .status(http::StatusCode::OK)
            .header("Content-Type", "application/json")
            .body(Body::from(body))
            .unwrap_or_else(|_| Response::new(Body::empty())),
        Err(err) => json_error(http::StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}
