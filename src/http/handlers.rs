use std::sync::Arc;

use hyper::{Body, Request, Response};
use serde::{Deserialize, Serialize};

use super::{error_response, json_error, json_response};
use crate::coordinator::Coordinator;
use crate::error::CoordinatorError;
use crate::retrieval::TempFileGuard;

#[derive(Deserialize)]
struct RegisterRequest {
    node_id: String,
    ip: String,
    port: u16,
    #[serde(default)]
    storage_available: u64,
}

#[derive(Deserialize)]
struct HeartbeatRequest {
    node_id: String,
}

#[derive(Deserialize)]
struct AssignChunkRequest {
    chunk_id: String,
    node_id: String,
}

#[derive(Serialize)]
struct NodeView {
    host: String,
    port: u16,
    storage_available: u64,
}

#[derive(Serialize)]
struct StatusView {
    node_count: usize,
    registered_nodes: Vec<String>,
    file_count: usize,
    files: Vec<String>,
    total_chunks: usize,
    manifest_errors: usize,
}

#[derive(Serialize)]
struct UploadResponse {
    file_id: String,
    chunks_stored: usize,
}

async fn read_json<T: for<'de> Deserialize<'de>>(req: Request<Body>) -> Result<T, Response<Body>> {
    let bytes = hyper::body::to_bytes(req.into_body())
        .await
        .map_err(|err| json_error(http::StatusCode::BAD_REQUEST, &format!("reading body failed: {err}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|err| json_error(http::StatusCode::BAD_REQUEST, &format!("invalid JSON body: {err}")))
}

pub async fn register(coordinator: &Arc<Coordinator>, req: Request<Body>) -> Response<Body> {
    let payload: RegisterRequest = match read_json(req).await {
        Ok(p) => p,
        Err(response) => return response,
    };

    coordinator
        .registry
        .register(&payload.node_id, payload.ip, payload.port, payload.storage_available);
    json_response(&serde_json::json!({ "status": "registered" }))
}

pub async fn heartbeat(coordinator: &Arc<Coordinator>, req: Request<Body>) -> Response<Body> {
    let payload: HeartbeatRequest = match read_json(req).await {
        Ok(p) => p,
        Err(response) => return response,
    };

    let evicted = match coordinator.registry.heartbeat(&payload.node_id) {
        Ok(evicted) => evicted,
        Err(err) => return error_response(&err),
    };
    for node_id in evicted {
        coordinator.handle_node_death(&node_id).await;
    }
    json_response(&serde_json::json!({ "status": "alive" }))
}

pub async fn list_nodes(coordinator: &Arc<Coordinator>) -> Response<Body> {
    let nodes: std::collections::HashMap<String, NodeView> = coordinator
        .registry
        .snapshot()
        .into_iter()
        .map(|(node_id, record)| {
            (
                node_id,
                NodeView {
                    host: record.host,
                    port: record.port,
                    storage_available: record.storage_available,
                },
            )
        })
        .collect();
    json_response(&nodes)
}

/// `GET /chunk/{chunk_id}`: the legacy, cache-backed lookup — returns the
/// node ids `chunk_map` believes hold a replica, 404 if the chunk is
/// unknown to the cache (it may still exist in a manifest the cache never
/// observed — `chunk_map` is a best-effort index, not the source of truth).
pub async fn lookup_chunk(coordinator: &Arc<Coordinator>, chunk_id: &str) -> Response<Body> {
    match coordinator.chunk_map.get(chunk_id) {
        Some(nodes) => json_response(&serde_json::json!({ "nodes": nodes })),
        None => error_response(&CoordinatorError::ChunkUnavailable(chunk_id.to_string())),
    }
}

/// `POST /chunk`: manually record that `node_id` holds `chunk_id`, in the
/// legacy in-memory cache only — it does not touch the manifest store.
pub async fn assign_chunk(coordinator: &Arc<Coordinator>, req: Request<Body>) -> Response<Body> {
    let payload: AssignChunkRequest = match read_json(req).await {
        Ok(p) => p,
        Err(response) => return response,
    };

    coordinator.chunk_map.record(&payload.chunk_id, &payload.node_id);
    json_response(&serde_json::json!({ "status": "chunk assigned" }))
}

pub async fn status(coordinator: &Arc<Coordinator>) -> Response<Body> {
    let files = coordinator.manifest_store.list().await.unwrap_or_default();
    let mut total_chunks = 0usize;
    let mut manifest_errors = 0usize;
    for file_id in &files {
        match coordinator.manifest_store.load(file_id).await {
            Ok(manifest) => {
                total_chunks += manifest.chunks.len();
                if !manifest.degraded_chunks.is_empty() {
                    manifest_errors += 1;
                }
            }
            Err(_) => manifest_errors += 1,
        }
    }

    json_response(&StatusView {
        node_count: coordinator.registry.len(),
        registered_nodes: coordinator.registry.snapshot().into_keys().collect(),
        file_count: files.len(),
        files: files.clone(),
        total_chunks,
        manifest_errors,
    })
}

pub async fn key_count(coordinator: &Arc<Coordinator>) -> Response<Body> {
    let stored_keys = coordinator.manifest_store.list().await.unwrap_or_default().len();
    json_response(&serde_json::json!({ "stored_keys": stored_keys }))
}

pub async fn heal_now(coordinator: &Arc<Coordinator>) -> Response<Body> {
    coordinator.healing_queue.wake();
    json_response(&serde_json::json!({ "status": "Healing started in background" }))
}

pub async fn upload_file(coordinator: &Arc<Coordinator>, req: Request<Body>) -> Response<Body> {
    let content_type = req
        .headers()
        .get("Content-Type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let boundary = match multer::parse_boundary(&content_type) {
        Ok(b) => b,
        Err(err) => return json_error(http::StatusCode::BAD_REQUEST, &format!("missing multipart boundary: {err}")),
    };

    let mut multipart = multer::Multipart::new(req.into_body(), boundary);

    let mut filename = None;
    let tmp_path = coordinator.config.temp_uploads_dir().join(uuid::Uuid::new_v4().simple().to_string());

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return json_error(http::StatusCode::BAD_REQUEST, &format!("malformed multipart body: {err}")),
        };

        if field.name() == Some("file") {
            filename = field.file_name().map(|s| s.to_string());
            let bytes = match field.bytes().await {
                Ok(bytes) => bytes,
                Err(err) => return json_error(http::StatusCode::BAD_REQUEST, &format!("reading file field failed: {err}")),
            };
            if let Err(err) = tokio::fs::create_dir_all(coordinator.config.temp_uploads_dir()).await {
                return error_response(&CoordinatorError::Io(err));
            }
            if let Err(err) = tokio::fs::write(&tmp_path, &bytes).await {
                return error_response(&CoordinatorError::Io(err));
            }
        }
    }

    let original_filename = filename.unwrap_or_else(|| "unnamed".to_string());

    let result = coordinator.placement.place_file(&tmp_path, original_filename).await;
    let _ = tokio::fs::remove_file(&tmp_path).await;

    match result {
        Ok(file_id) => {
            let chunks_stored = coordinator
                .manifest_store
                .load(&file_id)
                .await
                .map(|m| m.chunks.len())
                .unwrap_or(0);
            json_response(&UploadResponse { file_id, chunks_stored })
        }
        Err(err) => error_response(&err),
    }
}

pub async fn download_file(coordinator: &Arc<Coordinator>, file_id: &str) -> Response<Body> {
    let (path, original_filename) = match coordinator.retrieval.retrieve_file(file_id, &coordinator.config).await {
        Ok(result) => result,
        Err(err) => return error_response(&err),
    };
    let guard = TempFileGuard::new(path.clone());

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) => {
            drop(guard);
            return error_response(&CoordinatorError::Io(err));
        }
    };
    drop(guard);

    Response::builder()
        .status(http::StatusCode::OK)
        .header("Content-Type", "application/octet-stream")
        .header(
            "Content-Disposition",
            format!("attachment; filename=\"{original_filename}\""),
        )
        .body(Body::from(bytes))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

pub async fn get_manifest(coordinator: &Arc<Coordinator>, file_id: &str) -> Response<Body> {
    match coordinator.manifest_store.load(file_id).await {
        Ok(manifest) => json_response(&manifest),
        Err(err) => error_response(&err),
    }
}
