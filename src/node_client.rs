//! Outbound HTTP client for talking to storage nodes: store/fetch a chunk's
//! raw (already-encrypted) bytes over plain HTTP, bounded by a fixed timeout
//! so one slow node can't stall a whole placement or healing pass.

use bytes::Bytes;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request, StatusCode};
use std::time::Duration;

use crate::error::CoordinatorError;

const MULTIPART_BOUNDARY: &str = "chunkvault-boundary-7f3c9a";

pub struct NodeClient {
    client: Client<HttpConnector>,
    timeout: Duration,
}

impl NodeClient {
    pub fn new(timeout: Duration) -> Self {
        NodeClient {
            client: Client::new(),
            timeout,
        }
    }

    /// `POST {endpoint}/store_chunk` with the chunk id and ciphertext as a
    /// multipart body, matching the coordinator's own `/upload_file` intake.
    pub async fn store_chunk(
        &self,
        endpoint: &str,
        chunk_id: &str,
        ciphertext: &[u8],
    ) -> Result<(), CoordinatorError> {
        let body = build_multipart_body(chunk_id, ciphertext);
        let req = Request::builder()
            .method(Method::POST)
            .uri(format!("{endpoint}/store_chunk"))
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
            )
            .body(Body::from(body))
            .map_err(|err| anyhow::anyhow!("request build failed: {err}"))?;

        let response = tokio::time::timeout(self.timeout, self.client.request(req))
            .await
            .map_err(|_| CoordinatorError::StorageNodeUnreachable(endpoint.to_string(), "timed out".into()))?
            .map_err(|err| CoordinatorError::StorageNodeUnreachable(endpoint.to_string(), err.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CoordinatorError::StorageNodeUnreachable(
                endpoint.to_string(),
                format!("status {}", response.status()),
            ))
        }
    }

    /// `GET {endpoint}/chunk/{chunk_id}`, returning the raw ciphertext bytes.
    pub async fn get_chunk(&self, endpoint: &str, chunk_id: &str) -> Result<Vec<u8>, CoordinatorError> {
        let uri = format!("{endpoint}/chunk/{chunk_id}");
        let response = tokio::time::timeout(self.timeout, self.client.get(uri.parse().map_err(|err| {
            anyhow::anyhow!("invalid node uri '{uri}': {err}")
        })?))
        .await
        .map_err(|_| CoordinatorError::StorageNodeUnreachable(endpoint.to_string(), "timed out".into()))?
        .map_err(|err| CoordinatorError::StorageNodeUnreachable(endpoint.to_string(), err.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(CoordinatorError::ChunkUnavailable(chunk_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(CoordinatorError::StorageNodeUnreachable(
                endpoint.to_string(),
                format!("status {}", response.status()),
            ));
        }

        let bytes: Bytes = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|err| anyhow::anyhow!("reading chunk body failed: {err}"))?;
        Ok(bytes.to_vec())
    }
}

fn build_multipart_body(chunk_id: &str, ciphertext: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(ciphertext.len() + 256);
    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"chunk_id\"\r\n\r\n");
    body.extend_from_slice(chunk_id.as_bytes());
    body.extend_from_slice(b"\r\n");

    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"chunk\"; filename=\"chunk.bin\"\r\n\
          Content-Type: application/octet-stream\r\n\r\n",
    );
    body.extend_from_slice(ciphertext);
    body.extend_from_slice(b"\r\n");

    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_body_contains_both_parts_in_order() {
        let body = build_multipart_body("chunk_00000", b"hello");
        let text = String::from_utf8_lossy(&body);
        let chunk_id_pos = text.find("name=\"chunk_id\"").unwrap();
        let data_pos = text.find("name=\"chunk\"").unwrap();
        assert!(chunk_id_pos < data_pos);
        assert!(text.contains("chunk_00000"));
        assert!(body.windows(5).any(|w| w == b"hello"));
        assert!(text.trim_end().ends_with(&format!("--{MULTIPART_BOUNDARY}--")));
    }
}
