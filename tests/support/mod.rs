//! A minimal in-process storage node used to exercise the coordinator's
//! placement, retrieval, and healing paths end to end without any real
//! network service.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};

pub struct FakeNode {
    pub addr: SocketAddr,
    store: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl FakeNode {
    pub async fn spawn() -> Self {
        let store: Arc<Mutex<HashMap<String, Vec<u8>>>> = Arc::new(Mutex::new(HashMap::new()));
        let store_for_svc = store.clone();

        let make_svc = make_service_fn(move |_conn| {
            let store = store_for_svc.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let store = store.clone();
                    async move { Ok::<_, Infallible>(handle(store, req).await) }
                }))
            }
        });

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();

        let server = Server::from_tcp(listener).unwrap().serve(make_svc);
        let (tx, rx) = tokio::sync::oneshot::channel();
        let graceful = server.with_graceful_shutdown(async {
            rx.await.ok();
        });
        let handle = tokio::spawn(async move {
            let _ = graceful.await;
        });

        FakeNode {
            addr,
            store,
            shutdown: Some(tx),
            handle: Some(handle),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stops serving requests without tearing down the task join handle
    /// eagerly, simulating a dead node that the coordinator must route
    /// around or heal away from.
    pub async fn kill(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.store.lock().unwrap().len()
    }
}

async fn handle(store: Arc<Mutex<HashMap<String, Vec<u8>>>>, req: Request<Body>) -> Response<Body> {
    let path: Vec<String> = req
        .uri()
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    let segments: Vec<&str> = path.iter().map(|s| s.as_str()).collect();

    match (req.method().clone(), segments.as_slice()) {
        (Method::POST, ["store_chunk"]) => store_chunk(store, req).await,
        (Method::GET, ["chunk", chunk_id]) => {
            let bytes = store.lock().unwrap().get(*chunk_id).cloned();
            match bytes {
                Some(bytes) => Response::builder().status(StatusCode::OK).body(Body::from(bytes)).unwrap(),
                None => Response::builder().status(StatusCode::NOT_FOUND).body(Body::empty()).unwrap(),
            }
        }
        _ => Response::builder().status(StatusCode::NOT_FOUND).body(Body::empty()).unwrap(),
    }
}

async fn store_chunk(store: Arc<Mutex<HashMap<String, Vec<u8>>>>, req: Request<Body>) -> Response<Body> {
    let content_type = req
        .headers()
        .get("Content-Type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let boundary = match multer::parse_boundary(&content_type) {
        Ok(b) => b,
        Err(_) => return Response::builder().status(StatusCode::BAD_REQUEST).body(Body::empty()).unwrap(),
    };

    let mut multipart = multer::Multipart::new(req.into_body(), boundary);
    let mut chunk_id = None;
    let mut data = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        match field.name() {
            Some("chunk_id") => {
                if let Ok(bytes) = field.bytes().await {
                    chunk_id = Some(String::from_utf8_lossy(&bytes).to_string());
                }
            }
            Some("chunk") => {
                if let Ok(bytes) = field.bytes().await {
                    data = Some(bytes.to_vec());
                }
            }
            _ => {}
        }
    }

    match (chunk_id, data) {
        (Some(chunk_id), Some(data)) => {
            store.lock().unwrap().insert(chunk_id, data);
            Response::builder().status(StatusCode::OK).body(Body::empty()).unwrap()
        }
        _ => Response::builder().status(StatusCode::BAD_REQUEST).body(Body::empty()).unwrap(),
    }
}
