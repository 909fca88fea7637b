#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    Router,
    body::Body,
    http::{
        Response, StatusCode,
        header::{CONTENT_LENGTH, CONTENT_TYPE},
    },
    routing::get,
    serve,
};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

pub const ARCHIVE_PATH: &str = "/wap/project/snal_v2/7.3.63/index/index.php";

/// How the archive route answers.
#[derive(Clone)]
pub enum Reply {
    /// Whole body with a `Content-Length` header.
    Sized(Vec<u8>),
    /// Body streamed in pieces without a declared length.
    Streamed(Vec<u8>),
    Status(StatusCode),
}

/// Serves `ARCHIVE_PATH` from its own runtime so blocking clients can be
/// driven from a plain `#[test]`.
pub struct TestHttpServer {
    addr: SocketAddr,
    _runtime: Runtime,
}

impl TestHttpServer {
    pub fn spawn(reply: Reply) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let listener = runtime
            .block_on(TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let router = Router::new().route(
            ARCHIVE_PATH,
            get(move || {
                let reply = reply.clone();
                async move { respond(reply) }
            }),
        );
        runtime.spawn(async move {
            let _ = serve(listener, router).await;
        });

        Self {
            addr,
            _runtime: runtime,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}{ARCHIVE_PATH}", self.addr)
    }
}

fn respond(reply: Reply) -> Response<Body> {
    match reply {
        Reply::Sized(body) => Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/zip")
            .header(CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .unwrap(),
        Reply::Streamed(body) => {
            let chunks: Vec<Result<Vec<u8>, Infallible>> =
                body.chunks(4096).map(|chunk| Ok(chunk.to_vec())).collect();
            Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, "application/zip")
                .body(Body::from_stream(futures::stream::iter(chunks)))
                .unwrap()
        }
        Reply::Status(status) => Response::builder()
            .status(status)
            .body(Body::empty())
            .unwrap(),
    }
}
