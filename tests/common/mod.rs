//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use llm_gateway::config::schema::TimeoutConfig;
use llm_gateway::config::ConfigStore;
use llm_gateway::dispatch::Dispatcher;
use llm_gateway::lifecycle::Shutdown;
use llm_gateway::net::ListenerSet;
use llm_gateway::observability::RequestCounters;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// A gateway bound to an ephemeral port, serving the listener named `main`.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub store: Arc<ConfigStore>,
    pub file: NamedTempFile,
    shutdown: Shutdown,
}

impl TestGateway {
    pub async fn start(yaml: &str) -> Self {
        let file = write_config(yaml);
        let store = Arc::new(ConfigStore::from_path(file.path()).unwrap());

        let mut listeners = ListenerSet::new(
            Arc::clone(&store),
            Dispatcher::new(&TimeoutConfig::default()).unwrap(),
            Arc::new(RequestCounters::new()),
            Duration::from_secs(1),
        );
        listeners.start().await.unwrap();
        let addr = listeners.local_addr("main").expect("listener 'main' bound");

        let shutdown = Shutdown::new();
        tokio::spawn(listeners.run(shutdown.subscribe()));

        Self {
            addr,
            store,
            file,
            shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Replace the configuration file contents (does not reload).
    pub fn rewrite(&self, yaml: &str) {
        std::fs::write(self.file.path(), yaml).unwrap();
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub fn write_config(yaml: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

/// Client without connection pooling or proxy settings.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Start a raw SSE backend that answers every connection with `frames`.
///
/// With `complete == false` the socket is dropped after the last frame without
/// terminating the chunked body, which looks like an upstream failure.
pub async fn start_sse_backend(frames: Vec<&'static str>, complete: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let frames = frames.clone();
                    tokio::spawn(async move {
                        let mut buf = [0u8; 8192];
                        let _ = socket.read(&mut buf).await;
                        let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n";
                        if socket.write_all(head.as_bytes()).await.is_err() {
                            return;
                        }
                        for frame in frames {
                            let chunk = format!("{:x}\r\n{}\r\n", frame.len(), frame);
                            if socket.write_all(chunk.as_bytes()).await.is_err() {
                                return;
                            }
                            let _ = socket.flush().await;
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                        if complete {
                            let _ = socket.write_all(b"0\r\n\r\n").await;
                        }
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    format!("http://{}", addr)
}
