//! Test utilities and global setup

/// Test logging utilities
#[cfg(all(test, feature = "test-logging"))]
pub mod logging {
    use std::sync::Once;
    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Initialize test logging globally - safe to call multiple times
    ///
    /// Respects `RUST_LOG`, defaulting to debug for this crate. Use from a
    /// test module with:
    ///
    /// ```ignore
    /// #[cfg(feature = "test-logging")]
    /// #[ctor::ctor]
    /// fn init_test_logging() {
    ///     crate::test_utils::logging::init();
    /// }
    /// ```
    pub fn init() {
        INIT.call_once(|| {
            let env_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("debug,tokio=info"));

            fmt()
                .with_env_filter(env_filter)
                .with_test_writer()
                .with_target(true)
                .with_thread_ids(true)
                .compact()
                .try_init()
                .ok();
        });
    }
}

/// In-process stub backends speaking framed JSON-RPC over a duplex pipe
#[cfg(test)]
pub mod stub {
    use crate::io::transport::StreamTransport;
    use crate::lsp::protocol::{Envelope, decode, encode_response};
    use crate::lsp::session::{ClientSession, SessionEvent, SessionOptions};
    use crate::router::backend::{BackendLauncher, RouterError};
    use crate::router::key::ProjectKey;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

    /// The backend end of a duplex pipe
    pub struct StubBackend {
        reader: ReadHalf<DuplexStream>,
        writer: WriteHalf<DuplexStream>,
        buffer: Vec<u8>,
    }

    /// Create a transport for the session side and the stub for the other
    pub fn pair() -> (StreamTransport, StubBackend) {
        let (client, backend) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (backend_read, backend_write) = tokio::io::split(backend);
        (
            StreamTransport::new(client_read, client_write),
            StubBackend {
                reader: backend_read,
                writer: backend_write,
                buffer: Vec::new(),
            },
        )
    }

    impl StubBackend {
        /// Next framed message from the session, parsed as JSON
        pub async fn recv(&mut self) -> Value {
            tokio::time::timeout(Duration::from_secs(5), self.recv_inner())
                .await
                .expect("timed out waiting for a message from the session")
        }

        async fn recv_inner(&mut self) -> Value {
            loop {
                if let Some(message) = self.try_take() {
                    return serde_json::from_str(&message).expect("session sent invalid JSON");
                }
                let mut chunk = [0u8; 4096];
                let n = self.reader.read(&mut chunk).await.expect("read failed");
                assert!(n > 0, "session closed the pipe");
                self.buffer.extend_from_slice(&chunk[..n]);
            }
        }

        fn try_take(&mut self) -> Option<String> {
            let header_end = self.buffer.windows(4).position(|window| window == b"\r\n\r\n")?;
            let length: usize = std::str::from_utf8(&self.buffer[..header_end])
                .ok()?
                .lines()
                .find_map(|line| line.strip_prefix("Content-Length:"))?
                .trim()
                .parse()
                .ok()?;
            let start = header_end + 4;
            if self.buffer.len() < start + length {
                return None;
            }
            let body = String::from_utf8(self.buffer[start..start + length].to_vec()).ok()?;
            self.buffer.drain(..start + length);
            Some(body)
        }

        /// Receive until a message with `method` arrives, returning it
        pub async fn recv_method(&mut self, method: &str) -> Value {
            loop {
                let message = self.recv().await;
                if message.get("method").and_then(Value::as_str) == Some(method) {
                    return message;
                }
            }
        }

        /// Write one framed body, verbatim
        pub async fn send_raw(&mut self, body: &str) {
            let framed = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
            self.send_bytes(framed.as_bytes()).await;
        }

        pub async fn send_bytes(&mut self, bytes: &[u8]) {
            self.writer.write_all(bytes).await.expect("write failed");
            self.writer.flush().await.expect("flush failed");
        }

        pub async fn respond(&mut self, id: &Value, result: Value) {
            self.send_raw(&encode_response(id, &result)).await;
        }

        /// Answer the next `initialize` with `capabilities`, returning its id
        pub async fn complete_handshake(&mut self, capabilities: Value) -> Value {
            let request = self.recv_method("initialize").await;
            let id = request["id"].clone();
            self.respond(&id, serde_json::json!({ "capabilities": capabilities }))
                .await;
            let initialized = self.recv().await;
            assert!(matches!(
                decode(&initialized.to_string()),
                Envelope::Notification { ref method, .. } if method == "initialized"
            ));
            id
        }

        /// Close the pipe, as a dying process would
        pub async fn hang_up(mut self) {
            let _ = self.writer.shutdown().await;
            drop(self);
        }
    }

    /// Launches sessions over stub backends and counts launches per key
    #[derive(Default)]
    pub struct StubLauncher {
        backends: Mutex<Vec<(ProjectKey, StubBackend)>>,
        launches: Mutex<HashMap<ProjectKey, usize>>,
    }

    impl StubLauncher {
        pub fn launches(&self, key: &ProjectKey) -> usize {
            self.launches.lock().unwrap().get(key).copied().unwrap_or(0)
        }

        /// Take the most recent stub backend launched for `key`, waiting
        /// for the launch if it has not happened yet
        pub async fn backend(&self, key: &ProjectKey) -> StubBackend {
            for _ in 0..500 {
                {
                    let mut backends = self.backends.lock().unwrap();
                    if let Some(index) = backends.iter().rposition(|(k, _)| k == key) {
                        return backends.remove(index).1;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("no backend launched for {key}");
        }
    }

    #[async_trait]
    impl BackendLauncher for StubLauncher {
        async fn launch(
            &self,
            key: &ProjectKey,
            options: SessionOptions,
        ) -> Result<(ClientSession, mpsc::UnboundedReceiver<SessionEvent>), RouterError> {
            *self.launches.lock().unwrap().entry(key.clone()).or_default() += 1;
            let (transport, backend) = pair();
            self.backends.lock().unwrap().push((key.clone(), backend));
            Ok(ClientSession::attach(transport, options))
        }
    }
}

/// Backend binary for integration tests, taken from `CLANGD_PATH`
#[cfg(all(test, feature = "backend-integration-tests"))]
pub fn get_test_clangd_path() -> String {
    std::env::var("CLANGD_PATH").unwrap_or_else(|_| "clangd".to_string())
}
