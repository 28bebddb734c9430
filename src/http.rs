use std::time::Duration;

use serde_json::Value;
use tracing::debug;

const ERROR_BODY_EXCERPT_CHARS: usize = 240;

/// The single "could not load" failure kind. Transport errors, non-success
/// statuses and undecodable payloads all end up here; callers never retry
/// on their own.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("could not load {url}: {reason}")]
    LoadFailed { url: String, reason: String },
}

impl FetchError {
    fn load_failed(url: &str, reason: impl Into<String>) -> Self {
        Self::LoadFailed {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

pub trait Fetch {
    fn get_text(&self, url: &str) -> Result<String, FetchError>;

    fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        let body = self.get_text(url)?;
        serde_json::from_str(&body)
            .map_err(|err| FetchError::load_failed(url, format!("invalid json payload: {err}")))
    }
}

pub struct HttpClient {
    agent: ureq::Agent,
}

impl HttpClient {
    pub fn new(timeout: Duration, user_agent: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .user_agent(user_agent)
            .build();
        Self { agent }
    }
}

impl Fetch for HttpClient {
    fn get_text(&self, url: &str) -> Result<String, FetchError> {
        debug!(url, "fetching");
        match self.agent.get(url).call() {
            Ok(response) => response
                .into_string()
                .map_err(|err| FetchError::load_failed(url, format!("response decode failed: {err}"))),
            Err(ureq::Error::Status(status, response)) => {
                let response_body = response.into_string().ok().unwrap_or_default();
                let body = response_body.trim();
                let reason = if body.is_empty() {
                    format!("HTTP status {status}")
                } else {
                    let excerpt = body.chars().take(ERROR_BODY_EXCERPT_CHARS).collect::<String>();
                    format!("HTTP status {status} ({excerpt})")
                };
                Err(FetchError::load_failed(url, reason))
            }
            Err(ureq::Error::Transport(err)) => Err(FetchError::load_failed(
                url,
                format!("transport error: {err}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread::JoinHandle;

    struct CannedServer {
        url: String,
        hits: Arc<AtomicUsize>,
        handle: Option<JoinHandle<()>>,
    }

    impl CannedServer {
        /// Serves exactly `responses.len()` connections, one response each.
        fn spawn(responses: Vec<(u16, &'static str)>) -> Self {
            let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind test server");
            let addr = listener.local_addr().expect("local addr");
            let hits = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&hits);

            let handle = std::thread::spawn(move || {
                for (status, body) in responses {
                    let Ok((mut stream, _)) = listener.accept() else {
                        return;
                    };
                    counter.fetch_add(1, Ordering::SeqCst);
                    drain_request(&mut stream);
                    let _ = write!(
                        stream,
                        "HTTP/1.1 {status} Canned\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                }
            });

            Self {
                url: format!("http://{addr}/page"),
                hits,
                handle: Some(handle),
            }
        }

        fn hits(&mut self) -> usize {
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
            self.hits.load(Ordering::SeqCst)
        }
    }

    fn drain_request(stream: &mut TcpStream) {
        let _ = stream.set_read_timeout(Some(Duration::from_millis(200)));
        let mut buf = [0_u8; 1024];
        let mut data = Vec::new();
        while let Ok(read) = stream.read(&mut buf) {
            if read == 0 {
                break;
            }
            data.extend_from_slice(&buf[..read]);
            if data.windows(4).any(|window| window == b"\r\n\r\n") {
                break;
            }
        }
    }

    fn client() -> HttpClient {
        HttpClient::new(Duration::from_millis(500), "kniga-test")
    }

    #[test]
    fn returns_body_on_success() {
        let mut server = CannedServer::spawn(vec![(200, "<html>ok</html>")]);
        let body = client().get_text(&server.url).expect("fetch should succeed");
        assert_eq!(body, "<html>ok</html>");
        assert_eq!(server.hits(), 1);
    }

    #[test]
    fn server_errors_are_not_retried() {
        let mut server = CannedServer::spawn(vec![(503, "down")]);
        let err = client()
            .get_text(&server.url)
            .expect_err("503 should surface as load failure");
        let message = err.to_string();
        assert!(
            message.contains("HTTP status 503") && message.contains("down"),
            "unexpected error message: {message}"
        );
        assert_eq!(server.hits(), 1);
    }

    #[test]
    fn malformed_json_is_a_load_failure() {
        let mut server = CannedServer::spawn(vec![(200, "{not json")]);
        let err = client()
            .get_json(&server.url)
            .expect_err("invalid json should fail");
        assert!(err.to_string().contains("invalid json payload"));
        assert_eq!(server.hits(), 1);
    }

    #[test]
    fn decodes_json_payload() {
        let mut server = CannedServer::spawn(vec![(200, r#"{"results":null}"#)]);
        let value = client().get_json(&server.url).expect("json should decode");
        assert!(value.get("results").is_some());
        assert_eq!(server.hits(), 1);
    }

    #[test]
    fn refused_connection_is_a_load_failure() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind probe");
        let addr = listener.local_addr().expect("probe addr");
        drop(listener);

        let err = client()
            .get_text(&format!("http://{addr}/"))
            .expect_err("closed port should fail");
        let FetchError::LoadFailed { reason, .. } = err;
        assert!(reason.contains("transport error"), "unexpected reason: {reason}");
    }
}
