//! Local OpenAI-compatible server for HTTP embedding tests.
//!
//! Speaks just enough HTTP/1.1 for one request per connection: every
//! response carries `Connection: close`, so the client reconnects each time.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use serde_json::{json, Value};

use super::openai::{client_builder, OpenAiEmbedder};
use crate::config::{EmbeddingConfig, EmbeddingProvider};

pub(crate) struct MockServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl MockServer {
    /// Request bodies received so far, in arrival order
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().clone()
    }
}

/// Serve up to `max_requests` requests. `respond` gets the request number
/// (from 0) and the JSON body, and returns a status code and response body.
pub(crate) fn serve<F>(max_requests: usize, respond: F) -> MockServer
where
    F: Fn(usize, &Value) -> (u16, String) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = requests.clone();

    thread::spawn(move || {
        for (n, stream) in listener.incoming().take(max_requests).enumerate() {
            let mut stream = match stream {
                Ok(stream) => stream,
                Err(_) => continue,
            };
            let body = read_body(&mut stream).unwrap_or_default();
            let value: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
            let (status, response) = respond(n, &value);
            seen.lock().push(value);

            let reason = if status < 400 { "OK" } else { "Error" };
            let reply = format!(
                "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                reason,
                response.len(),
                response
            );
            let _ = stream.write_all(reply.as_bytes());
            let _ = stream.flush();
        }
    });

    MockServer {
        base_url: format!("http://{}/v1", addr),
        requests,
    }
}

fn read_body(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Ok(String::new());
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);

            let body_start = end + 4;
            while buf.len() < body_start + length {
                let n = stream.read(&mut chunk)?;
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            return Ok(String::from_utf8_lossy(&buf[body_start..]).to_string());
        }
    }
}

/// Texts of the `input` array of an embeddings request
pub(crate) fn inputs(body: &Value) -> Vec<String> {
    body["input"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// Deterministic `dim`-sized vector derived from the text bytes
pub(crate) fn vector_for(text: &str, dim: usize) -> Vec<f32> {
    let bytes = text.as_bytes();
    (0..dim)
        .map(|j| match bytes.get(j % bytes.len().max(1)) {
            Some(b) => f32::from(*b) / 255.0 + (j % 3) as f32,
            None => 1.0,
        })
        .collect()
}

/// Embeddings response for `body`, entries listed in reverse index order
pub(crate) fn embeddings_response(body: &Value, dim: usize) -> String {
    let data: Vec<Value> = inputs(body)
        .iter()
        .enumerate()
        .rev()
        .map(|(i, text)| json!({"object": "embedding", "index": i, "embedding": vector_for(text, dim)}))
        .collect();
    json!({"object": "list", "data": data}).to_string()
}

/// Embedding config pointing at a local server, no API key
pub(crate) fn local_config(base_url: &str, model: &str) -> EmbeddingConfig {
    EmbeddingConfig {
        provider: EmbeddingProvider::OpenAi,
        model: model.to_string(),
        base_url: base_url.to_string(),
        api_key_env: None,
        timeout_secs: 5,
        ..EmbeddingConfig::default()
    }
}

/// HTTP embedder that ignores proxy settings from the environment
pub(crate) fn local_embedder(config: &EmbeddingConfig) -> OpenAiEmbedder {
    let client = client_builder(config).unwrap().no_proxy().build().unwrap();
    OpenAiEmbedder::with_client(config, client).unwrap()
}
