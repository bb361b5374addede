//! Ollama Provider
//!
//! Streams chat completions from a local Ollama server.
//!
//! # Ollama API
//!
//! - `/api/chat` - Chat completions, newline-delimited JSON when streaming
//! - `/api/tags` - List available models (used as a health probe)
//!
//! Each request carries the resolved system prompt and one user message.
//! Image attachments travel base64-encoded in the message's `images` field;
//! UTF-8 text attachments are inlined after the user's text. Other attachment
//! types are skipped with a debug log.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::traits::{ProviderError, StreamingProvider, StreamingToken};
use crate::config::ProviderSettings;
use crate::request::ConversationRequest;

/// Sent when the body ends before a `done` line
const INCOMPLETE_STREAM: &str = "stream ended before completion";

/// Ollama provider client
#[derive(Clone)]
pub struct OllamaProvider {
    host: String,
    port: u16,
    model: String,
    http_client: reqwest::Client,
}

/// One decoded NDJSON line
#[derive(Debug, PartialEq, Eq)]
enum ChatLine {
    Token(String),
    Done,
    Error(String),
    Skip,
}

impl OllamaProvider {
    /// Create a new Ollama provider
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Transport`] if the HTTP client cannot be built.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        model: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        // No overall request timeout: the orchestrator owns the turn deadline.
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            host: host.into(),
            port,
            model: model.into(),
            http_client,
        })
    }

    /// Create from resolved settings
    ///
    /// # Errors
    ///
    /// See [`OllamaProvider::new`].
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        Self::new(settings.host.clone(), settings.port, settings.model.clone())
    }

    /// Create from environment variables
    ///
    /// # Errors
    ///
    /// See [`OllamaProvider::new`].
    pub fn from_env() -> Result<Self, ProviderError> {
        let defaults = ProviderSettings::default();
        let host = std::env::var("OLLAMA_HOST").unwrap_or(defaults.host);
        let port = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port);
        let model = std::env::var("ORCHESTRATOR_MODEL").unwrap_or(defaults.model);

        Self::new(host, port, model)
    }

    /// Use a preconfigured HTTP client (proxies, TLS, timeouts)
    #[must_use]
    pub fn with_http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = http_client;
        self
    }

    /// Model name sent with every request
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url())
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url())
    }

    /// Build the `/api/chat` request body
    fn build_chat_body(&self, request: &ConversationRequest) -> Value {
        let mut messages = Vec::new();

        if let Some(system) = request.system_prompt() {
            messages.push(json!({ "role": "system", "content": system }));
        }

        let mut content = request.user_message().to_string();
        let mut images = Vec::new();
        for attachment in request.attachments() {
            if attachment.is_image() {
                images.push(base64::engine::general_purpose::STANDARD.encode(attachment.data()));
            } else if let Ok(text) = std::str::from_utf8(attachment.data()) {
                content.push_str(&format!("\n\n[{}]\n{}", attachment.name(), text));
            } else {
                tracing::debug!(
                    name = attachment.name(),
                    mime_type = attachment.mime_type(),
                    "Skipping binary attachment"
                );
            }
        }

        let mut user = json!({ "role": "user", "content": content });
        if !images.is_empty() {
            user["images"] = json!(images);
        }
        messages.push(user);

        json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        })
    }
}

/// Decode one line of the streaming response
fn decode_line(line: &str) -> ChatLine {
    let Ok(data) = serde_json::from_str::<Value>(line) else {
        return ChatLine::Skip;
    };

    if let Some(error) = data.get("error").and_then(Value::as_str) {
        return ChatLine::Error(error.to_string());
    }
    if data.get("done").and_then(Value::as_bool).unwrap_or(false) {
        return ChatLine::Done;
    }
    match data.pointer("/message/content").and_then(Value::as_str) {
        Some(token) if !token.is_empty() => ChatLine::Token(token.to_string()),
        _ => ChatLine::Skip,
    }
}

/// Splits a streamed body into NDJSON lines and decodes them
///
/// Raw bytes are buffered until a full line is available, so a UTF-8
/// sequence split across network chunks decodes intact. Decoding stops at the
/// first terminal event.
#[derive(Debug, Default)]
struct LineDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl LineDecoder {
    /// Feed one chunk; returns the events of every line it completes
    fn feed(&mut self, bytes: &[u8]) -> Vec<StreamingToken> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        self.buffer.extend_from_slice(bytes);
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = self.decode(&line) {
                events.push(event);
                if self.finished {
                    break;
                }
            }
        }
        events
    }

    /// Events for the end of the body
    ///
    /// A body that ends without a `done` line is reported as an error.
    fn finish(&mut self) -> Vec<StreamingToken> {
        if self.finished {
            return Vec::new();
        }

        let rest = std::mem::take(&mut self.buffer);
        let mut events: Vec<StreamingToken> = self.decode(&rest).into_iter().collect();
        if !self.finished {
            tracing::warn!("Ollama response ended without a done line");
            self.finished = true;
            events.push(StreamingToken::Error(INCOMPLETE_STREAM.to_string()));
        }
        events
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn decode(&mut self, raw: &[u8]) -> Option<StreamingToken> {
        let Ok(line) = std::str::from_utf8(raw) else {
            tracing::warn!(bytes = raw.len(), "Skipping response line that is not UTF-8");
            return None;
        };
        let event = match decode_line(line.trim()) {
            ChatLine::Token(token) => StreamingToken::Token(token),
            ChatLine::Done => StreamingToken::Complete,
            ChatLine::Error(error) => StreamingToken::Error(error),
            ChatLine::Skip => return None,
        };
        self.finished = !matches!(event, StreamingToken::Token(_));
        Some(event)
    }
}

/// Send `events` in order; `false` once the receiver is gone
async fn forward(tx: &mpsc::Sender<StreamingToken>, events: Vec<StreamingToken>) -> bool {
    for event in events {
        if tx.send(event).await.is_err() {
            return false;
        }
    }
    true
}

#[async_trait]
impl StreamingProvider for OllamaProvider {
    fn name(&self) -> &str {
        "Ollama"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    async fn send_streaming(
        &self,
        request: &ConversationRequest,
    ) -> Result<mpsc::Receiver<StreamingToken>, ProviderError> {
        let body = self.build_chat_body(request);

        let response = self
            .http_client
            .post(self.chat_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    ProviderError::Unavailable(e.to_string())
                } else {
                    ProviderError::Transport(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        let (tx, rx) = mpsc::channel(100);
        let mut stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut decoder = LineDecoder::default();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(StreamingToken::Error(e.to_string())).await;
                        return;
                    }
                };
                if !forward(&tx, decoder.feed(&bytes)).await || decoder.is_finished() {
                    return;
                }
            }

            forward(&tx, decoder.finish()).await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::{Attachment, AttachmentMeta};
    use crate::messages::MessageId;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const DEFAULT_PORT: u16 = 11434;

    fn local_provider(port: u16) -> OllamaProvider {
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        OllamaProvider::new("127.0.0.1", port, "llama3.2")
            .unwrap()
            .with_http_client(client)
    }

    fn request(text: &str) -> ConversationRequest {
        ConversationRequest::new(MessageId::new(), text, vec![], None, vec![]).unwrap()
    }

    async fn collect(mut rx: mpsc::Receiver<StreamingToken>) -> Vec<StreamingToken> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    /// Read one HTTP request, headers and body
    async fn read_request(socket: &mut TcpStream) {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            data.extend_from_slice(&buf[..n]);
            if let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&data[..end]).to_ascii_lowercase();
                let length = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if data.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    /// Answer one `/api/chat` call, writing the body in the given pieces
    async fn serve_once(pieces: Vec<Vec<u8>>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
            for piece in pieces {
                socket.write_all(&piece).await.unwrap();
                socket.flush().await.unwrap();
            }
            socket.shutdown().await.unwrap();
        });

        port
    }

    #[test]
    fn test_ollama_provider_creation() {
        let provider = OllamaProvider::new("localhost", 11434, "llama3.2").unwrap();
        assert_eq!(provider.base_url(), "http://localhost:11434");
        assert_eq!(provider.chat_url(), "http://localhost:11434/api/chat");
        assert_eq!(provider.model(), "llama3.2");
    }

    #[test]
    fn test_from_settings() {
        let settings = ProviderSettings {
            host: "example.com".to_string(),
            port: 8080,
            model: "mistral".to_string(),
        };
        let provider = OllamaProvider::from_settings(&settings).unwrap();
        assert_eq!(provider.base_url(), "http://example.com:8080");
        assert_eq!(provider.model(), "mistral");
    }

    #[test]
    fn test_chat_body_with_system_and_image() {
        let provider = local_provider(DEFAULT_PORT);
        let attachments = vec![
            Attachment::new(AttachmentMeta::new("a.png", "image/png"), vec![1, 2, 3]),
            Attachment::new(AttachmentMeta::new("notes.txt", "text/plain"), b"remember".to_vec()),
        ];
        let request =
            ConversationRequest::new(MessageId::new(), "Describe", attachments, Some(" Be brief "), vec![])
                .unwrap();

        let body = provider.build_chat_body(&request);

        assert_eq!(body["stream"], json!(true));
        assert_eq!(body["messages"][0], json!({ "role": "system", "content": "Be brief" }));
        assert_eq!(body["messages"][1]["role"], json!("user"));
        assert_eq!(
            body["messages"][1]["content"],
            json!("Describe\n\n[notes.txt]\nremember")
        );
        assert_eq!(body["messages"][1]["images"], json!(["AQID"]));
    }

    #[test]
    fn test_chat_body_without_system() {
        let provider = local_provider(DEFAULT_PORT);
        let request = ConversationRequest::new(MessageId::new(), "Hi", vec![], Some("  "), vec![]).unwrap();

        let body = provider.build_chat_body(&request);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].get("images").is_none());
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(
            decode_line(r#"{"message":{"role":"assistant","content":"Hel"},"done":false}"#),
            ChatLine::Token("Hel".to_string())
        );
        assert_eq!(
            decode_line(r#"{"message":{"role":"assistant","content":""},"done":true}"#),
            ChatLine::Done
        );
        assert_eq!(
            decode_line(r#"{"error":"model not found"}"#),
            ChatLine::Error("model not found".to_string())
        );
        assert_eq!(decode_line("not json"), ChatLine::Skip);
        assert_eq!(decode_line(""), ChatLine::Skip);
    }

    #[test]
    fn test_decoder_keeps_code_point_split_across_chunks() {
        let line = "{\"message\":{\"content\":\"café\"},\"done\":false}\n".as_bytes();
        let split = line.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let mut decoder = LineDecoder::default();

        assert!(decoder.feed(&line[..split]).is_empty());
        assert_eq!(decoder.feed(&line[split..]), vec![StreamingToken::Token("café".to_string())]);
        assert_eq!(
            decoder.feed(b"{\"done\":true}\n"),
            vec![StreamingToken::Complete]
        );
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_decoder_forwards_trailing_error_without_newline() {
        let mut decoder = LineDecoder::default();

        let events = decoder.feed(b"{\"message\":{\"content\":\"a\"},\"done\":false}\n{\"error\":\"model crashed\"}");
        assert_eq!(events, vec![StreamingToken::Token("a".to_string())]);
        assert_eq!(
            decoder.finish(),
            vec![StreamingToken::Error("model crashed".to_string())]
        );
    }

    #[test]
    fn test_decoder_reports_body_ending_before_done() {
        let mut decoder = LineDecoder::default();

        decoder.feed(b"{\"message\":{\"content\":\"a\"},\"done\":false}\n");
        assert!(!decoder.is_finished());
        assert_eq!(
            decoder.finish(),
            vec![StreamingToken::Error(INCOMPLETE_STREAM.to_string())]
        );
    }

    #[test]
    fn test_decoder_stops_at_done() {
        let mut decoder = LineDecoder::default();

        let events = decoder.feed(b"{\"done\":true}\n{\"message\":{\"content\":\"late\"}}\n");
        assert_eq!(events, vec![StreamingToken::Complete]);
        assert!(decoder.feed(b"{\"message\":{\"content\":\"later\"}}\n").is_empty());
        assert!(decoder.finish().is_empty());
    }

    #[tokio::test]
    async fn test_stream_decodes_split_code_point() {
        let body = "{\"message\":{\"content\":\"café\"},\"done\":false}\n{\"done\":true}\n".as_bytes();
        let split = body.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let port = serve_once(vec![body[..split].to_vec(), body[split..].to_vec()]).await;

        let rx = local_provider(port).send_streaming(&request("hi")).await.unwrap();

        assert_eq!(
            collect(rx).await,
            vec![StreamingToken::Token("café".to_string()), StreamingToken::Complete]
        );
    }

    #[tokio::test]
    async fn test_stream_reports_error_after_partial_reply() {
        let port = serve_once(vec![
            b"{\"message\":{\"content\":\"a\"},\"done\":false}\n".to_vec(),
            b"{\"error\":\"model crashed\"}".to_vec(),
        ])
        .await;

        let rx = local_provider(port).send_streaming(&request("hi")).await.unwrap();

        assert_eq!(
            collect(rx).await,
            vec![
                StreamingToken::Token("a".to_string()),
                StreamingToken::Error("model crashed".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_without_done_is_an_error() {
        let port = serve_once(vec![b"{\"message\":{\"content\":\"a\"},\"done\":false}\n".to_vec()]).await;

        let rx = local_provider(port).send_streaming(&request("hi")).await.unwrap();

        assert_eq!(
            collect(rx).await,
            vec![
                StreamingToken::Token("a".to_string()),
                StreamingToken::Error(INCOMPLETE_STREAM.to_string()),
            ]
        );
    }
}
