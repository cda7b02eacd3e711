//! Talks to an Ollama-compatible backend for chat streaming and embeddings.
//! All optional — see AiConfig::from_env().

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StoryError;

fn ai_err(msg: impl Into<String>) -> StoryError {
    StoryError::AiBackend(msg.into())
}

const CHAT_TIMEOUT: Duration = Duration::from_secs(120);
const EMBED_TIMEOUT: Duration = Duration::from_secs(30);
const KEEP_ALIVE: &str = "10m";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".into(), content: content.into() }
    }
}

/// Generation knobs forwarded to the backend's `options` map.
#[derive(Debug, Clone, Serialize)]
pub struct ChatOptions {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub repeat_penalty: f64,
    pub num_ctx: u32,
    pub min_p: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, StoryError>> + Send>>;

/// One capability surface for every chat backend: bind options once,
/// then stream or invoke with plain message lists.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn stream_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<TokenStream, StoryError>;

    async fn invoke_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, StoryError>;
}

/// A chat client with model and options already applied.
pub struct BoundModel<'a> {
    client: &'a dyn ChatClient,
    model: String,
    options: ChatOptions,
}

impl BoundModel<'_> {
    pub async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream, StoryError> {
        self.client.stream_chat(&self.model, messages, &self.options).await
    }

    pub async fn invoke(&self, messages: &[ChatMessage]) -> Result<String, StoryError> {
        self.client.invoke_chat(&self.model, messages, &self.options).await
    }
}

pub fn bind<'a>(client: &'a dyn ChatClient, model: &str, options: ChatOptions) -> BoundModel<'a> {
    BoundModel { client, model: model.to_string(), options }
}

/// Embedding backends never fail hard: `None` means "no embedding
/// available" and callers fall back to non-vector behavior.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Option<Vec<f32>>;
}

#[derive(Clone)]
pub struct AiConfig {
    pub base_url: String,
    pub chat_model: String,
    pub summary_model: String,
    pub embed_model: String,
    pub client: reqwest::Client,
}

impl AiConfig {
    /// Returns `None` if `OLLAMA_URL` is not set — the service then runs
    /// with turns disabled and recency-only lore retrieval.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("OLLAMA_URL").ok()?;
        let base_url = base_url.trim_end_matches('/').to_string();
        let chat_model =
            std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| "dolphin-llama3:8b".into());
        let summary_model =
            std::env::var("SUMMARY_MODEL").unwrap_or_else(|_| chat_model.clone());
        let embed_model =
            std::env::var("EMBED_MODEL").unwrap_or_else(|_| "nomic-embed-text".into());

        let client = reqwest::Client::builder()
            .timeout(CHAT_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");

        Some(Self { base_url, chat_model, summary_model, embed_model, client })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: &'a ChatOptions,
    keep_alive: &'a str,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

struct NdjsonState {
    inner: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    buf: Vec<u8>,
    done: bool,
}

fn parse_chunk(line: &str) -> Result<ChatChunk, StoryError> {
    serde_json::from_str(line).map_err(|e| ai_err(format!("bad stream chunk: {e}")))
}

#[async_trait]
impl ChatClient for AiConfig {
    async fn stream_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<TokenStream, StoryError> {
        let req = ChatRequest { model, messages, stream: true, options, keep_alive: KEEP_ALIVE };
        let resp = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&req)
            .send()
            .await
            .map_err(|e| ai_err(format!("chat request failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ai_err(format!("chat backend returned {status}: {body}")));
        }

        let state = NdjsonState { inner: Box::pin(resp.bytes_stream()), buf: Vec::new(), done: false };
        let stream = futures::stream::try_unfold(state, |mut st| async move {
            loop {
                if st.done {
                    return Ok(None);
                }
                if let Some(pos) = st.buf.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = st.buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&raw).trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    let chunk = parse_chunk(&line)?;
                    if chunk.done {
                        st.done = true;
                    }
                    let token = chunk.message.map(|m| m.content).unwrap_or_default();
                    if token.is_empty() {
                        continue;
                    }
                    return Ok(Some((token, st)));
                }
                match st.inner.next().await {
                    Some(Ok(bytes)) => st.buf.extend_from_slice(&bytes),
                    Some(Err(e)) => return Err(ai_err(format!("stream read failed: {e}"))),
                    None => {
                        // trailing line without newline
                        let line = String::from_utf8_lossy(&st.buf).trim().to_string();
                        st.buf.clear();
                        st.done = true;
                        if line.is_empty() {
                            return Ok(None);
                        }
                        let chunk = parse_chunk(&line)?;
                        let token = chunk.message.map(|m| m.content).unwrap_or_default();
                        if token.is_empty() {
                            return Ok(None);
                        }
                        return Ok(Some((token, st)));
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn invoke_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, StoryError> {
        let req = ChatRequest { model, messages, stream: false, options, keep_alive: KEEP_ALIVE };
        let resp = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&req)
            .send()
            .await
            .map_err(|e| ai_err(format!("chat request failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ai_err(format!("chat backend returned {status}: {body}")));
        }
        let chunk: ChatChunk = resp
            .json()
            .await
            .map_err(|e| ai_err(format!("chat response parse failed: {e}")))?;
        Ok(chunk.message.map(|m| m.content).unwrap_or_default())
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Serialize)]
struct LegacyEmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    embeddings: Option<Vec<Vec<f32>>>,
}

impl EmbedResponse {
    fn into_vector(self) -> Option<Vec<f32>> {
        if let Some(v) = self.embedding {
            if !v.is_empty() {
                return Some(v);
            }
        }
        self.embeddings.and_then(|mut e| if e.is_empty() { None } else { Some(e.remove(0)) })
    }
}

#[async_trait]
impl Embedder for AiConfig {
    /// One primary attempt against `/api/embed`, then the legacy
    /// `/api/embeddings` shape. Never raises — `None` means unavailable.
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let primary = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .timeout(EMBED_TIMEOUT)
            .json(&EmbedRequest { model: &self.embed_model, input: text })
            .send()
            .await;
        match primary {
            Ok(resp) if resp.status().is_success() => {
                if let Ok(body) = resp.json::<EmbedResponse>().await {
                    if let Some(v) = body.into_vector() {
                        return Some(v);
                    }
                }
            }
            Ok(resp) => warn!(status = %resp.status(), "embed request rejected, trying legacy endpoint"),
            Err(e) => warn!(error = %e, "embed request failed, trying legacy endpoint"),
        }

        let legacy = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .timeout(EMBED_TIMEOUT)
            .json(&LegacyEmbedRequest { model: &self.embed_model, prompt: text })
            .send()
            .await;
        match legacy {
            Ok(resp) if resp.status().is_success() => {
                resp.json::<EmbedResponse>().await.ok().and_then(EmbedResponse::into_vector)
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "legacy embed request rejected");
                None
            }
            Err(e) => {
                warn!(error = %e, "legacy embed request failed");
                None
            }
        }
    }
}

/// Cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for i in 0..a.len() {
        let (ai, bi) = (a[i] as f64, b[i] as f64);
        dot += ai * bi;
        na += ai * ai;
        nb += bi * bi;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// Serialize an f32 vector to bytes (little-endian) for SQLite BLOB storage.
pub fn embedding_to_bytes(v: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(v.len() * 4);
    for &f in v {
        buf.extend_from_slice(&f.to_le_bytes());
    }
    buf
}

/// Deserialize bytes back to an f32 vector.
pub fn bytes_to_embedding(b: &[u8]) -> Vec<f32> {
    b.chunks_exact(4)
        .map(|chunk| {
            let arr: [u8; 4] = chunk.try_into().expect("4 bytes");
            f32::from_le_bytes(arr)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_same_vec() {
        let v: Vec<f32> = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-10);
    }

    #[test]
    fn cosine_perpendicular() {
        let a: Vec<f32> = vec![1.0, 0.0];
        let b: Vec<f32> = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-10);
    }

    #[test]
    fn cosine_empty() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn embedding_roundtrip() {
        let original: Vec<f32> = vec![1.0, -2.5, 3.125, 0.0, f32::MAX];
        let bytes = embedding_to_bytes(&original);
        assert_eq!(bytes_to_embedding(&bytes), original);
    }

    #[test]
    fn embed_response_prefers_single_vector() {
        let r = EmbedResponse { embedding: Some(vec![1.0]), embeddings: Some(vec![vec![2.0]]) };
        assert_eq!(r.into_vector(), Some(vec![1.0]));
        let r = EmbedResponse { embedding: None, embeddings: Some(vec![vec![2.0], vec![3.0]]) };
        assert_eq!(r.into_vector(), Some(vec![2.0]));
        let r = EmbedResponse { embedding: None, embeddings: None };
        assert_eq!(r.into_vector(), None);
    }
}
