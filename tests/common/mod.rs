#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use spindle::ai::{ChatClient, ChatMessage, ChatOptions, Embedder, TokenStream};
use spindle::db::{StoryDB, StoryInput};
use spindle::error::StoryError;
use spindle::SharedDB;

/// Token that makes FakeChat inject a mid-stream error.
pub const ERR_TOKEN: &str = "<ERR>";

/// Scripted chat backend: fixed token stream, queued invoke responses,
/// and call recording for prompt assertions.
#[derive(Default)]
pub struct FakeChat {
    pub tokens: Vec<String>,
    pub fail_on_start: bool,
    pub invoke_responses: Mutex<VecDeque<Result<String, String>>>,
    pub invoked: Mutex<Vec<Vec<ChatMessage>>>,
    pub streamed: Mutex<Vec<Vec<ChatMessage>>>,
}

impl FakeChat {
    pub fn with_tokens<T: Into<String>>(tokens: impl IntoIterator<Item = T>) -> Self {
        Self { tokens: tokens.into_iter().map(Into::into).collect(), ..Default::default() }
    }

    pub fn failing_on_start() -> Self {
        Self { fail_on_start: true, ..Default::default() }
    }

    pub fn queue_invoke(&self, response: impl Into<String>) {
        self.invoke_responses.lock().push_back(Ok(response.into()));
    }

    pub fn queue_invoke_error(&self, reason: impl Into<String>) {
        self.invoke_responses.lock().push_back(Err(reason.into()));
    }
}

#[async_trait]
impl ChatClient for FakeChat {
    async fn stream_chat(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> Result<TokenStream, StoryError> {
        self.streamed.lock().push(messages.to_vec());
        if self.fail_on_start {
            return Err(StoryError::AiBackend("backend down".into()));
        }
        let items: Vec<Result<String, StoryError>> = self
            .tokens
            .iter()
            .map(|t| {
                if t == ERR_TOKEN {
                    Err(StoryError::AiBackend("stream broke".into()))
                } else {
                    Ok(t.clone())
                }
            })
            .collect();
        Ok(Box::pin(futures::stream::iter(items)))
    }

    async fn invoke_chat(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> Result<String, StoryError> {
        self.invoked.lock().push(messages.to_vec());
        match self.invoke_responses.lock().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(reason)) => Err(StoryError::AiBackend(reason)),
            None => Ok(String::new()),
        }
    }
}

/// Embedding backend that is always unavailable.
pub struct NullEmbedder;

#[async_trait]
impl Embedder for NullEmbedder {
    async fn embed(&self, _text: &str) -> Option<Vec<f32>> {
        None
    }
}

/// Embedding backend answering from a fixed text → vector table.
#[derive(Default)]
pub struct FixedEmbedder {
    pub table: HashMap<String, Vec<f32>>,
}

impl FixedEmbedder {
    pub fn with(pairs: impl IntoIterator<Item = (&'static str, Vec<f32>)>) -> Self {
        Self { table: pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect() }
    }
}

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        self.table.get(text).cloned()
    }
}

pub fn test_db() -> SharedDB {
    Arc::new(StoryDB::open(":memory:").expect("in-memory db"))
}

pub fn seed_story(db: &StoryDB, title: &str) -> spindle::db::Story {
    db.insert_story(StoryInput { title: title.into(), ..Default::default() })
        .expect("seed story")
}
