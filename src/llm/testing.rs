//! Scripted generator for driving pipeline stages in tests

use super::client::{GenerationRequest, GenerationResponse, StopReason, TextGenerator};
use crate::error::PipelineError;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Replays canned responses in order and records every request it saw.
#[derive(Default)]
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<Result<GenerationResponse, PipelineError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(Ok(GenerationResponse {
            text: text.into(),
            stop_reason: StopReason::Complete,
            usage: None,
        }))
    }

    pub fn reply_truncated(self, text: impl Into<String>) -> Self {
        self.push(Ok(GenerationResponse {
            text: text.into(),
            stop_reason: StopReason::MaxTokensReached,
            usage: None,
        }))
    }

    pub fn fail(self, err: PipelineError) -> Self {
        self.push(Err(err))
    }

    fn push(self, item: Result<GenerationResponse, PipelineError>) -> Self {
        self.responses
            .lock()
            .expect("scripted responses lock")
            .push_back(item);
        self
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().expect("scripted requests lock").clone()
    }
}

impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, PipelineError> {
        self.requests
            .lock()
            .expect("scripted requests lock")
            .push(request.clone());
        self.responses
            .lock()
            .expect("scripted responses lock")
            .pop_front()
            .unwrap_or_else(|| Err(PipelineError::Network("no scripted response left".to_string())))
    }
}
