//! Scripted backend for tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use super::traits::*;

const NEUTRAL_ANALYSIS: &str =
    r#"{"intent":"unknown","sentiment":"neutral","buyingSignal":false,"stage":"unknown"}"#;

/// Answers JSON-mode requests with the scripted analysis and everything else
/// with the scripted reply, so one instance serves both classify and generate.
pub struct MockBackend {
    model: String,
    available: AtomicBool,
    reply: String,
    analysis: String,
    calls: AtomicU32,
    last_request: Mutex<Option<CompletionRequest>>,
}

impl MockBackend {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            available: AtomicBool::new(true),
            reply: "Mock response".to_string(),
            analysis: NEUTRAL_ANALYSIS.to_string(),
            calls: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Plain-text reply content.
    pub fn with_response(mut self, content: impl Into<String>) -> Self {
        self.reply = content.into();
        self
    }

    /// Content returned for JSON-mode (classification) requests.
    pub fn with_json_response(mut self, content: impl Into<String>) -> Self {
        self.analysis = content.into();
        self
    }

    pub fn with_available(self, available: bool) -> Self {
        self.set_available(available);
        self
    }

    /// Toggle availability on a shared instance.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of `complete` calls, failed ones included.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.last_request.lock().ok().and_then(|guard| guard.clone())
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new("mock-model")
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn health(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(LlmError::Unavailable("mock backend disabled".to_string()));
        }

        let content = if request.wants_json() {
            self.analysis.clone()
        } else {
            self.reply.clone()
        };
        // Rough four-characters-per-token estimate
        let usage = TokenUsage {
            prompt: request.messages.iter().map(|m| m.content.len() as u32 / 4).sum(),
            completion: content.len() as u32 / 4,
        };

        if let Ok(mut guard) = self.last_request.lock() {
            *guard = Some(request);
        }

        Ok(CompletionResponse {
            content,
            truncated: false,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reply_and_call_count() {
        let backend = MockBackend::new("test-model").with_response("Hello, world!");
        assert!(backend.health().await);
        assert_eq!(backend.call_count(), 0);

        let response = backend.complete(CompletionRequest::user("Hi")).await.unwrap();
        assert_eq!(response.content, "Hello, world!");
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_json_requests_get_the_analysis() {
        let backend = MockBackend::new("test-model")
            .with_response("plain")
            .with_json_response(r#"{"intent":"scheduling"}"#);

        let json = backend
            .complete(CompletionRequest::user("classify").with_json_output())
            .await
            .unwrap();
        assert_eq!(json.content, r#"{"intent":"scheduling"}"#);

        let text = backend.complete(CompletionRequest::user("reply")).await.unwrap();
        assert_eq!(text.content, "plain");
        assert_eq!(backend.last_request().map(|r| r.json), Some(false));
    }

    #[tokio::test]
    async fn test_unavailable() {
        let backend = MockBackend::new("test-model").with_available(false);
        assert!(!backend.health().await);
        assert!(matches!(
            backend.complete(CompletionRequest::user("Hi")).await,
            Err(LlmError::Unavailable(_))
        ));
        assert_eq!(backend.call_count(), 1);
    }
}
