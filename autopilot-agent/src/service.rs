//! OutreachAgent - classification and reply generation over an LLM backend.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::traits::{CompletionRequest, LlmBackend, LlmError};
use crate::prompt;
use crate::types::{Analysis, Intent, Sentiment, Stage, Turn};

/// Error types for the agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Backend error
    #[error("Backend error: {0}")]
    Backend(#[from] LlmError),

    /// The backend did not answer in time
    #[error("Backend timed out after {0}ms")]
    Timeout(u64),

    /// The classifier answered with something that is not an analysis
    #[error("Invalid classification: {0}")]
    InvalidClassification(String),

    /// The generator answered with empty text
    #[error("Empty completion")]
    EmptyCompletion,
}

/// Configuration for the OutreachAgent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Per-call timeout (ms)
    pub timeout_ms: u64,
    /// Token budget for generated replies
    pub reply_max_tokens: u32,
    /// Temperature for generated replies
    pub reply_temperature: f32,
    /// Token budget for classification
    pub classify_max_tokens: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            reply_max_tokens: 200,
            reply_temperature: 0.7,
            classify_max_tokens: 150,
        }
    }
}

/// Raw classifier JSON; every field is optional and labels are lenient.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAnalysis {
    intent: Option<String>,
    sentiment: Option<String>,
    #[serde(rename = "buyingSignal", alias = "buying_signal")]
    buying_signal: Option<bool>,
    stage: Option<String>,
}

impl From<RawAnalysis> for Analysis {
    fn from(raw: RawAnalysis) -> Self {
        Analysis {
            intent: raw
                .intent
                .as_deref()
                .map(Intent::from_label)
                .unwrap_or(Intent::Unknown),
            sentiment: raw
                .sentiment
                .as_deref()
                .map(Sentiment::from_label)
                .unwrap_or_default(),
            buying_signal: raw.buying_signal.unwrap_or(false),
            stage: raw
                .stage
                .as_deref()
                .map(Stage::from_label)
                .unwrap_or(Stage::Unknown),
        }
    }
}

/// Parse classifier output, tolerating markdown code fences around the JSON.
pub fn parse_analysis(content: &str) -> Result<Analysis, AgentError> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    let raw: RawAnalysis = serde_json::from_str(body)
        .map_err(|e| AgentError::InvalidClassification(e.to_string()))?;
    Ok(raw.into())
}

/// Intent classifier and reply generator backed by one LLM backend.
pub struct OutreachAgent {
    config: AgentConfig,
    backend: Arc<dyn LlmBackend>,
}

impl OutreachAgent {
    /// Create an agent over a backend with default configuration.
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self {
            config: AgentConfig::default(),
            backend,
        }
    }

    /// Create with configuration.
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Identifier of the backing model.
    pub fn model_id(&self) -> &str {
        self.backend.model()
    }

    /// Classify a conversation into intent, sentiment, buying signal and stage.
    pub async fn classify(&self, history: &[Turn]) -> Result<Analysis, AgentError> {
        let request = prompt::classification_request(history)
            .with_max_tokens(self.config.classify_max_tokens)
            .with_temperature(0.0);

        let content = self.call(request).await?;
        let analysis = parse_analysis(&content)?;

        debug!(
            model = %self.backend.model(),
            intent = analysis.intent.as_str(),
            buying_signal = analysis.buying_signal,
            "Conversation classified"
        );
        Ok(analysis)
    }

    /// Generate a reply following `instruction`.
    pub async fn generate(&self, history: &[Turn], instruction: &str) -> Result<String, AgentError> {
        let request = prompt::reply_request(history, instruction)
            .with_max_tokens(self.config.reply_max_tokens)
            .with_temperature(self.config.reply_temperature);

        let content = self.call(request).await?;
        let text = content.trim();
        if text.is_empty() {
            return Err(AgentError::EmptyCompletion);
        }
        Ok(text.to_string())
    }

    async fn call(&self, request: CompletionRequest) -> Result<String, AgentError> {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        match tokio::time::timeout(timeout, self.backend.complete(request)).await {
            Ok(Ok(response)) => Ok(response.content),
            Ok(Err(e)) => {
                warn!(model = %self.backend.model(), error = %e, "LLM call failed");
                Err(e.into())
            }
            Err(_) => {
                warn!(model = %self.backend.model(), "LLM call timed out");
                Err(AgentError::Timeout(self.config.timeout_ms))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;

    #[test]
    fn test_parse_analysis_with_fences() {
        let analysis = parse_analysis(
            "```json\n{\"intent\":\"question_price\",\"sentiment\":\"positive\",\"buyingSignal\":true,\"stage\":\"closing\"}\n```",
        )
        .unwrap();
        assert_eq!(analysis.intent, Intent::QuestionPrice);
        assert_eq!(analysis.sentiment, Sentiment::Positive);
        assert!(analysis.buying_signal);
        assert_eq!(analysis.stage, Stage::Closing);
    }

    #[test]
    fn test_parse_analysis_defaults_missing_fields() {
        let analysis = parse_analysis(r#"{"intent":"complaint"}"#).unwrap();
        assert_eq!(analysis.intent, Intent::Complaint);
        assert_eq!(analysis.sentiment, Sentiment::Neutral);
        assert!(!analysis.buying_signal);
        assert_eq!(analysis.stage, Stage::Unknown);
    }

    #[test]
    fn test_parse_analysis_accepts_snake_case_signal() {
        let analysis = parse_analysis(r#"{"buying_signal":true}"#).unwrap();
        assert!(analysis.buying_signal);
    }

    #[test]
    fn test_parse_analysis_rejects_prose() {
        assert!(matches!(
            parse_analysis("I think they want a discount"),
            Err(AgentError::InvalidClassification(_))
        ));
    }

    #[tokio::test]
    async fn test_classify_and_generate() {
        let backend = Arc::new(
            MockBackend::new("mock")
                .with_json_response(r#"{"intent":"scheduling","sentiment":"positive","buyingSignal":false,"stage":"engaged"}"#)
                .with_response("  Claro! Qual horário fica melhor?  "),
        );
        let agent = OutreachAgent::new(backend.clone());
        let history = vec![Turn::contact("Posso marcar uma visita?")];

        let analysis = agent.classify(&history).await.unwrap();
        assert_eq!(analysis.intent, Intent::Scheduling);

        let reply = agent.generate(&history, "Offer two time slots").await.unwrap();
        assert_eq!(reply, "Claro! Qual horário fica melhor?");
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn test_generate_rejects_empty_text() {
        let agent = OutreachAgent::new(Arc::new(MockBackend::new("mock").with_response("   ")));
        let result = agent.generate(&[Turn::contact("oi")], "Greet").await;
        assert!(matches!(result, Err(AgentError::EmptyCompletion)));
    }

    #[tokio::test]
    async fn test_unavailable_backend_is_an_error() {
        let agent = OutreachAgent::new(Arc::new(MockBackend::new("mock").with_available(false)));
        let result = agent.classify(&[Turn::contact("oi")]).await;
        assert!(matches!(result, Err(AgentError::Backend(LlmError::Unavailable(_)))));
    }
}
