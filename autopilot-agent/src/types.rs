//! Conversation and classification types shared with the decision engine.

use serde::{Deserialize, Serialize};

/// What the contact is trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    QuestionPrice,
    QuestionProduct,
    Scheduling,
    Complaint,
    Objection,
    Purchase,
    Unknown,
}

impl Intent {
    /// Parse a classifier label; anything unrecognised is `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match normalize(label).as_str() {
            "greeting" => Intent::Greeting,
            "question_price" | "price" | "pricing" => Intent::QuestionPrice,
            "question_product" | "product" => Intent::QuestionProduct,
            "scheduling" | "schedule" | "appointment" => Intent::Scheduling,
            "complaint" => Intent::Complaint,
            "objection" => Intent::Objection,
            "purchase" | "buy" => Intent::Purchase,
            _ => Intent::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Greeting => "greeting",
            Intent::QuestionPrice => "question_price",
            Intent::QuestionProduct => "question_product",
            Intent::Scheduling => "scheduling",
            Intent::Complaint => "complaint",
            Intent::Objection => "objection",
            Intent::Purchase => "purchase",
            Intent::Unknown => "unknown",
        }
    }
}

/// Emotional tone of the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    /// Parse a classifier label; anything unrecognised is `Neutral`.
    pub fn from_label(label: &str) -> Self {
        match normalize(label).as_str() {
            "positive" => Sentiment::Positive,
            "negative" => Sentiment::Negative,
            _ => Sentiment::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }
}

impl Default for Sentiment {
    fn default() -> Self {
        Self::Neutral
    }
}

/// Funnel stage of the lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    New,
    Engaged,
    Negotiation,
    Closing,
    Customer,
    Unknown,
}

impl Stage {
    /// Parse a classifier label; anything unrecognised is `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match normalize(label).as_str() {
            "new" | "lead" => Stage::New,
            "engaged" | "interested" | "qualified" => Stage::Engaged,
            "negotiation" | "negotiating" => Stage::Negotiation,
            "closing" => Stage::Closing,
            "customer" | "won" => Stage::Customer,
            _ => Stage::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::New => "new",
            Stage::Engaged => "engaged",
            Stage::Negotiation => "negotiation",
            Stage::Closing => "closing",
            Stage::Customer => "customer",
            Stage::Unknown => "unknown",
        }
    }
}

fn normalize(label: &str) -> String {
    label.trim().to_lowercase().replace(['-', ' '], "_")
}

/// Classifier output for one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub intent: Intent,
    pub sentiment: Sentiment,
    pub buying_signal: bool,
    pub stage: Stage,
}

impl Analysis {
    /// The analysis used in rule-only mode and when classification fails.
    pub fn neutral() -> Self {
        Self {
            intent: Intent::Unknown,
            sentiment: Sentiment::Neutral,
            buying_signal: false,
            stage: Stage::Unknown,
        }
    }

    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intent = intent;
        self
    }

    pub fn with_sentiment(mut self, sentiment: Sentiment) -> Self {
        self.sentiment = sentiment;
        self
    }

    pub fn with_buying_signal(mut self, buying_signal: bool) -> Self {
        self.buying_signal = buying_signal;
        self
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }
}

impl Default for Analysis {
    fn default() -> Self {
        Self::neutral()
    }
}

/// Who wrote a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    /// The contact
    Contact,
    /// The business (human agent or automation)
    Business,
}

/// One message of conversation history, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub content: String,
}

impl Turn {
    pub fn contact(content: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Contact,
            content: content.into(),
        }
    }

    pub fn business(content: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Business,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_lenient() {
        assert_eq!(Intent::from_label("Question Price"), Intent::QuestionPrice);
        assert_eq!(Intent::from_label("question-price"), Intent::QuestionPrice);
        assert_eq!(Intent::from_label("weather"), Intent::Unknown);
        assert_eq!(Sentiment::from_label("POSITIVE"), Sentiment::Positive);
        assert_eq!(Sentiment::from_label("mixed"), Sentiment::Neutral);
        assert_eq!(Stage::from_label("interested"), Stage::Engaged);
    }

    #[test]
    fn test_analysis_serializes_camel_case() {
        let analysis = Analysis::neutral().with_buying_signal(true);
        let json = serde_json::to_value(&analysis).unwrap();
        assert_eq!(json["buyingSignal"], true);
        assert_eq!(json["intent"], "unknown");
    }
}
