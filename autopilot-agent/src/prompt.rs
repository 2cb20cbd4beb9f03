//! Prompt assembly for classification and reply generation.

use crate::backend::traits::{ChatMessage, CompletionRequest};
use crate::types::{Speaker, Turn};

/// System prompt for the intent classifier.
pub const CLASSIFIER_PROMPT: &str = "You classify WhatsApp sales conversations. \
Reply with a single JSON object and nothing else, with keys: \
\"intent\" (one of greeting, question_price, question_product, scheduling, complaint, objection, purchase, unknown), \
\"sentiment\" (positive, neutral, negative), \
\"buyingSignal\" (true when the contact shows intent to buy now), \
\"stage\" (new, engaged, negotiation, closing, customer, unknown). \
Judge the latest contact messages most heavily.";

/// System prompt shared by every reply generation call.
pub const WRITER_PROMPT: &str = "You write short WhatsApp replies on behalf of a business. \
Use at most three sentences, a friendly tone, no markdown, and never invent prices or links \
that are not present in the conversation.";

/// Map conversation history onto chat messages: the contact speaks as the
/// user, the business as the assistant.
pub fn history_messages(history: &[Turn]) -> Vec<ChatMessage> {
    history
        .iter()
        .filter(|turn| !turn.content.trim().is_empty())
        .map(|turn| match turn.speaker {
            Speaker::Contact => ChatMessage::user(turn.content.clone()),
            Speaker::Business => ChatMessage::assistant(turn.content.clone()),
        })
        .collect()
}

/// Render history as a plain transcript for the classifier.
pub fn transcript(history: &[Turn]) -> String {
    history
        .iter()
        .filter(|turn| !turn.content.trim().is_empty())
        .map(|turn| {
            let who = match turn.speaker {
                Speaker::Contact => "CONTACT",
                Speaker::Business => "BUSINESS",
            };
            format!("{}: {}", who, turn.content.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the JSON-mode classification request.
pub fn classification_request(history: &[Turn]) -> CompletionRequest {
    CompletionRequest::user(format!("Conversation:\n{}", transcript(history)))
        .with_system(CLASSIFIER_PROMPT)
        .with_json_output()
}

/// Build a reply request for the given instruction.
pub fn reply_request(history: &[Turn], instruction: &str) -> CompletionRequest {
    let system = format!("{}\n\nTask: {}", WRITER_PROMPT, instruction);
    let mut request = CompletionRequest::default().with_system(system);
    request.messages = history_messages(history);
    if request.messages.is_empty() {
        request.messages.push(ChatMessage::user(instruction));
    }
    request
}
