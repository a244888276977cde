use crate::error::Result;
use crate::llm::openai::{ChatMessage, OpenAIChatClient};
use crate::retrieval::RetrievedContext;
use async_trait::async_trait;

/// Produces a candidate answer from a question and its selected contexts.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, question: &str, contexts: &[RetrievedContext]) -> Result<String>;
}

const SYSTEM_PROMPT: &str = "You answer questions about a product catalog using only the \
provided context. If the context does not contain the answer, say that you don't know. Keep \
answers short and factual.";

/// Render contexts as a numbered block, best first.
pub fn format_contexts(contexts: &[RetrievedContext]) -> String {
    if contexts.is_empty() {
        return "(no context retrieved)".to_string();
    }
    contexts
        .iter()
        .map(|c| format!("[{}] {}", c.rank, c.content.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_messages(question: &str, contexts: &[RetrievedContext]) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "Context:\n{}\n\nQuestion: {}\n\nAnswer:",
            format_contexts(contexts),
            question.trim()
        )),
    ]
}

/// Generation adapter backed by a chat-completions model.
pub struct ChatGenerator {
    chat: OpenAIChatClient,
}

impl ChatGenerator {
    pub fn new(chat: OpenAIChatClient) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl Generator for ChatGenerator {
    async fn generate(&self, question: &str, contexts: &[RetrievedContext]) -> Result<String> {
        let answer = self.chat.complete(&build_messages(question, contexts), false).await?;
        Ok(answer.trim().to_string())
    }
}
