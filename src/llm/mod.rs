//! External model collaborators: OpenAI-compatible HTTP client, embeddings,
//! answer generation, and the LLM judge.

pub mod embedder;
pub mod generator;
pub mod judge;
pub mod openai;

pub use embedder::{Embedder, OpenAIEmbedder};
pub use generator::{ChatGenerator, Generator};
pub use judge::{LlmJudgeScorer, MetricScorer, ScoringInput};
pub use openai::{ChatMessage, OpenAIChatClient, OpenAIClient};
