//! LLM-as-judge metric scorer producing RAGAS-style quality metrics.

use crate::error::{Result, EvalError};
use crate::eval::{MetricMap, MetricValue};
use crate::llm::generator::format_contexts;
use crate::llm::openai::{ChatMessage, OpenAIChatClient};
use crate::retrieval::RetrievedContext;
use async_trait::async_trait;
use serde_json::Value;

const SERVICE: &str = "judge";

pub const FAITHFULNESS: &str = "faithfulness";
pub const ANSWER_RELEVANCY: &str = "answer_relevancy";
pub const CONTEXT_PRECISION: &str = "context_precision";
pub const CONTEXT_RECALL: &str = "context_recall";

pub fn default_metric_names() -> Vec<String> {
    [FAITHFULNESS, ANSWER_RELEVANCY, CONTEXT_PRECISION, CONTEXT_RECALL]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

/// Everything the scorer sees for one item
#[derive(Debug, Clone, Copy)]
pub struct ScoringInput<'a> {
    pub question: &'a str,
    pub contexts: &'a [RetrievedContext],
    pub answer: &'a str,
    pub reference_answer: &'a str,
    pub reference_contexts: &'a [String],
}

/// Computes named quality metrics for one answered item.
#[async_trait]
pub trait MetricScorer: Send + Sync {
    /// Metric names this scorer reports; used to flag metrics with no samples.
    fn metric_names(&self) -> Vec<String>;

    async fn score(&self, input: &ScoringInput<'_>) -> Result<MetricMap>;
}

fn metric_description(name: &str) -> &'static str {
    match name {
        FAITHFULNESS => "fraction of claims in the answer supported by the retrieved context",
        ANSWER_RELEVANCY => "how directly the answer addresses the question",
        CONTEXT_PRECISION => {
            "fraction of retrieved context chunks relevant to the question, weighted toward top \
             ranks"
        }
        CONTEXT_RECALL => {
            "fraction of the reference answer's facts present in the retrieved context"
        }
        _ => "quality score as you judge it",
    }
}

pub fn build_judge_messages(
    input: &ScoringInput<'_>,
    metric_names: &[String],
) -> Vec<ChatMessage> {
    let metric_lines = metric_names
        .iter()
        .map(|m| format!("- {}: {}", m, metric_description(m)))
        .collect::<Vec<_>>()
        .join("\n");

    let reference_contexts = if input.reference_contexts.is_empty() {
        "(none provided)".to_string()
    } else {
        input.reference_contexts.join("\n---\n")
    };

    vec![
        ChatMessage::system(format!(
            "You are an evaluation judge for a retrieval-augmented QA system. Score each metric \
             from 0.0 to 1.0:\n{}\nRespond with one JSON object mapping each metric name to a \
             number.",
            metric_lines
        )),
        ChatMessage::user(format!(
            "QUESTION:\n{}\n\nRETRIEVED CONTEXT (in order):\n{}\n\nANSWER:\n{}\n\n\
             REFERENCE ANSWER:\n{}\n\nREFERENCE CONTEXTS:\n{}",
            input.question,
            format_contexts(input.contexts),
            input.answer,
            input.reference_answer,
            reference_contexts
        )),
    ]
}

/// Strip an optional ```json fence around a reply.
fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            rest.strip_suffix("```").unwrap_or(rest).trim()
        }
        None => trimmed,
    }
}

/// Parse the judge's reply into one value per expected metric.
///
/// A reply that is not a JSON object fails the whole item. Individual metrics
/// that are missing, non-numeric, or outside [0, 1] become error markers.
pub fn parse_judge_reply(reply: &str, metric_names: &[String]) -> Result<MetricMap> {
    let value: Value = serde_json::from_str(strip_code_fence(reply))
        .map_err(|e| EvalError::collaborator(SERVICE, format!("Malformed judge reply: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| EvalError::collaborator(SERVICE, "Judge reply is not a JSON object"))?;

    Ok(metric_names
        .iter()
        .map(|name| {
            let metric = match object.get(name) {
                Some(Value::Number(n)) => match n.as_f64() {
                    Some(v) => MetricValue::from_raw(v),
                    None => MetricValue::error("unrepresentable number"),
                },
                Some(other) => MetricValue::error(format!("non-numeric value {}", other)),
                None => MetricValue::error("missing from judge reply"),
            };
            (name.clone(), metric)
        })
        .collect())
}

/// Metric scorer backed by a chat model acting as judge
pub struct LlmJudgeScorer {
    chat: OpenAIChatClient,
    metric_names: Vec<String>,
}

impl LlmJudgeScorer {
    pub fn new(chat: OpenAIChatClient, metric_names: Vec<String>) -> Self {
        Self { chat, metric_names }
    }
}

#[async_trait]
impl MetricScorer for LlmJudgeScorer {
    fn metric_names(&self) -> Vec<String> {
        self.metric_names.clone()
    }

    async fn score(&self, input: &ScoringInput<'_>) -> Result<MetricMap> {
        let messages = build_judge_messages(input, &self.metric_names);
        let reply = self.chat.complete(&messages, true).await?;
        parse_judge_reply(&reply, &self.metric_names)
    }
}
