//! Turn summarizer - distills finished exchanges into long-term memory.

use futures_util::StreamExt;
use secretary_memory::{MemoryRecord, SharedMemory};
use secretary_providers::{ChatRequest, Message, ModelEndpoint};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const DISTILLER_INSTRUCTION: &str = "You are a memory distiller. Output only JSON, never an explanation.";

/// Result of one summarization attempt. Never an error: summarization is
/// best-effort and a failure only means memory stays as it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    /// New entries were merged and saved.
    Merged,
    /// New entries were merged in memory but could not be saved.
    MergedUnsaved(String),
    /// The reply held nothing new.
    Unchanged,
    /// No usable reply; memory untouched.
    Skipped(String),
}

pub struct TurnSummarizer {
    endpoint: Arc<dyn ModelEndpoint>,
    model: String,
    memory: Arc<SharedMemory>,
    timeout: Duration,
}

impl TurnSummarizer {
    pub fn new(
        endpoint: Arc<dyn ModelEndpoint>,
        model: impl Into<String>,
        memory: Arc<SharedMemory>,
        timeout: Duration,
    ) -> Self {
        Self {
            endpoint,
            model: model.into(),
            memory,
            timeout,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Ask the summary model for memory additions and merge them.
    pub async fn summarize(
        &self,
        user_text: &str,
        assistant_text: &str,
        tools_used: &[String],
    ) -> SummaryOutcome {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message::system(DISTILLER_INSTRUCTION),
                Message::user(distill_prompt(user_text, assistant_text, tools_used)),
            ],
            tools: Vec::new(),
            stream: false,
        };

        let reply = match tokio::time::timeout(self.timeout, self.collect_reply(&request)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(reason)) => {
                warn!("Memory summarization failed: {}", reason);
                return SummaryOutcome::Skipped(reason);
            }
            Err(_) => {
                let reason = format!("summary model timed out after {:?}", self.timeout);
                warn!("Memory summarization failed: {}", reason);
                return SummaryOutcome::Skipped(reason);
            }
        };

        let additions = match parse_memory_reply(&reply) {
            Ok(additions) => additions,
            Err(reason) => {
                warn!("Memory summarization failed: {}", reason);
                debug!("Unusable summary reply: {}", reply);
                return SummaryOutcome::Skipped(reason);
            }
        };

        match self.memory.merge_and_persist(&additions).await {
            Ok(true) => {
                info!("Memory updated from turn summary");
                SummaryOutcome::Merged
            }
            Ok(false) => SummaryOutcome::Unchanged,
            Err(e) => {
                warn!("Memory merged but not persisted: {}", e);
                SummaryOutcome::MergedUnsaved(e.to_string())
            }
        }
    }

    async fn collect_reply(&self, request: &ChatRequest) -> Result<String, String> {
        let mut stream = self
            .endpoint
            .chat(request)
            .await
            .map_err(|e| e.to_string())?;

        let mut text = String::new();
        while let Some(fragment) = stream.next().await {
            let fragment = fragment.map_err(|e| e.to_string())?;
            if let Some(delta) = fragment.content_delta {
                text.push_str(&delta);
            }
            if fragment.done {
                break;
            }
        }
        Ok(text)
    }
}

fn distill_prompt(user_text: &str, assistant_text: &str, tools_used: &[String]) -> String {
    let tools = if tools_used.is_empty() {
        "none".to_string()
    } else {
        tools_used.join(", ")
    };

    format!(
        "Decide whether the conversation below contains new information worth keeping in long-term memory.\n\
         Output only JSON, no natural language.\n\n\
         Conversation:\n\
         User: {}\n\
         Assistant: {}\n\
         Tools used: {}\n\n\
         Reply with exactly this shape, leaving lists empty when there is nothing new:\n\
         {{\"longTimeTargets\": [], \"causes\": [], \"toolsToAssist\": []}}",
        user_text, assistant_text, tools
    )
}

/// Extract a [`MemoryRecord`] from a summary model reply.
///
/// Reasoning blocks (`<think>...</think>`) and Markdown fences are ignored;
/// the outermost JSON object must have exactly the three record fields.
pub fn parse_memory_reply(reply: &str) -> Result<MemoryRecord, String> {
    let visible = strip_reasoning(reply);

    let start = visible.find('{');
    let end = visible.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &visible[start..=end],
        _ => return Err("reply contains no JSON object".to_string()),
    };

    serde_json::from_str::<MemoryRecord>(json)
        .map(MemoryRecord::normalized)
        .map_err(|e| format!("reply is not a memory record: {}", e))
}

fn strip_reasoning(reply: &str) -> String {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let mut rest = reply;
    let mut visible = String::with_capacity(reply.len());
    loop {
        match (rest.find(OPEN), rest.find(CLOSE)) {
            // a stray close tag: everything before it was reasoning
            (open, Some(close)) if open.is_none() || Some(close) < open => {
                rest = &rest[close + CLOSE.len()..];
                visible.clear();
            }
            (Some(open), _) => {
                visible.push_str(&rest[..open]);
                let after_open = &rest[open + OPEN.len()..];
                match after_open.find(CLOSE) {
                    Some(close) => rest = &after_open[close + CLOSE.len()..],
                    None => return visible,
                }
            }
            _ => {
                visible.push_str(rest);
                return visible;
            }
        }
    }
}
