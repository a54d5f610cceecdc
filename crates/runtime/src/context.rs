//! Context store - the session's message log and its outbound window.
//!
//! The store owns an optional system prompt plus the conversation history.
//! The memory snapshot is never stored: [`ContextStore::current_window`]
//! splices a fresh one in right after the system prompt every time a window
//! is built, so stale snapshots cannot accumulate.
//!
//! Retention works on *units*. An assistant message that requested tools
//! and the tool messages answering it form one unit; every other message is
//! a unit of its own. Eviction drops whole units from the oldest end, which
//! keeps every tool result next to the request it answers.

use chrono::{DateTime, Utc};
use secretary_memory::MemoryRecord;
use secretary_providers::{Message, Role, ToolCall};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Tool messages must never be empty.
pub const EMPTY_TOOL_OUTPUT: &str = "(no output)";

const MEMORY_PREAMBLE: &str =
    "Long-term memory you distilled from earlier sessions. Take it into account when answering:";

/// Serializable copy of the stored log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub model: String,
    pub messages: Vec<Message>,
    pub exported_at: DateTime<Utc>,
}

/// Message counts per role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContextStats {
    pub total: usize,
    pub system: usize,
    pub user: usize,
    pub assistant: usize,
    pub tool: usize,
    pub max_history_length: usize,
}

impl fmt::Display for ContextStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} messages (system {}, user {}, assistant {}, tool {}), limit {}",
            self.total, self.system, self.user, self.assistant, self.tool, self.max_history_length
        )
    }
}

pub struct ContextStore {
    system: Option<Message>,
    history: Vec<Message>,
    max_history_length: usize,
    inject_memory: bool,
}

impl ContextStore {
    pub fn new(max_history_length: usize, inject_memory: bool) -> Self {
        Self {
            system: None,
            history: Vec::new(),
            max_history_length,
            inject_memory,
        }
    }

    pub fn max_history_length(&self) -> usize {
        self.max_history_length
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system.as_ref().map(|m| m.content.as_str())
    }

    /// Replace the system prompt, or install one if none is set.
    pub fn set_system_prompt(&mut self, text: impl Into<String>) {
        self.system = Some(Message::system(text));
        self.enforce_retention();
    }

    pub fn append_user(&mut self, text: impl Into<String>) {
        self.push(Message::user(text));
    }

    /// Append an assistant message and return the tool calls it carries.
    ///
    /// A request is capped at [`ContextStore::max_tool_calls`] so that it and
    /// its results fit in the history together; calls past the cap are
    /// dropped and logged. Callers must execute only the returned calls.
    pub fn append_assistant(
        &mut self,
        text: impl Into<String>,
        mut tool_calls: Vec<ToolCall>,
    ) -> Vec<ToolCall> {
        let limit = self.max_tool_calls();
        if tool_calls.len() > limit {
            let dropped: Vec<String> = tool_calls
                .split_off(limit)
                .into_iter()
                .map(|call| call.name)
                .collect();
            warn!(
                "Tool request exceeds history capacity, keeping {} call(s), dropping: {}",
                limit,
                dropped.join(", ")
            );
        }
        self.push(Message::assistant(text, tool_calls.clone()));
        tool_calls
    }

    /// Most tool calls one request may carry: the request plus one result
    /// per call must fit in the history.
    pub fn max_tool_calls(&self) -> usize {
        self.capacity().saturating_sub(1).max(1)
    }

    pub fn append_tool(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            self.push(Message::tool(EMPTY_TOOL_OUTPUT));
        } else {
            self.push(Message::tool(text));
        }
    }

    /// Drop the history; keep the system prompt only if asked to.
    pub fn clear(&mut self, keep_system: bool) {
        self.history.clear();
        if !keep_system {
            self.system = None;
        }
        debug!("Context cleared (keep_system={})", keep_system);
    }

    /// Stored log: system prompt first, then history. No memory snapshot.
    pub fn messages(&self) -> Vec<Message> {
        self.system.iter().chain(self.history.iter()).cloned().collect()
    }

    pub fn len(&self) -> usize {
        usize::from(self.system.is_some()) + self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> ContextStats {
        let mut stats = ContextStats {
            max_history_length: self.max_history_length,
            ..ContextStats::default()
        };
        for message in self.system.iter().chain(self.history.iter()) {
            stats.total += 1;
            match message.role {
                Role::System => stats.system += 1,
                Role::User => stats.user += 1,
                Role::Assistant => stats.assistant += 1,
                Role::Tool => stats.tool += 1,
            }
        }
        stats
    }

    /// Outbound window: system prompt, fresh memory snapshot, retained history.
    pub fn current_window(&mut self, memory: &MemoryRecord) -> Vec<Message> {
        self.enforce_retention();

        let mut window = Vec::with_capacity(self.pinned_len() + self.history.len());
        if let Some(system) = &self.system {
            window.push(system.clone());
        }
        if self.inject_memory {
            window.push(memory_message(memory));
        }
        window.extend(self.history.iter().cloned());
        window
    }

    /// Remove a trailing assistant tool request whose results never arrived.
    ///
    /// Returns the number of messages removed.
    pub fn discard_dangling_tool_calls(&mut self) -> usize {
        let Some(start) = self.history.iter().rposition(|m| m.role != Role::Tool) else {
            return 0;
        };
        let request = &self.history[start];
        if !request.requests_tools() {
            return 0;
        }

        let answered = self.history.len() - start - 1;
        if answered >= request.tool_calls.len() {
            return 0;
        }

        let removed = self.history.len() - start;
        warn!(
            "Discarding assistant tool request with {} of {} results",
            answered,
            request.tool_calls.len()
        );
        self.history.truncate(start);
        removed
    }

    pub fn export(&self, model: impl Into<String>) -> ContextSnapshot {
        ContextSnapshot {
            model: model.into(),
            messages: self.messages(),
            exported_at: Utc::now(),
        }
    }

    /// Replace the log with `snapshot`.
    ///
    /// A leading system message becomes the system prompt. Other system
    /// messages, orphan tool results, incomplete tool units and tool units
    /// too large for the history are dropped.
    /// Returns the number of messages kept.
    pub fn import(&mut self, snapshot: ContextSnapshot) -> usize {
        let mut messages = snapshot.messages.into_iter().peekable();

        if let Some(system) = messages.next_if(|first| first.role == Role::System) {
            self.system = Some(system);
        }

        let capacity = self.capacity();
        let mut history: Vec<Message> = Vec::new();
        let mut pending: Option<(Message, Vec<Message>)> = None;
        let mut dropped = 0usize;

        for message in messages {
            match message.role {
                Role::System => dropped += 1,
                Role::Tool => match pending.as_mut() {
                    Some((request, results)) if results.len() < request.tool_calls.len() => {
                        results.push(message)
                    }
                    _ => dropped += 1,
                },
                _ => {
                    dropped += flush_unit(&mut history, pending.take(), capacity);
                    if message.requests_tools() {
                        pending = Some((message, Vec::new()));
                    } else {
                        history.push(message);
                    }
                }
            }
        }
        dropped += flush_unit(&mut history, pending.take(), capacity);

        if dropped > 0 {
            warn!("Dropped {} messages that broke tool pairing on import", dropped);
        }

        self.history = history;
        self.enforce_retention();
        self.len()
    }

    fn push(&mut self, message: Message) {
        self.history.push(message);
        self.enforce_retention();
    }

    fn pinned_len(&self) -> usize {
        usize::from(self.system.is_some()) + usize::from(self.inject_memory)
    }

    fn capacity(&self) -> usize {
        self.max_history_length.saturating_sub(self.pinned_len())
    }

    /// Evict whole units from the front until the history fits.
    fn enforce_retention(&mut self) {
        let capacity = self.capacity();
        if self.history.len() <= capacity {
            return;
        }

        let starts = unit_starts(&self.history);
        let mut cut = 0;
        for &start in starts.iter().skip(1) {
            cut = start;
            if self.history.len() - start <= capacity {
                break;
            }
        }

        if self.history.len() - cut > capacity {
            warn!(
                "Newest exchange of {} messages exceeds history capacity {}",
                self.history.len() - cut,
                capacity
            );
        }

        if cut > 0 {
            self.history.drain(..cut);
            debug!("Evicted {} messages from context", cut);
            crate::metrics::increment_context_evictions(cut as u64);
        }
    }
}

/// Indices where a retention unit begins.
fn unit_starts(history: &[Message]) -> Vec<usize> {
    history
        .iter()
        .enumerate()
        .filter(|(index, message)| {
            message.role != Role::Tool
                || *index == 0
                || !history[..*index]
                    .iter()
                    .rev()
                    .find(|m| m.role != Role::Tool)
                    .map(Message::requests_tools)
                    .unwrap_or(false)
        })
        .map(|(index, _)| index)
        .collect()
}

fn flush_unit(
    history: &mut Vec<Message>,
    unit: Option<(Message, Vec<Message>)>,
    capacity: usize,
) -> usize {
    match unit {
        Some((request, results))
            if results.len() == request.tool_calls.len() && results.len() < capacity =>
        {
            history.push(request);
            history.extend(results);
            0
        }
        Some((_, results)) => 1 + results.len(),
        None => 0,
    }
}

fn memory_message(memory: &MemoryRecord) -> Message {
    Message::system(format!("{} {}", MEMORY_PREAMBLE, memory.to_prompt_json()))
}
