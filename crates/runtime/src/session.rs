//! Session driver - the turn loop.
//!
//! One turn runs `AwaitingModel -> ClassifyingOutput -> {Done | ExecutingTools}`
//! and loops back to `AwaitingModel` after every tool round, at most
//! `max_iterations` model rounds per turn. Within a session everything is
//! sequential: one model request at a time, tools one after another in the
//! order the model listed them.

use crate::config::{SessionConfig, SummarizeMode};
use crate::context::{ContextSnapshot, ContextStore};
use crate::error::RuntimeError;
use crate::metrics::{self, MetricTimer};
use crate::summarizer::{SummaryOutcome, TurnSummarizer};
use futures_util::StreamExt;
use secretary_memory::SharedMemory;
use secretary_providers::{ChatRequest, FragmentStream, ModelEndpoint, ProviderError, ToolCall};
use secretary_tools::ToolRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where the driver currently is within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    AwaitingModel,
    ClassifyingOutput,
    ExecutingTools,
    Done,
    Terminated,
}

/// How a turn ended, short of an endpoint failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model produced a final answer.
    Completed { text: String, tools_used: Vec<String> },
    /// The round limit was hit while the model still wanted tools.
    MaxIterationsExceeded { partial_text: String, iterations: usize },
    /// The caller cancelled the turn before it completed.
    Cancelled { partial_text: String },
}

impl TurnOutcome {
    /// Final text, or the best partial text available.
    pub fn text(&self) -> &str {
        match self {
            TurnOutcome::Completed { text, .. } => text,
            TurnOutcome::MaxIterationsExceeded { partial_text, .. } => partial_text,
            TurnOutcome::Cancelled { partial_text } => partial_text,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TurnOutcome::Completed { .. })
    }
}

#[derive(Debug, Default)]
struct ModelReply {
    text: String,
    tool_calls: Vec<ToolCall>,
}

pub struct SessionDriver {
    endpoint: Arc<dyn ModelEndpoint>,
    tools: Arc<ToolRegistry>,
    context: ContextStore,
    memory: Arc<SharedMemory>,
    summarizer: Option<Arc<TurnSummarizer>>,
    summarize_mode: SummarizeMode,
    pending_summaries: Vec<JoinHandle<SummaryOutcome>>,
    model: String,
    max_iterations: usize,
    endpoint_timeout: Duration,
    max_retries: u32,
    state: TurnState,
}

impl SessionDriver {
    /// Create a driver with a fresh context seeded with the configured prompt.
    pub fn new(
        config: &SessionConfig,
        endpoint: Arc<dyn ModelEndpoint>,
        tools: Arc<ToolRegistry>,
        memory: Arc<SharedMemory>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;

        let mut context = ContextStore::new(config.max_history_length, config.inject_memory);
        if let Some(prompt) = &config.system_prompt {
            context.set_system_prompt(prompt.clone());
        }

        Ok(Self {
            endpoint,
            tools,
            context,
            memory,
            summarizer: None,
            summarize_mode: config.summarize,
            pending_summaries: Vec::new(),
            model: config.model.clone(),
            max_iterations: config.max_iterations,
            endpoint_timeout: Duration::from_secs(config.endpoint_timeout_secs),
            max_retries: config.max_retries,
            state: TurnState::Idle,
        })
    }

    pub fn with_summarizer(mut self, summarizer: Arc<TurnSummarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Override the per-read endpoint timeout.
    pub fn with_endpoint_timeout(mut self, timeout: Duration) -> Self {
        self.endpoint_timeout = timeout;
        self
    }

    pub fn context(&self) -> &ContextStore {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ContextStore {
        &mut self.context
    }

    pub fn memory(&self) -> &Arc<SharedMemory> {
        &self.memory
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn export_context(&self) -> ContextSnapshot {
        self.context.export(self.model.clone())
    }

    pub fn import_context(&mut self, snapshot: ContextSnapshot) -> usize {
        self.context.import(snapshot)
    }

    /// Run one turn to completion.
    pub async fn run_turn(&mut self, user_text: &str) -> Result<TurnOutcome, RuntimeError> {
        self.run_turn_with_cancel(user_text, &CancellationToken::new())
            .await
    }

    /// Run one turn, stopping early if `cancel` fires.
    ///
    /// Cancellation is checked between state transitions. A model request in
    /// flight is abandoned; a running tool is allowed to finish, and every
    /// tool call not yet started gets a "cancelled" result so requests and
    /// results stay paired.
    ///
    /// # Errors
    /// Endpoint failures and timeouts abort the turn. Nothing from the
    /// failed round is committed to the context.
    pub async fn run_turn_with_cancel(
        &mut self,
        user_text: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, RuntimeError> {
        let _timer = MetricTimer::new(metrics::TURN_DURATION);

        self.context.discard_dangling_tool_calls();
        self.context.append_user(user_text);

        let mut partial_text = String::new();
        let mut tools_used: Vec<String> = Vec::new();

        for iteration in 0..self.max_iterations {
            if cancel.is_cancelled() {
                return Ok(self.cancelled(partial_text));
            }

            debug!(
                "Model round {}/{}",
                iteration + 1,
                self.max_iterations
            );
            self.state = TurnState::AwaitingModel;

            let memory = self.memory.snapshot();
            let request = ChatRequest {
                model: self.model.clone(),
                messages: self.context.current_window(&memory),
                tools: self.tools.schemas(),
                stream: true,
            };

            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                reply = self.request_reply(&request) => Some(reply),
            };
            let reply = match reply {
                None => return Ok(self.cancelled(partial_text)),
                Some(Ok(reply)) => reply,
                Some(Err(e)) => {
                    error!("Model call failed: {}", e);
                    self.state = TurnState::Terminated;
                    return Err(e);
                }
            };

            self.state = TurnState::ClassifyingOutput;

            if reply.tool_calls.is_empty() {
                self.context.append_assistant(reply.text.clone(), Vec::new());
                self.state = TurnState::Done;
                info!("Turn completed after {} model round(s)", iteration + 1);

                self.after_turn(user_text, &reply.text, &tools_used).await;
                return Ok(TurnOutcome::Completed {
                    text: reply.text,
                    tools_used,
                });
            }

            if !reply.text.trim().is_empty() {
                partial_text = reply.text.clone();
            }

            self.state = TurnState::ExecutingTools;
            info!("Model requested {} tool call(s)", reply.tool_calls.len());
            let tool_calls = self.context.append_assistant(reply.text, reply.tool_calls);

            if self
                .execute_tools(&tool_calls, cancel, &mut tools_used)
                .await
            {
                return Ok(self.cancelled(partial_text));
            }
        }

        self.state = TurnState::Terminated;
        warn!(
            "Max iterations ({}) exceeded without final response",
            self.max_iterations
        );
        metrics::increment_max_iterations_exceeded();

        Ok(TurnOutcome::MaxIterationsExceeded {
            partial_text,
            iterations: self.max_iterations,
        })
    }

    /// Wait for background summaries started by earlier turns.
    pub async fn flush_summaries(&mut self) -> Vec<SummaryOutcome> {
        let pending = std::mem::take(&mut self.pending_summaries);
        let mut outcomes = Vec::with_capacity(pending.len());
        for handle in pending {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!("Summary task failed: {}", e);
                    outcomes.push(SummaryOutcome::Skipped(format!("summary task failed: {}", e)));
                }
            }
        }
        outcomes
    }

    fn cancelled(&mut self, partial_text: String) -> TurnOutcome {
        info!("Turn cancelled");
        self.state = TurnState::Terminated;
        TurnOutcome::Cancelled { partial_text }
    }

    /// Execute tool calls in order. Returns `true` if cancelled part way.
    async fn execute_tools(
        &mut self,
        calls: &[ToolCall],
        cancel: &CancellationToken,
        tools_used: &mut Vec<String>,
    ) -> bool {
        for (position, call) in calls.iter().enumerate() {
            if cancel.is_cancelled() {
                let skipped = &calls[position..];
                warn!("Turn cancelled, skipping {} tool call(s)", skipped.len());
                for call in skipped {
                    self.context
                        .append_tool(format!("Tool {} was cancelled before it ran", call.name));
                }
                return true;
            }

            debug!(
                "Executing tool {} ({}/{})",
                call.name,
                position + 1,
                calls.len()
            );
            let result = {
                let _timer = MetricTimer::new(metrics::TOOL_EXECUTION_LATENCY);
                self.tools.invoke(&call.name, &call.arguments).await
            };

            let output = match result {
                Ok(output) => output,
                Err(e) => {
                    warn!("Tool call failed: {}", e);
                    metrics::increment_tool_failures();
                    e.to_string()
                }
            };

            if !tools_used.contains(&call.name) {
                tools_used.push(call.name.clone());
            }
            self.context.append_tool(output);
        }
        false
    }

    /// Send `request` and drain the reply stream.
    async fn request_reply(&self, request: &ChatRequest) -> Result<ModelReply, RuntimeError> {
        let _timer = MetricTimer::new(metrics::MODEL_REQUEST_LATENCY);
        let timeout_ms = u64::try_from(self.endpoint_timeout.as_millis()).unwrap_or(u64::MAX);

        let mut stream = self.open_stream(request).await?;
        let mut reply = ModelReply::default();

        loop {
            let next = tokio::time::timeout(self.endpoint_timeout, stream.next())
                .await
                .map_err(|_| RuntimeError::EndpointTimeout { timeout_ms })?;

            let Some(fragment) = next else {
                break;
            };
            let fragment = fragment?;

            if let Some(delta) = fragment.content_delta {
                reply.text.push_str(&delta);
            }
            // Last non-empty list wins; adapters emit cumulative lists.
            if let Some(calls) = fragment.tool_calls {
                if !calls.is_empty() {
                    reply.tool_calls = calls;
                }
            }
            if fragment.done {
                break;
            }
        }

        debug!(
            "Model reply: {} chars, {} tool call(s)",
            reply.text.len(),
            reply.tool_calls.len()
        );
        Ok(reply)
    }

    /// Open the reply stream, retrying transient failures with the same request.
    async fn open_stream(&self, request: &ChatRequest) -> Result<FragmentStream, RuntimeError> {
        let timeout_ms = u64::try_from(self.endpoint_timeout.as_millis()).unwrap_or(u64::MAX);
        let mut attempt = 0;

        loop {
            debug!(
                "Endpoint {} attempt {}/{}",
                self.endpoint.name(),
                attempt + 1,
                self.max_retries + 1
            );

            let result = tokio::time::timeout(self.endpoint_timeout, self.endpoint.chat(request))
                .await
                .map_err(|_| RuntimeError::EndpointTimeout { timeout_ms })?;

            match result {
                Ok(stream) => return Ok(stream),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = retry_delay(attempt, &e);
                    warn!("Endpoint request failed ({}), retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn after_turn(&mut self, user_text: &str, assistant_text: &str, tools_used: &[String]) {
        let Some(summarizer) = self.summarizer.clone() else {
            return;
        };

        match self.summarize_mode {
            SummarizeMode::Off => {}
            SummarizeMode::Inline => {
                let outcome = summarizer
                    .summarize(user_text, assistant_text, tools_used)
                    .await;
                debug!("Summary outcome: {:?}", outcome);
            }
            SummarizeMode::Background => {
                self.pending_summaries.retain(|handle| !handle.is_finished());

                let user_text = user_text.to_string();
                let assistant_text = assistant_text.to_string();
                let tools_used = tools_used.to_vec();
                self.pending_summaries.push(tokio::spawn(async move {
                    summarizer
                        .summarize(&user_text, &assistant_text, &tools_used)
                        .await
                }));
            }
        }
    }
}

fn retry_delay(attempt: u32, err: &ProviderError) -> Duration {
    if matches!(err, ProviderError::Status { status: 429, .. }) {
        return Duration::from_secs(2_u64.saturating_pow(attempt + 1).min(30));
    }
    Duration::from_millis(250_u64.saturating_mul(2_u64.saturating_pow(attempt)).min(5000))
}
