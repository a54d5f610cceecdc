//! Interactive session loop.

use crate::commands::{self, Command, HELP};
use anyhow::{Context, Result};
use secretary_runtime::providers::Message;
use secretary_runtime::{ContextSnapshot, SessionDriver, TurnOutcome};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct Repl {
    driver: SessionDriver,
}

impl Repl {
    pub fn new(driver: SessionDriver) -> Self {
        Self { driver }
    }

    pub async fn run(mut self) -> Result<()> {
        println!("Secretary ({}). Type 'help' for commands.", self.driver.model());
        println!();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            print!("> ");
            std::io::stdout().flush()?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else {
                break;
            };
            let Some(command) = commands::parse(&line) else {
                continue;
            };

            match command {
                Command::Exit => break,
                Command::Help => println!("{}\n", HELP),
                Command::Show => self.show(),
                Command::Context => println!("{}\n", self.driver.context().stats()),
                Command::Clear { keep_system } => {
                    self.driver.context_mut().clear(keep_system);
                    println!("Context cleared.\n");
                }
                Command::Export(path) => {
                    if let Err(e) = self.export(path.as_deref()).await {
                        eprintln!("Export failed: {:#}\n", e);
                    }
                }
                Command::Import(path) => match self.import(&path).await {
                    Ok(count) => println!("Imported {} messages.\n", count),
                    Err(e) => eprintln!("Import failed: {:#}\n", e),
                },
                Command::System(text) => {
                    self.driver.context_mut().set_system_prompt(text);
                    println!("System prompt replaced.\n");
                }
                Command::Memory => {
                    let record = self.driver.memory().snapshot();
                    println!("{}\n", serde_json::to_string_pretty(&record)?);
                }
                Command::Say(text) => self.turn(&text).await,
            }
        }

        let pending = self.driver.flush_summaries().await;
        if !pending.is_empty() {
            tracing::debug!("Flushed {} pending summaries", pending.len());
        }
        println!("Goodbye.");
        Ok(())
    }

    async fn turn(&mut self, text: &str) {
        let cancel = CancellationToken::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };

        let result = self.driver.run_turn_with_cancel(text, &cancel).await;
        watcher.abort();

        match result {
            Ok(TurnOutcome::Completed { text, .. }) => println!("{}\n", text),
            Ok(TurnOutcome::MaxIterationsExceeded { partial_text, iterations }) => {
                if !partial_text.is_empty() {
                    println!("{}", partial_text);
                }
                eprintln!("Stopped after {} tool rounds without a final answer.\n", iterations);
            }
            Ok(TurnOutcome::Cancelled { .. }) => eprintln!("Cancelled.\n"),
            Err(e) => {
                warn!("Turn failed: {}", e);
                eprintln!("Error: {}\n", e);
            }
        }
    }

    fn show(&self) {
        for message in self.driver.context().messages() {
            println!("{}", render(&message));
        }
        println!();
    }

    async fn export(&self, path: Option<&std::path::Path>) -> Result<()> {
        let snapshot = self.driver.export_context();
        let json = serde_json::to_string_pretty(&snapshot)?;
        match path {
            Some(path) => {
                tokio::fs::write(path, json)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("Exported {} messages to {}.\n", snapshot.messages.len(), path.display());
            }
            None => println!("{}\n", json),
        }
        Ok(())
    }

    async fn import(&mut self, path: &std::path::Path) -> Result<usize> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let snapshot: ContextSnapshot =
            serde_json::from_str(&content).context("Not a conversation export")?;
        Ok(self.driver.import_context(snapshot))
    }
}

/// One-line rendering of a message for `show`.
pub fn render(message: &Message) -> String {
    let mut line = format!("[{}] {}", message.role.as_str(), message.content);
    if !message.tool_calls.is_empty() {
        let calls: Vec<String> = message
            .tool_calls
            .iter()
            .map(|call| format!("{}({})", call.name, call.arguments))
            .collect();
        line.push_str(&format!(" -> {}", calls.join(", ")));
    }
    line
}
