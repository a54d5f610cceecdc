//! REPL command parsing.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Help,
    /// Print the stored conversation.
    Show,
    /// Print message counts.
    Context,
    Clear { keep_system: bool },
    /// Export to a file, or to stdout when no path is given.
    Export(Option<PathBuf>),
    Import(PathBuf),
    System(String),
    Memory,
    /// Anything else is a message for the model.
    Say(String),
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse(input: &str) -> Option<Command> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let (head, rest) = match input.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (input, ""),
    };

    let command = match (head.to_lowercase().as_str(), rest) {
        ("exit" | "quit", "") => Command::Exit,
        ("help", "") => Command::Help,
        ("show", "") => Command::Show,
        ("context", "") => Command::Context,
        ("clear", "") => Command::Clear { keep_system: true },
        ("clear", "all") => Command::Clear { keep_system: false },
        ("export", "") => Command::Export(None),
        ("export", path) => Command::Export(Some(PathBuf::from(path))),
        ("import", path) if !path.is_empty() => Command::Import(PathBuf::from(path)),
        ("system", text) if !text.is_empty() => Command::System(text.to_string()),
        ("memory", "") => Command::Memory,
        _ => Command::Say(input.to_string()),
    };
    Some(command)
}

pub const HELP: &str = "\
Commands:
  show              print the conversation
  context           message counts per role
  clear [all]       clear history (all: drop the system prompt too)
  export [path]     export the conversation as JSON
  import <path>     replace the conversation with an export
  system <text>     replace the system prompt
  memory            print long-term memory
  exit, quit        leave
Anything else is sent to the model. Ctrl-C cancels a running turn.";
