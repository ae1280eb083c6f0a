//! Command parsing for the interactive shell.
//!
//! Turns text lines such as `write color dark blue` into [`ShellCommand`]s. The
//! shell is a thin layer over [`crate::Cluster`]; nothing here touches the nodes.

use anyhow::{Result, anyhow};

/// Commands accepted at the shell prompt.
#[derive(Debug, PartialEq)]
pub enum ShellCommand {
    Write { key: String, value: String },
    Read { key: String },
    Delete { key: String },
    Show,
    Logs { json: bool },
    Status,
    Help,
    Exit,
}

pub const USAGE: &str = "commands: write/w <key> <value>, read/r <key>, delete/d <key>, \
show/s, logs/l [--json], status, help/h, exit/e";

impl ShellCommand {
    /// Parses one line of input.
    ///
    /// # Syntax
    /// Command words are case-insensitive; keys and values are kept as typed.
    /// - `write <key> <value...>` (alias: `w`) - everything after the key is the value
    /// - `read <key>` (alias: `r`)
    /// - `delete <key>` (alias: `d`)
    /// - `show` (alias: `s`) - store snapshot from a random replica
    /// - `logs [--json]` (alias: `l`) - the master's log
    /// - `status` - up/down state of every node
    /// - `help` (alias: `h`)
    /// - `exit` (aliases: `e`, `quit`)
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = parts.first() else {
            return Err(anyhow!("empty command"));
        };

        let cmd = first.to_lowercase();
        let normalized = match cmd.as_str() {
            "w" => "write",
            "r" => "read",
            "d" | "del" => "delete",
            "s" => "show",
            "l" => "logs",
            "h" | "?" => "help",
            "e" | "quit" | "q" => "exit",
            other => other,
        };

        match (normalized, parts.len()) {
            ("exit", 1) => Ok(ShellCommand::Exit),
            ("help", 1) => Ok(ShellCommand::Help),
            ("show", 1) => Ok(ShellCommand::Show),
            ("status", 1) => Ok(ShellCommand::Status),
            ("logs", 1) => Ok(ShellCommand::Logs { json: false }),
            ("logs", 2) if parts[1] == "--json" => Ok(ShellCommand::Logs { json: true }),
            ("read", 2) => Ok(ShellCommand::Read {
                key: parts[1].to_string(),
            }),
            ("delete", 2) => Ok(ShellCommand::Delete {
                key: parts[1].to_string(),
            }),
            ("write", n) if n >= 3 => Ok(ShellCommand::Write {
                key: parts[1].to_string(),
                value: parts[2..].join(" "),
            }),
            ("read", _) => Err(anyhow!("usage: read <key>")),
            ("delete", _) => Err(anyhow!("usage: delete <key>")),
            ("write", _) => Err(anyhow!("usage: write <key> <value>")),
            ("logs", _) => Err(anyhow!("usage: logs [--json]")),
            ("exit" | "help" | "show" | "status", _) => {
                Err(anyhow!("{normalized} takes no arguments"))
            }
            _ => Err(anyhow!("unknown command. {USAGE}")),
        }
    }
}
