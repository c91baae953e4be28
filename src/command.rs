use serde::Deserialize;

use crate::model::{EntityId, EntityKind, Row};

/// One line of driver input, e.g. `{"op":"period","value":"2024-02"}`.
#[derive(Debug, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    /// Write a row to the backend; listeners see an insert or update.
    Upsert { row: Row },
    Delete { kind: EntityKind, id: EntityId },
    /// Move the window. A missing value selects the current month.
    Period {
        #[serde(default)]
        value: Option<String>,
    },
    View,
}

#[derive(Debug, PartialEq)]
pub enum CommandError {
    Empty,
    Parse(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Empty => write!(f, "empty command"),
            CommandError::Parse(s) => write!(f, "parse error: {s}"),
        }
    }
}

impl std::error::Error for CommandError {}

pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(CommandError::Empty);
    }
    serde_json::from_str(trimmed).map_err(|e| CommandError::Parse(e.to_string()))
}
