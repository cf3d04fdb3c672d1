//! Structural checks on transformation scripts.
//!
//! A script is one JSON object per line, each naming an operation in `"op"`,
//! for example `{"op":"remove","match":{"file":"stops.txt","stop_id":"S1"}}`.
//! Blank lines and lines starting with `#` are ignored. What the operations do
//! is up to the external transformer; here they are only validated so a
//! malformed script fails before any feed is unpacked.

use std::path::Path;

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("line {line}: not a JSON object: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("line {line}: missing \"op\"")]
    MissingOp { line: usize },
    #[error("script contains no operations")]
    Empty,
    #[error("failed to read script: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub line: usize,
    pub op: String,
    pub args: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformScript {
    commands: Vec<Command>,
}

impl TransformScript {
    pub fn parse(text: &str) -> Result<Self, ScriptError> {
        let mut commands = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim().trim_start_matches('\u{feff}');
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let value: Value =
                serde_json::from_str(trimmed).map_err(|e| ScriptError::Malformed {
                    line,
                    reason: e.to_string(),
                })?;
            let Value::Object(mut args) = value else {
                return Err(ScriptError::Malformed {
                    line,
                    reason: "expected an object".to_string(),
                });
            };
            let op = match args.remove("op") {
                Some(Value::String(op)) if !op.trim().is_empty() => op,
                _ => return Err(ScriptError::MissingOp { line }),
            };
            commands.push(Command { line, op, args });
        }
        if commands.is_empty() {
            return Err(ScriptError::Empty);
        }
        Ok(Self { commands })
    }

    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn ops(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().map(|c| c.op.as_str())
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
