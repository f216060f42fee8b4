use crate::Result;
use chrono::{DateTime, Utc};
use core::fmt;
use serde::{Deserialize, Serialize};

/// What happened to the subject of a [`ChangeEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Issue,
    CreateReturn,
    UpdateReturn,
    DeleteReturn,
    ProcessReturn,
    /// An expired order was converted into a return.
    Return,
    /// A structured error report.
    Error,
    /// Any tag this build does not know.
    #[serde(other)]
    Unknown,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Issue => "issue",
            Operation::CreateReturn => "create_return",
            Operation::UpdateReturn => "update_return",
            Operation::DeleteReturn => "delete_return",
            Operation::ProcessReturn => "process_return",
            Operation::Return => "return",
            Operation::Error => "error",
            Operation::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A committed change, published after the mutation it describes.
///
/// Consumers must tolerate redelivery of the same event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    pub subject_id: i64,
    pub description: String,
}

impl ChangeEvent {
    pub fn new(operation: Operation, subject_id: i64, description: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            subject_id,
            description: description.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_operation_tags_decode_as_unknown() {
        let payload = br#"{"timestamp":"2024-05-01T10:00:00Z","operation":"archive","subject_id":4,"description":"?"}"#;
        let event = ChangeEvent::decode(payload).expect("decode");
        assert_eq!(event.operation, Operation::Unknown);
        assert_eq!(event.subject_id, 4);
    }

    #[test]
    fn operation_tags_are_snake_case() {
        let event = ChangeEvent::new(Operation::CreateReturn, 1, "Return created for order 1");
        let json = String::from_utf8(event.encode().expect("encode")).expect("utf8");
        assert!(json.contains(r#""operation":"create_return""#), "{json}");
    }
}
