//! Core audit types
//!
//! All types use camelCase JSON serialization so they render the same way in
//! structured log sinks as they do on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// How a message was delivered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageIntent {
    /// Point-to-point send
    #[default]
    Send,
    /// Publish to all subscribers
    Publish,
    /// Subscription request
    Subscribe,
    /// Unsubscription request
    Unsubscribe,
    /// Reply to the sender of the current message
    Reply,
}

impl fmt::Display for MessageIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageIntent::Send => write!(f, "Send"),
            MessageIntent::Publish => write!(f, "Publish"),
            MessageIntent::Subscribe => write!(f, "Subscribe"),
            MessageIntent::Unsubscribe => write!(f, "Unsubscribe"),
            MessageIntent::Reply => write!(f, "Reply"),
        }
    }
}

impl FromStr for MessageIntent {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "send" => Ok(MessageIntent::Send),
            "publish" => Ok(MessageIntent::Publish),
            "subscribe" => Ok(MessageIntent::Subscribe),
            "unsubscribe" => Ok(MessageIntent::Unsubscribe),
            "reply" => Ok(MessageIntent::Reply),
            _ => Err(format!("Unknown message intent: {}", s)),
        }
    }
}

/// Human-readable label for what happened to a saga during one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateChange {
    /// The saga instance was created by this message
    New,
    /// An existing saga instance was updated
    Updated,
    /// The saga was marked complete
    Completed,
}

impl StateChange {
    /// Label as written into the correlation header
    pub fn as_str(&self) -> &'static str {
        match self {
            StateChange::New => "New",
            StateChange::Updated => "Updated",
            StateChange::Completed => "Completed",
        }
    }
}

impl fmt::Display for StateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The inbound message that caused a saga state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaChangeInitiator {
    /// Whether the message was a scheduled saga timeout
    pub is_saga_timeout_message: bool,

    /// Id of the inbound message
    pub initiating_message_id: String,

    /// Machine the message was sent from, if the header was present
    pub originating_machine: Option<String>,

    /// Endpoint the message was sent from, if the header was present
    pub originating_endpoint: Option<String>,

    /// Fully qualified message type name
    pub message_type: String,

    /// When the sender dispatched the message
    pub time_sent: Option<DateTime<Utc>>,

    /// Delivery intent of the inbound message
    pub intent: MessageIntent,
}

/// An outbound message produced by a saga invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaChangeOutput {
    /// Fully qualified message type name
    pub message_type: String,

    /// Id assigned to the outgoing message
    pub message_id: String,

    /// When the message was handed to the bus
    pub time_sent: DateTime<Utc>,

    /// Delivery intent
    pub intent: MessageIntent,

    /// Explicit destination, `None` for publishes and local sends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

/// Per-invocation audit record for a saga
///
/// Created with only a start time before the handler runs and filled in
/// afterwards. Lives in the invocation context until it is logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Runtime type name of the saga
    pub saga_type: String,

    /// Saga entity id
    pub saga_id: Uuid,

    /// When the invocation started (UTC)
    pub start_time: DateTime<Utc>,

    /// When the invocation finished (UTC)
    pub finish_time: DateTime<Utc>,

    /// Saga instance was created by this invocation
    pub is_new: bool,

    /// Saga was marked complete by this invocation
    pub is_completed: bool,

    /// Inbound message that caused the change
    pub initiator: Option<SagaChangeInitiator>,

    /// Messages emitted while handling
    #[serde(default)]
    pub resulting_messages: Vec<SagaChangeOutput>,
}

impl AuditRecord {
    /// Start a record at the given instant
    pub fn started_at(start_time: DateTime<Utc>) -> Self {
        Self {
            saga_type: String::new(),
            saga_id: Uuid::nil(),
            start_time,
            finish_time: start_time,
            is_new: false,
            is_completed: false,
            initiator: None,
            resulting_messages: Vec::new(),
        }
    }

    /// Start a record now
    pub fn start() -> Self {
        Self::started_at(Utc::now())
    }

    /// Label for this record's state transition
    ///
    /// Completed wins over New, New wins over the Updated default.
    pub fn state_change(&self) -> StateChange {
        let mut change = StateChange::Updated;
        if self.is_new {
            change = StateChange::New;
        }
        if self.is_completed {
            change = StateChange::Completed;
        }
        change
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_change_priority() {
        let mut record = AuditRecord::start();
        assert_eq!(record.state_change(), StateChange::Updated);

        record.is_new = true;
        assert_eq!(record.state_change(), StateChange::New);

        record.is_completed = true;
        assert_eq!(record.state_change(), StateChange::Completed);

        record.is_new = false;
        assert_eq!(record.state_change(), StateChange::Completed);
    }

    #[test]
    fn test_state_change_display() {
        assert_eq!(StateChange::New.to_string(), "New");
        assert_eq!(StateChange::Updated.to_string(), "Updated");
        assert_eq!(StateChange::Completed.to_string(), "Completed");
    }

    #[test]
    fn test_message_intent_parse() {
        assert_eq!("Send".parse::<MessageIntent>().unwrap(), MessageIntent::Send);
        assert_eq!("publish".parse::<MessageIntent>().unwrap(), MessageIntent::Publish);
        assert_eq!("REPLY".parse::<MessageIntent>().unwrap(), MessageIntent::Reply);
        assert!("broadcast".parse::<MessageIntent>().is_err());
        assert_eq!(MessageIntent::default(), MessageIntent::Send);
    }

    #[test]
    fn test_started_record_defaults() {
        let record = AuditRecord::start();
        assert!(record.saga_type.is_empty());
        assert!(record.saga_id.is_nil());
        assert_eq!(record.start_time, record.finish_time);
        assert!(record.initiator.is_none());
        assert!(record.resulting_messages.is_empty());
    }

    #[test]
    fn test_initiator_serialization() {
        let initiator = SagaChangeInitiator {
            is_saga_timeout_message: false,
            initiating_message_id: "msg-1".to_string(),
            originating_machine: Some("host-a".to_string()),
            originating_endpoint: None,
            message_type: "sample::CreateUser".to_string(),
            time_sent: None,
            intent: MessageIntent::Send,
        };

        let json = serde_json::to_string(&initiator).unwrap();
        assert!(json.contains("\"initiatingMessageId\":\"msg-1\""));
        assert!(json.contains("\"originatingMachine\":\"host-a\""));
        assert!(json.contains("\"originatingEndpoint\":null"));
        assert!(json.contains("\"intent\":\"Send\""));
    }

    #[test]
    fn test_output_skips_missing_destination() {
        let output = SagaChangeOutput {
            message_type: "sample::UserCreated".to_string(),
            message_id: "msg-2".to_string(),
            time_sent: Utc::now(),
            intent: MessageIntent::Publish,
            destination: None,
        };

        let json = serde_json::to_string(&output).unwrap();
        assert!(!json.contains("destination"));
        assert!(json.contains("\"messageType\":\"sample::UserCreated\""));
    }
}
