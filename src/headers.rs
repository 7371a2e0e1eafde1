//! Well-known message header names
//!
//! Headers are plain string key/value pairs carried with every message.

/// Unique id of the message
pub const MESSAGE_ID: &str = "MessageId";

/// Machine that sent the message
pub const ORIGINATING_MACHINE: &str = "OriginatingMachine";

/// Endpoint that sent the message
pub const ORIGINATING_ENDPOINT: &str = "OriginatingEndpoint";

/// Delivery intent (`Send`, `Publish`, `Reply`, ...)
pub const MESSAGE_INTENT: &str = "MessageIntent";

/// RFC 3339 timestamp of when the message was sent
pub const TIME_SENT: &str = "TimeSent";

/// `true` when the message is a scheduled saga timeout
pub const IS_SAGA_TIMEOUT_MESSAGE: &str = "IsSagaTimeoutMessage";

/// Accumulated `<sagaId>:<label>` entries for the current conversation
pub const SAGA_STATE_CHANGE: &str = "SagaStateChange";

/// Address replies to the current message should be sent to
pub const REPLY_TO_ADDRESS: &str = "ReplyToAddress";

/// Fully qualified type name of the message body
pub const ENCLOSED_MESSAGE_TYPES: &str = "EnclosedMessageTypes";

/// Append one `<saga_id>:<label>` entry to an existing correlation value
///
/// Entries are separated by `;`. Neither part is escaped, so ids or labels
/// containing `;` or `:` produce an ambiguous value.
pub fn append_state_change(existing: Option<&str>, saga_id: &str, label: &str) -> String {
    let mut value = existing.unwrap_or_default().to_string();
    if !value.is_empty() {
        value.push(';');
    }
    value.push_str(saga_id);
    value.push(':');
    value.push_str(label);
    value
}

/// Split a correlation value back into `(saga_id, label)` pairs
///
/// Splits each entry on its last `:`. Malformed entries are skipped.
pub fn parse_state_changes(value: &str) -> Vec<(&str, &str)> {
    value
        .split(';')
        .filter_map(|entry| entry.rsplit_once(':'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_to_empty() {
        assert_eq!(append_state_change(None, "abc", "New"), "abc:New");
        assert_eq!(append_state_change(Some(""), "abc", "New"), "abc:New");
    }

    #[test]
    fn test_append_accumulates() {
        assert_eq!(
            append_state_change(Some("abc:Updated"), "xyz", "New"),
            "abc:Updated;xyz:New"
        );
    }

    #[test]
    fn test_parse_state_changes() {
        let parsed = parse_state_changes("abc:Updated;xyz:New;broken");
        assert_eq!(parsed, vec![("abc", "Updated"), ("xyz", "New")]);
        assert!(parse_state_changes("").is_empty());
    }
}
