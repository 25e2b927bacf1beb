//! Typed model of decrypted event payloads.
//!
//! Only `event_callback` envelopes wrapping a recognized chat event are
//! actionable; everything else (unknown outer type, unknown event type,
//! bot echoes, edited-message subtypes) is a silent no-op.

use serde::Deserialize;

/// Outer discriminated envelope of a decrypted payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum InboundPayload {
    #[serde(rename = "event_callback")]
    EventCallback {
        #[serde(default)]
        event: Option<ChatEvent>,
    },
    #[serde(other)]
    Unrecognized,
}

/// Inner chat event. Fields are optional at the wire level; classification
/// requires the ones it needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub channel_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionableKind {
    Mention,
    DirectMessage,
}

/// A chat event that passed classification and is eligible for policy
/// checks and agent forwarding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionableEvent {
    pub kind: ActionableKind,
    pub user: String,
    pub channel: String,
    pub ts: String,
    pub thread_ts: Option<String>,
    pub text: String,
}

/// Classify a decrypted payload. Returns `None` for every non-actionable
/// shape: that is a successfully-processed no-op, not an error.
pub fn classify(payload: &InboundPayload) -> Option<ActionableEvent> {
    let InboundPayload::EventCallback { event: Some(event) } = payload else {
        return None;
    };

    let kind = match event.kind.as_str() {
        "app_mention" => ActionableKind::Mention,
        // Only direct messages count; channel traffic arrives as mentions.
        // Bot echoes and subtyped messages (edits, joins) are never actionable.
        "message"
            if event.channel_type.as_deref() == Some("im")
                && event.bot_id.is_none()
                && event.subtype.is_none() =>
        {
            ActionableKind::DirectMessage
        }
        _ => return None,
    };

    Some(ActionableEvent {
        kind,
        user: event.user.clone()?,
        channel: event.channel.clone()?,
        ts: event.ts.clone()?,
        thread_ts: event.thread_ts.clone(),
        text: event.text.clone()?,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn parse(value: serde_json::Value) -> InboundPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn app_mention_is_actionable() {
        let payload = parse(json!({
            "type": "event_callback",
            "event": {
                "type": "app_mention",
                "user": "U1",
                "channel": "C1",
                "ts": "1700000000.000100",
                "text": "<@bot> hello"
            }
        }));
        let event = classify(&payload).unwrap();
        assert_eq!(event.kind, ActionableKind::Mention);
        assert_eq!(event.user, "U1");
        assert_eq!(event.text, "<@bot> hello");
    }

    #[test]
    fn direct_message_is_actionable() {
        let payload = parse(json!({
            "type": "event_callback",
            "event": {
                "type": "message",
                "channel_type": "im",
                "user": "U1",
                "channel": "D1",
                "ts": "1700000000.000200",
                "text": "hi"
            }
        }));
        let event = classify(&payload).unwrap();
        assert_eq!(event.kind, ActionableKind::DirectMessage);
    }

    #[test]
    fn bot_message_is_not_actionable() {
        let payload = parse(json!({
            "type": "event_callback",
            "event": {
                "type": "message",
                "channel_type": "im",
                "bot_id": "B1",
                "user": "U1",
                "channel": "D1",
                "ts": "1",
                "text": "loop"
            }
        }));
        assert!(classify(&payload).is_none());
    }

    #[test]
    fn subtyped_message_is_not_actionable() {
        let payload = parse(json!({
            "type": "event_callback",
            "event": {
                "type": "message",
                "channel_type": "im",
                "subtype": "message_changed",
                "user": "U1",
                "channel": "D1",
                "ts": "1",
                "text": "edited"
            }
        }));
        assert!(classify(&payload).is_none());
    }

    #[test]
    fn channel_message_without_mention_is_not_actionable() {
        let payload = parse(json!({
            "type": "event_callback",
            "event": {
                "type": "message",
                "channel_type": "channel",
                "user": "U1",
                "channel": "C1",
                "ts": "1",
                "text": "chatter"
            }
        }));
        assert!(classify(&payload).is_none());
    }

    #[test]
    fn unknown_outer_type_parses_as_unrecognized() {
        let payload = parse(json!({"type": "url_verification", "challenge": "x"}));
        assert!(matches!(payload, InboundPayload::Unrecognized));
        assert!(classify(&payload).is_none());
    }

    #[test]
    fn event_callback_without_event_is_noop() {
        let payload = parse(json!({"type": "event_callback"}));
        assert!(classify(&payload).is_none());
    }

    #[test]
    fn missing_required_field_is_noop() {
        let payload = parse(json!({
            "type": "event_callback",
            "event": {"type": "app_mention", "channel": "C1", "ts": "1", "text": "hi"}
        }));
        assert!(classify(&payload).is_none());
    }
}
