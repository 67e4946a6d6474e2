use serde::{Deserialize, Serialize};

use crate::types::{AgentInfo, MessageId, Priority};

/// Client -> daemon request (§6).
///
/// One connection per request; the connection carries exactly one of these,
/// terminated by `\n`. No request carries a correlation id — the transport
/// itself is the correlation (see §4.6: "one connection per request, not
/// persistent").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Enqueue a message for delivery, persisting its body to disk first.
    #[serde(rename = "send")]
    Send {
        priority: Priority,
        from: String,
        body: String,
    },

    #[serde(rename = "status")]
    Status {},

    #[serde(rename = "stop")]
    Stop {},

    /// Hook notification from the external hook handler (§6, GLOSSARY).
    #[serde(rename = "hook_event")]
    HookEvent {
        event_name: String,
        #[serde(default)]
        payload: serde_json::Value,
    },

    /// Upgrades the connection to a raw bidirectional byte stream (§4.8).
    #[serde(rename = "attach")]
    Attach {},

    /// Like `send` but bypasses file persistence — the enqueued message
    /// carries an empty `file_path` (§3, §4.6).
    #[serde(rename = "raw")]
    Raw {
        priority: Priority,
        from: String,
        body: String,
    },
}

/// Daemon -> client response (§6).
///
/// A flat struct rather than a tagged enum: the wire schema in §6 is a
/// single object shape with optional fields, not a family of named
/// response kinds. After an `attach` response with `ok: true`, the
/// connection stops carrying `Response` values and becomes a raw byte
/// relay in both directions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Default::default()
        }
    }

    pub fn ok_with_message_id(id: MessageId) -> Self {
        Self {
            ok: true,
            message_id: Some(id),
            ..Default::default()
        }
    }

    pub fn ok_with_agent(agent: AgentInfo) -> Self {
        Self {
            ok: true,
            agent: Some(agent),
            ..Default::default()
        }
    }

    pub fn err(code: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(code.into()),
            ..Default::default()
        }
    }
}

/// Hook event kinds the daemon recognizes (§6, GLOSSARY). Unknown names are
/// no-ops that are still logged, not rejected — §8 "boundary behaviors".
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HookEventName {
    SessionStart,
    UserPromptSubmit,
    PreToolUse,
    PostToolUse,
    PermissionRequest,
    #[serde(rename = "permission_decision")]
    PermissionDecision,
    Stop,
    #[serde(other)]
    Unknown,
}

impl HookEventName {
    pub fn parse(event_name: &str) -> Self {
        serde_json::from_value(serde_json::Value::String(event_name.to_string()))
            .unwrap_or(HookEventName::Unknown)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PreToolUsePayload {
    pub tool_name: String,
    pub tool_use_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PostToolUsePayload {
    pub tool_use_id: String,
    pub success: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PermissionRequestPayload {
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: serde_json::Value,
    pub session_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionDecision {
    Allow,
    Deny,
    AskUser,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PermissionDecisionPayload {
    pub tool_name: String,
    pub decision: PermissionDecision,
    #[serde(default)]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_send_roundtrip() {
        let msg = ClientMessage::Send {
            priority: Priority::Normal,
            from: "user".to_string(),
            body: "hello".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"send""#));
        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            ClientMessage::Send { priority, from, body } => {
                assert_eq!(priority, Priority::Normal);
                assert_eq!(from, "user");
                assert_eq!(body, "hello");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_client_message_wire_format_example() {
        let json = r#"{"type":"send","priority":"idle-first","from":"bridge","body":"ping"}"#;
        let parsed: ClientMessage = serde_json::from_str(json).unwrap();
        match parsed {
            ClientMessage::Send { priority, .. } => assert_eq!(priority, Priority::IdleFirst),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_client_message_hook_event_roundtrip() {
        let msg = ClientMessage::HookEvent {
            event_name: "PreToolUse".to_string(),
            payload: serde_json::json!({"tool_name": "Bash", "tool_use_id": "t1"}),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            ClientMessage::HookEvent { event_name, payload } => {
                assert_eq!(event_name, "PreToolUse");
                let p: PreToolUsePayload = serde_json::from_value(payload).unwrap();
                assert_eq!(p.tool_name, "Bash");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_client_message_attach_and_status_and_stop() {
        for json in ["{\"type\":\"attach\"}", "{\"type\":\"status\"}", "{\"type\":\"stop\"}"] {
            let parsed: ClientMessage = serde_json::from_str(json).unwrap();
            assert!(matches!(
                parsed,
                ClientMessage::Attach {} | ClientMessage::Status {} | ClientMessage::Stop {}
            ));
        }
    }

    #[test]
    fn test_response_ok_omits_optional_fields() {
        let resp = Response::ok();
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"ok":true}"#);
    }

    #[test]
    fn test_response_ok_with_message_id() {
        let resp = Response::ok_with_message_id(MessageId::new("abc-123"));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""message_id":"abc-123""#));
        assert!(!json.contains("agent"));
    }

    #[test]
    fn test_response_error() {
        let resp = Response::err("bad_request");
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"ok":false,"error":"bad_request"}"#);
    }

    #[test]
    fn test_hook_event_name_parse_known() {
        assert_eq!(HookEventName::parse("SessionStart"), HookEventName::SessionStart);
        assert_eq!(HookEventName::parse("permission_decision"), HookEventName::PermissionDecision);
        assert_eq!(HookEventName::parse("Stop"), HookEventName::Stop);
    }

    #[test]
    fn test_hook_event_name_parse_unknown() {
        assert_eq!(HookEventName::parse("SomethingNew"), HookEventName::Unknown);
    }

    #[test]
    fn test_permission_decision_payload_roundtrip() {
        let json = r#"{"tool_name":"Bash","decision":"allow","reason":null}"#;
        let parsed: PermissionDecisionPayload = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.decision, PermissionDecision::Allow);
    }

    #[test]
    fn test_raw_message_roundtrip() {
        let msg = ClientMessage::Raw {
            priority: Priority::Interrupt,
            from: "user".to_string(),
            body: "\x03".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, ClientMessage::Raw { .. }));
    }
}
