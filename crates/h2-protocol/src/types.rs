use serde::{Deserialize, Serialize};

/// Generate a newtype wrapper around `String` with standard trait impls.
///
/// Each generated type gets: `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`,
/// `Serialize`/`Deserialize` (transparent), `Display`, `Deref<Target=str>`,
/// `AsRef<str>`, `Borrow<str>`, `From<String>`, `From<&str>`.
macro_rules! newtype_string {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

newtype_string! {
    /// Unique agent identifier, unique among live sockets in one h2 directory.
    /// Matches `[A-Za-z0-9._-]+` (enforced by callers; the core does not
    /// validate the charset itself since naming policy belongs to the CLI).
    AgentName
}

newtype_string! {
    /// UUIDv4 identifier for a queued message.
    MessageId
}

/// Priority class a message is enqueued under (§3, §4.3).
///
/// `idle-first` is LIFO on enqueue; all others are FIFO. Wire form uses the
/// literal hyphenated spelling from §6, not Rust's default enum casing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    Interrupt,
    Normal,
    IdleFirst,
    Idle,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Interrupt => write!(f, "interrupt"),
            Priority::Normal => write!(f, "normal"),
            Priority::IdleFirst => write!(f, "idle-first"),
            Priority::Idle => write!(f, "idle"),
        }
    }
}

/// Message lifecycle status (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Queued,
    Delivered,
    Cancelled,
}

/// Agent state machine (§3, §4.5). `blocked_on_permission` is orthogonal and
/// carried separately rather than as a fifth variant, since it can be true
/// in either `idle` or `active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Starting,
    Idle,
    Active,
    Exited,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentState::Starting => write!(f, "starting"),
            AgentState::Idle => write!(f, "idle"),
            AgentState::Active => write!(f, "active"),
            AgentState::Exited => write!(f, "exited"),
        }
    }
}

/// Snapshot returned by `status` (§4.6). `sub_state` carries a short
/// human-readable refinement (e.g. `"blocked"`) when one applies; `pod` is
/// an optional deployment-environment tag the core never populates itself
/// (cluster-wide coordination is a non-goal) but passes through unchanged
/// if a caller supplied one at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: AgentName,
    pub command: String,
    pub uptime_secs: u64,
    pub state: AgentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_state: Option<String>,
    pub state_duration_secs: u64,
    pub queued_count: usize,
    pub blocked_on_permission: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    #[test]
    fn test_agent_name_serde_transparent_roundtrip() {
        let val = AgentName::new("a1");
        let json = serde_json::to_string(&val).unwrap();
        assert_eq!(json, r#""a1""#);
        let parsed: AgentName = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, val);
    }

    #[test]
    fn test_agent_name_hash_set_and_borrow() {
        let mut set = HashSet::new();
        set.insert(AgentName::new("a"));
        set.insert(AgentName::new("b"));
        set.insert(AgentName::new("a"));
        assert_eq!(set.len(), 2);

        let mut map = HashMap::new();
        map.insert(AgentName::new("key"), 1);
        assert_eq!(map.get("key"), Some(&1));
    }

    #[test]
    fn test_priority_wire_format() {
        assert_eq!(serde_json::to_string(&Priority::Interrupt).unwrap(), r#""interrupt""#);
        assert_eq!(serde_json::to_string(&Priority::Normal).unwrap(), r#""normal""#);
        assert_eq!(serde_json::to_string(&Priority::IdleFirst).unwrap(), r#""idle-first""#);
        assert_eq!(serde_json::to_string(&Priority::Idle).unwrap(), r#""idle""#);
    }

    #[test]
    fn test_priority_roundtrip() {
        for p in [Priority::Interrupt, Priority::Normal, Priority::IdleFirst, Priority::Idle] {
            let json = serde_json::to_string(&p).unwrap();
            let parsed: Priority = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, p);
        }
    }

    #[test]
    fn test_priority_display_matches_wire() {
        assert_eq!(Priority::IdleFirst.to_string(), "idle-first");
    }

    #[test]
    fn test_agent_state_wire_format() {
        assert_eq!(serde_json::to_string(&AgentState::Starting).unwrap(), r#""starting""#);
        assert_eq!(serde_json::to_string(&AgentState::Exited).unwrap(), r#""exited""#);
    }

    #[test]
    fn test_agent_info_roundtrip() {
        let info = AgentInfo {
            name: AgentName::new("a1"),
            command: "claude".to_string(),
            uptime_secs: 120,
            state: AgentState::Idle,
            sub_state: None,
            state_duration_secs: 45,
            queued_count: 0,
            blocked_on_permission: false,
            pod: None,
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("sub_state"));
        assert!(!json.contains("\"pod\""));
        let parsed: AgentInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.name, info.name);
        assert_eq!(parsed.state, info.state);
        assert_eq!(parsed.blocked_on_permission, info.blocked_on_permission);
    }

    #[test]
    fn test_agent_info_with_optional_fields() {
        let info = AgentInfo {
            name: AgentName::new("a1"),
            command: "claude".to_string(),
            uptime_secs: 120,
            state: AgentState::Active,
            sub_state: Some("blocked".to_string()),
            state_duration_secs: 3,
            queued_count: 2,
            blocked_on_permission: true,
            pod: Some("worker-3".to_string()),
        };
        let json = serde_json::to_string(&info).unwrap();
        let parsed: AgentInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.sub_state.as_deref(), Some("blocked"));
        assert_eq!(parsed.pod.as_deref(), Some("worker-3"));
    }
}
