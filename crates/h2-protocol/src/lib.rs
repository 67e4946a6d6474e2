pub mod codec;
pub mod messages;
pub mod types;

pub use codec::{CodecError, read_message, write_message};
pub use messages::{
    ClientMessage, HookEventName, PermissionDecision, PermissionDecisionPayload,
    PermissionRequestPayload, PostToolUsePayload, PreToolUsePayload, Response,
};
pub use types::{AgentInfo, AgentName, AgentState, MessageId, MessageStatus, Priority};
