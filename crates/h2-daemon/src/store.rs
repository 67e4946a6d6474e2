use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use chrono::Utc;
use h2_paths::H2Paths;
use h2_protocol::MessageId;

use crate::errors::DaemonError;

/// Persists a message body to `<session>/messages/<timestamp>-<id8>.md`
/// before it is ever enqueued, so nothing delivered to the agent only lives
/// in memory (§4.2 component B).
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// reader never observes a partially written message file.
pub struct MessageStore {
    paths: H2Paths,
}

impl MessageStore {
    pub fn new(paths: H2Paths) -> Self {
        Self { paths }
    }

    /// Writes `body` under `agent`'s session directory and returns the new
    /// message's id and the file path it was persisted to.
    pub async fn persist(&self, agent: &str, body: &str) -> Result<(MessageId, PathBuf), DaemonError> {
        let message_id = MessageId::new(uuid::Uuid::new_v4().to_string());
        let id8 = &message_id.as_ref()[..8.min(message_id.as_ref().len())];
        let timestamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();

        let messages_dir = self.paths.session_messages_dir(agent);
        tokio::fs::create_dir_all(&messages_dir).await?;

        let final_path = self.paths.session_message_file(agent, &timestamp, id8);
        let tmp_path = messages_dir.join(format!(".{timestamp}-{id8}.md.tmp"));

        tokio::fs::write(&tmp_path, body).await?;
        tokio::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600)).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;

        Ok((message_id, final_path))
    }
}
