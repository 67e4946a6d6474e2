use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Framing-level errors, distinct from the daemon's own `DaemonError` so that
/// this crate has no dependency on the daemon crate.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed JSON: {0}")]
    MalformedJson(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Read a single JSONL message from an async buffered reader (§6: one
/// newline-terminated JSON object per request/response).
///
/// Returns `Ok(None)` when the stream is closed (EOF) or the line is blank.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>, CodecError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    let bytes_read = reader.read_line(&mut line).await?;
    if bytes_read == 0 {
        return Ok(None);
    }

    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let msg: T = serde_json::from_str(trimmed)
        .map_err(|e| CodecError::MalformedJson(format!("{e}: {trimmed}")))?;
    Ok(Some(msg))
}

/// Write a single JSONL message: compact JSON, a trailing `\n`, then flush.
pub async fn write_message<W, T>(writer: &mut W, msg: &T) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let json = serde_json::to_string(msg).map_err(|e| CodecError::MalformedJson(e.to_string()))?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ClientMessage, Response};
    use crate::types::Priority;

    #[tokio::test]
    async fn test_roundtrip_client_message() {
        let msg = ClientMessage::Status {};
        let mut buf: Vec<u8> = Vec::new();
        write_message(&mut buf, &msg).await.unwrap();

        let mut reader = tokio::io::BufReader::new(buf.as_slice());
        let parsed: Option<ClientMessage> = read_message(&mut reader).await.unwrap();
        assert!(matches!(parsed, Some(ClientMessage::Status {})));
    }

    #[tokio::test]
    async fn test_roundtrip_response() {
        let resp = Response::ok();
        let mut buf: Vec<u8> = Vec::new();
        write_message(&mut buf, &resp).await.unwrap();

        let mut reader = tokio::io::BufReader::new(buf.as_slice());
        let parsed: Response = read_message(&mut reader).await.unwrap().unwrap();
        assert!(parsed.ok);
    }

    #[tokio::test]
    async fn test_read_eof() {
        let buf: &[u8] = b"";
        let mut reader = tokio::io::BufReader::new(buf);
        let result: Option<ClientMessage> = read_message(&mut reader).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_read_invalid_json() {
        let buf: &[u8] = b"not json\n";
        let mut reader = tokio::io::BufReader::new(buf);
        let result: Result<Option<ClientMessage>, _> = read_message(&mut reader).await;
        assert!(matches!(result, Err(CodecError::MalformedJson(_))));
    }

    #[tokio::test]
    async fn test_multiple_messages_in_sequence() {
        let msg1 = ClientMessage::Send {
            priority: Priority::Normal,
            from: "a".to_string(),
            body: "one".to_string(),
        };
        let msg2 = ClientMessage::Stop {};

        let mut buf: Vec<u8> = Vec::new();
        write_message(&mut buf, &msg1).await.unwrap();
        write_message(&mut buf, &msg2).await.unwrap();

        let mut reader = tokio::io::BufReader::new(buf.as_slice());
        let parsed1: ClientMessage = read_message(&mut reader).await.unwrap().unwrap();
        assert!(matches!(parsed1, ClientMessage::Send { .. }));
        let parsed2: ClientMessage = read_message(&mut reader).await.unwrap().unwrap();
        assert!(matches!(parsed2, ClientMessage::Stop {}));

        let parsed3: Option<ClientMessage> = read_message(&mut reader).await.unwrap();
        assert!(parsed3.is_none());
    }
}
