use std::path::PathBuf;
use std::sync::Arc;

use h2_protocol::{ClientMessage, HookEventName, MessageId, Response, codec};
use tokio::io::BufReader;
use tokio::net::UnixStream;

use crate::errors::DaemonError;
use crate::queue::QueuedMessage;
use crate::supervisor::AgentContext;

/// Handles exactly one control connection: reads one `ClientMessage`,
/// dispatches it, and writes back one `Response` — except `attach`, which
/// upgrades the connection to a raw byte relay after its `Response` (§4.6).
pub async fn handle_connection(stream: UnixStream, agent: Arc<AgentContext>) {
    let mut reader = BufReader::new(stream);
    let message: ClientMessage = match codec::read_message(&mut reader).await {
        Ok(Some(m)) => m,
        Ok(None) => return,
        Err(e) => {
            let mut stream = reader.into_inner();
            let _ = codec::write_message(&mut stream, &Response::err("bad_request")).await;
            tracing::warn!(event = "daemon.control.malformed_request", error = %e);
            return;
        }
    };

    if matches!(message, ClientMessage::Attach {}) {
        let mut stream = reader.into_inner();
        if codec::write_message(&mut stream, &Response::ok()).await.is_err() {
            return;
        }
        let _ = agent.attach.run(Arc::clone(&agent.vt), stream).await;
        return;
    }

    let response = dispatch(&agent, message).await;
    let mut stream = reader.into_inner();
    let _ = codec::write_message(&mut stream, &response).await;
}

async fn dispatch(agent: &AgentContext, message: ClientMessage) -> Response {
    // Once the child has actually exited, enqueues must fail with
    // `agent_exited` rather than silently persisting a message nobody will
    // ever read (§4.1, §7). `status`/`stop`/`hook_event` still go through —
    // only the two enqueue variants are refused here.
    if matches!(agent.vt.try_wait(), Ok(Some(_)))
        && matches!(message, ClientMessage::Send { .. } | ClientMessage::Raw { .. })
    {
        return Response::err(DaemonError::AgentExited.error_code());
    }

    match message {
        ClientMessage::Send { priority, from, body } => {
            if body.is_empty() {
                return Response::err("bad_request");
            }
            match agent.store.persist(agent.name.as_ref(), &body).await {
                Ok((id, path)) => {
                    agent
                        .queue
                        .enqueue(QueuedMessage {
                            id: id.clone(),
                            priority,
                            from: Some(from),
                            body,
                            file_path: path,
                        })
                        .await;
                    agent.activity.log_message_enqueued(&id, priority).await;
                    Response::ok_with_message_id(id)
                }
                Err(e) => Response::err(e.error_code()),
            }
        }

        ClientMessage::Raw { priority, from, body } => {
            if body.is_empty() {
                return Response::err("bad_request");
            }
            let id = MessageId::new(uuid::Uuid::new_v4().to_string());
            agent
                .queue
                .enqueue(QueuedMessage {
                    id: id.clone(),
                    priority,
                    from: Some(from),
                    body,
                    file_path: PathBuf::new(),
                })
                .await;
            agent.activity.log_message_enqueued(&id, priority).await;
            Response::ok_with_message_id(id)
        }

        ClientMessage::Status {} => Response::ok_with_agent(agent.snapshot_info().await),

        ClientMessage::Stop {} => {
            agent.shutdown.cancel();
            Response::ok()
        }

        ClientMessage::HookEvent { event_name, payload } => {
            let event = HookEventName::parse(&event_name);
            agent.state.handle_hook_event(&agent.queue, event, &payload).await;

            let tool_name = payload.get("tool_name").and_then(|v| v.as_str());
            if event == HookEventName::PermissionDecision {
                let decision = payload.get("decision").and_then(|v| v.as_str()).unwrap_or("");
                agent
                    .activity
                    .log_permission_decision(tool_name.unwrap_or(""), decision)
                    .await;
            } else {
                agent.activity.log_hook(&event_name, tool_name).await;
            }
            Response::ok()
        }

        ClientMessage::Attach {} => unreachable!("attach is handled before dispatch"),
    }
}
