//! The realtime channel task.
//!
//! One tokio task owns the WebSocket for the life of a session. Everything
//! else talks to it through typed command and event channels: commands flow
//! in, events flow out, and the task is the only place that touches the
//! socket. There is no reconnect; once `Closed` is emitted the task is gone
//! and a new session must be started.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info};
use url::Url;

use crate::config::EngineConfig;
use crate::frame::Frame;

/// Commands sent into the channel task.
#[derive(Debug)]
pub enum ChannelCommand {
    /// Serialize and transmit a frame.
    Send(Frame),
    /// Close the socket and end the task.
    Close,
}

/// Events emitted by the channel task.
#[derive(Debug)]
pub enum ChannelEvent {
    /// The socket is connected and the announcement has been written.
    Opened,
    /// An inbound frame parsed.
    Frame(Frame),
    /// The transport failed. A `Closed` event follows.
    Error { reason: String },
    /// Terminal. Carries the server's close reason when it gave one.
    Closed { reason: Option<String> },
}

/// Channel lifecycle as mirrored by the session engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

/// Everything the channel task needs to come up.
pub struct ChannelConfig {
    /// Full chat endpoint URL, parameters included.
    pub url: Url,
    /// Frame written immediately after the socket opens, before any user
    /// send can reach the wire.
    pub announce: Frame,
}

/// Command and event buffer size.
const CHANNEL_BUFFER: usize = 64;

/// Build the chat endpoint URL. The identity travels in the path; room and
/// session ids go in the query string.
pub fn chat_url(
    config: &EngineConfig,
    identity: &str,
    room_id: &str,
    session_id: Option<&str>,
) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&config.ws_base_url)?;

    match url.path_segments_mut() {
        Ok(mut path) => {
            path.pop_if_empty().extend(["ws", "chat", identity]);
        }
        // ws/wss URLs always take a path; anything else is a config error.
        Err(()) => return Err(url::ParseError::RelativeUrlWithCannotBeABaseBase),
    }

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("roomId", room_id);
        if let Some(session_id) = session_id {
            query.append_pair("sessionId", session_id);
        }
    }

    Ok(url)
}

/// Spawn the channel task and hand back its command and event endpoints.
///
/// The task connects, writes the announcement, emits
/// [`ChannelEvent::Opened`], then pumps commands and socket frames until
/// either side closes.
pub fn spawn_channel(
    config: ChannelConfig,
) -> (mpsc::Sender<ChannelCommand>, mpsc::Receiver<ChannelEvent>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_BUFFER);
    let (event_tx, event_rx) = mpsc::channel(CHANNEL_BUFFER);

    tokio::spawn(async move {
        run_channel(config, cmd_rx, event_tx).await;
    });

    (cmd_tx, event_rx)
}

async fn run_channel(
    config: ChannelConfig,
    mut cmd_rx: mpsc::Receiver<ChannelCommand>,
    event_tx: mpsc::Sender<ChannelEvent>,
) {
    let (socket, _response) = match connect_async(config.url.as_str()).await {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "WebSocket connect failed");
            let _ = event_tx
                .send(ChannelEvent::Error {
                    reason: e.to_string(),
                })
                .await;
            let _ = event_tx.send(ChannelEvent::Closed { reason: None }).await;
            return;
        }
    };

    let (mut write, mut read) = socket.split();

    // The announcement goes out before Opened is reported, so no send can
    // overtake it.
    let announce = match config.announce.to_json() {
        Ok(text) => text,
        Err(e) => {
            error!(error = %e, "Failed to serialize announcement");
            let _ = event_tx
                .send(ChannelEvent::Error {
                    reason: e.to_string(),
                })
                .await;
            let _ = event_tx.send(ChannelEvent::Closed { reason: None }).await;
            return;
        }
    };
    if let Err(e) = write.send(Message::Text(announce)).await {
        error!(error = %e, "Failed to write announcement");
        let _ = event_tx
            .send(ChannelEvent::Error {
                reason: e.to_string(),
            })
            .await;
        let _ = event_tx.send(ChannelEvent::Closed { reason: None }).await;
        return;
    }

    info!(url = %config.url, "Channel open");
    let _ = event_tx.send(ChannelEvent::Opened).await;

    let close_reason = loop {
        tokio::select! {
            command = cmd_rx.recv() => {
                match command {
                    Some(ChannelCommand::Send(frame)) => {
                        let text = match frame.to_json() {
                            Ok(text) => text,
                            Err(e) => {
                                error!(error = %e, "Failed to serialize frame");
                                continue;
                            }
                        };
                        if let Err(e) = write.send(Message::Text(text)).await {
                            error!(error = %e, "WebSocket send failed");
                            let _ = event_tx
                                .send(ChannelEvent::Error { reason: e.to_string() })
                                .await;
                            break None;
                        }
                    }
                    Some(ChannelCommand::Close) => {
                        debug!("Channel close requested");
                        let _ = write.send(Message::Close(None)).await;
                        break None;
                    }
                    None => {
                        debug!("Command side dropped, closing socket");
                        let _ = write.send(Message::Close(None)).await;
                        break None;
                    }
                }
            }

            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => match Frame::from_json(&text) {
                        Ok(frame) => {
                            let _ = event_tx.send(ChannelEvent::Frame(frame)).await;
                        }
                        Err(e) => {
                            debug!(error = %e, "Skipping malformed frame");
                        }
                    },
                    Some(Ok(Message::Close(close))) => {
                        let reason = close.and_then(|frame| {
                            if frame.reason.is_empty() {
                                None
                            } else {
                                Some(frame.reason.to_string())
                            }
                        });
                        info!(reason = ?reason, "Server closed the channel");
                        break reason;
                    }
                    // Pings and pongs are handled by the transport.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket error");
                        let _ = event_tx
                            .send(ChannelEvent::Error { reason: e.to_string() })
                            .await;
                        break None;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break None;
                    }
                }
            }
        }
    };

    let _ = event_tx
        .send(ChannelEvent::Closed {
            reason: close_reason,
        })
        .await;
    debug!("Channel task terminated");
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::frame::FrameKind;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::{accept_async, accept_hdr_async};

    async fn bind_server() -> (TcpListener, EngineConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = EngineConfig {
            ws_base_url: format!("ws://{}", listener.local_addr().unwrap()),
            ..EngineConfig::default()
        };
        (listener, config)
    }

    fn announce() -> Frame {
        Frame::public_key_announcement("alice", "room-1", "a2V5LWJ5dGVz")
    }

    #[tokio::test]
    async fn test_announcement_is_first_frame() {
        let (listener, config) = bind_server().await;
        let (uri_tx, uri_rx) = oneshot::channel();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let callback = move |request: &Request, response: Response| {
                let _ = uri_tx.send(request.uri().to_string());
                Ok(response)
            };
            let mut socket = accept_hdr_async(stream, callback).await.unwrap();
            socket.next().await.unwrap().unwrap()
        });

        let url = chat_url(&config, "alice", "room-1", Some("s-42")).unwrap();
        let (_commands, mut events) = spawn_channel(ChannelConfig {
            url,
            announce: announce(),
        });

        assert!(matches!(events.recv().await, Some(ChannelEvent::Opened)));
        assert_eq!(
            uri_rx.await.unwrap(),
            "/ws/chat/alice?roomId=room-1&sessionId=s-42"
        );

        let first = server.await.unwrap();
        let frame = Frame::from_json(first.to_text().unwrap()).unwrap();
        assert_eq!(frame, announce());
    }

    #[tokio::test]
    async fn test_inbound_frames_are_dispatched() {
        let (listener, config) = bind_server().await;

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = accept_async(stream).await.unwrap();
            socket.next().await.unwrap().unwrap();
            socket
                .send(Message::Text(
                    r#"{"type": "users", "users": ["alice", "bob"]}"#.to_string(),
                ))
                .await
                .unwrap();
            socket
                .send(Message::Text("not json".to_string()))
                .await
                .unwrap();
            socket
                .send(Message::Text(r#"{"type": "galaxy"}"#.to_string()))
                .await
                .unwrap();
            socket
                .send(Message::Text(
                    r#"{"type": "message", "username": "bob", "content": {"text": "hi"}}"#
                        .to_string(),
                ))
                .await
                .unwrap();
            // Hold the socket open until the client side is done reading.
            socket.next().await;
        });

        let url = chat_url(&config, "alice", "room-1", None).unwrap();
        let (_commands, mut events) = spawn_channel(ChannelConfig {
            url,
            announce: announce(),
        });

        assert!(matches!(events.recv().await, Some(ChannelEvent::Opened)));

        let users = match events.recv().await {
            Some(ChannelEvent::Frame(frame)) => frame,
            other => panic!("expected users frame, got {other:?}"),
        };
        assert_eq!(users.kind, FrameKind::Users);

        // The malformed line was skipped; the unknown tag still comes through.
        let unknown = match events.recv().await {
            Some(ChannelEvent::Frame(frame)) => frame,
            other => panic!("expected unknown frame, got {other:?}"),
        };
        assert_eq!(unknown.kind, FrameKind::Unknown);

        let message = match events.recv().await {
            Some(ChannelEvent::Frame(frame)) => frame,
            other => panic!("expected message frame, got {other:?}"),
        };
        assert_eq!(message.kind, FrameKind::Message);
        assert_eq!(message.username.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_send_command_reaches_the_wire() {
        let (listener, config) = bind_server().await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = accept_async(stream).await.unwrap();
            socket.next().await.unwrap().unwrap();
            socket.next().await.unwrap().unwrap()
        });

        let url = chat_url(&config, "alice", "room-1", None).unwrap();
        let (commands, mut events) = spawn_channel(ChannelConfig {
            url,
            announce: announce(),
        });
        assert!(matches!(events.recv().await, Some(ChannelEvent::Opened)));

        let outbound = Frame::sticker("alice", "room-1", json!({"sticker_id": "wave"}));
        commands
            .send(ChannelCommand::Send(outbound.clone()))
            .await
            .unwrap();

        let raw = server.await.unwrap();
        let on_wire = Frame::from_json(raw.to_text().unwrap()).unwrap();
        assert_eq!(on_wire, outbound);
    }

    #[tokio::test]
    async fn test_server_close_reason_is_reported() {
        let (listener, config) = bind_server().await;

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = accept_async(stream).await.unwrap();
            socket.next().await.unwrap().unwrap();
            socket
                .close(Some(CloseFrame {
                    code: CloseCode::Policy,
                    reason: "Username already in use.".into(),
                }))
                .await
                .unwrap();
        });

        let url = chat_url(&config, "alice", "room-1", None).unwrap();
        let (_commands, mut events) = spawn_channel(ChannelConfig {
            url,
            announce: announce(),
        });

        assert!(matches!(events.recv().await, Some(ChannelEvent::Opened)));
        match events.recv().await {
            Some(ChannelEvent::Closed { reason }) => {
                assert_eq!(reason.as_deref(), Some("Username already in use."));
            }
            other => panic!("expected Closed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_close_command_ends_the_task() {
        let (listener, config) = bind_server().await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = accept_async(stream).await.unwrap();
            socket.next().await.unwrap().unwrap();
            while let Some(message) = socket.next().await {
                if matches!(message, Ok(Message::Close(_))) {
                    return true;
                }
            }
            false
        });

        let url = chat_url(&config, "alice", "room-1", None).unwrap();
        let (commands, mut events) = spawn_channel(ChannelConfig {
            url,
            announce: announce(),
        });
        assert!(matches!(events.recv().await, Some(ChannelEvent::Opened)));

        commands.send(ChannelCommand::Close).await.unwrap();
        assert!(matches!(
            events.recv().await,
            Some(ChannelEvent::Closed { reason: None })
        ));
        assert!(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_connect_failure_reports_error_then_closed() {
        let (listener, config) = bind_server().await;
        drop(listener);

        let url = chat_url(&config, "alice", "room-1", None).unwrap();
        let (_commands, mut events) = spawn_channel(ChannelConfig {
            url,
            announce: announce(),
        });

        assert!(matches!(
            events.recv().await,
            Some(ChannelEvent::Error { .. })
        ));
        assert!(matches!(
            events.recv().await,
            Some(ChannelEvent::Closed { reason: None })
        ));
    }

    #[test]
    fn test_chat_url_carries_all_parameters() {
        let config = EngineConfig::default();
        let url = chat_url(&config, "alice", "room-1", Some("s-42")).unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:8000/ws/chat/alice?roomId=room-1&sessionId=s-42"
        );
    }

    #[test]
    fn test_chat_url_without_session_id() {
        let config = EngineConfig::default();
        let url = chat_url(&config, "alice", "room-1", None).unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8000/ws/chat/alice?roomId=room-1");
    }

    #[test]
    fn test_chat_url_encodes_identity() {
        let config = EngineConfig::default();
        let url = chat_url(&config, "john doe", "room-1", None).unwrap();
        assert_eq!(url.path(), "/ws/chat/john%20doe");
    }

    #[test]
    fn test_chat_url_rejects_invalid_base() {
        let config = EngineConfig {
            ws_base_url: "not a url".to_string(),
            ..EngineConfig::default()
        };
        assert!(chat_url(&config, "alice", "room-1", None).is_err());
    }
}
