//! The session engine.
//!
//! One [`Session`] drives one identity in one room: it fetches a session id,
//! loads history, spawns the realtime channel task and folds everything the
//! channel emits into shared state. Callers read that state through the
//! accessors and push drafts through [`Session::send_message`] and
//! [`Session::send_sticker`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use entrenous_net::{
    chat_url, parse_timestamp, spawn_channel, BootstrapClient, ChannelCommand, ChannelConfig,
    ChannelEvent, ChannelState, EngineConfig, Frame, FrameKind, HistoryEntry, PersistRecord,
};
use entrenous_shared::constants::{
    PLACEHOLDER_MISSING_KEY, PLACEHOLDER_UNDECRYPTABLE, STICKER_ID_UNKNOWN,
};
use entrenous_shared::{decrypt_from, encrypt_for, Content, KeyStore};

use crate::board::{ChatMessage, Notice, Noticeboard, Transcript};
use crate::error::EngineError;
use crate::events::EngineEvent;

/// Event loop buffer size.
const EVENT_BUFFER: usize = 256;

/// Everything a session knows, behind one mutex. Locks are held only for
/// short synchronous sections; no await happens under the lock.
struct SessionState {
    identity: String,
    room_id: String,
    session_id: Option<String>,

    /// Own keypair plus every peer key seen on this channel.
    /// `None` once the session is closed.
    keys: Option<KeyStore>,

    /// Identities currently online in the room, self included.
    online: HashSet<String>,

    /// Command side of the channel task. `None` before the task is spawned
    /// and again after close.
    channel: Option<mpsc::Sender<ChannelCommand>>,
    channel_state: ChannelState,

    /// Exactly one send may be in flight; drafts arriving while this is set
    /// are dropped, not queued.
    send_in_flight: bool,

    transcript: Transcript,
    board: Noticeboard,
    close_reason: Option<String>,
}

/// Handle to one live chat session. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    state: Arc<Mutex<SessionState>>,
    bootstrap: BootstrapClient,
}

impl Session {
    /// Start a session: issue a session id, spawn the channel (announcing
    /// the public key as its first frame) and kick off the history fetch.
    ///
    /// A failed session id fetch is not fatal; the channel connects without
    /// one and a notice is posted.
    pub async fn connect(
        config: &EngineConfig,
        identity: &str,
        room_id: &str,
    ) -> Result<Session, EngineError> {
        if identity.trim().is_empty() {
            return Err(EngineError::EmptyIdentity);
        }
        if room_id.trim().is_empty() {
            return Err(EngineError::EmptyRoom);
        }

        let bootstrap = BootstrapClient::new(config)?;
        let keys = KeyStore::generate();
        let announce =
            Frame::public_key_announcement(identity, room_id, &keys.public_key_base64());
        info!(identity = %identity, room = %room_id, "Starting session");

        let state = Arc::new(Mutex::new(SessionState {
            identity: identity.to_string(),
            room_id: room_id.to_string(),
            session_id: None,
            keys: Some(keys),
            online: HashSet::new(),
            channel: None,
            channel_state: ChannelState::Connecting,
            send_in_flight: false,
            transcript: Transcript::default(),
            board: Noticeboard::default(),
            close_reason: None,
        }));

        // The session id goes into the channel URL, so it is fetched before
        // the socket comes up.
        let session_id = match bootstrap.fetch_session_id(identity).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "Session id fetch failed, connecting without one");
                post_notice(&state, "Session service unavailable");
                None
            }
        };
        {
            let mut guard = state.lock().map_err(|_| EngineError::LockPoisoned)?;
            guard.session_id = session_id.clone();
        }

        let url = chat_url(config, identity, room_id, session_id.as_deref())?;
        let (channel_tx, channel_rx) = spawn_channel(ChannelConfig { url, announce });
        {
            let mut guard = state.lock().map_err(|_| EngineError::LockPoisoned)?;
            guard.channel = Some(channel_tx);
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

        let forward_tx = events_tx.clone();
        tokio::spawn(async move {
            let mut channel_rx = channel_rx;
            while let Some(event) = channel_rx.recv().await {
                if forward_tx.send(EngineEvent::Channel(event)).await.is_err() {
                    break;
                }
            }
        });

        let loop_state = state.clone();
        tokio::spawn(async move {
            event_loop(loop_state, events_rx).await;
        });

        let history_client = bootstrap.clone();
        let history_room = room_id.to_string();
        tokio::spawn(async move {
            let event = match history_client.fetch_history(&history_room).await {
                Ok(entries) => EngineEvent::HistoryLoaded(entries),
                Err(e) => EngineEvent::HistoryFailed {
                    reason: e.to_string(),
                },
            };
            let _ = events_tx.send(event).await;
        });

        Ok(Session { state, bootstrap })
    }

    /// Encrypt a text draft for every online peer and put the copies on the
    /// wire. Empty drafts are ignored; drafts submitted while another send
    /// is in flight are dropped.
    pub async fn send_message(&self, draft: &str) -> Result<(), EngineError> {
        let draft = draft.trim();
        if draft.is_empty() {
            return Ok(());
        }
        if !self.acquire_send_gate()? {
            debug!("Send already in flight, dropping draft");
            return Ok(());
        }
        let result = self.perform_send(Content::text(draft)).await;
        self.release_send_gate();
        result
    }

    /// Send a sticker. Stickers travel in the clear and reach the sender's
    /// own transcript through the server echo.
    pub async fn send_sticker(&self, sticker_id: &str) -> Result<(), EngineError> {
        let sticker_id = sticker_id.trim();
        if sticker_id.is_empty() || sticker_id == STICKER_ID_UNKNOWN {
            warn!(sticker = %sticker_id, "Refusing to send unusable sticker");
            post_notice(&self.state, "This sticker cannot be sent");
            return Ok(());
        }
        if !self.acquire_send_gate()? {
            debug!("Send already in flight, dropping sticker");
            return Ok(());
        }
        let content = Content::Sticker {
            sticker_id: sticker_id.to_string(),
        };
        let result = self.perform_send(content).await;
        self.release_send_gate();
        result
    }

    /// Close the session. Idempotent. Discards key material and tells the
    /// channel task to shut the socket down.
    pub async fn close(&self) -> Result<(), EngineError> {
        let channel = {
            let mut guard = self.state.lock().map_err(|_| EngineError::LockPoisoned)?;
            if guard.channel_state == ChannelState::Closed {
                return Ok(());
            }
            guard.channel_state = ChannelState::Closed;
            guard.keys = None;
            guard.online.clear();
            guard.channel.take()
        };
        if let Some(channel) = channel {
            let _ = channel.send(ChannelCommand::Close).await;
        }
        info!("Session closed");
        Ok(())
    }

    pub fn channel_state(&self) -> Result<ChannelState, EngineError> {
        let guard = self.state.lock().map_err(|_| EngineError::LockPoisoned)?;
        Ok(guard.channel_state)
    }

    pub fn session_id(&self) -> Result<Option<String>, EngineError> {
        let guard = self.state.lock().map_err(|_| EngineError::LockPoisoned)?;
        Ok(guard.session_id.clone())
    }

    /// The server's close reason, when it gave one.
    pub fn close_reason(&self) -> Result<Option<String>, EngineError> {
        let guard = self.state.lock().map_err(|_| EngineError::LockPoisoned)?;
        Ok(guard.close_reason.clone())
    }

    /// Own public key, base64. `None` once the session is closed.
    pub fn public_key_base64(&self) -> Result<Option<String>, EngineError> {
        let guard = self.state.lock().map_err(|_| EngineError::LockPoisoned)?;
        Ok(guard.keys.as_ref().map(|keys| keys.public_key_base64()))
    }

    pub fn transcript(&self) -> Result<Vec<ChatMessage>, EngineError> {
        let guard = self.state.lock().map_err(|_| EngineError::LockPoisoned)?;
        Ok(guard.transcript.messages().to_vec())
    }

    /// Live notices, expired ones pruned.
    pub fn notices(&self) -> Result<Vec<Notice>, EngineError> {
        let mut guard = self.state.lock().map_err(|_| EngineError::LockPoisoned)?;
        guard.board.prune(Utc::now());
        Ok(guard.board.active().to_vec())
    }

    /// Dismiss a notice before its deadline. Unknown ids are fine.
    pub fn dismiss_notice(&self, id: i64) -> Result<(), EngineError> {
        let mut guard = self.state.lock().map_err(|_| EngineError::LockPoisoned)?;
        guard.board.dismiss(id);
        Ok(())
    }

    /// Identities currently online, sorted for stable display.
    pub fn online_peers(&self) -> Result<Vec<String>, EngineError> {
        let guard = self.state.lock().map_err(|_| EngineError::LockPoisoned)?;
        let mut peers: Vec<String> = guard.online.iter().cloned().collect();
        peers.sort();
        Ok(peers)
    }

    fn acquire_send_gate(&self) -> Result<bool, EngineError> {
        let mut guard = self.state.lock().map_err(|_| EngineError::LockPoisoned)?;
        if guard.send_in_flight {
            return Ok(false);
        }
        guard.send_in_flight = true;
        Ok(true)
    }

    fn release_send_gate(&self) {
        if let Ok(mut guard) = self.state.lock() {
            guard.send_in_flight = false;
        }
    }

    /// The send pipeline: persist the plaintext rendition, then build every
    /// wire copy under one lock and ship them. Encrypted fan-out is all or
    /// nothing; a missing peer key abandons the whole send.
    async fn perform_send(&self, content: Content) -> Result<(), EngineError> {
        let snapshot = {
            let guard = self.state.lock().map_err(|_| EngineError::LockPoisoned)?;
            match (guard.channel_state, guard.channel.clone()) {
                (ChannelState::Open, Some(channel)) => {
                    Some((guard.identity.clone(), guard.room_id.clone(), channel))
                }
                _ => None,
            }
        };
        let (identity, room_id, channel) = match snapshot {
            Some(parts) => parts,
            None => {
                post_notice(&self.state, "Not connected to the room yet");
                return Ok(());
            }
        };

        let kind = if matches!(content, Content::Sticker { .. }) {
            FrameKind::Sticker
        } else {
            FrameKind::Message
        };
        let record = PersistRecord {
            username: identity,
            content: content.encode(),
            room_id,
            kind,
        };
        if let Err(e) = self.bootstrap.persist_message(&record).await {
            warn!(error = %e, "Persistence failed, message will not survive a reload");
            post_notice(&self.state, "Message could not be saved");
        }

        let frames = {
            let mut guard = self.state.lock().map_err(|_| EngineError::LockPoisoned)?;
            if guard.channel_state != ChannelState::Open {
                debug!("Channel closed while persisting, dropping draft");
                return Ok(());
            }
            if let Content::Sticker { .. } = content {
                vec![Frame::sticker(
                    &guard.identity,
                    &guard.room_id,
                    content.encode(),
                )]
            } else {
                let frames = match encrypted_copies(&guard, &content) {
                    Some(frames) => frames,
                    None => return Ok(()),
                };
                let sender = guard.identity.clone();
                guard.transcript.push(ChatMessage {
                    sender,
                    content: content.clone(),
                    sent_at: Utc::now(),
                });
                frames
            }
        };

        for frame in frames {
            if channel.send(ChannelCommand::Send(frame)).await.is_err() {
                warn!("Channel task is gone, dropping remaining copies");
                break;
            }
        }
        Ok(())
    }
}

/// Build one encrypted copy per online peer. Returns `None` when any peer
/// key is missing or sealing fails, so that no partial fan-out ever
/// reaches the wire.
fn encrypted_copies(state: &SessionState, content: &Content) -> Option<Vec<Frame>> {
    let keys = state.keys.as_ref()?;
    let plaintext = content.encode().to_string();

    let mut recipients: Vec<&String> = state
        .online
        .iter()
        .filter(|peer| **peer != state.identity)
        .collect();
    recipients.sort();

    let mut frames = Vec::with_capacity(recipients.len());
    for peer in recipients {
        let public = match keys.peer_key(peer) {
            Some(key) => *key,
            None => {
                warn!(peer = %peer, "No public key for peer, abandoning send");
                return None;
            }
        };
        let sealed = match encrypt_for(keys, &public, plaintext.as_bytes()) {
            Ok(sealed) => sealed,
            Err(e) => {
                warn!(peer = %peer, error = %e, "Sealing failed, abandoning send");
                return None;
            }
        };
        let body = Content::Encrypted {
            ciphertext: sealed.ciphertext,
            nonce: sealed.nonce.to_vec(),
        }
        .encode();
        frames.push(Frame::message(
            &state.identity,
            &state.room_id,
            body,
            Some(peer.as_str()),
        ));
    }
    Some(frames)
}

async fn event_loop(state: Arc<Mutex<SessionState>>, mut events: mpsc::Receiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        dispatch(&state, event);
    }
    debug!("Session event loop ended");
}

/// Fold one event into session state. Synchronous: every arm takes the
/// lock, mutates, and returns.
fn dispatch(state: &Arc<Mutex<SessionState>>, event: EngineEvent) {
    match event {
        EngineEvent::Channel(event) => dispatch_channel(state, event),

        EngineEvent::HistoryLoaded(entries) => {
            let mut guard = match state.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            if guard.channel_state == ChannelState::Closed {
                debug!("Dropping history that resolved after close");
                return;
            }
            let messages: Vec<ChatMessage> = entries
                .iter()
                .map(|entry| decode_entry(&guard, entry))
                .collect();
            guard.transcript.replace(messages);
            info!(count = guard.transcript.len(), "History loaded");
        }

        EngineEvent::HistoryFailed { reason } => {
            warn!(reason = %reason, "History fetch failed");
            let mut guard = match state.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            if guard.channel_state == ChannelState::Closed {
                return;
            }
            guard.board.post("Could not load the room history");
        }
    }
}

fn dispatch_channel(state: &Arc<Mutex<SessionState>>, event: ChannelEvent) {
    match event {
        ChannelEvent::Opened => {
            let mut guard = match state.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            if guard.channel_state == ChannelState::Closed {
                return;
            }
            guard.channel_state = ChannelState::Open;
            info!("Channel open, key announced");
        }

        ChannelEvent::Frame(frame) => handle_frame(state, frame),

        ChannelEvent::Error { reason } => {
            warn!(reason = %reason, "Channel error");
        }

        ChannelEvent::Closed { reason } => {
            let posted = {
                let mut guard = match state.lock() {
                    Ok(guard) => guard,
                    Err(_) => return,
                };
                if guard.channel_state == ChannelState::Closed {
                    return;
                }
                guard.channel_state = ChannelState::Closed;
                guard.keys = None;
                guard.channel = None;
                guard.close_reason = reason.clone();
                reason
            };
            match posted {
                Some(reason) => {
                    info!(reason = %reason, "Channel closed by server");
                    post_notice(state, &reason);
                }
                None => info!("Channel closed"),
            }
        }
    }
}

fn handle_frame(state: &Arc<Mutex<SessionState>>, frame: Frame) {
    let mut guard = match state.lock() {
        Ok(guard) => guard,
        Err(_) => return,
    };
    if guard.channel_state == ChannelState::Closed {
        debug!("Dropping frame after close");
        return;
    }

    match frame.kind {
        FrameKind::Users => {
            let users = frame.users.unwrap_or_default();
            debug!(count = users.len(), "Online list updated");
            guard.online = users.into_iter().collect();
        }

        FrameKind::PublicKey => {
            let (username, key) = match (frame.username, frame.public_key) {
                (Some(username), Some(key)) => (username, key),
                _ => {
                    debug!("Key announcement missing fields");
                    return;
                }
            };
            // Our own announcement comes back through the broadcast.
            if username == guard.identity {
                return;
            }
            let keys = match guard.keys.as_mut() {
                Some(keys) => keys,
                None => return,
            };
            if let Err(e) = keys.record_peer_key(&username, &key) {
                warn!(peer = %username, error = %e, "Rejected peer key");
            }
        }

        FrameKind::Message => {
            let sender = match frame.username {
                Some(sender) => sender,
                None => return,
            };
            // Own copies come back through the broadcast; the transcript
            // already has the plaintext.
            if sender == guard.identity {
                return;
            }
            if let Some(recipient) = frame.recipient.as_deref() {
                if recipient != guard.identity {
                    return;
                }
            }
            let value = frame.content.unwrap_or(Value::Null);
            let content = resolve_content(&guard, &sender, Content::decode(&value));
            let sent_at = parse_timestamp(frame.timestamp.as_deref());
            guard.transcript.push(ChatMessage {
                sender,
                content,
                sent_at,
            });
        }

        FrameKind::Sticker => {
            let sender = match frame.username {
                Some(sender) => sender,
                None => return,
            };
            let value = frame.content.unwrap_or(Value::Null);
            let content = Content::decode(&value);
            let sent_at = parse_timestamp(frame.timestamp.as_deref());
            guard.transcript.push(ChatMessage {
                sender,
                content,
                sent_at,
            });
        }

        FrameKind::Notification => {
            let text = match frame.content {
                Some(Value::String(text)) => text,
                _ => {
                    debug!("Notification without text content");
                    return;
                }
            };
            info!(notice = %text, "Service notice");
            guard.board.post(text);
        }

        FrameKind::History => {
            let entries = frame.messages.unwrap_or_default();
            let messages: Vec<ChatMessage> = entries
                .iter()
                .map(|entry| decode_entry(&guard, entry))
                .collect();
            guard.transcript.replace(messages);
            info!(count = guard.transcript.len(), "History frame applied");
        }

        FrameKind::Session => {
            if let Some(id) = frame.session_id {
                debug!(session_id = %id, "Session id echoed on the channel");
                guard.session_id = Some(id);
            }
        }

        FrameKind::Unknown => {
            debug!("Ignoring frame with unknown tag");
        }
    }
}

fn decode_entry(state: &SessionState, entry: &HistoryEntry) -> ChatMessage {
    let content = resolve_content(state, &entry.username, Content::decode(&entry.content));
    ChatMessage {
        sender: entry.username.clone(),
        content,
        sent_at: parse_timestamp(entry.timestamp.as_deref()),
    }
}

/// Turn encrypted content into its plaintext form, or a placeholder when
/// the sender's key is unknown or the seal does not verify.
fn resolve_content(state: &SessionState, sender: &str, content: Content) -> Content {
    match content {
        Content::Encrypted { ciphertext, nonce } => {
            let keys = match state.keys.as_ref() {
                Some(keys) => keys,
                None => return Content::text(PLACEHOLDER_MISSING_KEY),
            };
            let sender_key = match keys.peer_key(sender) {
                Some(key) => *key,
                None => return Content::text(PLACEHOLDER_MISSING_KEY),
            };
            match decrypt_from(keys, &sender_key, &ciphertext, &nonce) {
                Ok(plaintext) => match serde_json::from_slice::<Value>(&plaintext) {
                    Ok(value) => Content::decode(&value),
                    Err(_) => Content::text(PLACEHOLDER_UNDECRYPTABLE),
                },
                Err(_) => Content::text(PLACEHOLDER_UNDECRYPTABLE),
            }
        }
        other => other,
    }
}

fn post_notice(state: &Arc<Mutex<SessionState>>, text: &str) {
    if let Ok(mut guard) = state.lock() {
        guard.board.post(text);
    }
}
