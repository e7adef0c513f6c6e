//! Internal events folded into session state by the dispatch loop.

use entrenous_net::{ChannelEvent, HistoryEntry};

/// Everything the session event loop can receive.
#[derive(Debug)]
pub enum EngineEvent {
    /// Lifecycle and frames from the realtime channel.
    Channel(ChannelEvent),
    /// Room history fetched over REST at startup.
    HistoryLoaded(Vec<HistoryEntry>),
    /// Room history could not be fetched.
    HistoryFailed { reason: String },
}
