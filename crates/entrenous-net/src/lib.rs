// Realtime networking layer: WebSocket channel task and REST bootstrap.

pub mod bootstrap;
pub mod channel;
pub mod config;
pub mod error;
pub mod frame;

pub use bootstrap::{BootstrapClient, PersistRecord};
pub use channel::{
    chat_url, spawn_channel, ChannelCommand, ChannelConfig, ChannelEvent, ChannelState,
};
pub use config::EngineConfig;
pub use error::BootstrapError;
pub use frame::{parse_timestamp, Frame, FrameKind, HistoryEntry};
