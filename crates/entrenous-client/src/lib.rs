pub mod board;
pub mod error;
pub mod events;
pub mod session;

use tracing_subscriber::{fmt, EnvFilter};

pub use board::{ChatMessage, Notice, Noticeboard, Transcript};
pub use error::EngineError;
pub use events::EngineEvent;
pub use session::Session;

pub use entrenous_net::{ChannelState, EngineConfig};
pub use entrenous_shared::Content;

/// Install the default tracing subscriber. Embedders that bring their own
/// subscriber skip this.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("entrenous_client=debug,entrenous_net=debug,warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
