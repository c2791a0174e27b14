pub mod config;
pub mod error;
pub mod market;
pub mod state;
pub mod types;

pub use config::{Config, NotifierKind};
pub use error::{Error, Result};
pub use market::{FeedConnection, FeedConnector, HistoryProvider, Notifier, UniverseProvider};
pub use state::RuntimeState;
pub use types::*;
