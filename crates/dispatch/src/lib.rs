pub mod dispatcher;
pub mod log_notifier;
pub mod message;
pub mod pipeline;

pub use dispatcher::{DispatchOutcome, Dispatcher, Suppression};
pub use log_notifier::LogNotifier;
pub use message::{render, MessageFormat};
pub use pipeline::SignalPipeline;
