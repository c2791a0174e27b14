pub mod binance;
pub mod buffer;
pub mod pool;
pub mod supervisor;

pub use binance::{BinanceFeedConnector, BinanceFuturesClient};
pub use buffer::{CandleBuffer, Upsert};
pub use pool::{AnalysisPool, ClosedBarHandler};
pub use supervisor::{StreamSupervisor, SupervisorHandle, SupervisorSettings};
