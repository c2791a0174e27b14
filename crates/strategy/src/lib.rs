pub mod analyzer;
pub mod config;
pub mod context;
pub mod detector;
pub mod levels;
pub mod scoring;
pub mod sweep;

pub use analyzer::SniperAnalyzer;
pub use config::{ContextSettings, DetectorSettings, ScoringSettings, SniperSettings, SweepSettings};
pub use context::{ContextCache, Timeframe};
pub use detector::{Detection, SpikeReversalDetector};
pub use levels::{build_levels, leverage_band, Levels};
pub use scoring::{evaluate, Quality, QualityGates};
pub use sweep::detect_liquidity_sweep;
