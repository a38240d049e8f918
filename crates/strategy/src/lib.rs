pub mod builder;
pub mod indicators;
pub mod patterns;
pub mod scorer;
pub mod trend;
pub mod triggers;

pub use builder::SignalLevels;
pub use scorer::ScoreResult;
pub use trend::TrendContext;
