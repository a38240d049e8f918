pub mod calibration;
pub mod generator;
pub mod lifecycle;
pub mod store;

pub use calibration::CalibrationService;
pub use generator::{GenerationConfig, SignalService};
pub use lifecycle::{MonitorConfig, MonitorService};
pub use store::{ActiveFilter, SignalStore, SqliteStore};
