pub mod collector;
pub mod http;
pub mod percentiles;

pub use collector::{StatsRegistry, StatsSnapshot};
pub use percentiles::LatencyPercentiles;
