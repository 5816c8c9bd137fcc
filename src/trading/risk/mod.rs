pub mod closer;
pub mod engine;
pub mod params;
pub mod registry;
pub mod store;
pub mod trailing_stop;
pub mod types;

pub use closer::{DryRunCloser, OkxPositionCloser, PositionCloser};
pub use engine::{RiskEngine, TickReport};
pub use params::{CachedRiskParamsResolver, RiskParamsResolver, StrategyRiskConfig, StrategyRiskSource};
pub use registry::{PositionRegistry, RefreshSummary};
pub use store::PositionStore;
pub use types::{CloseReason, Decision, RiskParams, TickOutcome};
