/// Decision journal collaborator
///
/// Append-only record of every decision cycle plus the aggregate statistics
/// the context builder feeds back into the prompt.
pub mod performance;
pub mod store;
pub mod types;

pub use performance::analyze_performance;
pub use store::DecisionJournal;
pub use types::{
    AccountSnapshot, DecisionAction, DecisionRecord, PerformanceAnalysis, PositionSnapshot,
    TradeOutcome,
};
