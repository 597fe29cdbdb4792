pub mod apis;
pub mod arguments;
pub mod config;
pub mod decision;
pub mod errors;
pub mod exchange;
pub mod journal;
pub mod logger;
pub mod market;
pub mod trader;

pub use config::TraderConfig;
pub use decision::FullDecision;
pub use exchange::Exchange;
pub use journal::DecisionJournal;
pub use trader::TraderManager;
