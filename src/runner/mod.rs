pub mod chain;
pub mod executor;
pub mod preview;
pub mod reporter;
pub mod types;

pub use chain::build_chain;
pub use executor::{
    Orchestrator, StepFailure, build_failure_response, build_load_test_summary, build_request_id,
};
pub use preview::{ChainItem, build_chain_items, ensure_request_preview, to_response_preview};
pub use reporter::ExecutionReporter;
pub use types::{ExecuteOptions, ExecutionKind, ExecutionOutcome, ExecutionReport, SkipReason};
