pub mod error;
pub mod history;
pub mod http;
pub mod loadtest;
pub mod logger;
pub mod parser;
pub mod runner;
pub mod script;
pub mod utils;
pub mod variable;

// Re-export commonly used types
pub use error::{RawreqError, Result};
pub use parser::{ParsedFile, Request, parse_content, parse_file};
pub use runner::{ExecuteOptions, ExecutionOutcome, Orchestrator};
