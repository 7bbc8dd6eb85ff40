pub mod clean;
pub mod runner;
pub mod types;

pub use clean::clean_script;
pub use runner::{ScriptDeps, ScriptRunner, SandboxLimits, build_console_message, build_script_source};
pub use types::{
    AssertionResult, ConsoleEntry, ConsoleLevel, ConsoleSink, NoopVariableSink, RequestPatch,
    ScriptContext, ScriptLogBuffer, ScriptRequest, ScriptResponse, ScriptStage, SharedVariables,
    VariableSink,
};
