//! CLI domain: parse, route, confirmation and output only.
//! Run orchestration lives in `bulk` and `export`.

mod confirm;
mod output;
mod parse;
mod route;

pub use confirm::{confirm_run, requires_confirmation, ConfirmDecision};
pub use output::{
    exit_code, exit_code_with_report, map_error, EXIT_CANCELLED, EXIT_ITEM_FAILURES, EXIT_STARTUP_FAILURE, EXIT_SUCCESS,
};
pub use parse::{
    CheckpointCommands, Cli, Commands, ExecutionArgs, RestrictionArgs, SelectionArgs,
};
pub use route::RunContext;
