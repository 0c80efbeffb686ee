//! Bulk execution: operation descriptors, the batch executor and the
//! handlers it drives (real mutations and dry-run predictions).

pub mod dry_run;
pub mod executor;
pub mod mutation;
pub mod operation;
pub mod run;

pub use dry_run::DryRunSimulator;
pub use executor::{
    ActiveCheckpoint, BatchCommit, BatchExecutor, BatchHandler, CancelToken, ExecutionOptions,
    NoopObserver, RunObserver, RunOutcome, RunStatus,
};
pub use mutation::MutationHandler;
pub use operation::{OperationDescriptor, OperationKind, Prediction};
pub use run::{prepare_checkpoint, run_bulk, BulkRun, CheckpointSettings};
