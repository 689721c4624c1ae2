//! Chain model and interpreter.
//!
//! `definition` is the JSON-facing model; `validate` checks it; `macros`
//! expands `{{…}}` tokens before execution; `template` renders the
//! variable-map templates; `transition` and `compose` implement branch
//! selection and output composition; `interp` drives the whole state
//! machine.

pub mod compose;
pub mod definition;
pub mod interp;
pub mod macros;
pub mod template;
pub mod transition;
pub mod validate;

pub use definition::{
    BranchCompose, ComposeStrategy, ExecuteConfig, HandlerKind, HookCall, TaskChainDefinition,
    TaskDefinition, TaskTransition, TransitionBranch, TransitionOperator, END,
};
pub use interp::{ChainFailure, ChainOutcome, ChainRunner, LogPrintSink, PrintSink};
pub use macros::expand_chain;
pub use validate::{
    handler_output_type, validate_chain, validate_terminal_profile, ChainValidationError,
};
