//! Workflow execution engine.
//!
//! - **Submission**: turns submissions into executions, now or on a schedule
//! - **Dispatcher**: resolves inputs and sends the active step to its worker
//! - **Native**: built-in `if` / `abort` steps run in-process
//! - **Response**: merges worker outputs and advances the workflow

pub mod context;
pub mod dispatcher;
pub mod messages;
pub mod native;
pub mod resolver;
pub mod response;
pub mod state;
pub mod submission;
pub mod value;


pub use context::EngineContext;
pub use dispatcher::StepDispatcher;
pub use response::ResponseHandler;
pub use state::{Execution, State, Status, Step};
pub use submission::SubmissionHandler;
pub use value::Value;
