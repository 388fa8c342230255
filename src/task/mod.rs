//! Task domain — state machine and attempt records.
//!
//! - `state` — the bounded task state machine (Todo → InProgress → …)
//! - `model` — Task, Attempt, ProjectRef, AttemptOutcome

pub mod model;
pub mod state;

pub use model::{Attempt, AttemptOutcome, ProjectRef, Task};
pub use state::TaskState;
