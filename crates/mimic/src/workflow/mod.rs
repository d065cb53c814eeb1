//! Trigger-bound workflows.
//!
//! A workflow is a list of steps started by an HTTP request, an incoming mail,
//! a schedule or by name. Each step either invokes a registered [`Action`]
//! (`uses`) or runs a shell script (`run`); conditions, inputs and environment
//! values are `${{ }}` templates of the [expression language](crate::expr).
//!
//! ```yaml
//! workflows:
//!   - name: greet
//!     on:
//!       http:
//!         - method: POST
//!           path: /greet/*
//!     steps:
//!       - id: s1
//!         run: echo "::set-output name=greet::hello"
//!       - uses: log
//!         if: ${{ steps.s1.outputs.greet == 'hello' }}
//!         with:
//!           message: ${{ steps.s1.outputs.greet }} world
//! ```

mod action;
mod context;
mod runtime;
mod scheduler;
mod shell;
mod trigger;
mod types;


pub use action::{Action, ActionError, ActionInput, ActionOutput, Actions, LogAction, SetOutputAction};
pub use context::{Context, Scope};
pub use runtime::{RunOptions, Runtime, Status, StepSummary, Summary, WorkflowSummary};
pub use scheduler::Scheduler;
pub use shell::{collect_output, parse_output_line};
pub use trigger::{match_address, match_path, Event, Trigger};
pub use types::{parse_every, HttpTrigger, ScheduleTrigger, Shell, SmtpTrigger, Step, Triggers, Workflow};
