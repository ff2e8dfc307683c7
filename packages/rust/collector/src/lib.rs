//! Supervised invocation of external per-site collector processes.
//!
//! Each work unit is handed to one independent collector process, launched
//! in its own process group with a hard timeout. Expected failure modes
//! (non-zero exit, timeout) come back as structured [`InvokeOutcome`]s —
//! the invoker never propagates them as errors, so one broken site can
//! never abort its siblings.

mod invoker;
mod output;
mod pressure;
mod process;

pub use invoker::{CollectorCommand, InvokeOutcome, InvokeStatus, Invoker};
pub use output::{
    CollectorReport, ParsedOutput, RESULT_BEGIN, RESULT_END, SummaryCounters, parse_stdout,
};
pub use pressure::wait_for_headroom;
pub use process::GroupChild;
