//! Step and job execution engine for crossci.

pub mod cancel;
pub mod container;
pub mod job;
pub mod runner;
pub mod shell;

pub use cancel::{CancelHandle, CancelSignal, cancel_pair};
pub use container::ContainerRunner;
pub use job::{JobExecutor, JobPlan};
pub use runner::{OutputLine, OutputStream, RunnerConfig, StepContext, StepResult, StepRunner};
pub use shell::ShellRunner;
