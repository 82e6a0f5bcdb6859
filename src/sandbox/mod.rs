//! Sandboxed execution of generated code.
//!
//! - [`guard`]: refuses dependency installation and non-stdlib imports
//! - [`executor`]: runs commands in killable process groups, with a probe
//!   mode for servers

pub mod executor;
pub mod guard;

pub use executor::{
    CommandSpec, ExecutionOutcome, Liveness, ProbeOutcome, ProbeSpec, ProbeState, RunningProcess,
    SandboxExecutor,
};
pub use guard::{extract_imports, local_python_modules, DependencyGuard, GuardVerdict};
