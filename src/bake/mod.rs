//! Turning composed sources into compiled artifacts.

pub mod compiler;
pub mod config;
pub mod debounce;
pub mod scheduler;
pub mod validation;
pub mod workspace;

pub use compiler::{BakeJob, BakeVariant, JobOutcome, NagaCompiler, ProcessCompiler, ShaderCompiler};
pub use config::{BakeConfig, TargetConfig, load_bake_config};
pub use scheduler::{BakeScheduler, BakeState, BakeStatus};
