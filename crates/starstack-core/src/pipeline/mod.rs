pub mod batch;
pub mod combine;
pub mod config;
pub mod orchestrator;
pub mod postprocess;
pub mod preprocess;
pub mod types;

pub use combine::{run_combine, CombineMode};
pub use config::PipelineConfig;
pub use orchestrator::{run_stack, run_stats, StackOutput};
pub use types::{PipelineStage, ProgressReporter, SilentReporter};
