//! Pipeline orchestration.

mod coordinator;
mod driver;
mod pool;

pub use coordinator::{RunLayout, grid_path, new_run_id, output_dir_for};
pub use driver::{GridSettings, PipelineDriver, RunSummary, infer, prepare_grid};
pub use pool::{TaskOutcome, WorkerPool};
