//! CLI argument parsing.

mod args;
pub mod validators;

pub use args::{
    AggregateArgs, AlertsArgs, Cli, Command, ConfigAction, FetchArgs, GlobalArgs, GridArgs,
    InferenceArgs, RunArgs, SyncAction, SyncArgs,
};
