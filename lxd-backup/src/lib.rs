pub mod cli;
pub mod load_config;

pub use cli::{execute, run, Action, Cli, RunReport};
