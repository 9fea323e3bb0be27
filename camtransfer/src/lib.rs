pub mod cli;
pub mod device;
pub mod display;
pub mod keys;
pub mod load_config;
pub mod protect;
pub mod transfer;

pub use cli::{run, Cli, Commands};
