pub mod usage;
pub mod utils;

pub use usage::run_command;
