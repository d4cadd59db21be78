// Runners Module
// Execution of the external programs the pipeline delegates to

pub mod command;

pub use command::{CommandError, CommandOutput, ExternalCommand};
