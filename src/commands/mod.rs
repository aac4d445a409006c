//! CLI command implementations.
//!
//! Each submodule implements a smith command with pure core logic
//! separated from IO for testability.

pub mod clean;
pub mod doctor;
pub mod init;
pub mod run;
pub mod status;
