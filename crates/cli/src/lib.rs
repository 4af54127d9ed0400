//! Building blocks of the `dirwatch` command

pub mod config;
pub mod forward;
pub mod logging;
pub mod output;
