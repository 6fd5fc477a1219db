//! Library side of the `bastion` save directory tool.

pub mod commands;
pub mod logging;
