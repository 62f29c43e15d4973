//! CLI command modules.

pub mod fs;
pub mod http;
pub mod status;
