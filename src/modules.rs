pub mod commands;
pub mod deletion;
pub mod files;
pub mod session;
