mod log_error;

pub use log_error::ResultExt;
