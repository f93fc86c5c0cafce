use std::fmt::Debug;

/// Log errors that are handled by carrying on.
pub trait ResultExt<T> {
    /// Log the error, if any, and hand the result back unchanged.
    fn log_error(&self, msg: &str) -> &Self;

    /// Log the error, if any, and keep only the success value.
    fn log_ok(self, msg: &str) -> Option<T>;

    /// Like [`Self::log_ok`] for failures that are expected now and then.
    fn warn_ok(self, msg: &str) -> Option<T>;
}

impl<T, E: Debug> ResultExt<T> for Result<T, E> {
    fn log_error(&self, msg: &str) -> &Self {
        if let Err(e) = self {
            log::error!("{msg}: {e:?}");
        }
        self
    }

    fn log_ok(self, msg: &str) -> Option<T> {
        self.map_err(|e| log::error!("{msg}: {e:?}")).ok()
    }

    fn warn_ok(self, msg: &str) -> Option<T> {
        self.map_err(|e| log::warn!("{msg}: {e:?}")).ok()
    }
}
