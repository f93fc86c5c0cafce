use crate::error::Error;

#[allow(clippy::module_name_repetitions)] // For conistency with other modules.
pub fn register_metrics() {
    metrics::describe_counter!(
        "filekeeper_uploads_total",
        "Number of files stored."
    );
    metrics::describe_counter!(
        "filekeeper_upload_failures_total",
        "Number of rejected or failed uploads, by reason."
    );
    metrics::describe_counter!(
        "filekeeper_deleted_files_total",
        "Number of files removed by confirmed deletions."
    );
    metrics::describe_counter!(
        "filekeeper_registrations_total",
        "Number of users seen for the first time."
    );

    // Constant metrics

    // filekeeper_start_time_seconds
    metrics::describe_gauge!(
        "filekeeper_start_time_seconds",
        "Unix timestamp of the bot start time."
    );
    metrics::gauge!(
        "filekeeper_start_time_seconds",
        std::time::UNIX_EPOCH.elapsed().unwrap_or_default().as_secs_f64(),
    );

    // filekeeper_build_info
    metrics::describe_gauge!(
        "filekeeper_build_info",
        "A metric with a constant '1' value with the build information."
    );
    metrics::gauge!(
        "filekeeper_build_info",
        1.0,
        "revision" => crate::version(),
    );
}

pub fn upload_stored() {
    metrics::increment_counter!("filekeeper_uploads_total");
}

pub fn upload_failed(error: &Error) {
    metrics::increment_counter!(
        "filekeeper_upload_failures_total",
        "reason" => error.kind(),
    );
}

pub fn files_deleted(count: u64) {
    metrics::counter!("filekeeper_deleted_files_total", count);
}

pub fn user_registered() {
    metrics::increment_counter!("filekeeper_registrations_total");
}
