//! Shared metrics recording for storage backends.

use std::time::Instant;

/// Records operation metrics for a storage operation.
///
/// Emits `storage_operations_total` (counter) and
/// `storage_operation_duration_ms` (histogram), both labelled by backend,
/// operation and status.
pub fn record_operation_metrics(
    backend: &'static str,
    operation: &'static str,
    start: Instant,
    status: &'static str,
) {
    metrics::counter!(
        "storage_operations_total",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "storage_operation_duration_ms",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}

/// Runs `op`, then records its duration and outcome.
pub fn timed<T>(
    backend: &'static str,
    operation: &'static str,
    op: impl FnOnce() -> crate::Result<T>,
) -> crate::Result<T> {
    let start = Instant::now();
    let result = op();
    let status = if result.is_ok() { "success" } else { "error" };
    record_operation_metrics(backend, operation, start, status);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_record_operation_metrics_timing() {
        let start = Instant::now();
        thread::sleep(Duration::from_millis(10));

        record_operation_metrics("sqlite", "append", start, "success");

        assert!(start.elapsed().as_millis() >= 10);
    }

    #[test]
    fn test_timed_passes_result_through() {
        let ok = timed("memory", "read", || Ok(3));
        assert_eq!(ok.unwrap(), 3);

        let err: crate::Result<()> = timed("memory", "read", || {
            Err(crate::Error::backend("read", "boom"))
        });
        assert!(err.is_err());
    }
}
