#[cfg(feature = "metrics")]
use std::time::Instant;

/// Runs given pass, logging how long it took when the `metrics` feature is
/// enabled.
#[cfg(feature = "metrics")]
pub fn measure<T>(label: &str, f: impl FnOnce() -> T) -> T {
    let tt = Instant::now();
    let result = f();

    log::trace!(
        "{label}: {}",
        humantime::format_duration(tt.elapsed())
    );

    result
}

#[cfg(not(feature = "metrics"))]
pub fn measure<T>(_: &str, f: impl FnOnce() -> T) -> T {
    f()
}
