pub const MAX_WORKERS: usize = 64;

pub const WORKERS_ENV: &str = "CODEFAM_WORKERS";

/// One worker per available core.
#[must_use]
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, MAX_WORKERS)
}

/// Blank or unparsable values fall back to `default_value`; everything is
/// clamped to `1..=MAX_WORKERS`.
#[must_use]
pub fn parse_workers(raw: Option<&str>, default_value: usize) -> usize {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default_value)
        .clamp(1, MAX_WORKERS)
}
