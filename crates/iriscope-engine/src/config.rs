use std::env;

/// Environment value trimmed and filtered to non-empty, the way the rest of
/// the pipeline treats optional configuration.
pub(crate) fn non_empty_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Numeric environment override clamped into a sane range; anything
/// unparseable falls back to the default.
pub(crate) fn env_f64(name: &str, default: f64, min: f64, max: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<f64>().ok())
        .map(|value| value.clamp(min, max))
        .unwrap_or(default)
}
