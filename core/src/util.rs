use rand::Rng;
use std::time::Duration;

/// Shortens `s` to at most `max` characters, keeping both ends.
pub fn truncate_middle(s: &str, max: usize) -> String {
    let len = s.chars().count();
    if len <= max {
        return s.into();
    }
    let keep = max.saturating_sub(3) / 2;
    let head: String = s.chars().take(keep).collect();
    let tail: String = s.chars().skip(len - keep).collect();
    format!("{head}...{tail}")
}

/// Exponential delay before retry number `attempt` (0-based), capped at `max`.
pub fn backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(16));
    base.saturating_mul(factor).min(max)
}

/// `backoff` with equal jitter: half the delay is fixed, half is random.
pub fn backoff_with_jitter(attempt: u32, base: Duration, max: Duration) -> Duration {
    let delay = backoff(attempt, base, max);
    let half = delay / 2;
    let half_ms = u64::try_from(half.as_millis()).unwrap_or(u64::MAX);
    if half_ms == 0 {
        return delay;
    }
    let jitter = rand::thread_rng().gen_range(0..=half_ms);
    half + Duration::from_millis(jitter)
}
