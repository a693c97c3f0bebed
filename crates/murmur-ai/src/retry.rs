//! Retry policy helpers shared by the provider clients.

use chrono::{DateTime, Utc};

pub const BASE_BACKOFF_MS: u64 = 200;

pub fn should_retry_status(status: u16) -> bool {
    status == 408 || status == 409 || status == 425 || status == 429 || status >= 500
}

pub fn next_backoff_ms(attempt: usize) -> u64 {
    let shift = attempt.min(6);
    BASE_BACKOFF_MS.saturating_mul(1_u64 << shift)
}

pub fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let raw = headers.get("retry-after")?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds.saturating_mul(1000));
    }

    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let delay_ms = retry_at.signed_duration_since(Utc::now()).num_milliseconds();
    if delay_ms <= 0 {
        return Some(0);
    }

    u64::try_from(delay_ms).ok()
}

/// Deterministic delay for `attempt`, floored by any `Retry-After` the
/// provider sent.
pub fn retry_delay_ms(attempt: usize, retry_after_ms: Option<u64>) -> u64 {
    let backoff_ms = next_backoff_ms(attempt);
    match retry_after_ms {
        Some(retry_after_ms) => backoff_ms.max(retry_after_ms),
        None => backoff_ms,
    }
}

pub fn is_retryable_http_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use reqwest::header::{HeaderMap, HeaderValue};

    use super::{next_backoff_ms, parse_retry_after_ms, retry_delay_ms, should_retry_status};

    #[test]
    fn retry_status_selection_is_correct() {
        assert!(should_retry_status(429));
        assert!(should_retry_status(503));
        assert!(!should_retry_status(400));
        assert!(!should_retry_status(404));
    }

    #[test]
    fn backoff_increases_per_attempt() {
        assert_eq!(next_backoff_ms(0), 200);
        assert_eq!(next_backoff_ms(1), 400);
        assert_eq!(next_backoff_ms(2), 800);
    }

    #[test]
    fn parse_retry_after_ms_accepts_seconds_and_rejects_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("3"));
        assert_eq!(parse_retry_after_ms(&headers), Some(3_000));

        headers.insert("retry-after", HeaderValue::from_static("not-a-number"));
        assert_eq!(parse_retry_after_ms(&headers), None);
    }

    #[test]
    fn parse_retry_after_ms_accepts_http_dates() {
        let mut headers = HeaderMap::new();
        let raw = (Utc::now() + Duration::seconds(2))
            .to_rfc2822()
            .replace("+0000", "GMT");
        headers.insert(
            "retry-after",
            HeaderValue::from_str(raw.as_str()).expect("retry-after date"),
        );
        let delay = parse_retry_after_ms(&headers).expect("delay from date");
        assert!(delay <= 2_500, "delay should be close to 2s, got {delay}");
    }

    #[test]
    fn retry_delay_honors_retry_after_floor() {
        assert_eq!(retry_delay_ms(0, None), 200);
        assert_eq!(retry_delay_ms(2, Some(100)), 800);
        assert_eq!(retry_delay_ms(0, Some(1_500)), 1_500);
    }
}
