//! Slack request signature verification (`v0` scheme).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Requests older than this are rejected outright (replay window).
pub const MAX_TIMESTAMP_SKEW_SECONDS: i64 = 5 * 60;

/// Verify an `X-Slack-Signature` header against the raw request body.
///
/// `timestamp` is the `X-Slack-Request-Timestamp` header, `now_unix` the
/// current wall clock in seconds. The comparison runs in constant time.
pub fn verify_signature(
    signing_secret: &str,
    timestamp: &str,
    body: &str,
    signature: &str,
    now_unix: i64,
) -> bool {
    let Ok(request_time) = timestamp.parse::<i64>() else {
        return false;
    };
    if (now_unix - request_time).abs() > MAX_TIMESTAMP_SKEW_SECONDS {
        return false;
    }

    let Some(provided_hex) = signature.strip_prefix("v0=") else {
        return false;
    };
    let Some(provided) = decode_hex(provided_hex) else {
        return false;
    };

    let base_string = format!("v0:{timestamp}:{body}");
    let Ok(mut mac) = HmacSha256::new_from_slice(signing_secret.as_bytes()) else {
        return false;
    };
    mac.update(base_string.as_bytes());
    mac.verify_slice(&provided).is_ok()
}

/// Render the signature header value for a body. Counterpart of
/// [`verify_signature`]; handy for exercising the events endpoint.
pub fn sign_body(signing_secret: &str, timestamp: &str, body: &str) -> Option<String> {
    let base_string = format!("v0:{timestamp}:{body}");
    let mut mac = HmacSha256::new_from_slice(signing_secret.as_bytes()).ok()?;
    mac.update(base_string.as_bytes());
    let digest = mac.finalize().into_bytes();
    let mut rendered = String::with_capacity(3 + digest.len() * 2);
    rendered.push_str("v0=");
    for byte in digest {
        rendered.push_str(&format!("{byte:02x}"));
    }
    Some(rendered)
}

fn decode_hex(raw: &str) -> Option<Vec<u8>> {
    if raw.len() % 2 != 0 {
        return None;
    }
    let bytes = raw.as_bytes();
    let mut decoded = Vec::with_capacity(raw.len() / 2);
    for pair in bytes.chunks(2) {
        let high = hex_value(pair[0])?;
        let low = hex_value(pair[1])?;
        decoded.push((high << 4) | low);
    }
    Some(decoded)
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{sign_body, verify_signature, MAX_TIMESTAMP_SKEW_SECONDS};

    const SECRET: &str = "8f742231b10e8888abcd99yyyzzz85a5";
    const BODY: &str = "{\"type\":\"event_callback\"}";

    #[test]
    fn signed_body_verifies() {
        let now = 1_735_689_600_i64;
        let timestamp = now.to_string();
        let signature = sign_body(SECRET, &timestamp, BODY).expect("sign");
        assert!(verify_signature(SECRET, &timestamp, BODY, &signature, now));
    }

    #[test]
    fn wrong_secret_or_body_fails() {
        let now = 1_735_689_600_i64;
        let timestamp = now.to_string();
        let signature = sign_body(SECRET, &timestamp, BODY).expect("sign");
        assert!(!verify_signature(
            "different-secret",
            &timestamp,
            BODY,
            &signature,
            now
        ));
        assert!(!verify_signature(
            SECRET,
            &timestamp,
            "{\"tampered\":true}",
            &signature,
            now
        ));
    }

    #[test]
    fn stale_timestamps_are_rejected() {
        let now = 1_735_689_600_i64;
        let stale = now - MAX_TIMESTAMP_SKEW_SECONDS - 1;
        let timestamp = stale.to_string();
        let signature = sign_body(SECRET, &timestamp, BODY).expect("sign");
        assert!(!verify_signature(SECRET, &timestamp, BODY, &signature, now));
    }

    #[test]
    fn malformed_headers_are_rejected() {
        let now = 1_735_689_600_i64;
        let timestamp = now.to_string();
        assert!(!verify_signature(SECRET, "not-a-number", BODY, "v0=aa", now));
        assert!(!verify_signature(SECRET, &timestamp, BODY, "missing-prefix", now));
        assert!(!verify_signature(SECRET, &timestamp, BODY, "v0=zz", now));
    }
}
