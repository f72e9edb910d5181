//! Keyed-hash verification for inbound webhooks.
//!
//! Two header formats are in play: the message provider signs the raw
//! request body as `sha256=<hex>`, and the escalation channel signs
//! `v0:<timestamp>:<body>` as `v0=<hex>` with a replay window on the
//! timestamp. Both verifiers are pure functions that return `false` for
//! any malformed input rather than erroring.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Callback signatures older than this are rejected even when the hash
/// itself is valid.
pub const REPLAY_WINDOW_SECS: i64 = 300;

/// Verify the provider signature over the exact raw body bytes.
///
/// The header carries `sha256=<hex of HMAC-SHA256(secret, body)>`.
pub fn verify_provider_signature(secret: &str, body: &[u8], signature_header: &str) -> bool {
    let Some(presented) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    if presented.is_empty() {
        return false;
    }

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let computed = hex::encode(mac.finalize().into_bytes());

    constant_time_eq(&computed, presented)
}

/// Verify the escalation-channel callback signature.
///
/// The signed base string is the byte sequence `v0:<timestamp>:<body>`;
/// the body bytes are fed to the MAC untouched so verification stays
/// byte-exact against the sending deployment. `now_unix` is passed in
/// so the replay check has no hidden clock dependency.
pub fn verify_callback_signature(
    secret: &str,
    timestamp: &str,
    body: &[u8],
    signature_header: &str,
    now_unix: i64,
) -> bool {
    if timestamp.is_empty() || signature_header.is_empty() {
        return false;
    }
    let Ok(sent_at) = timestamp.parse::<i64>() else {
        return false;
    };
    if now_unix - sent_at > REPLAY_WINDOW_SECS {
        return false;
    }

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    let computed = format!("v0={}", hex::encode(mac.finalize().into_bytes()));

    constant_time_eq(&computed, signature_header)
}

/// Constant-time string comparison.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    use super::{
        constant_time_eq, verify_callback_signature, verify_provider_signature,
        REPLAY_WINDOW_SECS,
    };

    const NOW: i64 = 1_700_000_000;

    fn provider_signature(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac key");
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn callback_signature(secret: &str, timestamp: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac key");
        mac.update(format!("v0:{timestamp}:").as_bytes());
        mac.update(body);
        format!("v0={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn provider_signature_valid() {
        let body = br#"{"test":"payload"}"#;
        let header = provider_signature("my-secret", body);
        assert!(verify_provider_signature("my-secret", body, &header));
    }

    #[test]
    fn provider_signature_rejects_bad_hash() {
        assert!(!verify_provider_signature("my-secret", b"body", "sha256=badhash"));
    }

    #[test]
    fn provider_signature_rejects_empty_and_unprefixed_headers() {
        let body = b"body";
        assert!(!verify_provider_signature("my-secret", body, ""));
        assert!(!verify_provider_signature("my-secret", body, "sha256="));
        let unprefixed = provider_signature("my-secret", body).replace("sha256=", "");
        assert!(!verify_provider_signature("my-secret", body, &unprefixed));
    }

    #[test]
    fn provider_signature_rejects_tampered_body() {
        let body = br#"{"test":"payload"}"#;
        let header = provider_signature("my-secret", body);
        assert!(!verify_provider_signature("my-secret", br#"{"test":"TAMPERED"}"#, &header));
    }

    #[test]
    fn provider_signature_rejects_wrong_secret() {
        let body = br#"{"test":"payload"}"#;
        let header = provider_signature("my-secret", body);
        assert!(!verify_provider_signature("my-secreu", body, &header));
    }

    #[test]
    fn callback_signature_valid() {
        let timestamp = NOW.to_string();
        let body = b"payload=test";
        let header = callback_signature("signing-secret", &timestamp, body);
        assert!(verify_callback_signature("signing-secret", &timestamp, body, &header, NOW));
    }

    #[test]
    fn callback_signature_rejects_bad_hash() {
        let timestamp = NOW.to_string();
        assert!(!verify_callback_signature(
            "signing-secret",
            &timestamp,
            b"payload=test",
            "v0=badsig",
            NOW,
        ));
    }

    #[test]
    fn callback_signature_rejects_stale_timestamp_even_when_hash_is_valid() {
        let sent_at = NOW - REPLAY_WINDOW_SECS - 100;
        let timestamp = sent_at.to_string();
        let body = b"payload=test";
        let header = callback_signature("signing-secret", &timestamp, body);
        assert!(!verify_callback_signature("signing-secret", &timestamp, body, &header, NOW));
    }

    #[test]
    fn callback_signature_accepts_timestamp_inside_window() {
        let sent_at = NOW - REPLAY_WINDOW_SECS + 10;
        let timestamp = sent_at.to_string();
        let body = b"payload=test";
        let header = callback_signature("signing-secret", &timestamp, body);
        assert!(verify_callback_signature("signing-secret", &timestamp, body, &header, NOW));
    }

    #[test]
    fn callback_signature_rejects_missing_or_unparsable_timestamp() {
        let body = b"payload=test";
        let header = callback_signature("signing-secret", "not-a-number", body);
        assert!(!verify_callback_signature("signing-secret", "", body, &header, NOW));
        assert!(!verify_callback_signature("signing-secret", "not-a-number", body, &header, NOW));
    }

    #[test]
    fn constant_time_eq_handles_length_mismatch() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
        assert!(!constant_time_eq("", "a"));
    }
}
