//! Constant-time credential checks for inbound requests.
//!
//! Two independent checks: the Slack signed-request scheme (HMAC-SHA256
//! over `v0:{timestamp}:{body}` with a replay window) and the shared-secret
//! header that our own GitHub Actions workflow sends back on the webhook
//! path. Both return plain booleans; malformed input is a failed
//! verification, never an error.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Requests with a timestamp further than this from now are rejected as
/// replays, matching Slack's documented guidance.
pub const REPLAY_WINDOW_SECS: i64 = 300;

/// Verify a Slack signed request.
///
/// Recomputes `v0=hex(hmac_sha256(secret, "v0:{timestamp}:{body}"))` and
/// compares against the provided `X-Slack-Signature` value in constant
/// time. `now` is injected (unix seconds) so the replay window is testable.
pub fn verify_slack_signature(
    signing_secret: &str,
    timestamp: &str,
    body: &str,
    signature: &str,
    now: i64,
) -> bool {
    let ts: i64 = match timestamp.trim().parse() {
        Ok(t) => t,
        Err(_) => return false,
    };
    // Checked arithmetic: an extreme attacker-supplied timestamp must be a
    // failed verification, not an overflow panic.
    let skew = match now.checked_sub(ts) {
        Some(d) => d.unsigned_abs(),
        None => return false,
    };
    if skew > REPLAY_WINDOW_SECS as u64 {
        return false;
    }

    let mut mac = match HmacSha256::new_from_slice(signing_secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(format!("v0:{}:{}", timestamp.trim(), body).as_bytes());
    let expected = format!("v0={}", hex::encode(mac.finalize().into_bytes()));

    constant_time_str_eq(&expected, signature)
}

/// Verify the shared-secret webhook header in constant time.
pub fn verify_webhook_secret(expected: &str, provided: &str) -> bool {
    if expected.is_empty() {
        // An unset secret must never mean "accept everything".
        return false;
    }
    constant_time_str_eq(expected, provided)
}

fn constant_time_str_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    // ct_eq requires equal lengths; the early return leaks only the length,
    // which the signature format already makes public.
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
