//! Pure threshold and precedence rules over stored timestamps.
//!
//! Everything here is a function of the timestamps and `now`; the engine
//! supplies both.

use chrono::{DateTime, Duration, Utc};

use crate::config::WebhookPrecedence;

/// A target is active while its last successful probe is within `threshold`.
pub fn is_active(last_probe: Option<DateTime<Utc>>, threshold: Duration, now: DateTime<Utc>) -> bool {
    match last_probe {
        Some(at) => now - at <= threshold,
        None => false,
    }
}

/// A webhook is stale when none was ever committed or it is older than `threshold`.
pub fn webhook_is_stale(
    last_webhook: Option<DateTime<Utc>>,
    threshold: Duration,
    now: DateTime<Utc>,
) -> bool {
    match last_webhook {
        Some(at) => now - at > threshold,
        None => true,
    }
}

/// A probe may override the cached state only with information newer than
/// the last webhook.
pub fn probe_confirms_after_webhook(
    last_probe: Option<DateTime<Utc>>,
    last_webhook: Option<DateTime<Utc>>,
) -> bool {
    match (last_probe, last_webhook) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(probe), Some(webhook)) => probe > webhook,
    }
}

/// Whether this heartbeat should run a probe at all.
pub fn should_probe(
    precedence: WebhookPrecedence,
    last_webhook: Option<DateTime<Utc>>,
    threshold: Duration,
    now: DateTime<Utc>,
) -> bool {
    match precedence {
        WebhookPrecedence::Suppress => webhook_is_stale(last_webhook, threshold, now),
        WebhookPrecedence::Always => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_active_window_fifteen_minutes() {
        let threshold = Duration::minutes(15);
        assert!(!is_active(None, threshold, t0()));

        let probe = Some(t0());
        assert!(is_active(probe, threshold, t0()));
        assert!(is_active(probe, threshold, t0() + Duration::minutes(14)));
        assert!(is_active(probe, threshold, t0() + Duration::minutes(15)));
        assert!(!is_active(probe, threshold, t0() + Duration::minutes(15) + Duration::seconds(1)));
    }

    #[test]
    fn test_webhook_staleness() {
        let threshold = Duration::minutes(15);
        assert!(webhook_is_stale(None, threshold, t0()));
        assert!(!webhook_is_stale(Some(t0()), threshold, t0() + Duration::minutes(10)));
        assert!(webhook_is_stale(Some(t0()), threshold, t0() + Duration::minutes(16)));
    }

    #[test]
    fn test_probe_webhook_ordering() {
        let earlier = Some(t0());
        let later = Some(t0() + Duration::seconds(1));

        assert!(probe_confirms_after_webhook(None, None));
        assert!(probe_confirms_after_webhook(earlier, None));
        assert!(!probe_confirms_after_webhook(None, earlier));
        assert!(probe_confirms_after_webhook(later, earlier));
        assert!(!probe_confirms_after_webhook(earlier, later));
        // same instant is not "after"
        assert!(!probe_confirms_after_webhook(earlier, earlier));
    }

    #[test]
    fn test_precedence_policies() {
        let threshold = Duration::minutes(15);
        let fresh = Some(t0());
        let now = t0() + Duration::minutes(1);

        assert!(!should_probe(WebhookPrecedence::Suppress, fresh, threshold, now));
        assert!(should_probe(WebhookPrecedence::Suppress, None, threshold, now));
        assert!(should_probe(WebhookPrecedence::Always, fresh, threshold, now));
    }
}
