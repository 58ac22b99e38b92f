//! Freshness classification of a credential against a point in time.

use std::time::Duration;

use {
    chrono::{DateTime, TimeDelta, Utc},
    secrecy::ExposeSecret,
    serde::Serialize,
};

use crate::types::Credential;

/// Tokens with this much lifetime or less are refreshed ahead of time.
pub const DEFAULT_MIN_LIFETIME: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    /// Usable as-is, no I/O needed.
    Fresh,
    /// Refreshable and inside the `min_lifetime` window (or expiry unknown).
    NeedsRefresh,
    /// Past expiry with no refresh token. Terminal.
    Expired,
}

/// Classify `credential` at `now`.
///
/// An unknown expiry or empty access token forces a refresh when one is
/// possible. Without a refresh token the access token is used until its
/// expiry passes, after which the state is terminal.
pub fn classify(credential: &Credential, now: DateTime<Utc>, min_lifetime: Duration) -> TokenState {
    let window = TimeDelta::from_std(min_lifetime).unwrap_or(TimeDelta::MAX);
    let expiry = credential
        .expiry
        .filter(|_| !credential.access_token.expose_secret().is_empty());

    match (expiry, credential.has_refresh_token()) {
        (None, false) => TokenState::Expired,
        (None, true) => TokenState::NeedsRefresh,
        (Some(at), false) if at <= now => TokenState::Expired,
        (Some(_), false) => TokenState::Fresh,
        (Some(at), true) if at.signed_duration_since(now) <= window => TokenState::NeedsRefresh,
        (Some(_), true) => TokenState::Fresh,
    }
}

/// Whole seconds until expiry; negative once expired, `None` when unknown.
pub fn seconds_until_expiry(credential: &Credential, now: DateTime<Utc>) -> Option<i64> {
    credential
        .expiry
        .map(|at| at.signed_duration_since(now).num_seconds())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        chrono::TimeZone,
        rstest::rstest,
        secrecy::Secret,
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn credential(expires_in: Option<i64>, refresh: Option<&str>) -> Credential {
        Credential {
            access_token: Secret::new("a1".into()),
            refresh_token: refresh.map(|r| Secret::new(r.to_string())),
            expiry: expires_in.map(|s| now() + TimeDelta::seconds(s)),
            client_id: "cid".into(),
            client_secret: Secret::new("secret".into()),
            token_endpoint: "https://auth.calendly.com/oauth/token".into(),
            scope: String::new(),
        }
    }

    #[rstest]
    #[case::long_lived(Some(3600), Some("r1"), TokenState::Fresh)]
    #[case::just_outside_window(Some(301), Some("r1"), TokenState::Fresh)]
    #[case::at_window_edge(Some(300), Some("r1"), TokenState::NeedsRefresh)]
    #[case::inside_window(Some(10), Some("r1"), TokenState::NeedsRefresh)]
    #[case::already_expired(Some(-10), Some("r1"), TokenState::NeedsRefresh)]
    #[case::unknown_expiry(None, Some("r1"), TokenState::NeedsRefresh)]
    #[case::expired_no_refresh(Some(-1), None, TokenState::Expired)]
    #[case::expiring_now_no_refresh(Some(0), None, TokenState::Expired)]
    #[case::unknown_no_refresh(None, None, TokenState::Expired)]
    #[case::valid_no_refresh(Some(60), None, TokenState::Fresh)]
    #[case::empty_refresh_token(Some(-5), Some(""), TokenState::Expired)]
    fn classification(
        #[case] expires_in: Option<i64>,
        #[case] refresh: Option<&str>,
        #[case] expected: TokenState,
    ) {
        assert_eq!(
            classify(&credential(expires_in, refresh), now(), DEFAULT_MIN_LIFETIME),
            expected
        );
    }

    #[test]
    fn custom_window() {
        let cred = credential(Some(900), Some("r1"));
        assert_eq!(
            classify(&cred, now(), Duration::from_secs(600)),
            TokenState::Fresh
        );
        assert_eq!(
            classify(&cred, now(), Duration::from_secs(900)),
            TokenState::NeedsRefresh
        );
    }

    #[test]
    fn empty_access_token_is_never_fresh() {
        let mut cred = credential(Some(3600), Some("r1"));
        cred.access_token = Secret::new(String::new());
        assert_eq!(
            classify(&cred, now(), DEFAULT_MIN_LIFETIME),
            TokenState::NeedsRefresh
        );
        cred.refresh_token = None;
        assert_eq!(
            classify(&cred, now(), DEFAULT_MIN_LIFETIME),
            TokenState::Expired
        );
    }

    #[test]
    fn seconds_remaining() {
        assert_eq!(
            seconds_until_expiry(&credential(Some(90), None), now()),
            Some(90)
        );
        assert_eq!(
            seconds_until_expiry(&credential(Some(-30), None), now()),
            Some(-30)
        );
        assert_eq!(seconds_until_expiry(&credential(None, None), now()), None);
    }
}
