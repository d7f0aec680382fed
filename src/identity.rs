//! Identity correlation for attribution.
//!
//! Each checkout captures whatever browser identifiers arrived with the
//! request and fills the gaps with synthesized values in the same cookie
//! format, so every order carries a complete identity by the time the
//! attribution event is built.

use std::net::SocketAddr;

use axum::http::{header, HeaderMap};
use rand::Rng;

/// Browser-side identifiers tied to one checkout request.
#[derive(Debug, Clone, Default)]
pub struct ClientIdentity {
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    /// Click cookie (`fb.1.<ts>.<clickthrough>`), supplied or synthesized.
    pub click_id: Option<String>,
    /// Browser cookie (`fb.1.<ts>.<random>`), supplied or synthesized.
    pub browser_id: Option<String>,
    /// Raw clickthrough parameter from the landing URL, kept verbatim.
    pub clickthrough_id: Option<String>,
}

/// Resolve the full identity for a request. Values the browser sent always
/// win; synthesis only fills what is missing.
pub fn correlate(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    clickthrough_id: Option<String>,
    browser_id: Option<String>,
    click_id: Option<String>,
    now: i64,
) -> ClientIdentity {
    let clickthrough_id = non_empty(clickthrough_id);
    let browser_id =
        non_empty(browser_id).unwrap_or_else(|| synthesize_browser_id(now));
    let click_id = non_empty(click_id).or_else(|| {
        clickthrough_id
            .as_deref()
            .map(|c| synthesize_click_id(now, c))
    });

    ClientIdentity {
        client_ip: client_ip(headers, peer),
        user_agent: header_value(headers, header::USER_AGENT),
        click_id,
        browser_id: Some(browser_id),
        clickthrough_id,
    }
}

/// Pick the client address the way an edge proxy reports it:
/// `X-Forwarded-For` (first hop) first, then `X-Real-IP`, then the peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return Some(first.to_string());
            }
        }
    }
    if let Some(real) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real = real.trim();
        if !real.is_empty() {
            return Some(real.to_string());
        }
    }
    peer.map(|addr| addr.ip().to_string())
}

/// Browser id in cookie format: `fb.1.<unix_seconds>.<10-digit random>`.
pub fn synthesize_browser_id(now: i64) -> String {
    let random: u64 = rand::thread_rng().gen_range(1_000_000_000..10_000_000_000);
    format!("fb.1.{now}.{random}")
}

/// Click id in cookie format, carrying the clickthrough parameter.
pub fn synthesize_click_id(now: i64, clickthrough: &str) -> String {
    format!("fb.1.{now}.{clickthrough}")
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> Option<SocketAddr> {
        Some("10.0.0.7:55123".parse().unwrap())
    }

    #[test]
    fn forwarded_header_beats_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "198.51.100.4".parse().unwrap());
        assert_eq!(client_ip(&headers, peer()).as_deref(), Some("203.0.113.9"));
    }

    #[test]
    fn real_ip_beats_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "198.51.100.4".parse().unwrap());
        assert_eq!(client_ip(&headers, peer()).as_deref(), Some("198.51.100.4"));
    }

    #[test]
    fn peer_is_the_fallback() {
        let headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, peer()).as_deref(), Some("10.0.0.7"));
        assert_eq!(client_ip(&headers, None), None);
    }

    #[test]
    fn supplied_identifiers_win() {
        let identity = correlate(
            &HeaderMap::new(),
            None,
            Some("abc123".into()),
            Some("fb.1.1700000000.1234567890".into()),
            Some("fb.1.1700000000.abc123".into()),
            1_800_000_000,
        );
        assert_eq!(
            identity.browser_id.as_deref(),
            Some("fb.1.1700000000.1234567890")
        );
        assert_eq!(
            identity.click_id.as_deref(),
            Some("fb.1.1700000000.abc123")
        );
        assert_eq!(identity.clickthrough_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn missing_browser_id_is_synthesized() {
        let identity = correlate(&HeaderMap::new(), None, None, None, None, 1_700_000_123);
        let browser = identity.browser_id.unwrap();
        let parts: Vec<&str> = browser.split('.').collect();
        assert_eq!(parts[0], "fb");
        assert_eq!(parts[1], "1");
        assert_eq!(parts[2], "1700000123");
        assert_eq!(parts[3].len(), 10);
        assert!(parts[3].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn click_id_synthesized_only_from_clickthrough() {
        let with = correlate(
            &HeaderMap::new(),
            None,
            Some("IwAR2xyz".into()),
            None,
            None,
            1_700_000_123,
        );
        assert_eq!(with.click_id.as_deref(), Some("fb.1.1700000123.IwAR2xyz"));

        let without = correlate(&HeaderMap::new(), None, None, None, None, 1_700_000_123);
        assert_eq!(without.click_id, None);
    }

    #[test]
    fn blank_values_count_as_missing() {
        let identity = correlate(
            &HeaderMap::new(),
            None,
            Some("  ".into()),
            Some(String::new()),
            None,
            1_700_000_123,
        );
        assert_eq!(identity.clickthrough_id, None);
        assert_eq!(identity.click_id, None);
        assert!(identity.browser_id.unwrap().starts_with("fb.1.1700000123."));
    }
}
