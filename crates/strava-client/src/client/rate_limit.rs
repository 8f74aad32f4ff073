// Strava rate limit header parsing
//
// Strava reports two windows in every response:
//   X-RateLimit-Limit: 200,2000   (15-minute limit, daily limit)
//   X-RateLimit-Usage: 201,1500   (15-minute usage, daily usage)
// The short window resets on the quarter hour.

use chrono::{DateTime, Timelike, Utc};
use reqwest::header::HeaderMap;
use std::time::Duration;

/// Rate limit state parsed from Strava response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub short_term_limit: u32,
    pub short_term_usage: u32,
    pub daily_limit: u32,
    pub daily_usage: u32,
}

impl RateLimitInfo {
    /// Parse the `X-RateLimit-Limit` / `X-RateLimit-Usage` header pair.
    ///
    /// Returns `None` when either header is absent or malformed.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let limit = headers.get("x-ratelimit-limit")?.to_str().ok()?;
        let usage = headers.get("x-ratelimit-usage")?.to_str().ok()?;

        let (short_term_limit, daily_limit) = parse_pair(limit)?;
        let (short_term_usage, daily_usage) = parse_pair(usage)?;

        Some(Self {
            short_term_limit,
            short_term_usage,
            daily_limit,
            daily_usage,
        })
    }

    /// Whether the daily allowance is used up.
    pub fn is_daily_exhausted(&self) -> bool {
        self.daily_usage >= self.daily_limit
    }

    /// Time until the next 15-minute window opens.
    pub fn time_until_window_reset(&self) -> Duration {
        time_until_quarter_hour(Utc::now())
    }
}

fn parse_pair(value: &str) -> Option<(u32, u32)> {
    let mut parts = value.split(',').map(|p| p.trim().parse::<u32>());
    let first = parts.next()?.ok()?;
    let second = parts.next()?.ok()?;
    Some((first, second))
}

fn time_until_quarter_hour(now: DateTime<Utc>) -> Duration {
    let seconds_into_window = (now.minute() % 15) * 60 + now.second();
    Duration::from_secs(u64::from(15 * 60 - seconds_into_window))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_parses_both_windows() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-limit", HeaderValue::from_static("200,2000"));
        headers.insert("x-ratelimit-usage", HeaderValue::from_static("201,1500"));

        let info = RateLimitInfo::from_headers(&headers).unwrap();
        assert_eq!(info.short_term_limit, 200);
        assert_eq!(info.short_term_usage, 201);
        assert_eq!(info.daily_limit, 2000);
        assert_eq!(info.daily_usage, 1500);
        assert!(!info.is_daily_exhausted());
    }

    #[test]
    fn test_missing_or_malformed_headers() {
        let mut headers = HeaderMap::new();
        assert!(RateLimitInfo::from_headers(&headers).is_none());

        headers.insert("x-ratelimit-limit", HeaderValue::from_static("200"));
        headers.insert("x-ratelimit-usage", HeaderValue::from_static("10,20"));
        assert!(RateLimitInfo::from_headers(&headers).is_none());
    }

    #[test]
    fn test_window_reset_is_on_quarter_hour() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 7, 30).unwrap();
        assert_eq!(time_until_quarter_hour(now), Duration::from_secs(450));

        let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 0).unwrap();
        assert_eq!(time_until_quarter_hour(now), Duration::from_secs(900));
    }
}
