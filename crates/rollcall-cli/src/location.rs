//! Coarse location from an IP geolocation service, fetched once at startup.

use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

const UNKNOWN: &str = "Unknown";

#[derive(Error, Debug)]
enum LookupError {
    #[error("request failed: {0}")]
    Http(#[from] Box<ureq::Error>),
    #[error("reading response: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected response: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct IpInfo {
    city: Option<String>,
    region: Option<String>,
    country: Option<String>,
}

/// "City, Region, Country", or "Unknown" when the lookup failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location(String);

impl Location {
    pub fn unknown() -> Self {
        Self(UNKNOWN.to_string())
    }

    /// One blocking lookup. Any failure degrades to [`Location::unknown`];
    /// nothing is retried.
    pub fn lookup(url: &str, timeout: Duration) -> Self {
        match fetch(url, timeout) {
            Ok(location) => {
                tracing::info!(location = %location, "location resolved");
                location
            }
            Err(e) => {
                tracing::warn!(url, error = %e, "location lookup failed");
                Self::unknown()
            }
        }
    }

    /// Parse an ipinfo-style JSON body. Missing or empty parts read as
    /// "Unknown".
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        let info: IpInfo = serde_json::from_str(body)?;
        let part = |p: Option<String>| {
            p.filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN.to_string())
        };
        Ok(Self(format!(
            "{}, {}, {}",
            part(info.city),
            part(info.region),
            part(info.country)
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn fetch(url: &str, timeout: Duration) -> Result<Location, LookupError> {
    let agent = ureq::AgentBuilder::new().timeout(timeout).build();
    let body = agent.get(url).call().map_err(Box::new)?.into_string()?;
    Ok(Location::from_json(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_response() {
        let body = r#"{"ip":"203.0.113.9","city":"Austin","region":"Texas","country":"US","loc":"30.2,-97.7"}"#;
        assert_eq!(Location::from_json(body).unwrap().as_str(), "Austin, Texas, US");
    }

    #[test]
    fn test_missing_parts_read_unknown() {
        let body = r#"{"country":"DE","city":""}"#;
        assert_eq!(Location::from_json(body).unwrap().as_str(), "Unknown, Unknown, DE");
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(Location::from_json("<html>rate limited</html>").is_err());
    }

    #[test]
    fn test_unreachable_service_degrades() {
        let loc = Location::lookup("http://127.0.0.1:9/json", Duration::from_millis(200));
        assert_eq!(loc, Location::unknown());
        assert_eq!(loc.to_string(), "Unknown");
    }
}
