//! Best-effort geolocation of the machine running the agent.

use std::time::Duration;

use serde_json::Value;

use super::scenario::Location;
use crate::error::LocationError;

/// IP geolocation endpoint used by default.
pub const IPINFO_URL: &str = "https://ipinfo.io/json";

/// Source of the scenario location.
///
/// Implementations may block; callers run them on the blocking pool.
pub trait LocationProvider: Send + Sync {
    fn locate(&self) -> Result<Location, LocationError>;
}

/// Looks up the public IP's location over HTTP.
#[derive(Debug, Clone)]
pub struct IpInfoLocator {
    url: String,
    timeout: Duration,
}

impl IpInfoLocator {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }
}

impl Default for IpInfoLocator {
    fn default() -> Self {
        Self::new(IPINFO_URL, Duration::from_secs(3))
    }
}

impl LocationProvider for IpInfoLocator {
    fn locate(&self) -> Result<Location, LocationError> {
        let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();

        let response = agent
            .get(&self.url)
            .set("Accept", "application/json")
            .call()
            .map_err(|e: ureq::Error| LocationError::Request {
                url: self.url.clone(),
                message: e.to_string(),
            })?;

        let body: Value = response.into_json().map_err(|e| LocationError::Malformed {
            message: e.to_string(),
        })?;
        parse_location(&body)
    }
}

/// Location that never changes, for offline setups and tests.
#[derive(Debug, Clone, Default)]
pub struct FixedLocation(pub Location);

impl LocationProvider for FixedLocation {
    fn locate(&self) -> Result<Location, LocationError> {
        Ok(self.0.clone())
    }
}

/// Extract `country`, `region`, and `city` from a geolocation response.
///
/// Individual fields may be missing; a response with none of them is malformed.
pub fn parse_location(body: &Value) -> Result<Location, LocationError> {
    let field = |name: &str| body.get(name).and_then(Value::as_str).map(str::to_string);

    let (country, region, city) = (field("country"), field("region"), field("city"));
    if country.is_none() && region.is_none() && city.is_none() {
        return Err(LocationError::Malformed {
            message: "response has no country, region, or city".into(),
        });
    }

    Ok(Location {
        country: country.unwrap_or_default(),
        region: region.unwrap_or_default(),
        city: city.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_ipinfo_response() {
        let body = json!({
            "ip": "1.2.3.4",
            "city": "Amsterdam",
            "region": "North Holland",
            "country": "NL",
            "loc": "52.3740,4.8897"
        });
        let location = parse_location(&body).unwrap();
        assert_eq!(location.city, "Amsterdam");
        assert_eq!(location.region, "North Holland");
        assert_eq!(location.country, "NL");
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let location = parse_location(&json!({"country": "NL"})).unwrap();
        assert_eq!(location.country, "NL");
        assert!(location.city.is_empty());
    }

    #[test]
    fn response_without_location_is_malformed() {
        assert!(matches!(
            parse_location(&json!({"error": "rate limited"})),
            Err(LocationError::Malformed { .. })
        ));
    }

    #[test]
    fn unreachable_service_is_a_request_error() {
        let locator = IpInfoLocator::new("http://127.0.0.1:9/json", Duration::from_millis(200));
        assert!(matches!(
            locator.locate(),
            Err(LocationError::Request { .. })
        ));
    }
}
