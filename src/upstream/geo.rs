//! IP geolocation client (ipinfo-compatible API).

use super::{ensure_success, GeoLookup};
use crate::error::UpstreamError;
use crate::models::{GeoResult, Location};
use async_trait::async_trait;
use serde::Deserialize;
use std::net::IpAddr;

#[derive(Debug, Deserialize)]
struct IpInfo {
    #[serde(default)]
    bogon: bool,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    country: Option<String>,
    /// `"lat,long"`.
    #[serde(default)]
    loc: Option<String>,
    #[serde(default)]
    org: Option<String>,
}

fn parse_loc(loc: &str) -> (Option<f64>, Option<f64>) {
    let mut parts = loc.split(',').map(|p| p.trim().parse::<f64>().ok());
    let lat = parts.next().flatten();
    let long = parts.next().flatten();
    (lat, long)
}

/// Geolocation API client.
pub struct GeoClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl GeoClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            token,
        }
    }
}

#[async_trait]
impl GeoLookup for GeoClient {
    async fn locate(&self, ip: IpAddr) -> Result<GeoResult, UpstreamError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), ip);

        let mut request = self.http.get(&url);
        if let Some(ref token) = self.token {
            request = request.query(&[("token", token)]);
        }

        let info: IpInfo = ensure_success(request.send().await?).await?.json().await?;
        if info.bogon {
            return Ok(GeoResult::Bogon);
        }

        let (latitude, longitude) = info.loc.as_deref().map(parse_loc).unwrap_or((None, None));

        Ok(GeoResult::Located(Location {
            city: info.city.unwrap_or_default(),
            region: info.region.unwrap_or_default(),
            country: info.country.unwrap_or_default(),
            latitude,
            longitude,
            org_name: info.org,
        }))
    }
}
