//! Client for the PIAX sensor data service.
//!
//! Queries are plain GET requests against two URL templates:
//!
//! ```text
//! http://{base}/sensors/discquery/{where}/values/{select}
//! http://{base}/sensors/discquery/{where}
//! ```
//!
//! `where` is the percent-encoded spatial filter and `select` a comma
//! separated set of percent-encoded field paths. Bodies are returned raw.

use crate::config::PiaxConfig;
use crate::{Result, ScnError};
use reqwest::header::{ACCEPT, COOKIE};
use reqwest::Client;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{error, info};

/// Spatial filter of a PIAX query, e.g. `Location in rect(x1,y1,x2,y2)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialQuery {
    pub method: String,
    pub params: Vec<f64>,
}

impl SpatialQuery {
    pub fn new(method: impl Into<String>, params: Vec<f64>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Rectangle given by two corners (longitude, latitude).
    pub fn rect(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> Self {
        Self::new("rect", vec![lon1, lat1, lon2, lat2])
    }

    /// Unencoded filter text.
    pub fn filter(&self) -> String {
        let params: Vec<String> = self.params.iter().map(|p| format_param(*p)).collect();
        format!("Location in {}({})", self.method, params.join(","))
    }

    /// Percent-encoded filter, ready for the `where` path segment.
    pub fn encoded(&self) -> String {
        quote(&self.filter())
    }
}

impl Default for SpatialQuery {
    fn default() -> Self {
        Self::new(PiaxConfig::DEFAULT_METHOD, PiaxConfig::DEFAULT_PARAMS.to_vec())
    }
}

/// Render a parameter like Python 2's `str(float)`: `%.12g`, with `.0`
/// appended to whole numbers (`20.0`, `0.3`, `1e-05`, `1e+16`).
fn format_param(param: f64) -> String {
    if param.is_nan() {
        return "nan".to_string();
    }
    if param.is_infinite() {
        return if param > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if param == 0.0 {
        return if param.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }

    // 12 significant digits; the exponent is taken after rounding
    let sci = format!("{:.11e}", param);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);

    if !(-4..12).contains(&exp) {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exp.abs())
    } else {
        let decimals = (11 - exp) as usize;
        let fixed = format!("{:.*}", decimals, param);
        let trimmed = trim_fraction(&fixed);
        if trimmed.contains('.') {
            trimmed.to_string()
        } else {
            format!("{}.0", trimmed)
        }
    }
}

/// Drop trailing zeros after the decimal point, and the point itself if bare.
fn trim_fraction(number: &str) -> &str {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    }
}

/// Percent-encode like Python 2's `urllib.quote`, which leaves only letters,
/// digits and `_.-` unescaped.
fn quote(text: &str) -> String {
    urlencoding::encode(text).replace('~', "%7E")
}

/// Build the `select` segment for the requested field paths.
///
/// Every path is percent-encoded (`/` and `~` included) and the two location fields
/// are always selected. Duplicates are removed.
pub fn build_select<S: AsRef<str>>(values: &[S]) -> String {
    let mut fields: BTreeSet<String> = values
        .iter()
        .map(|v| quote(v.as_ref()))
        .collect();
    fields.extend(PiaxConfig::SELECT_COMMON.iter().map(|s| s.to_string()));
    fields.into_iter().collect::<Vec<_>>().join(",")
}

/// HTTP accessor for PIAX.
#[derive(Debug, Clone)]
pub struct PiaxAccessor {
    client: Client,
    base: String,
    cookie: String,
}

impl PiaxAccessor {
    /// Accessor for the default deployment.
    pub fn new() -> Result<Self> {
        Self::with_base(PiaxConfig::BASE)
    }

    /// Accessor for `base` (`host:port`) with the default key and timeout.
    pub fn with_base(base: impl Into<String>) -> Result<Self> {
        Self::with_config(base, PiaxConfig::API_KEY, PiaxConfig::REQUEST_TIMEOUT)
    }

    pub fn with_config(
        base: impl Into<String>,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScnError::Http {
                message: format!("Failed to create HTTP client: {}", e),
                status: None,
            })?;

        Ok(Self {
            client,
            base: base.into(),
            cookie: format!("API_KEY={}", api_key),
        })
    }

    /// The `host:port` queries are sent to.
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn data_url<S: AsRef<str>>(&self, values: &[S], query: &SpatialQuery) -> String {
        format!(
            "http://{}/sensors/discquery/{}/values/{}",
            self.base,
            query.encoded(),
            build_select(values)
        )
    }

    pub fn sensors_url(&self, query: &SpatialQuery) -> String {
        format!("http://{}/sensors/discquery/{}", self.base, query.encoded())
    }

    /// Fetch the values at `values` (field paths such as `Weather/Temperature`)
    /// for sensors matching `query`.
    pub async fn get_data<S: AsRef<str>>(&self, values: &[S], query: &SpatialQuery) -> Result<String> {
        self.fetch(&self.data_url(values, query)).await
    }

    /// Fetch the sensors matching `query`.
    pub async fn get_sensors(&self, query: &SpatialQuery) -> Result<String> {
        self.fetch(&self.sensors_url(query)).await
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        info!("[Get] {}", url);

        let response = self
            .client
            .get(url)
            .header(COOKIE, &self.cookie)
            .header(ACCEPT, PiaxConfig::ACCEPT)
            .send()
            .await
            .map_err(|e| {
                error!("We failed to reach a server.");
                error!("Reason: {}", e);
                ScnError::from(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            error!("The server couldn't fulfill the request.");
            error!("Error code: {}", status.as_u16());
            return Err(ScnError::Http {
                message: format!("GET {} returned {}", url, status),
                status: Some(status.as_u16()),
            });
        }

        Ok(response.text().await?)
    }
}
