use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use storefront_core::config::{EndpointsConfig, HttpConfig};
use storefront_core::{CatalogSource, GeoResolver, NetworkError, ResolutionError};
use storefront_protocol::{Coordinates, ListingEnvelope};
use url::Url;

const KEEPALIVE: Duration = Duration::from_secs(60);
const POOL_IDLE: Duration = Duration::from_secs(90);

fn user_agent() -> String {
    format!("storefront-cli/{}", env!("CARGO_PKG_VERSION"))
}

/// Base client builder with the configured connect and request timeouts.
pub fn builder(cfg: &HttpConfig) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .user_agent(user_agent())
        .connect_timeout(cfg.connect_timeout())
        .timeout(cfg.request_timeout())
        .tcp_keepalive(KEEPALIVE)
        .pool_idle_timeout(POOL_IDLE)
}

pub fn client(cfg: &HttpConfig) -> Result<reqwest::Client> {
    builder(cfg).build().context("building http client")
}

/// Listing source over plain `GET` requests.
pub struct HttpCatalogSource {
    client: reqwest::Client,
}

impl HttpCatalogSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl CatalogSource for HttpCatalogSource {
    async fn get(&self, url: &Url) -> Result<ListingEnvelope, NetworkError> {
        let resp = self
            .client
            .get(url.clone())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| NetworkError::Transport(err.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(NetworkError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        resp.json::<ListingEnvelope>()
            .await
            .map_err(|err| NetworkError::Decode(err.to_string()))
    }
}

/// Postal-code geocoder behind `GET <geocode_path>?postal_code=..`, answering
/// `{"lat": .., "lng": ..}`.
pub struct HttpGeoResolver {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpGeoResolver {
    pub fn new(client: reqwest::Client, endpoints: &EndpointsConfig) -> Result<Self> {
        let raw = format!(
            "{}/{}",
            endpoints.base_url.trim_end_matches('/'),
            endpoints.geocode_path.trim_start_matches('/')
        );
        let endpoint = Url::parse(&raw).with_context(|| format!("invalid geocode url {raw}"))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait::async_trait]
impl GeoResolver for HttpGeoResolver {
    async fn resolve(&self, postal_code: Option<&str>) -> Result<Coordinates, ResolutionError> {
        let Some(postal_code) = postal_code.map(str::trim).filter(|code| !code.is_empty()) else {
            return Err(ResolutionError::Unavailable(
                "no postal code to geocode".to_string(),
            ));
        };
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("postal_code", postal_code);
        let resp = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| ResolutionError::Unavailable(err.to_string()))?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(ResolutionError::UnknownPostalCode(postal_code.to_string())),
            status if !status.is_success() => Err(ResolutionError::Unavailable(format!(
                "geocoder answered {status}"
            ))),
            _ => resp
                .json::<Coordinates>()
                .await
                .map_err(|err| ResolutionError::Unavailable(err.to_string())),
        }
    }
}
