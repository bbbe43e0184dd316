//! STAC search + tiler rendering over HTTP.
//!
//! Search is a STAC API `POST /search` with a bbox, a datetime interval and a
//! descending datetime sort. Rendering goes through a tiler exposing
//! `/collections/{collection}/items/{id}/bbox/{minx},{miny},{maxx},{maxy}/{w}x{h}.png`.

use super::provider::{DateWindow, ImageAsset, ImageryProvider, RenderRequest};
use crate::constants::fetch::SEARCH_LIMIT;
use crate::error::{Error, Result};
use crate::geo::BoundingBox;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Connection settings for [`StacImageryProvider`].
#[derive(Debug, Clone)]
pub struct StacSettings {
    /// STAC item search endpoint.
    pub search_url: String,
    /// Tiler base URL.
    pub render_url: String,
    /// Collection to search.
    pub collection: String,
    /// Optional bearer token.
    pub token: Option<String>,
    /// Whole-request timeout.
    pub timeout: Duration,
    /// Connect timeout.
    pub connect_timeout: Duration,
}

/// Imagery provider backed by a STAC API and a tiler.
pub struct StacImageryProvider {
    client: Client,
    settings: StacSettings,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    id: String,
    #[serde(default)]
    collection: Option<String>,
    #[serde(default)]
    properties: Properties,
}

#[derive(Debug, Default, Deserialize)]
struct Properties {
    #[serde(default)]
    datetime: Option<DateTime<Utc>>,
}

impl StacImageryProvider {
    /// Build a provider with its own HTTP client.
    pub fn new(settings: StacSettings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| Error::Internal {
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self { client, settings })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.settings.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Tiler URL for an asset and region.
    pub fn render_url(&self, asset: &ImageAsset, request: &RenderRequest) -> String {
        let b = &request.bounds;
        format!(
            "{}/collections/{}/items/{}/bbox/{},{},{},{}/{}x{}.png",
            self.settings.render_url.trim_end_matches('/'),
            asset.collection,
            asset.id,
            b.lon_min,
            b.lat_min,
            b.lon_max,
            b.lat_max,
            request.dimensions,
            request.dimensions
        )
    }
}

/// Build the STAC search body.
fn search_body(collection: &str, bounds: &BoundingBox, window: &DateWindow) -> serde_json::Value {
    json!({
        "collections": [collection],
        "bbox": [bounds.lon_min, bounds.lat_min, bounds.lon_max, bounds.lat_max],
        "datetime": window.interval(),
        "sortby": [{ "field": "properties.datetime", "direction": "desc" }],
        "limit": SEARCH_LIMIT,
    })
}

/// Convert search features to assets, newest first.
fn assets_from_response(response: SearchResponse, default_collection: &str) -> Vec<ImageAsset> {
    let mut assets: Vec<ImageAsset> = response
        .features
        .into_iter()
        .filter_map(|f| {
            let acquired = f.properties.datetime?;
            Some(ImageAsset {
                id: f.id,
                collection: f
                    .collection
                    .unwrap_or_else(|| default_collection.to_string()),
                acquired,
            })
        })
        .collect();
    // Servers without sort support return arbitrary order.
    assets.sort_by(|a, b| b.acquired.cmp(&a.acquired));
    assets
}

impl ImageryProvider for StacImageryProvider {
    async fn search(&self, bounds: &BoundingBox, window: &DateWindow) -> Result<Vec<ImageAsset>> {
        let url = &self.settings.search_url;
        let body = search_body(&self.settings.collection, bounds, window);

        let response = self
            .authorize(self.client.post(url).json(&body))
            .send()
            .await
            .map_err(|e| Error::Transport {
                url: url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(Error::HttpStatus {
                url: url.clone(),
                status: response.status().as_u16(),
            });
        }

        let parsed: SearchResponse = response.json().await.map_err(|e| Error::ProviderResponse {
            reason: format!("search response from '{url}': {e}"),
        })?;

        let assets = assets_from_response(parsed, &self.settings.collection);
        debug!("Search returned {} asset(s)", assets.len());
        Ok(assets)
    }

    async fn render(&self, asset: &ImageAsset, request: &RenderRequest) -> Result<Vec<u8>> {
        let url = self.render_url(asset, request);
        let mut query: Vec<(&str, String)> = request
            .bands
            .iter()
            .map(|band| ("assets", band.clone()))
            .collect();
        query.push(("rescale", format!("{},{}", request.rescale.0, request.rescale.1)));

        let response = self
            .authorize(self.client.get(&url).query(&query))
            .send()
            .await
            .map_err(|e| Error::Transport {
                url: url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(Error::HttpStatus {
                url,
                status: response.status().as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| Error::Transport {
            url: url.clone(),
            source: e,
        })?;
        Ok(bytes.to_vec())
    }
}
