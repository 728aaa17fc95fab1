use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::session::CandidateRecord;

/// The local-search API reports coordinates as fixed-point integers.
const COORD_SCALE: f64 = 10_000_000.0;
/// Pause between lookups; the API is rate limited and the pipeline is
/// sequential on purpose.
const LOOKUP_PAUSE: Duration = Duration::from_millis(100);

/// A candidate plus everything the lookup and classification stages add.
#[derive(Debug, Clone)]
pub struct EnrichedRecord {
    pub name: String,
    pub address: String,
    pub lat: f64,
    pub lon: f64,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub description: String,
    pub site_link: String,
    pub images: Vec<String>,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PlaceInfo {
    pub link: String,
    pub mapx: String,
    pub mapy: String,
}

/// Name-based place search against an external service.
#[async_trait]
pub trait PlaceLookup: Send + Sync {
    async fn lookup(&self, name: &str) -> Result<Option<PlaceInfo>>;
}

/// Client for the local-search endpoint with its two-credential header
/// scheme.
pub struct NaverLocalClient {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    base_url: String,
}

impl NaverLocalClient {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            base_url: "https://openapi.naver.com".to_string(),
        }
    }

    /// Point the client somewhere else (tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Deserialize)]
struct LocalSearchResponse {
    #[serde(default)]
    items: Vec<LocalSearchItem>,
}

#[derive(Deserialize)]
struct LocalSearchItem {
    #[serde(default)]
    link: String,
    #[serde(default)]
    mapx: String,
    #[serde(default)]
    mapy: String,
}

#[async_trait]
impl PlaceLookup for NaverLocalClient {
    async fn lookup(&self, name: &str) -> Result<Option<PlaceInfo>> {
        let response = self
            .client
            .get(format!("{}/v1/search/local.json", self.base_url))
            .query(&[("query", name)])
            .header("X-Naver-Client-Id", &self.client_id)
            .header("X-Naver-Client-Secret", &self.client_secret)
            .send()
            .await
            .context("local search request failed")?
            .error_for_status()
            .context("local search returned an error status")?;

        let body: LocalSearchResponse = response
            .json()
            .await
            .context("local search returned malformed JSON")?;

        Ok(body.items.into_iter().next().map(|item| PlaceInfo {
            link: item.link,
            mapx: item.mapx,
            mapy: item.mapy,
        }))
    }
}

/// Scale a fixed-point coordinate string to degrees. Anything non-finite
/// (or unparseable) clamps to 0.0 so bad coordinates never travel further.
pub fn scale_coord(raw: &str) -> f64 {
    let value = raw.trim().parse::<f64>().unwrap_or(0.0) / COORD_SCALE;
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Adds coordinates and a site link to each deduplicated candidate. Lookup
/// failures degrade to zero coordinates and an empty link.
pub struct Enricher<L> {
    lookup: L,
    pause: Duration,
}

impl<L: PlaceLookup> Enricher<L> {
    pub fn new(lookup: L) -> Self {
        Self {
            lookup,
            pause: LOOKUP_PAUSE,
        }
    }

    #[cfg(test)]
    pub(crate) fn without_pause(mut self) -> Self {
        self.pause = Duration::ZERO;
        self
    }

    pub async fn enrich(&self, record: CandidateRecord) -> EnrichedRecord {
        let place = match self.lookup.lookup(&record.name).await {
            Ok(place) => place,
            Err(e) => {
                warn!("place lookup failed for {}: {:#}", record.name, e);
                None
            }
        };
        tokio::time::sleep(self.pause).await;

        let (lat, lon, site_link) = match place {
            Some(p) => (scale_coord(&p.mapy), scale_coord(&p.mapx), p.link),
            None => (0.0, 0.0, String::new()),
        };

        EnrichedRecord {
            name: record.name,
            address: record.address,
            lat,
            lon,
            start_date: record.start_date,
            end_date: record.end_date,
            description: record.description,
            site_link,
            images: record.images,
            categories: Vec::new(),
        }
    }
}

// ── Tests ──
