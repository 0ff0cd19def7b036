// src/catalog.rs

use crate::models::{Checksum, FileEntry, HashAlgorithm, Platform, PurchaseRecord};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use futures_util::{stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_CHARSET, COOKIE};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://www.humblebundle.com";
const SESSION_COOKIE: &str = "_simpleauth_sess";
const USER_AGENT: &str = "Apache-HttpClient/UNAVAILABLE (java 1.4)";
const CREATED_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Downloads the vendor lists without url or size; not worth a log line.
const KNOWN_INCOMPLETE: [&str; 3] = [
    "thespookening_android",
    "worldofgoo_android_pc_soundtrack_audio",
    "dustforce_asm",
];

/// Checksums the vendor publishes wrongly for otherwise fine files.
const BROKEN_MD5: [&str; 7] = [
    "c0776421f3527a706cf1f3f3765cafb4",
    "2f8612361dde58c73525ea0d024c0460",
    "bcb063559d17364e9f7bfd3d4fd799ee",
    "428dd67152164f444e6fa21e87caa147",
    "748b36888d3c6e747dc00eea5d518bb9",
    "ef8a5895edce744719bc031ffb0173b0",
    "b5796f487f5f647045bb5fb6eaf16edf",
];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("network error: {0}")]
    Transient(#[from] reqwest::Error),
    #[error("unexpected catalog data: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Source of the user's purchases.
#[async_trait]
pub trait CatalogFetcher: Send + Sync {
    async fn fetch_purchases(&self) -> Result<Vec<PurchaseRecord>, CatalogError>;
}

#[derive(Debug, Deserialize)]
struct OrderKey {
    gamekey: String,
}

#[derive(Debug, Deserialize)]
struct Order {
    created: String,
    product: Product,
    #[serde(default)]
    subproducts: Vec<Subproduct>,
}

#[derive(Debug, Deserialize)]
struct Product {
    human_name: String,
}

#[derive(Debug, Deserialize)]
struct Subproduct {
    human_name: Option<String>,
    #[serde(default)]
    downloads: Vec<Download>,
}

#[derive(Debug, Deserialize)]
struct Download {
    machine_name: String,
    platform: String,
    #[serde(default)]
    download_struct: Vec<DownloadStruct>,
}

#[derive(Debug, Deserialize)]
struct DownloadStruct {
    url: Option<WebUrl>,
    file_size: Option<u64>,
    md5: Option<String>,
    sha1: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebUrl {
    web: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TroveItem {
    #[serde(rename = "human-name")]
    human_name: String,
    #[serde(rename = "date-added")]
    date_added: Option<i64>,
    #[serde(default)]
    downloads: BTreeMap<String, TroveDownload>,
}

#[derive(Debug, Deserialize)]
struct TroveDownload {
    machine_name: String,
    url: Option<WebUrl>,
    file_size: Option<u64>,
    md5: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SignedUrl {
    signed_url: String,
}

/// Catalog client for the vendor's JSON API.
#[derive(Debug, Clone)]
pub struct HumbleCatalog {
    client: Client,
    base_url: String,
    concurrency: usize,
    include_trove: bool,
}

impl HumbleCatalog {
    pub fn new(
        session_cookie: &str,
        concurrency: usize,
        include_trove: bool,
    ) -> Result<Self, CatalogError> {
        let session_cookie = session_cookie.trim();
        if session_cookie.is_empty() {
            return Err(CatalogError::Auth("no session cookie configured".into()));
        }
        let cookie = HeaderValue::from_str(&format!("{SESSION_COOKIE}={session_cookie}"))
            .map_err(|_| CatalogError::Auth("session cookie contains invalid characters".into()))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT_CHARSET, HeaderValue::from_static("utf-8"));
        headers.insert("X-Requested-By", HeaderValue::from_static("hb_android_app"));
        headers.insert(COOKIE, cookie);

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            concurrency: concurrency.max(1),
            include_trove,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, CatalogError> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(&[("ajax", "true")])
            .send()
            .await?;
        if matches!(resp.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(CatalogError::Auth(format!("server answered {}", resp.status())));
        }
        let body = resp.error_for_status()?.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn order_keys(&self) -> Result<Vec<String>, CatalogError> {
        match self.get_json::<Vec<OrderKey>>("/api/v1/user/order").await {
            Ok(keys) => Ok(keys.into_iter().map(|k| k.gamekey).collect()),
            // a stale session gets an HTML login page instead of JSON
            Err(CatalogError::Decode(e)) => Err(CatalogError::Auth(format!(
                "order list is not readable, the session cookie is probably expired ({e})"
            ))),
            Err(e) => Err(e),
        }
    }

    async fn order(&self, key: String) -> Result<Option<PurchaseRecord>, CatalogError> {
        let order = match self.get_json::<Order>(&format!("/api/v1/order/{key}")).await {
            Ok(order) => order,
            Err(CatalogError::Decode(e)) => {
                error!(order = %key, "problem with getting order info: {e}");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let Ok(purchased_at) = NaiveDateTime::parse_from_str(&order.created, CREATED_FORMAT) else {
            error!(order = %key, created = %order.created, "unreadable purchase date");
            return Ok(None);
        };
        Ok(Some(PurchaseRecord {
            purchase_id: key,
            purchased_at,
            bundle_name: order.product.human_name,
            files: order_entries(order.subproducts),
        }))
    }

    async fn trove(&self) -> Result<Option<PurchaseRecord>, CatalogError> {
        let mut items: Vec<TroveItem> = Vec::new();
        for index in 0.. {
            let chunk: Vec<TroveItem> = self
                .get_json(&format!("/api/v1/trove/chunk?property=popularity&direction=desc&index={index}"))
                .await?;
            if chunk.is_empty() {
                break;
            }
            items.extend(chunk);
        }
        if items.is_empty() {
            return Ok(None);
        }

        let newest = items.iter().filter_map(|i| i.date_added).max().unwrap_or(0);
        let purchased_at = DateTime::from_timestamp(newest, 0)
            .map(|d| d.naive_utc())
            .unwrap_or_default();

        let mut files = Vec::new();
        for item in items {
            for (platform, download) in item.downloads {
                let (Some(path), Some(size)) = (download.url.and_then(|u| u.web), download.file_size) else {
                    debug!(machine_name = %download.machine_name, "trove entry without url or size");
                    continue;
                };
                let url = self.sign(&download.machine_name, &path).await?;
                files.push(FileEntry {
                    platform: Platform::from_tag(&platform),
                    item_name: item.human_name.clone(),
                    file_name: file_name_from_url(&path),
                    url,
                    size_bytes: size,
                    checksum: download.md5.map(Checksum::md5),
                    is_trove_flag: true,
                });
            }
        }
        info!(files = files.len(), "special collection catalog fetched");

        Ok(Some(PurchaseRecord {
            purchase_id: "trove".into(),
            purchased_at,
            bundle_name: "Humble Trove".into(),
            files,
        }))
    }

    async fn sign(&self, machine_name: &str, file_name: &str) -> Result<String, CatalogError> {
        if file_name.starts_with("http://") || file_name.starts_with("https://") {
            return Ok(file_name.to_string());
        }
        let resp = self
            .client
            .post(format!("{}/api/v1/user/download/sign", self.base_url))
            .form(&[("machine_name", machine_name), ("filename", file_name)])
            .send()
            .await?
            .error_for_status()?;
        let signed: SignedUrl = serde_json::from_slice(&resp.bytes().await?)?;
        Ok(signed.signed_url)
    }
}

#[async_trait]
impl CatalogFetcher for HumbleCatalog {
    async fn fetch_purchases(&self) -> Result<Vec<PurchaseRecord>, CatalogError> {
        let keys = self.order_keys().await?;
        info!(orders = keys.len(), "fetching purchases");

        let results: Vec<Result<Option<PurchaseRecord>, CatalogError>> = stream::iter(keys)
            .map(|key| self.order(key))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut records = Vec::with_capacity(results.len());
        for result in results {
            if let Some(record) = result? {
                records.push(record);
            }
        }
        if self.include_trove {
            if let Some(trove) = self.trove().await? {
                records.push(trove);
            }
        }
        records.sort_by(|a, b| a.purchased_at.cmp(&b.purchased_at));
        Ok(records)
    }
}

fn order_entries(subproducts: Vec<Subproduct>) -> Vec<FileEntry> {
    let mut files = Vec::new();
    for subproduct in subproducts {
        let Some(item_name) = subproduct.human_name else { continue };
        for download in subproduct.downloads {
            for entry in download.download_struct {
                let (Some(url), Some(size)) = (entry.url.and_then(|u| u.web), entry.file_size) else {
                    if !KNOWN_INCOMPLETE.contains(&download.machine_name.as_str()) {
                        warn!(machine_name = %download.machine_name, "problem with parsing download entry");
                    }
                    continue;
                };
                let checksum = match (entry.md5, entry.sha1) {
                    (Some(md5), _) => Some(Checksum::md5(md5)),
                    (None, Some(sha1)) => Some(Checksum::new(HashAlgorithm::Sha1, sha1)),
                    (None, None) => None,
                };
                if let Some(checksum) = &checksum {
                    if BROKEN_MD5.contains(&checksum.hex.as_str()) {
                        debug!(machine_name = %download.machine_name, "skipping entry with known bad checksum");
                        continue;
                    }
                }
                files.push(FileEntry {
                    platform: Platform::from_tag(&download.platform),
                    item_name: item_name.clone(),
                    file_name: file_name_from_url(&url),
                    url,
                    size_bytes: size,
                    checksum,
                    is_trove_flag: false,
                });
            }
        }
    }
    files
}

/// Last path segment of a URL, without query string.
pub fn file_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path).to_string()
}
