//! HTTP clients for the metadata collaborators.
//!
//! Two interchangeable sources resolve a CID to its declared content type:
//! a Tika-style extraction service that fetches the object through the
//! gateway, and a search index that already holds crawled metadata. Both
//! go through the shared `RetryPolicy`.

use reqwest::{StatusCode, Url};
use serde::Deserialize;

use cidwatch_core::config::{CollaboratorConfig, MetadataSourceKind};
use cidwatch_core::{Cid, RetryPolicy, Retryable};

/// Content type recorded when a collaborator answers with no types.
pub const UNKNOWN_CONTENT_TYPE: &str = "null";

/// What a collaborator knows about one object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentInfo {
    pub content_types: Vec<String>,
    /// File name from the search index's reference list, when present.
    pub reference_name: Option<String>,
}

impl ContentInfo {
    /// The first declared type, or `"null"` when none was declared.
    pub fn primary_type(&self) -> &str {
        self.content_types
            .first()
            .map(String::as_str)
            .unwrap_or(UNKNOWN_CONTENT_TYPE)
    }
}

/// Client with the policy's per-attempt timeout baked in.
pub fn http_client(retry: &RetryPolicy) -> Result<reqwest::Client, EnrichmentError> {
    reqwest::Client::builder()
        .timeout(retry.timeout)
        .build()
        .map_err(EnrichmentError::Request)
}

/// `<gateway>/ipfs/<cid>`
pub fn gateway_object_url(gateway: &str, cid: &Cid) -> String {
    format!("{}/ipfs/{}", gateway.trim_end_matches('/'), cid)
}

// ── Extraction service ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    metadata: ExtractMetadata,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ExtractMetadata {
    #[serde(rename = "Content-Type", default)]
    content_type: Option<OneOrMany>,
}

/// Tika reports a single type as a bare string and several as an array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractorClient {
    http: reqwest::Client,
    base: String,
    gateway: String,
    retry: RetryPolicy,
}

impl ExtractorClient {
    pub fn new(
        base: impl Into<String>,
        gateway: impl Into<String>,
        retry: RetryPolicy,
    ) -> Result<Self, EnrichmentError> {
        Ok(Self {
            http: http_client(&retry)?,
            base: base.into(),
            gateway: gateway.into(),
            retry,
        })
    }

    /// `<base>/extract?url=<urlencoded gateway object URL>`
    pub fn extract_url(&self, cid: &Cid) -> Result<Url, EnrichmentError> {
        let endpoint = format!("{}/extract", self.base.trim_end_matches('/'));
        let mut url =
            Url::parse(&endpoint).map_err(|e| EnrichmentError::InvalidUrl(format!("{endpoint}: {e}")))?;
        url.query_pairs_mut()
            .append_pair("url", &gateway_object_url(&self.gateway, cid));
        Ok(url)
    }

    pub async fn content_info(&self, cid: &Cid) -> Result<ContentInfo, EnrichmentError> {
        let url = self.extract_url(cid)?;
        self.retry
            .run("extract", |_| self.fetch(url.clone()))
            .await
    }

    async fn fetch(&self, url: Url) -> Result<ContentInfo, EnrichmentError> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;

        let parsed: Result<ExtractResponse, _> = serde_json::from_slice(&body);
        if !status.is_success() {
            // A structured error body wins over the bare status.
            return match parsed {
                Ok(ExtractResponse { error: Some(msg), .. }) if !msg.is_empty() => {
                    Err(EnrichmentError::Collaborator(msg))
                }
                _ => Err(EnrichmentError::Status(status)),
            };
        }

        let resp = parsed?;
        if let Some(msg) = resp.error.filter(|m| !m.is_empty()) {
            return Err(EnrichmentError::Collaborator(msg));
        }
        Ok(ContentInfo {
            content_types: resp
                .metadata
                .content_type
                .map(OneOrMany::into_vec)
                .unwrap_or_default(),
            reference_name: None,
        })
    }
}

// ── Search index ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: SearchHits,
}

#[derive(Debug, Default, Deserialize)]
struct SearchHits {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_source", default)]
    source: Option<SearchSource>,
}

#[derive(Debug, Deserialize)]
struct SearchSource {
    #[serde(default)]
    metadata: Option<ExtractMetadata>,
    #[serde(default)]
    references: Vec<SearchReference>,
}

#[derive(Debug, Deserialize)]
struct SearchReference {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SearchIndexClient {
    http: reqwest::Client,
    base: String,
    retry: RetryPolicy,
}

impl SearchIndexClient {
    pub fn new(base: impl Into<String>, retry: RetryPolicy) -> Result<Self, EnrichmentError> {
        Ok(Self {
            http: http_client(&retry)?,
            base: base.into(),
            retry,
        })
    }

    pub fn query_body(cid: &Cid) -> serde_json::Value {
        serde_json::json!({
            "query": {"match": {"_id": cid.as_str()}},
            "_source": {"includes": ["metadata", "references"]}
        })
    }

    pub async fn content_info(&self, cid: &Cid) -> Result<ContentInfo, EnrichmentError> {
        let endpoint = format!("{}/_search", self.base.trim_end_matches('/'));
        let url =
            Url::parse(&endpoint).map_err(|e| EnrichmentError::InvalidUrl(format!("{endpoint}: {e}")))?;
        let body = Self::query_body(cid);
        self.retry
            .run("search index", |_| self.fetch(url.clone(), &body))
            .await
    }

    async fn fetch(
        &self,
        url: Url,
        body: &serde_json::Value,
    ) -> Result<ContentInfo, EnrichmentError> {
        let resp = self.http.get(url).json(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(EnrichmentError::Status(status));
        }
        let bytes = resp.bytes().await?;
        let parsed: SearchResponse = serde_json::from_slice(&bytes)?;

        let source = parsed
            .hits
            .hits
            .into_iter()
            .next()
            .and_then(|hit| hit.source)
            .ok_or(EnrichmentError::NotFound)?;

        Ok(ContentInfo {
            content_types: source
                .metadata
                .and_then(|m| m.content_type)
                .map(OneOrMany::into_vec)
                .unwrap_or_default(),
            reference_name: source.references.into_iter().next().and_then(|r| r.name),
        })
    }
}

// ── Source selection ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum MetadataSource {
    Extractor(ExtractorClient),
    SearchIndex(SearchIndexClient),
}

impl MetadataSource {
    pub fn from_config(
        cfg: &CollaboratorConfig,
        retry: RetryPolicy,
    ) -> Result<Self, EnrichmentError> {
        Ok(match cfg.metadata_source {
            MetadataSourceKind::Extractor => MetadataSource::Extractor(ExtractorClient::new(
                cfg.extractor_url.clone(),
                cfg.gateway_url.clone(),
                retry,
            )?),
            MetadataSourceKind::SearchIndex => MetadataSource::SearchIndex(
                SearchIndexClient::new(cfg.search_index_url.clone(), retry)?,
            ),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            MetadataSource::Extractor(_) => "extractor",
            MetadataSource::SearchIndex(_) => "search_index",
        }
    }

    pub async fn content_info(&self, cid: &Cid) -> Result<ContentInfo, EnrichmentError> {
        match self {
            MetadataSource::Extractor(c) => c.content_info(cid).await,
            MetadataSource::SearchIndex(c) => c.content_info(cid).await,
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("collaborator returned HTTP {0}")]
    Status(StatusCode),

    #[error("malformed collaborator response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("collaborator reported error: {0}")]
    Collaborator(String),

    #[error("no metadata indexed for this CID")]
    NotFound,

    #[error("invalid collaborator URL {0}")]
    InvalidUrl(String),
}

impl Retryable for EnrichmentError {
    fn is_retryable(&self) -> bool {
        match self {
            EnrichmentError::Request(e) => !e.is_builder(),
            EnrichmentError::Status(s) => {
                s.is_server_error() || *s == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}
