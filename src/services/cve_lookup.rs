use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::models::CveDetail;

pub const DEFAULT_CVE_API_URL: &str = "https://cveawg.mitre.org/api/cve";
const CVE_PAGE_URL: &str = "https://cveawg.mitre.org/cve";
const CVSS_PREFERENCE: [CvssVersion; 4] = [
    CvssVersion::V4_0,
    CvssVersion::V3_1,
    CvssVersion::V3_0,
    CvssVersion::V2_0,
];

/// Resolves a CVE identifier to its published details. `Ok(None)` means the
/// record does not exist or is not a CVE record.
#[async_trait]
pub trait CveLookup: Send + Sync {
    async fn lookup(&self, cve_id: &str) -> Result<Option<CveDetail>>;
}

// CVE JSON 5 record, only the parts we read

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CveRecord {
    data_type: Option<String>,
    #[serde(default)]
    containers: Containers,
}

#[derive(Debug, Default, Deserialize)]
struct Containers {
    #[serde(default)]
    cna: Container,
    #[serde(default)]
    adp: Vec<Container>,
}

#[derive(Debug, Default, Deserialize)]
struct Container {
    #[serde(default)]
    metrics: Vec<Metric>,
    #[serde(default)]
    affected: Vec<Affected>,
    #[serde(default)]
    references: Vec<Reference>,
    #[serde(default)]
    solutions: Vec<Solution>,
}

#[derive(Debug, Default, Deserialize)]
struct Metric {
    #[serde(rename = "cvssV4_0")]
    v4_0: Option<Cvss>,
    #[serde(rename = "cvssV3_1")]
    v3_1: Option<Cvss>,
    #[serde(rename = "cvssV3_0")]
    v3_0: Option<Cvss>,
    #[serde(rename = "cvssV2_0")]
    v2_0: Option<Cvss>,
}

#[derive(Debug, Clone, Copy)]
enum CvssVersion {
    V4_0,
    V3_1,
    V3_0,
    V2_0,
}

impl Metric {
    fn cvss(&self, version: CvssVersion) -> Option<&Cvss> {
        match version {
            CvssVersion::V4_0 => self.v4_0.as_ref(),
            CvssVersion::V3_1 => self.v3_1.as_ref(),
            CvssVersion::V3_0 => self.v3_0.as_ref(),
            CvssVersion::V2_0 => self.v2_0.as_ref(),
        }
    }

    /// First non-zero base score in preference order.
    fn base_score(&self) -> Option<f64> {
        CVSS_PREFERENCE
            .iter()
            .filter_map(|version| self.cvss(*version)?.base_score)
            .find(|score| *score != 0.0)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Cvss {
    base_score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Affected {
    vendor: Option<String>,
    product: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Reference {
    #[serde(default)]
    url: String,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Solution {
    value: Option<String>,
}

fn joined(values: impl Iterator<Item = Option<String>>) -> String {
    values
        .flatten()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>()
        .join(", ")
}

/// Extracts the cached fields from a raw CVE record body.
pub fn parse_cve_record(cve_id: &str, raw_json: &str) -> Result<Option<CveDetail>> {
    let record: CveRecord = serde_json::from_str(raw_json)?;
    if record.data_type.as_deref() != Some("CVE_RECORD") {
        tracing::debug!(cve_id, data_type = ?record.data_type, "Not a CVE record, skipping");
        return Ok(None);
    }

    let cna = &record.containers.cna;
    let base_score = cna
        .metrics
        .iter()
        .chain(record.containers.adp.iter().flat_map(|adp| adp.metrics.iter()))
        .find_map(Metric::base_score);

    let vendor = joined(cna.affected.iter().map(|a| a.vendor.clone()));
    let affected_products = joined(cna.affected.iter().map(|a| a.product.clone()));

    let vendor_link = cna
        .references
        .iter()
        .find(|r| {
            r.tags.iter().any(|t| t == "vendor-advisory") || r.url.to_lowercase().contains("vendor")
        })
        .or_else(|| cna.references.first())
        .map(|r| r.url.clone())
        .unwrap_or_default();

    let solution = cna
        .solutions
        .iter()
        .filter_map(|s| s.value.as_deref())
        .filter(|v| !v.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    Ok(Some(CveDetail {
        base_score,
        vendor,
        affected_products,
        cve_url: format!("{}/{}", CVE_PAGE_URL, cve_id),
        vendor_link,
        solution,
        raw_json: raw_json.to_string(),
    }))
}

/// Client for the public MITRE CVE services API.
pub struct MitreCveClient {
    client: Client,
    api_url: String,
}

impl MitreCveClient {
    pub fn new(api_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("threat-digest/0.1")
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CveLookup for MitreCveClient {
    async fn lookup(&self, cve_id: &str) -> Result<Option<CveDetail>> {
        let url = format!("{}/{}", self.api_url, cve_id);
        let response = self.client.get(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AppError::CveApi(format!("HTTP {} for {}", response.status(), cve_id)));
        }

        let body = response.text().await?;
        parse_cve_record(cve_id, &body)
    }
}
