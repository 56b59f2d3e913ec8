use chrono::{DateTime, Utc};

/// Detail fields parsed from a CVE record, ready to be cached.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CveDetail {
    pub base_score: Option<f64>,
    pub vendor: String,
    pub affected_products: String,
    pub cve_url: String,
    pub vendor_link: String,
    pub solution: String,
    pub raw_json: String,
}

#[derive(Debug, Clone)]
pub struct NewCveInfo {
    pub cve_id: String,
    pub detail: CveDetail,
    pub times_mentioned: i64,
}

/// One line of the CVE table: mention statistics joined with cached details.
#[derive(Debug, Clone)]
pub struct CveRow {
    pub cve_id: String,
    pub times_seen: usize,
    pub first_mention: Option<DateTime<Utc>>,
    pub last_mention: Option<DateTime<Utc>>,
    pub articles: Vec<String>,
    pub detail: Option<CveDetail>,
}
