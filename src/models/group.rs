use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase-1 group row. A fresh row is created per category per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryGroup {
    pub group_id: i64,
    pub main_topic: String,
    pub sub_topic: String,
    pub group_label: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Phase-2 cluster scoped to a single category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subgroup {
    pub subgroup_id: i64,
    pub category: String,
    pub group_label: String,
    pub summary: Option<String>,
    pub article_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A cluster returned by the model before it is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredSubgroup {
    pub label: String,
    pub summary: String,
    pub member_ids: Vec<String>,
}

/// Every group row sharing a `main_topic`, collapsed for display.
#[derive(Debug, Clone)]
pub struct CategoryOverview {
    pub category: String,
    pub group_count: usize,
    pub article_count: usize,
}

#[derive(Debug, Clone)]
pub struct SubgroupArticle {
    pub link: String,
    pub title: String,
    pub published_date: Option<DateTime<Utc>>,
}
