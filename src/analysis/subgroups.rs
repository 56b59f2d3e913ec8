//! Phase 2: cluster the articles of one category into model-discovered subgroups.

use std::collections::HashSet;

use serde::Deserialize;

use crate::ai::response::{decode_model_json, ArticleId};
use crate::ai::{ChatMessage, ClassificationClient};
use crate::db::Repository;
use crate::error::Result;
use crate::models::{DiscoveredSubgroup, Document};

use super::chunker::chunk_documents;
use super::prompt::inline_documents;

const UNTITLED: &str = "Untitled Subgroup";

#[derive(Debug, Deserialize)]
struct GroupsReply {
    groups: Vec<RawGroup>,
}

#[derive(Debug, Deserialize)]
struct RawGroup {
    #[serde(default)]
    group_label: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    articles: Vec<ArticleId>,
}

fn build_messages(category: &str, chunk: &[Document]) -> Vec<ChatMessage> {
    let system = format!("You are grouping articles specifically for category '{}'.", category);
    let user = format!(
        "Below are articles assigned to this category. Group them by specific sub-topic.\n\
         For each subgroup, return:\n  \
           - group_label: a short descriptive title\n  \
           - summary: a 2-3 sentence summary of these articles\n  \
           - articles: an array of article IDs\n\n\
         Return JSON only, with the structure:\n\
         {{ \"groups\": [ {{\"group_label\": \"...\", \"summary\": \"...\", \"articles\": [ ... ]}}, ... ] }}\n\n{}",
        inline_documents(chunk, "Article ", ": ")
    );
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// `claimed` spans the whole chunk: an id listed under several groups stays
/// with the first one.
fn into_subgroup(
    raw: RawGroup,
    chunk_ids: &HashSet<&str>,
    claimed: &mut HashSet<String>,
) -> Option<DiscoveredSubgroup> {
    let label = raw
        .group_label
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string());

    let mut member_ids = Vec::new();
    for ArticleId(id) in raw.articles {
        if !chunk_ids.contains(id.as_str()) {
            tracing::warn!(subgroup = %label, article = %id, "Member id not in chunk, ignoring");
            continue;
        }
        if claimed.insert(id.clone()) {
            member_ids.push(id);
        } else {
            tracing::debug!(subgroup = %label, article = %id, "Article already claimed by an earlier subgroup");
        }
    }

    if member_ids.is_empty() {
        tracing::debug!(subgroup = %label, "Subgroup has no usable members, dropping");
        return None;
    }

    Some(DiscoveredSubgroup {
        label,
        summary: raw.summary.unwrap_or_default().trim().to_string(),
        member_ids,
    })
}

/// Asks the model to cluster one chunk. An unusable reply yields no subgroups.
pub async fn discover_chunk_subgroups(
    client: &ClassificationClient,
    category: &str,
    chunk: &[Document],
) -> Vec<DiscoveredSubgroup> {
    let Some(reply) = client.classify(&build_messages(category, chunk)).await else {
        tracing::warn!(category, "No response for chunk, skipping");
        return Vec::new();
    };
    let Some(reply) = decode_model_json::<GroupsReply>(&reply) else {
        return Vec::new();
    };

    let chunk_ids: HashSet<&str> = chunk.iter().map(|d| d.id.as_str()).collect();
    let mut claimed = HashSet::new();
    reply
        .groups
        .into_iter()
        .filter_map(|raw| into_subgroup(raw, &chunk_ids, &mut claimed))
        .collect()
}

/// Clusters every document of `category`, chunk by chunk, without touching
/// storage. This is the pure entry point; `run_subgroup_discovery` drives the
/// same per-chunk step but saves each chunk before asking for the next.
pub async fn discover_subgroups(
    client: &ClassificationClient,
    category: &str,
    documents: Vec<Document>,
    max_tokens: usize,
) -> Vec<DiscoveredSubgroup> {
    let mut discovered = Vec::new();
    for chunk in chunk_documents(documents, max_tokens) {
        discovered.extend(discover_chunk_subgroups(client, category, &chunk).await);
    }
    discovered
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubgroupRunReport {
    pub category: String,
    pub candidates: usize,
    pub chunks: usize,
    pub subgroups_created: usize,
    pub failed_chunks: usize,
}

/// Selects the category's unsubgrouped articles and persists each chunk's
/// clusters as soon as they are decoded.
pub async fn run_subgroup_discovery(
    repository: &Repository,
    client: &ClassificationClient,
    category: &str,
    max_tokens: usize,
) -> Result<SubgroupRunReport> {
    let mut report = SubgroupRunReport {
        category: category.to_string(),
        ..Default::default()
    };

    let documents = repository.unsubgrouped_documents(category).await?;
    if documents.is_empty() {
        tracing::info!(category, "No un-subgrouped articles");
        return Ok(report);
    }
    report.candidates = documents.len();

    let chunks: Vec<Vec<Document>> = chunk_documents(documents, max_tokens).collect();
    report.chunks = chunks.len();

    for (index, chunk) in chunks.iter().enumerate() {
        tracing::info!(
            category,
            chunk = index + 1,
            of = chunks.len(),
            articles = chunk.len(),
            "Discovering subgroups"
        );

        let subgroups = discover_chunk_subgroups(client, category, chunk).await;
        if subgroups.is_empty() {
            tracing::info!(category, chunk = index + 1, "No subgroups returned for chunk");
            continue;
        }

        match repository.save_subgroups(category, subgroups).await {
            Ok(ids) => {
                tracing::info!(category, chunk = index + 1, created = ids.len(), "Saved subgroups");
                report.subgroups_created += ids.len();
            }
            Err(e) => {
                tracing::error!(category, chunk = index + 1, error = %e, "Failed to save subgroups, rolled back");
                report.failed_chunks += 1;
            }
        }
    }

    Ok(report)
}
