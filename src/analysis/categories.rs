//! Phase 1: place every unclassified article into exactly one category.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::ai::response::{decode_model_json, ArticleId};
use crate::ai::{ChatMessage, ClassificationClient};
use crate::config::Config;
use crate::db::Repository;
use crate::error::Result;
use crate::models::Document;

use super::chunker::chunk_documents;
use super::prompt::inline_documents;

/// The fixed category list plus the reserved catch-all.
#[derive(Debug, Clone)]
pub struct Taxonomy {
    categories: Vec<String>,
    catch_all: String,
}

impl Taxonomy {
    pub fn new<I, S>(categories: I, catch_all: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let catch_all = catch_all.into();
        let mut unique: Vec<String> = Vec::new();
        for category in categories.into_iter().map(Into::into) {
            if category != catch_all && !unique.contains(&category) {
                unique.push(category);
            }
        }
        Self {
            categories: unique,
            catch_all,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.categories.iter().cloned(), config.catch_all.clone())
    }

    pub fn catch_all(&self) -> &str {
        &self.catch_all
    }

    /// Categories in configured order, catch-all last.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.categories
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.catch_all.as_str()))
    }

    pub fn is_known(&self, label: &str) -> bool {
        self.names().any(|name| name == label)
    }

    /// Maps a model label onto the taxonomy; anything unrecognized is the catch-all.
    pub fn resolve<'a>(&'a self, label: Option<&str>) -> &'a str {
        match label.map(str::trim) {
            Some(label) => self
                .names()
                .find(|name| *name == label)
                .unwrap_or(self.catch_all.as_str()),
            None => self.catch_all.as_str(),
        }
    }
}

/// Category → article ids, in taxonomy order, empty buckets omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryAssignments {
    buckets: Vec<(String, Vec<String>)>,
}

impl CategoryAssignments {
    pub fn get(&self, category: &str) -> Option<&[String]> {
        self.buckets
            .iter()
            .find(|(name, _)| name == category)
            .map(|(_, ids)| ids.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.buckets
            .iter()
            .map(|(name, ids)| (name.as_str(), ids.as_slice()))
    }

    pub fn assigned_count(&self) -> usize {
        self.buckets.iter().map(|(_, ids)| ids.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct AssignmentReply {
    assignments: Vec<RawAssignment>,
}

#[derive(Debug, Deserialize)]
struct RawAssignment {
    article_id: Option<ArticleId>,
    #[serde(default)]
    category: Option<String>,
}

fn build_messages(taxonomy: &Taxonomy, chunk: &[Document]) -> Vec<ChatMessage> {
    let categories_text = taxonomy
        .names()
        .map(|name| format!("- {}", name))
        .collect::<Vec<_>>()
        .join("\n");

    let system = format!(
        "You assign each article to exactly one category from the given list. \
         If no category fits, choose '{}'. Respond with valid JSON only.",
        taxonomy.catch_all()
    );
    let user = format!(
        "Valid categories:\n\n{}\n\n\
         Below are articles. For each article pick exactly one category (or '{}').\n\
         Return JSON only, in this format:\n\
         {{ \"assignments\": [ {{\"article_id\": \"...\", \"category\": \"...\"}}, ... ] }}\n\n{}",
        categories_text,
        taxonomy.catch_all(),
        inline_documents(chunk, "Article ID=", ":\n")
    );

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// Classifies `documents` chunk by chunk. Chunks whose request or reply fails
/// contribute nothing; their articles stay unclassified until the next run.
pub async fn assign_categories(
    client: &ClassificationClient,
    documents: Vec<Document>,
    taxonomy: &Taxonomy,
    max_tokens: usize,
) -> CategoryAssignments {
    let mut by_category: HashMap<String, Vec<String>> = HashMap::new();
    let mut assigned: HashSet<String> = HashSet::new();

    for (index, chunk) in chunk_documents(documents, max_tokens).enumerate() {
        let chunk_number = index + 1;
        tracing::info!(chunk = chunk_number, articles = chunk.len(), "Assigning categories");

        let Some(reply) = client.classify(&build_messages(taxonomy, &chunk)).await else {
            tracing::warn!(chunk = chunk_number, "No response for chunk, skipping");
            continue;
        };
        let Some(reply) = decode_model_json::<AssignmentReply>(&reply) else {
            continue;
        };

        let chunk_ids: HashSet<&str> = chunk.iter().map(|d| d.id.as_str()).collect();
        for assignment in reply.assignments {
            let Some(ArticleId(id)) = assignment.article_id else {
                continue;
            };
            if !chunk_ids.contains(id.as_str()) {
                tracing::warn!(article = %id, "Model returned an id outside the chunk, ignoring");
                continue;
            }
            if assigned.contains(&id) {
                tracing::debug!(article = %id, "Article assigned twice, keeping first answer");
                continue;
            }

            let label = assignment.category.as_deref();
            let category = taxonomy.resolve(label);
            if label.map(str::trim) != Some(category) {
                tracing::warn!(
                    article = %id,
                    label = label.unwrap_or("<missing>"),
                    catch_all = category,
                    "Unknown category, using catch-all"
                );
            }

            assigned.insert(id.clone());
            by_category.entry(category.to_string()).or_default().push(id);
        }

        let omitted: Vec<&str> = chunk
            .iter()
            .map(|d| d.id.as_str())
            .filter(|id| !assigned.contains(*id))
            .collect();
        if !omitted.is_empty() {
            tracing::warn!(
                chunk = chunk_number,
                omitted = omitted.len(),
                "Model left articles unclassified; they stay eligible for the next run"
            );
            tracing::debug!(?omitted, "Unclassified article ids");
        }
    }

    let buckets = taxonomy
        .names()
        .filter_map(|name| by_category.remove(name).map(|ids| (name.to_string(), ids)))
        .collect();
    CategoryAssignments { buckets }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub groups_created: usize,
    pub memberships: usize,
    pub failed_groups: usize,
}

/// One fresh group row per non-empty bucket; each article's previous
/// membership is replaced. A bucket that fails to save is rolled back alone.
pub async fn save_category_assignments(
    repository: &Repository,
    assignments: &CategoryAssignments,
) -> SaveSummary {
    let mut summary = SaveSummary::default();

    for (category, ids) in assignments.iter() {
        match repository
            .save_category_group(category, "", category, ids.to_vec())
            .await
        {
            Ok(group_id) => {
                tracing::debug!(group_id, category, articles = ids.len(), "Saved category group");
                summary.groups_created += 1;
                summary.memberships += ids.len();
            }
            Err(e) => {
                tracing::error!(category, error = %e, "Failed to save category group, rolled back");
                summary.failed_groups += 1;
            }
        }
    }

    summary
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryRunReport {
    pub candidates: usize,
    pub assigned: usize,
    pub saved: SaveSummary,
}

/// Selects every article without a category and classifies it.
pub async fn run_category_assignment(
    repository: &Repository,
    client: &ClassificationClient,
    taxonomy: &Taxonomy,
    max_tokens: usize,
) -> Result<CategoryRunReport> {
    let documents = repository.unclassified_documents().await?;
    if documents.is_empty() {
        tracing::info!("No unclassified articles");
        return Ok(CategoryRunReport::default());
    }

    let candidates = documents.len();
    tracing::info!(candidates, "Found articles needing a category");

    let assignments = assign_categories(client, documents, taxonomy, max_tokens).await;
    let saved = save_category_assignments(repository, &assignments).await;

    tracing::info!(
        assigned = assignments.assigned_count(),
        groups = saved.groups_created,
        failed = saved.failed_groups,
        "Category assignment finished"
    );

    Ok(CategoryRunReport {
        candidates,
        assigned: assignments.assigned_count(),
        saved,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::testing::{client_for, ScriptedBackend};

    fn taxonomy() -> Taxonomy {
        Taxonomy::new(
            ["Science & Environment", "Cybersecurity & Data Privacy", "Other"],
            "Other",
        )
    }

    fn docs() -> Vec<Document> {
        vec![
            Document::new("a", "quantum computing breakthrough"),
            Document::new("b", "new ransomware strain hits banks"),
        ]
    }

    #[test]
    fn catch_all_listed_last_once() {
        let taxonomy = taxonomy();
        let names: Vec<_> = taxonomy.names().collect();
        assert_eq!(
            names,
            vec!["Science & Environment", "Cybersecurity & Data Privacy", "Other"]
        );
    }

    #[test]
    fn unknown_labels_resolve_to_catch_all() {
        let taxonomy = taxonomy();
        assert_eq!(taxonomy.resolve(Some("Science & Environment")), "Science & Environment");
        assert_eq!(taxonomy.resolve(Some(" Science & Environment ")), "Science & Environment");
        assert_eq!(taxonomy.resolve(Some("Space Lasers")), "Other");
        assert_eq!(taxonomy.resolve(Some("science & environment")), "Other");
        assert_eq!(taxonomy.resolve(None), "Other");
        assert!(!taxonomy.is_known("Space Lasers"));
    }

    #[tokio::test]
    async fn assigns_each_document_once() {
        let backend = ScriptedBackend::new([r#"{"assignments":[
            {"article_id":"a","category":"Science & Environment"},
            {"article_id":"b","category":"Cybersecurity & Data Privacy"}]}"#]);
        let client = client_for(backend.clone());

        let result = assign_categories(&client, docs(), &taxonomy(), 70_000).await;

        assert_eq!(result.get("Science & Environment"), Some(&["a".to_string()][..]));
        assert_eq!(result.get("Cybersecurity & Data Privacy"), Some(&["b".to_string()][..]));
        assert_eq!(result.get("Other"), None);
        assert_eq!(backend.request_count(), 1);

        let prompt = backend.user_prompt(0);
        assert!(prompt.contains("Article ID=a:\nquantum computing breakthrough"));
        assert!(prompt.contains("- Cybersecurity & Data Privacy"));
    }

    #[tokio::test]
    async fn invented_category_is_coerced() {
        let backend = ScriptedBackend::new([
            "```json\n{\"assignments\":[{\"article_id\":\"a\",\"category\":\"Quantum Stuff\"},{\"article_id\":\"b\"}]}\n```",
        ]);
        let result = assign_categories(&client_for(backend), docs(), &taxonomy(), 70_000).await;

        assert_eq!(
            result.get("Other"),
            Some(&["a".to_string(), "b".to_string()][..])
        );
        assert_eq!(result.iter().count(), 1);
    }

    #[tokio::test]
    async fn foreign_and_repeated_ids_are_dropped() {
        let backend = ScriptedBackend::new([r#"{"assignments":[
            {"article_id":"a","category":"Science & Environment"},
            {"article_id":"a","category":"Other"},
            {"article_id":"zzz","category":"Other"}]}"#]);
        let result = assign_categories(&client_for(backend), docs(), &taxonomy(), 70_000).await;

        assert_eq!(result.assigned_count(), 1);
        assert_eq!(result.get("Science & Environment"), Some(&["a".to_string()][..]));
    }

    #[tokio::test]
    async fn failed_chunk_leaves_others_assigned() {
        // three words is 4 tokens, so a budget of 4 gives one document per chunk
        let backend = ScriptedBackend::new(Vec::<String>::new());
        backend.push_failure();
        backend.push_reply(
            r#"{"assignments":[{"article_id":"b","category":"Cybersecurity & Data Privacy"}]}"#,
        );
        let docs = vec![
            Document::new("a", "one two three"),
            Document::new("b", "four five six"),
        ];

        let result = assign_categories(&client_for(backend.clone()), docs, &taxonomy(), 4).await;

        assert_eq!(backend.request_count(), 2);
        assert_eq!(result.get("Cybersecurity & Data Privacy"), Some(&["b".to_string()][..]));
        assert_eq!(result.assigned_count(), 1);
    }

    #[tokio::test]
    async fn garbage_reply_is_empty_result() {
        let backend = ScriptedBackend::new(["I think article a is about science."]);
        let result = assign_categories(&client_for(backend), docs(), &taxonomy(), 70_000).await;
        assert!(result.is_empty());
    }
}
