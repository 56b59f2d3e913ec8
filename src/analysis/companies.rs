use std::collections::HashSet;

use serde::Deserialize;

use crate::ai::response::{decode_model_json, ArticleId};
use crate::ai::{ChatMessage, ClassificationClient};
use crate::db::Repository;
use crate::error::Result;
use crate::models::Document;

use super::chunker::chunk_documents;
use super::prompt::inline_documents;

pub const SNIPPET_CHARS: usize = 5000;

#[derive(Debug, Deserialize)]
struct ExtractionReply {
    extractions: Vec<RawExtraction>,
}

#[derive(Debug, Deserialize)]
struct RawExtraction {
    article_id: Option<ArticleId>,
    #[serde(default)]
    companies: Vec<String>,
}

fn snippet(mut document: Document) -> Document {
    if let Some((cut, _)) = document.text.char_indices().nth(SNIPPET_CHARS) {
        document.text.truncate(cut);
    }
    document
}

fn build_messages(chunk: &[Document]) -> Vec<ChatMessage> {
    let user = format!(
        "You are a named-entity recognition AI. For each article, extract all company names mentioned. \
         Return only JSON with the format:\n\
         {{ \"extractions\": [ {{\"article_id\": \"...\", \"companies\": [\"CompanyA\", \"CompanyB\"]}}, ... ] }}\n\n{}",
        inline_documents(chunk, "Article ID=", ":\n")
    );
    vec![
        ChatMessage::system("Extract company names from the provided article texts."),
        ChatMessage::user(user),
    ]
}

async fn extract_chunk(
    client: &ClassificationClient,
    chunk: &[Document],
) -> Vec<(String, Vec<String>)> {
    let Some(reply) = client.classify(&build_messages(chunk)).await else {
        tracing::warn!("No response for company extraction chunk");
        return Vec::new();
    };
    let Some(reply) = decode_model_json::<ExtractionReply>(&reply) else {
        return Vec::new();
    };

    let chunk_ids: HashSet<&str> = chunk.iter().map(|d| d.id.as_str()).collect();
    reply
        .extractions
        .into_iter()
        .filter_map(|raw| {
            let ArticleId(id) = raw.article_id?;
            if !chunk_ids.contains(id.as_str()) {
                tracing::warn!(article = %id, "Extraction for an id outside the chunk, ignoring");
                return None;
            }
            let companies: Vec<String> = raw
                .companies
                .iter()
                .map(|name| name.trim())
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
            (!companies.is_empty()).then_some((id, companies))
        })
        .collect()
}

/// Extracts company names for every article that has none yet. Returns the
/// number of new (article, company) pairs.
pub async fn run_company_extraction(
    repository: &Repository,
    client: &ClassificationClient,
    max_tokens: usize,
) -> Result<usize> {
    let documents = repository.documents_missing_companies().await?;
    if documents.is_empty() {
        tracing::info!("All articles already have company extractions");
        return Ok(0);
    }

    let chunks: Vec<Vec<Document>> =
        chunk_documents(documents.into_iter().map(snippet), max_tokens).collect();
    let mut inserted = 0;

    for (index, chunk) in chunks.iter().enumerate() {
        tracing::info!(
            chunk = index + 1,
            of = chunks.len(),
            articles = chunk.len(),
            "Extracting company names"
        );

        let extractions = extract_chunk(client, chunk).await;
        if extractions.is_empty() {
            continue;
        }
        match repository.save_companies(extractions).await {
            Ok(count) => inserted += count,
            Err(e) => tracing::error!(chunk = index + 1, error = %e, "Failed to save companies"),
        }
    }

    tracing::info!(inserted, "Finished extracting company names");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::testing::{client_for, ScriptedBackend};
    use crate::models::NewArticle;

    #[test]
    fn snippet_counts_characters_not_bytes() {
        let long = Document::new("a", "é".repeat(SNIPPET_CHARS + 10));
        assert_eq!(snippet(long).text.chars().count(), SNIPPET_CHARS);

        let short = Document::new("b", "short");
        assert_eq!(snippet(short).text, "short");
    }

    #[tokio::test]
    async fn stores_trimmed_names_and_skips_done_articles() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.insert_or_replace_article(NewArticle {
            link: "l1".to_string(),
            title: "Acme breach".to_string(),
            content: "Acme Corp and Globex were hit.".to_string(),
            published_date: None,
            source: "feed".to_string(),
        })
        .await
        .unwrap();

        let backend = ScriptedBackend::new([r#"{"extractions":[
            {"article_id":"l1","companies":[" Acme Corp ","Globex",""]},
            {"article_id":"ghost","companies":["Initech"]}
        ]}"#]);
        let client = client_for(backend.clone());

        assert_eq!(run_company_extraction(&repo, &client, 70_000).await.unwrap(), 2);
        assert_eq!(
            repo.companies_for_articles(vec!["l1".to_string()]).await.unwrap(),
            vec!["Acme Corp".to_string(), "Globex".to_string()]
        );

        // nothing left to extract, so no further request is made
        assert_eq!(run_company_extraction(&repo, &client, 70_000).await.unwrap(), 0);
        assert_eq!(backend.request_count(), 1);
    }
}
