use std::time::Duration;

use feed_rs::parser;
use futures::stream::{self, StreamExt};
use reqwest::Client;

use crate::config::FeedSource;
use crate::db::Repository;
use crate::dedup::DuplicateDetector;
use crate::error::Result;
use crate::models::NewArticle;

use super::dates::format_timestamp;

pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("threat-digest/0.1")
            .build()?;

        Ok(Self { client })
    }

    pub async fn fetch_feed(&self, source: &FeedSource) -> Result<Vec<NewArticle>> {
        let response = self.client.get(&source.url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch feed: HTTP {}", response.status()).into());
        }

        let final_url = response.url().to_string();
        let bytes = response.bytes().await?;
        parse_entries(&source.name, &final_url, &bytes)
    }

    /// Fetch all sources concurrently, at most five in flight. Failing sources
    /// are logged and left out.
    pub async fn refresh_all(&self, sources: &[FeedSource]) -> Vec<(String, Vec<NewArticle>)> {
        stream::iter(sources)
            .map(|source| async move {
                match self.fetch_feed(source).await {
                    Ok(articles) => {
                        tracing::debug!(source = %source.name, articles = articles.len(), "Fetched feed");
                        Some((source.name.clone(), articles))
                    }
                    Err(e) => {
                        tracing::warn!(source = %source.name, url = %source.url, error = %e, "Failed to fetch feed");
                        None
                    }
                }
            })
            .buffer_unordered(5)
            .filter_map(|r| async { r })
            .collect()
            .await
    }
}

/// Converts a raw RSS/Atom document into articles for `source`. Entries
/// without a usable link or any text are dropped.
pub fn parse_entries(source: &str, feed_url: &str, bytes: &[u8]) -> Result<Vec<NewArticle>> {
    let feed = parser::parse(bytes)?;

    let articles = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let link = entry
                .links
                .first()
                .and_then(|l| resolve_url(&l.href, feed_url))?;

            // Try content first, then fall back to summary
            let content_html = entry
                .content
                .as_ref()
                .and_then(|c| c.body.as_ref())
                .or_else(|| entry.summary.as_ref().map(|s| &s.content));
            let content = content_html
                .and_then(|html| html2text::from_read(html.as_bytes(), 80).ok())
                .map(|text| text.trim().to_string())
                .unwrap_or_default();
            let title = entry
                .title
                .map(|t| t.content.trim().to_string())
                .unwrap_or_default();

            if title.is_empty() && content.is_empty() {
                tracing::debug!(link = %link, "Entry has no text, skipping");
                return None;
            }

            Some(NewArticle {
                link,
                title,
                content,
                published_date: entry.published.or(entry.updated).map(|dt| format_timestamp(&dt)),
                source: source.to_string(),
            })
        })
        .collect();

    Ok(articles)
}

/// Resolve a potentially relative link against the feed URL. Anything that is
/// not an absolute http(s) URL afterwards is rejected.
fn resolve_url(href: &str, base_url: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }

    let resolved = match url::Url::parse(href) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => url::Url::parse(base_url).ok()?.join(href).ok()?,
        Err(_) => return None,
    };

    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub fetched: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub failed: usize,
}

/// Gates each article through the duplicate detector and stores the rest.
/// Articles are checked one at a time so repeats within a batch are caught.
/// A check that cannot read storage counts as "not a duplicate".
pub async fn ingest_articles(repository: &Repository, articles: Vec<NewArticle>) -> IngestReport {
    let detector = DuplicateDetector::new(repository);
    let mut report = IngestReport {
        fetched: articles.len(),
        ..Default::default()
    };

    for article in articles {
        let duplicate = detector
            .is_duplicate(&article.source, &article.link, &article.title, &article.content)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(link = %article.link, error = %e, "Duplicate check failed, storing anyway");
                false
            });
        if duplicate {
            report.duplicates += 1;
            continue;
        }

        let link = article.link.clone();
        match repository.insert_or_replace_article(article).await {
            Ok(()) => report.inserted += 1,
            Err(e) => {
                tracing::error!(link = %link, error = %e, "Failed to store article");
                report.failed += 1;
            }
        }
    }

    report
}

/// Fetches every configured source and stores whatever is new. Sources that
/// cannot be fetched are skipped; see `FeedFetcher::refresh_all`.
pub async fn run_ingest(
    repository: &Repository,
    fetcher: &FeedFetcher,
    sources: &[FeedSource],
) -> IngestReport {
    let mut total = IngestReport::default();

    for (source, articles) in fetcher.refresh_all(sources).await {
        let report = ingest_articles(repository, articles).await;
        tracing::info!(
            source = %source,
            fetched = report.fetched,
            inserted = report.inserted,
            duplicates = report.duplicates,
            failed = report.failed,
            "Ingested feed"
        );
        total.fetched += report.fetched;
        total.inserted += report.inserted;
        total.duplicates += report.duplicates;
        total.failed += report.failed;
    }

    total
}
