use crate::db::Repository;
use crate::error::Result;

use super::matcher::{normalize, ratio};

/// Both ratios must be strictly greater than their threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityThresholds {
    pub title: f64,
    pub content: f64,
}

impl Default for SimilarityThresholds {
    fn default() -> Self {
        Self {
            title: 0.90,
            content: 0.85,
        }
    }
}

impl SimilarityThresholds {
    /// Compares one candidate against one stored article.
    /// The cheaper title check runs first and short-circuits.
    pub fn same_story(
        &self,
        candidate_title: &str,
        candidate_content: &str,
        stored_title: &str,
        stored_content: &str,
    ) -> bool {
        self.matches_normalized(
            &normalize(candidate_title),
            &normalize(candidate_content),
            stored_title,
            stored_content,
        )
    }

    fn matches_normalized(
        &self,
        title: &str,
        content: &str,
        stored_title: &str,
        stored_content: &str,
    ) -> bool {
        ratio(title, &normalize(stored_title)) > self.title
            && ratio(content, &normalize(stored_content)) > self.content
    }
}

/// Ingestion gate. Scans every stored article of the same source, so cost is
/// linear in the source's history; past tens of thousands of rows per source
/// this needs a fingerprint index.
///
/// The matcher keeps the autojunk heuristic, so bodies of 200 or more
/// characters lose their common letters as anchors and score far lower than
/// they look. In practice the content threshold only fires on short bodies and
/// the exact link match carries most of the work.
pub struct DuplicateDetector<'a> {
    repository: &'a Repository,
    thresholds: SimilarityThresholds,
}

impl<'a> DuplicateDetector<'a> {
    pub fn new(repository: &'a Repository) -> Self {
        Self {
            repository,
            thresholds: SimilarityThresholds::default(),
        }
    }

    pub async fn is_duplicate(
        &self,
        source: &str,
        link: &str,
        title: &str,
        content: &str,
    ) -> Result<bool> {
        if self.repository.article_exists(link).await? {
            tracing::debug!(link, "Duplicate found (exact link match)");
            return Ok(true);
        }

        let title = normalize(title);
        let content = normalize(content);
        let stored = self.repository.texts_for_source(source).await?;
        let duplicate = stored.iter().any(|existing| {
            self.thresholds
                .matches_normalized(&title, &content, &existing.title, &existing.content)
        });

        if duplicate {
            tracing::debug!(link, source, "Duplicate found (similar content)");
        }
        Ok(duplicate)
    }
}
