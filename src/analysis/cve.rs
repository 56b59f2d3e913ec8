use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::db::Repository;
use crate::error::Result;
use crate::models::NewCveInfo;
use crate::services::CveLookup;

static CVE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bCVE-\d{4}-\d{4,7}\b").unwrap());

/// Distinct CVE identifiers mentioned in `text`.
pub fn extract_cve_ids(text: &str) -> BTreeSet<String> {
    CVE_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Records every CVE mention found in stored article content. Returns the
/// number of new (article, CVE) pairs.
pub async fn process_cve_mentions(repository: &Repository) -> Result<usize> {
    let articles = repository.article_contents().await?;
    let mut inserted = 0;

    for article in articles {
        let ids = extract_cve_ids(&article.content);
        if ids.is_empty() {
            continue;
        }
        match repository
            .save_article_cves(&article.link, ids.into_iter().collect(), article.published_date)
            .await
        {
            Ok(count) => inserted += count,
            Err(e) => tracing::error!(article = %article.link, error = %e, "Failed to save CVE mentions"),
        }
    }

    tracing::info!(inserted, "Finished processing CVE mentions");
    Ok(inserted)
}

/// Looks up every mentioned CVE and caches its details. Identifiers that
/// cannot be resolved are skipped. Returns the number of cached records.
pub async fn refresh_cve_details(repository: &Repository, lookup: &dyn CveLookup) -> Result<usize> {
    let counts = repository.cve_mention_counts().await?;
    let mut updated = 0;

    for (cve_id, times_mentioned) in counts {
        let detail = match lookup.lookup(&cve_id).await {
            Ok(Some(detail)) => detail,
            Ok(None) => {
                tracing::debug!(cve_id = %cve_id, "CVE not found");
                continue;
            }
            Err(e) => {
                tracing::warn!(cve_id = %cve_id, error = %e, "CVE lookup failed");
                continue;
            }
        };

        let info = NewCveInfo {
            cve_id,
            detail,
            times_mentioned,
        };
        match repository.upsert_cve_info(info).await {
            Ok(()) => updated += 1,
            Err(e) => tracing::error!(error = %e, "Failed to cache CVE details"),
        }
    }

    tracing::info!(updated, "Updated CVE details");
    Ok(updated)
}
