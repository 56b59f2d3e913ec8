//! Plain-text digest over the stored groupings and CVE mentions.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::db::Repository;
use crate::error::Result;
use crate::models::{CategoryOverview, CveRow, Subgroup, SubgroupArticle};

const WIDTH: usize = 88;
const NO_DATA: &str = "(no data)";

pub struct SubgroupDigest {
    pub subgroup: Subgroup,
    pub articles: Vec<SubgroupArticle>,
    pub companies: Vec<String>,
}

pub struct CategoryDigest {
    pub overview: CategoryOverview,
    pub subgroups: Vec<SubgroupDigest>,
}

pub struct Digest {
    pub cutoff: Option<DateTime<Utc>>,
    pub categories: Vec<CategoryDigest>,
    pub cves: Vec<CveRow>,
}

/// Gathers everything published at or after `cutoff`; `None` means all time.
pub async fn collect_digest(
    repository: &Repository,
    cutoff: Option<DateTime<Utc>>,
) -> Result<Digest> {
    let mut categories = Vec::new();

    for overview in repository.category_overview(cutoff).await? {
        let mut subgroups = Vec::new();
        for subgroup in repository
            .subgroups_for_category(&overview.category, cutoff)
            .await?
        {
            let articles = repository
                .articles_for_subgroup(subgroup.subgroup_id, cutoff)
                .await?;
            let links = articles.iter().map(|a| a.link.clone()).collect();
            let companies = repository.companies_for_articles(links).await?;
            subgroups.push(SubgroupDigest {
                subgroup,
                articles,
                companies,
            });
        }
        categories.push(CategoryDigest {
            overview,
            subgroups,
        });
    }

    let cves = repository.cve_table(cutoff).await?;

    Ok(Digest {
        cutoff,
        categories,
        cves,
    })
}

fn wrapped(text: &str, indent: &str) -> String {
    let options = textwrap::Options::new(WIDTH)
        .initial_indent(indent)
        .subsequent_indent(indent);
    textwrap::fill(text, options)
}

fn date(dt: Option<DateTime<Utc>>) -> String {
    dt.map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| NO_DATA.to_string())
}

fn or_no_data(value: &str) -> &str {
    if value.trim().is_empty() {
        NO_DATA
    } else {
        value
    }
}

pub fn render_digest(digest: &Digest) -> String {
    let mut out = String::new();

    let since = match digest.cutoff {
        Some(cutoff) => format!("since {}", cutoff.format("%Y-%m-%d %H:%M UTC")),
        None => "all time".to_string(),
    };
    let _ = writeln!(out, "Threat digest ({})", since);
    let _ = writeln!(out, "{}", "=".repeat(WIDTH));

    if digest.categories.is_empty() {
        let _ = writeln!(out, "\nNo categorized articles.");
    }

    for category in &digest.categories {
        let overview = &category.overview;
        let _ = writeln!(
            out,
            "\n## {} ({} articles, {} runs)",
            overview.category, overview.article_count, overview.group_count
        );

        if category.subgroups.is_empty() {
            let _ = writeln!(out, "  No subgroups yet.");
        }

        for entry in &category.subgroups {
            let subgroup = &entry.subgroup;
            let _ = writeln!(
                out,
                "\n  * {} ({} articles)",
                subgroup.group_label, subgroup.article_count
            );
            let summary = subgroup.summary.as_deref().unwrap_or(NO_DATA);
            let _ = writeln!(out, "{}", wrapped(summary, "    "));
            if !entry.companies.is_empty() {
                let companies = format!("Companies: {}", entry.companies.join(", "));
                let _ = writeln!(out, "{}", wrapped(&companies, "    "));
            }
            for article in &entry.articles {
                let _ = writeln!(
                    out,
                    "    - [{}] {} <{}>",
                    date(article.published_date),
                    article.title,
                    article.link
                );
            }
        }
    }

    let _ = writeln!(out, "\n## CVEs");
    if digest.cves.is_empty() {
        let _ = writeln!(out, "  No CVE mentions.");
    }
    for row in &digest.cves {
        let _ = writeln!(
            out,
            "\n  {}  seen {}x  first {}  last {}",
            row.cve_id,
            row.times_seen,
            date(row.first_mention),
            date(row.last_mention)
        );
        match &row.detail {
            Some(detail) => {
                let score = detail
                    .base_score
                    .map(|s| format!("{:.1}", s))
                    .unwrap_or_else(|| NO_DATA.to_string());
                let _ = writeln!(out, "    Score: {}", score);
                let _ = writeln!(out, "    Vendor: {}", or_no_data(&detail.vendor));
                let _ = writeln!(out, "    Products: {}", or_no_data(&detail.affected_products));
                let _ = writeln!(out, "    Advisory: {}", or_no_data(&detail.vendor_link));
                let solution = format!("Solution: {}", or_no_data(&detail.solution));
                let _ = writeln!(out, "{}", wrapped(&solution, "    "));
            }
            None => {
                let _ = writeln!(out, "    Details: {}", NO_DATA);
            }
        }
        for link in &row.articles {
            let _ = writeln!(out, "    - {}", link);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::models::{CveDetail, DiscoveredSubgroup, NewArticle, NewCveInfo};

    async fn seeded() -> Repository {
        let repo = Repository::open_in_memory().await.unwrap();
        for (link, title, date, content) in [
            ("old", "Old story", "2020-01-01T00:00:00Z", "CVE-2019-0001 was patched"),
            ("new", "Acme breach", "2025-06-01T00:00:00Z", "CVE-2024-1234 exploited"),
        ] {
            repo.insert_or_replace_article(NewArticle {
                link: link.to_string(),
                title: title.to_string(),
                content: content.to_string(),
                published_date: Some(date.to_string()),
                source: "feed".to_string(),
            })
            .await
            .unwrap();
        }
        repo.save_category_group("Cyber", "", "Cyber", vec!["old".into(), "new".into()])
            .await
            .unwrap();
        repo.save_subgroups(
            "Cyber",
            vec![DiscoveredSubgroup {
                label: "Breaches".to_string(),
                summary: String::new(),
                member_ids: vec!["old".to_string(), "new".to_string()],
            }],
        )
        .await
        .unwrap();
        repo.save_companies(vec![("new".to_string(), vec!["Acme Corp".to_string()])])
            .await
            .unwrap();
        repo.save_article_cves("new", vec!["CVE-2024-1234".into()], Some("2025-06-01T00:00:00Z".into()))
            .await
            .unwrap();
        repo.save_article_cves("old", vec!["CVE-2019-0001".into()], Some("2020-01-01T00:00:00Z".into()))
            .await
            .unwrap();
        repo.upsert_cve_info(NewCveInfo {
            cve_id: "CVE-2024-1234".to_string(),
            detail: CveDetail {
                base_score: Some(9.8),
                vendor: "Acme".to_string(),
                ..Default::default()
            },
            times_mentioned: 1,
        })
        .await
        .unwrap();
        repo
    }

    #[tokio::test]
    async fn all_time_digest_lists_everything() {
        let repo = seeded().await;
        let text = render_digest(&collect_digest(&repo, None).await.unwrap());

        assert!(text.contains("Threat digest (all time)"));
        assert!(text.contains("## Cyber (2 articles, 1 runs)"));
        assert!(text.contains("* Breaches (2 articles)"));
        assert!(text.contains("Companies: Acme Corp"));
        assert!(text.contains("CVE-2019-0001"));
        assert!(text.contains("Score: 9.8"));
        assert!(text.contains("Products: (no data)"));
        assert!(text.contains("Details: (no data)"));
    }

    #[tokio::test]
    async fn cutoff_hides_older_articles() {
        let repo = seeded().await;
        let cutoff = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single();
        let digest = collect_digest(&repo, cutoff).await.unwrap();

        assert_eq!(digest.categories[0].overview.article_count, 1);
        assert_eq!(digest.categories[0].subgroups[0].articles.len(), 1);
        assert_eq!(digest.cves.len(), 1);

        let text = render_digest(&digest);
        assert!(text.contains("since 2025-01-01 00:00 UTC"));
        assert!(!text.contains("Old story"));
        assert!(!text.contains("CVE-2019-0001"));
    }
}
