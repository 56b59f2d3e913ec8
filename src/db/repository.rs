use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::feed::dates::{format_timestamp, parse_datetime};
use crate::models::{
    CategoryGroup, CategoryOverview, CveDetail, CveRow, DiscoveredSubgroup, Document,
    NewArticle, NewCveInfo, Subgroup, SubgroupArticle,
};

use super::schema::SCHEMA;

/// Handle to the shared store. Every stage receives it explicitly.
pub struct Repository {
    conn: Connection,
}

/// Title, content pair of a stored article, used by the duplicate check.
#[derive(Debug, Clone)]
pub struct StoredText {
    pub title: String,
    pub content: String,
}

/// An article's content as seen by the CVE extractor.
#[derive(Debug, Clone)]
pub struct ArticleContent {
    pub link: String,
    pub content: String,
    pub published_date: Option<String>,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    #[cfg(test)]
    pub(crate) async fn execute_batch(&self, sql: &'static str) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute_batch(sql)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Article operations

    /// Upstream write path: a newer scrape of the same link replaces the row.
    pub async fn insert_or_replace_article(&self, article: NewArticle) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT OR REPLACE INTO articles (link, title, content, published_date, source)
                       VALUES (?1, ?2, ?3, ?4, ?5)"#,
                    params![
                        article.link,
                        article.title,
                        article.content,
                        article.published_date,
                        article.source,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn article_exists(&self, link: &str) -> Result<bool> {
        let link = link.to_string();
        let exists = self
            .conn
            .call(move |conn| {
                let found = conn
                    .query_row(
                        "SELECT 1 FROM articles WHERE link = ?1",
                        params![link],
                        |_| Ok(()),
                    )
                    .optional()?;
                Ok(found.is_some())
            })
            .await?;
        Ok(exists)
    }

    pub async fn texts_for_source(&self, source: &str) -> Result<Vec<StoredText>> {
        let source = source.to_string();
        let texts = self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT title, content FROM articles WHERE source = ?1")?;
                let texts = stmt
                    .query_map(params![source], |row| {
                        Ok(StoredText {
                            title: row.get(0)?,
                            content: row.get(1)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(texts)
            })
            .await?;
        Ok(texts)
    }

    pub async fn published_dates(&self) -> Result<Vec<(String, String)>> {
        let dates = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT link, published_date FROM articles WHERE published_date IS NOT NULL",
                )?;
                let dates = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(dates)
            })
            .await?;
        Ok(dates)
    }

    pub async fn update_published_date(&self, link: &str, published_date: &str) -> Result<()> {
        let link = link.to_string();
        let published_date = published_date.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE articles SET published_date = ?1 WHERE link = ?2",
                    params![published_date, link],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn article_contents(&self) -> Result<Vec<ArticleContent>> {
        let contents = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT link, content, published_date FROM articles")?;
                let contents = stmt
                    .query_map([], |row| {
                        Ok(ArticleContent {
                            link: row.get(0)?,
                            content: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                            published_date: row.get(2)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(contents)
            })
            .await?;
        Ok(contents)
    }

    // Phase 1: category assignment

    /// Articles with no category membership, newest first.
    pub async fn unclassified_documents(&self) -> Result<Vec<Document>> {
        self.documents(
            r#"SELECT a.link, a.title || ' - ' || a.content
               FROM articles a
               WHERE NOT EXISTS (
                   SELECT 1 FROM category_memberships m WHERE m.article_link = a.link
               )
               ORDER BY a.published_date DESC NULLS LAST"#,
            Vec::new(),
        )
        .await
    }

    /// Creates a fresh group row and moves every listed article into it.
    /// The whole group is one transaction; an error leaves nothing behind.
    pub async fn save_category_group(
        &self,
        main_topic: &str,
        sub_topic: &str,
        group_label: &str,
        article_links: Vec<String>,
    ) -> Result<i64> {
        let main_topic = main_topic.to_string();
        let sub_topic = sub_topic.to_string();
        let group_label = group_label.to_string();
        let group_id = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO category_groups (main_topic, sub_topic, group_label) VALUES (?1, ?2, ?3)",
                    params![main_topic, sub_topic, group_label],
                )?;
                let group_id = tx.last_insert_rowid();
                {
                    let mut delete =
                        tx.prepare("DELETE FROM category_memberships WHERE article_link = ?1")?;
                    let mut insert = tx.prepare(
                        "INSERT OR IGNORE INTO category_memberships (article_link, group_id) VALUES (?1, ?2)",
                    )?;
                    for link in &article_links {
                        delete.execute(params![link])?;
                        insert.execute(params![link, group_id])?;
                    }
                }
                tx.commit()?;
                Ok(group_id)
            })
            .await?;
        Ok(group_id)
    }

    pub async fn category_groups(&self) -> Result<Vec<CategoryGroup>> {
        let groups = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT group_id, main_topic, sub_topic, group_label, created_at, updated_at
                       FROM category_groups ORDER BY group_id"#,
                )?;
                let groups = stmt
                    .query_map([], category_group_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(groups)
            })
            .await?;
        Ok(groups)
    }

    /// Category currently holding the article, if any.
    pub async fn category_of(&self, link: &str) -> Result<Option<String>> {
        let link = link.to_string();
        let category = self
            .conn
            .call(move |conn| {
                let category = conn
                    .query_row(
                        r#"SELECT g.main_topic FROM category_memberships m
                           JOIN category_groups g ON g.group_id = m.group_id
                           WHERE m.article_link = ?1"#,
                        params![link],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(category)
            })
            .await?;
        Ok(category)
    }

    pub async fn category_membership_count(&self, link: &str) -> Result<i64> {
        let link = link.to_string();
        let count = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM category_memberships WHERE article_link = ?1",
                    params![link],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }

    // Phase 2: subgroup discovery

    /// Articles placed in `category` that no subgroup of `category` holds yet.
    pub async fn unsubgrouped_documents(&self, category: &str) -> Result<Vec<Document>> {
        self.documents(
            r#"SELECT a.link, a.title || ' - ' || a.content
               FROM articles a
               JOIN category_memberships m ON m.article_link = a.link
               JOIN category_groups g ON g.group_id = m.group_id
               WHERE g.main_topic = ?1
                 AND NOT EXISTS (
                     SELECT 1 FROM subgroup_memberships sm
                     JOIN subgroups s ON s.subgroup_id = sm.subgroup_id
                     WHERE sm.article_link = a.link AND s.category = ?1
                 )
               ORDER BY a.published_date DESC NULLS LAST"#,
            vec![category.to_string()],
        )
        .await
    }

    /// Persists one chunk's clusters atomically. An article already held by a
    /// subgroup of `category` is not added again, and a subgroup left with no
    /// members is not kept.
    pub async fn save_subgroups(
        &self,
        category: &str,
        subgroups: Vec<DiscoveredSubgroup>,
    ) -> Result<Vec<i64>> {
        let category = category.to_string();
        let ids = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut ids = Vec::with_capacity(subgroups.len());
                {
                    let mut insert_group = tx.prepare(
                        "INSERT INTO subgroups (category, group_label, summary) VALUES (?1, ?2, ?3)",
                    )?;
                    let mut insert_member = tx.prepare(
                        r#"INSERT OR IGNORE INTO subgroup_memberships (article_link, subgroup_id)
                           SELECT ?1, ?2
                           WHERE NOT EXISTS (
                               SELECT 1 FROM subgroup_memberships sm
                               JOIN subgroups s ON s.subgroup_id = sm.subgroup_id
                               WHERE sm.article_link = ?1 AND s.category = ?3
                           )"#,
                    )?;
                    let mut delete_group =
                        tx.prepare("DELETE FROM subgroups WHERE subgroup_id = ?1")?;
                    for subgroup in &subgroups {
                        let subgroup_id = insert_group.insert(params![
                            category,
                            subgroup.label,
                            subgroup.summary
                        ])?;
                        let mut added = 0;
                        for link in &subgroup.member_ids {
                            added += insert_member.execute(params![link, subgroup_id, category])?;
                        }
                        if added == 0 {
                            delete_group.execute(params![subgroup_id])?;
                            continue;
                        }
                        ids.push(subgroup_id);
                    }
                }
                tx.commit()?;
                Ok(ids)
            })
            .await?;
        Ok(ids)
    }

    pub async fn subgroup_membership_count(&self, link: &str, category: &str) -> Result<i64> {
        let link = link.to_string();
        let category = category.to_string();
        let count = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    r#"SELECT COUNT(*) FROM subgroup_memberships sm
                       JOIN subgroups s ON s.subgroup_id = sm.subgroup_id
                       WHERE sm.article_link = ?1 AND s.category = ?2"#,
                    params![link, category],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }

    // Company extraction

    pub async fn documents_missing_companies(&self) -> Result<Vec<Document>> {
        self.documents(
            r#"SELECT a.link, a.title || ' - ' || a.content
               FROM articles a
               WHERE NOT EXISTS (
                   SELECT 1 FROM article_companies ac WHERE ac.article_link = a.link
               )
               ORDER BY a.published_date DESC NULLS LAST"#,
            Vec::new(),
        )
        .await
    }

    /// Returns the number of new (article, company) pairs.
    pub async fn save_companies(&self, extractions: Vec<(String, Vec<String>)>) -> Result<usize> {
        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut inserted = 0;
                {
                    let mut insert = tx.prepare(
                        "INSERT OR IGNORE INTO article_companies (article_link, company_name) VALUES (?1, ?2)",
                    )?;
                    for (link, companies) in &extractions {
                        for company in companies {
                            inserted += insert.execute(params![link, company])?;
                        }
                    }
                }
                tx.commit()?;
                Ok(inserted)
            })
            .await?;
        Ok(inserted)
    }

    pub async fn companies_for_articles(&self, links: Vec<String>) -> Result<Vec<String>> {
        if links.is_empty() {
            return Ok(Vec::new());
        }
        let companies = self
            .conn
            .call(move |conn| {
                let placeholders = vec!["?"; links.len()].join(",");
                let sql = format!(
                    "SELECT DISTINCT company_name FROM article_companies WHERE article_link IN ({}) ORDER BY company_name",
                    placeholders
                );
                let mut stmt = conn.prepare(&sql)?;
                let companies = stmt
                    .query_map(rusqlite::params_from_iter(links.iter()), |row| row.get(0))?
                    .collect::<std::result::Result<Vec<String>, _>>()?;
                Ok(companies)
            })
            .await?;
        Ok(companies)
    }

    // CVE operations

    /// Returns the number of new (article, CVE) pairs.
    pub async fn save_article_cves(
        &self,
        link: &str,
        cve_ids: Vec<String>,
        published_date: Option<String>,
    ) -> Result<usize> {
        let link = link.to_string();
        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut inserted = 0;
                {
                    let mut insert = tx.prepare(
                        "INSERT OR IGNORE INTO article_cves (article_link, cve_id, published_date) VALUES (?1, ?2, ?3)",
                    )?;
                    for cve_id in &cve_ids {
                        inserted += insert.execute(params![link, cve_id, published_date])?;
                    }
                }
                tx.commit()?;
                Ok(inserted)
            })
            .await?;
        Ok(inserted)
    }

    /// Distinct CVE ids with the number of articles mentioning each.
    pub async fn cve_mention_counts(&self) -> Result<Vec<(String, i64)>> {
        let counts = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT cve_id, COUNT(*) FROM article_cves GROUP BY cve_id ORDER BY cve_id",
                )?;
                let counts = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(counts)
            })
            .await?;
        Ok(counts)
    }

    pub async fn upsert_cve_info(&self, info: NewCveInfo) -> Result<()> {
        self.conn
            .call(move |conn| {
                let detail = &info.detail;
                conn.execute(
                    r#"INSERT INTO cve_info (
                           cve_id, base_score, vendor, affected_products, cve_url,
                           vendor_link, solution, times_mentioned, raw_json
                       )
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                       ON CONFLICT(cve_id) DO UPDATE SET
                           base_score = excluded.base_score,
                           vendor = excluded.vendor,
                           affected_products = excluded.affected_products,
                           cve_url = excluded.cve_url,
                           vendor_link = excluded.vendor_link,
                           solution = excluded.solution,
                           times_mentioned = excluded.times_mentioned,
                           raw_json = excluded.raw_json,
                           updated_at = datetime('now')"#,
                    params![
                        info.cve_id,
                        detail.base_score,
                        detail.vendor,
                        detail.affected_products,
                        detail.cve_url,
                        detail.vendor_link,
                        detail.solution,
                        info.times_mentioned,
                        detail.raw_json,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// CVE mentions since `cutoff`, joined with cached details, most mentioned first.
    pub async fn cve_table(&self, cutoff: Option<DateTime<Utc>>) -> Result<Vec<CveRow>> {
        let cutoff = cutoff.map(|dt| format_timestamp(&dt));
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT ac.cve_id, ac.article_link, a.published_date
                       FROM article_cves ac
                       JOIN articles a ON ac.article_link = a.link
                       WHERE (?1 IS NULL OR a.published_date >= ?1)
                       ORDER BY ac.cve_id"#,
                )?;
                let mentions = stmt
                    .query_map(params![cutoff], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                        ))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                let mut stmt = conn.prepare(
                    r#"SELECT cve_id, base_score, vendor, affected_products, cve_url,
                              vendor_link, solution, raw_json
                       FROM cve_info"#,
                )?;
                let details = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, cve_detail_from_row(row)?)))?
                    .collect::<std::result::Result<HashMap<_, _>, _>>()?;

                Ok((mentions, details))
            })
            .await
            .map(|(mentions, mut details)| build_cve_rows(mentions, &mut details))?;
        Ok(rows)
    }

    // Read side

    pub async fn category_overview(
        &self,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<Vec<CategoryOverview>> {
        let cutoff = cutoff.map(|dt| format_timestamp(&dt));
        let overview = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT g.main_topic, COUNT(DISTINCT g.group_id), COUNT(m.article_link)
                       FROM category_groups g
                       JOIN category_memberships m ON m.group_id = g.group_id
                       JOIN articles a ON a.link = m.article_link
                       WHERE (?1 IS NULL OR a.published_date >= ?1)
                       GROUP BY g.main_topic
                       ORDER BY COUNT(m.article_link) DESC, g.main_topic"#,
                )?;
                let overview = stmt
                    .query_map(params![cutoff], |row| {
                        Ok(CategoryOverview {
                            category: row.get(0)?,
                            group_count: row.get::<_, i64>(1)? as usize,
                            article_count: row.get::<_, i64>(2)? as usize,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(overview)
            })
            .await?;
        Ok(overview)
    }

    pub async fn subgroups_for_category(
        &self,
        category: &str,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<Vec<Subgroup>> {
        let category = category.to_string();
        let cutoff = cutoff.map(|dt| format_timestamp(&dt));
        let subgroups = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT s.subgroup_id, s.category, s.group_label, s.summary,
                              s.created_at, s.updated_at, COUNT(a.link)
                       FROM subgroups s
                       JOIN subgroup_memberships sm ON sm.subgroup_id = s.subgroup_id
                       JOIN articles a ON a.link = sm.article_link
                       WHERE s.category = ?1 AND (?2 IS NULL OR a.published_date >= ?2)
                       GROUP BY s.subgroup_id
                       ORDER BY s.updated_at DESC, s.subgroup_id DESC"#,
                )?;
                let subgroups = stmt
                    .query_map(params![category, cutoff], subgroup_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(subgroups)
            })
            .await?;
        Ok(subgroups)
    }

    pub async fn articles_for_subgroup(
        &self,
        subgroup_id: i64,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<Vec<SubgroupArticle>> {
        let cutoff = cutoff.map(|dt| format_timestamp(&dt));
        let articles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT a.link, a.title, a.published_date
                       FROM articles a
                       JOIN subgroup_memberships sm ON sm.article_link = a.link
                       WHERE sm.subgroup_id = ?1 AND (?2 IS NULL OR a.published_date >= ?2)
                       ORDER BY a.published_date DESC NULLS LAST"#,
                )?;
                let articles = stmt
                    .query_map(params![subgroup_id, cutoff], |row| {
                        Ok(SubgroupArticle {
                            link: row.get(0)?,
                            title: row.get(1)?,
                            published_date: row
                                .get::<_, Option<String>>(2)?
                                .and_then(|s| parse_datetime(&s)),
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    /// Runs a `(link, text)` selection and keeps rows whose trimmed text is non-empty.
    async fn documents(&self, sql: &'static str, args: Vec<String>) -> Result<Vec<Document>> {
        let documents = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(sql)?;
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(args.iter()), |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        ))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        Ok(documents
            .into_iter()
            .filter_map(|(link, text)| {
                let text = text.trim();
                (!text.is_empty()).then(|| Document::new(link, text))
            })
            .collect())
    }
}

fn timestamp_from_row(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .and_then(|s| parse_datetime(&s))
        .unwrap_or_else(Utc::now))
}

fn category_group_from_row(row: &Row) -> rusqlite::Result<CategoryGroup> {
    Ok(CategoryGroup {
        group_id: row.get(0)?,
        main_topic: row.get(1)?,
        sub_topic: row.get(2)?,
        group_label: row.get(3)?,
        created_at: timestamp_from_row(row, 4)?,
        updated_at: timestamp_from_row(row, 5)?,
    })
}

fn subgroup_from_row(row: &Row) -> rusqlite::Result<Subgroup> {
    Ok(Subgroup {
        subgroup_id: row.get(0)?,
        category: row.get(1)?,
        group_label: row.get(2)?,
        summary: row
            .get::<_, Option<String>>(3)?
            .filter(|s| !s.trim().is_empty()),
        created_at: timestamp_from_row(row, 4)?,
        updated_at: timestamp_from_row(row, 5)?,
        article_count: row.get::<_, i64>(6)? as usize,
    })
}

fn cve_detail_from_row(row: &Row) -> rusqlite::Result<CveDetail> {
    Ok(CveDetail {
        base_score: row.get(1)?,
        vendor: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        affected_products: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        cve_url: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        vendor_link: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        solution: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        raw_json: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
    })
}

fn build_cve_rows(
    mentions: Vec<(String, String, Option<String>)>,
    details: &mut HashMap<String, CveDetail>,
) -> Vec<CveRow> {
    let mut by_cve: BTreeMap<String, Vec<(String, Option<DateTime<Utc>>)>> = BTreeMap::new();
    for (cve_id, link, published) in mentions {
        let published = published.and_then(|s| parse_datetime(&s));
        by_cve.entry(cve_id).or_default().push((link, published));
    }

    let mut rows: Vec<CveRow> = by_cve
        .into_iter()
        .map(|(cve_id, mentions)| {
            let mut articles: Vec<String> = Vec::new();
            for (link, _) in &mentions {
                if !articles.contains(link) {
                    articles.push(link.clone());
                }
            }
            let dates = mentions.iter().filter_map(|(_, dt)| *dt);
            CveRow {
                times_seen: articles.len(),
                first_mention: dates.clone().min(),
                last_mention: dates.max(),
                detail: details.remove(&cve_id),
                cve_id,
                articles,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        b.times_seen
            .cmp(&a.times_seen)
            .then_with(|| a.cve_id.cmp(&b.cve_id))
    });
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(link: &str, title: &str, date: &str) -> NewArticle {
        NewArticle {
            link: link.to_string(),
            title: title.to_string(),
            content: format!("{} body", title),
            published_date: Some(date.to_string()),
            source: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn unclassified_is_newest_first() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.insert_or_replace_article(article("a", "Older", "2024-01-01T00:00:00Z"))
            .await
            .unwrap();
        repo.insert_or_replace_article(article("b", "Newer", "2024-02-01T00:00:00Z"))
            .await
            .unwrap();

        let docs = repo.unclassified_documents().await.unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(docs[0].text, "Newer - Newer body");
    }

    #[tokio::test]
    async fn regrouping_moves_membership() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.insert_or_replace_article(article("a", "A", "2024-01-01T00:00:00Z"))
            .await
            .unwrap();

        repo.save_category_group("Science & Environment", "", "Science & Environment", vec!["a".into()])
            .await
            .unwrap();
        repo.save_category_group("Other", "", "Other", vec!["a".into()])
            .await
            .unwrap();

        assert_eq!(repo.category_membership_count("a").await.unwrap(), 1);
        assert_eq!(repo.category_of("a").await.unwrap().as_deref(), Some("Other"));
        assert_eq!(repo.category_groups().await.unwrap().len(), 2);
        assert!(repo.unclassified_documents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn one_subgroup_per_category_per_article() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.insert_or_replace_article(article("a", "A", "2024-01-01T00:00:00Z"))
            .await
            .unwrap();
        let subgroup = |label: &str| DiscoveredSubgroup {
            label: label.to_string(),
            summary: String::new(),
            member_ids: vec!["a".to_string()],
        };

        let first = repo.save_subgroups("Cyber", vec![subgroup("First")]).await.unwrap();
        let second = repo
            .save_subgroups("Cyber", vec![subgroup("Second")])
            .await
            .unwrap();
        let elsewhere = repo
            .save_subgroups("Science", vec![subgroup("Elsewhere")])
            .await
            .unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(elsewhere.len(), 1);
        assert_eq!(repo.subgroup_membership_count("a", "Cyber").await.unwrap(), 1);
        assert_eq!(repo.subgroup_membership_count("a", "Science").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn replacing_article_keeps_membership() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.insert_or_replace_article(article("a", "A", "2024-01-01T00:00:00Z"))
            .await
            .unwrap();
        repo.save_category_group("Other", "", "Other", vec!["a".into()])
            .await
            .unwrap();
        repo.insert_or_replace_article(article("a", "A updated", "2024-01-01T00:00:00Z"))
            .await
            .unwrap();

        assert_eq!(repo.category_membership_count("a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cutoff_filters_cve_table() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.insert_or_replace_article(article("old", "Old", "2023-01-01T00:00:00Z"))
            .await
            .unwrap();
        repo.insert_or_replace_article(article("new", "New", "2024-06-01T00:00:00Z"))
            .await
            .unwrap();
        repo.save_article_cves("old", vec!["CVE-2023-0001".into()], None)
            .await
            .unwrap();
        repo.save_article_cves("new", vec!["CVE-2023-0001".into(), "CVE-2024-9999".into()], None)
            .await
            .unwrap();

        let all = repo.cve_table(None).await.unwrap();
        assert_eq!(all[0].cve_id, "CVE-2023-0001");
        assert_eq!(all[0].times_seen, 2);
        assert!(all[0].detail.is_none());

        let cutoff = parse_datetime("2024-01-01T00:00:00Z");
        let recent = repo.cve_table(cutoff).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().all(|row| row.times_seen == 1));
    }

    #[tokio::test]
    async fn duplicate_cve_mentions_are_ignored() {
        let repo = Repository::open_in_memory().await.unwrap();
        let first = repo
            .save_article_cves("a", vec!["CVE-2024-1234".into()], None)
            .await
            .unwrap();
        let second = repo
            .save_article_cves("a", vec!["CVE-2024-1234".into()], None)
            .await
            .unwrap();
        assert_eq!((first, second), (1, 0));
    }
}
