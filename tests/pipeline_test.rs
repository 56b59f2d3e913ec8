use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_test::assert_ok;

use threat_digest::ai::{ChatMessage, CompletionBackend};
use threat_digest::config::Config;
use threat_digest::db::Repository;
use threat_digest::error::{AppError, Result};
use threat_digest::models::{CveDetail, NewArticle};
use threat_digest::pipeline::Pipeline;
use threat_digest::services::CveLookup;

const QUANTUM: &str = "https://news.example.com/quantum";
const RANSOMWARE: &str = "https://news.example.com/ransomware";
const SCIENCE: &str = "Science & Environment";
const CYBER: &str = "Cybersecurity & Data Privacy";

/// Answers each stage's prompt with a fixed reply, or fails every call.
struct StubBackend {
    fail: bool,
    calls: AtomicUsize,
}

impl StubBackend {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            fail,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CompletionBackend for StubBackend {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AppError::LlmApi("HTTP 503".to_string()));
        }

        let prompt: String = messages.iter().map(|m| m.content.as_str()).collect();
        let reply = if prompt.contains("\"assignments\"") {
            format!(
                r#"{{"assignments":[{{"article_id":"{}","category":"{}"}},{{"article_id":"{}","category":"{}"}}]}}"#,
                QUANTUM, SCIENCE, RANSOMWARE, CYBER
            )
        } else if prompt.contains("\"extractions\"") {
            format!(
                r#"{{"extractions":[{{"article_id":"{}","companies":["Acme Corp"]}}]}}"#,
                RANSOMWARE
            )
        } else if prompt.contains("\"groups\"") {
            // both ids every time; whichever is not in this category's chunk is dropped
            format!(
                "```json\n{{\"groups\":[{{\"group_label\":\"Story\",\"summary\":\"One story.\",\"articles\":[\"{}\",\"{}\"]}}]}}\n```",
                QUANTUM, RANSOMWARE
            )
        } else {
            "{}".to_string()
        };
        Ok(reply)
    }

    fn model(&self) -> &str {
        "stub"
    }
}

struct NoCves;

#[async_trait]
impl CveLookup for NoCves {
    async fn lookup(&self, _cve_id: &str) -> Result<Option<CveDetail>> {
        Ok(None)
    }
}

fn config(dir: &TempDir) -> Config {
    let db_path = dir.path().join("news.db");
    let toml = format!(
        "db_path = {:?}\nretry_delay_secs = 0\nmax_attempts = 2\n",
        db_path.to_string_lossy()
    );
    Config::from_toml_str(&toml).unwrap()
}

async fn pipeline(dir: &TempDir, backend: Arc<StubBackend>) -> Pipeline {
    let config = config(dir);
    let repository = Repository::new(&config.db_path).await.unwrap();
    for (link, title, content) in [
        (QUANTUM, "Quantum computing breakthrough", "Researchers report a stable qubit."),
        (
            RANSOMWARE,
            "Ransomware hits Acme Corp",
            "Acme Corp suffered a breach affecting CVE-2024-1234 systems.",
        ),
    ] {
        repository
            .insert_or_replace_article(NewArticle {
                link: link.to_string(),
                title: title.to_string(),
                content: content.to_string(),
                published_date: Some("2025-05-01T09:00:00Z".to_string()),
                source: "example".to_string(),
            })
            .await
            .unwrap();
    }
    Pipeline::with_parts(config, repository, backend, Arc::new(NoCves)).unwrap()
}

#[tokio::test]
async fn two_categories_two_groups_two_memberships() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(&dir, StubBackend::new(false)).await;
    let repo = pipeline.repository();

    let report = pipeline.run_once().await;

    assert!(report.failed_steps.is_empty(), "{:?}", report.failed_steps);
    assert_eq!(report.categories.assigned, 2);

    let groups = repo.category_groups().await.unwrap();
    let mut topics: Vec<_> = groups.iter().map(|g| g.main_topic.as_str()).collect();
    topics.sort();
    assert_eq!(topics, vec![CYBER, SCIENCE]);

    assert_eq!(repo.category_membership_count(QUANTUM).await.unwrap(), 1);
    assert_eq!(repo.category_membership_count(RANSOMWARE).await.unwrap(), 1);
    assert_eq!(repo.category_of(QUANTUM).await.unwrap().as_deref(), Some(SCIENCE));
    assert_eq!(repo.category_of(RANSOMWARE).await.unwrap().as_deref(), Some(CYBER));

    // one subgroup per populated category, holding only that category's article
    assert_eq!(report.subgroups_created(), 2);
    assert_eq!(repo.subgroup_membership_count(QUANTUM, SCIENCE).await.unwrap(), 1);
    assert_eq!(repo.subgroup_membership_count(RANSOMWARE, SCIENCE).await.unwrap(), 0);
    assert_eq!(repo.subgroup_membership_count(RANSOMWARE, CYBER).await.unwrap(), 1);

    assert_eq!(report.companies_inserted, 1);
    assert_eq!(report.cve_mentions, 1);
    assert_eq!(report.cve_details, 0);
}

#[tokio::test]
async fn second_run_does_not_regroup() {
    let dir = tempfile::tempdir().unwrap();
    let backend = StubBackend::new(false);
    let pipeline = pipeline(&dir, backend.clone()).await;
    let repo = pipeline.repository();

    pipeline.run_once().await;
    let groups_after_first = repo.category_groups().await.unwrap().len();

    let second = pipeline.run_once().await;

    assert_eq!(second.categories.candidates, 0);
    assert_eq!(second.subgroups_created(), 0);
    assert_eq!(repo.category_groups().await.unwrap().len(), groups_after_first);
    assert_eq!(repo.category_membership_count(QUANTUM).await.unwrap(), 1);
    assert!(repo.unsubgrouped_documents(SCIENCE).await.unwrap().is_empty());
}

#[tokio::test]
async fn reclassification_replaces_membership() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(&dir, StubBackend::new(false)).await;
    let repo = pipeline.repository();

    let first = assert_ok!(
        repo.save_category_group(SCIENCE, "", SCIENCE, vec![QUANTUM.to_string()])
            .await
    );
    let second = assert_ok!(
        repo.save_category_group(CYBER, "", CYBER, vec![QUANTUM.to_string()])
            .await
    );
    assert!(second > first);

    assert_eq!(repo.category_membership_count(QUANTUM).await.unwrap(), 1);
    assert_eq!(repo.category_of(QUANTUM).await.unwrap().as_deref(), Some(CYBER));
}

#[tokio::test]
async fn failing_model_leaves_articles_for_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let backend = StubBackend::new(true);
    let pipeline = pipeline(&dir, backend.clone()).await;
    let repo = pipeline.repository();

    let report = pipeline.run_once().await;

    assert!(report.failed_steps.is_empty());
    assert_eq!(report.categories.candidates, 2);
    assert_eq!(report.categories.assigned, 0);
    assert!(repo.category_groups().await.unwrap().is_empty());
    assert_eq!(repo.unclassified_documents().await.unwrap().len(), 2);
    // company chunk and category chunk, two attempts each
    assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
}
