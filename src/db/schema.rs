pub const SCHEMA: &str = r#"
-- articles table (written by ingestion, read by every stage)
CREATE TABLE IF NOT EXISTS articles (
    link TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    published_date TEXT,
    source TEXT NOT NULL,
    processed_date TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_articles_published_date ON articles(published_date DESC);
CREATE INDEX IF NOT EXISTS idx_articles_source ON articles(source);

-- phase 1: one row per category per run
CREATE TABLE IF NOT EXISTS category_groups (
    group_id INTEGER PRIMARY KEY AUTOINCREMENT,
    main_topic TEXT NOT NULL,
    sub_topic TEXT NOT NULL DEFAULT '',
    group_label TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_category_groups_main_topic ON category_groups(main_topic);

-- article_link is deliberately not a foreign key: upstream insert-or-replace
-- rewrites the article row and must not cascade into memberships
CREATE TABLE IF NOT EXISTS category_memberships (
    article_link TEXT NOT NULL,
    group_id INTEGER NOT NULL REFERENCES category_groups(group_id),
    added_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (article_link, group_id)
);

-- at most one category per article
CREATE UNIQUE INDEX IF NOT EXISTS idx_category_memberships_article ON category_memberships(article_link);
CREATE INDEX IF NOT EXISTS idx_category_memberships_group ON category_memberships(group_id);

-- phase 2: append-only clusters inside a category
CREATE TABLE IF NOT EXISTS subgroups (
    subgroup_id INTEGER PRIMARY KEY AUTOINCREMENT,
    category TEXT NOT NULL,
    group_label TEXT NOT NULL,
    summary TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_subgroups_category ON subgroups(category);

CREATE TABLE IF NOT EXISTS subgroup_memberships (
    article_link TEXT NOT NULL,
    subgroup_id INTEGER NOT NULL REFERENCES subgroups(subgroup_id),
    added_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (article_link, subgroup_id)
);

CREATE INDEX IF NOT EXISTS idx_subgroup_memberships_article ON subgroup_memberships(article_link);

-- company mentions
CREATE TABLE IF NOT EXISTS article_companies (
    article_link TEXT NOT NULL,
    company_name TEXT NOT NULL,
    PRIMARY KEY (article_link, company_name)
);

-- CVE mentions and cached CVE details
CREATE TABLE IF NOT EXISTS article_cves (
    article_link TEXT NOT NULL,
    cve_id TEXT NOT NULL,
    published_date TEXT,
    PRIMARY KEY (article_link, cve_id)
);

CREATE INDEX IF NOT EXISTS idx_article_cves_cve_id ON article_cves(cve_id);

CREATE TABLE IF NOT EXISTS cve_info (
    cve_id TEXT PRIMARY KEY,
    base_score REAL,
    vendor TEXT,
    affected_products TEXT,
    cve_url TEXT,
    vendor_link TEXT,
    solution TEXT,
    times_mentioned INTEGER NOT NULL DEFAULT 0,
    raw_json TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;
