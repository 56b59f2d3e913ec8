pub mod dates;
mod fetcher;

pub use fetcher::{ingest_articles, parse_entries, run_ingest, FeedFetcher, IngestReport};
