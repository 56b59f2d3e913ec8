mod repository;
mod schema;

pub use repository::{ArticleContent, Repository, StoredText};
