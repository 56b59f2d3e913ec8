/// An article as written by ingestion. `link` is the primary key.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub link: String,
    pub title: String,
    pub content: String,
    /// Already normalized to `YYYY-MM-DDTHH:MM:SSZ` when known.
    pub published_date: Option<String>,
    pub source: String,
}

/// One id → text entry handed to the chunker and the LLM stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}
