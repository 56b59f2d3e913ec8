use crate::models::Document;

/// Renders a chunk as `{prefix}{id}{separator}{text}` blocks, blank-line separated.
pub(crate) fn inline_documents(chunk: &[Document], prefix: &str, separator: &str) -> String {
    chunk
        .iter()
        .map(|d| format!("{}{}{}{}\n\n", prefix, d.id, separator, d.text))
        .collect()
}
