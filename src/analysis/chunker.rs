use crate::models::Document;

pub const DEFAULT_MAX_TOKEN_CHUNK: usize = 70_000;

/// Rough token estimate: whitespace-delimited words times 1.3, rounded.
pub fn approximate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    (words as f64 * 1.3).round() as usize
}

/// Greedy, order-preserving packing of documents into token-bounded chunks.
///
/// A document whose own estimate exceeds the budget is emitted alone rather
/// than truncated. Every input document lands in exactly one chunk.
pub fn chunk_documents<I>(documents: I, max_tokens: usize) -> Chunks<I::IntoIter>
where
    I: IntoIterator<Item = Document>,
{
    Chunks {
        documents: documents.into_iter(),
        max_tokens,
        pending: None,
    }
}

pub struct Chunks<I> {
    documents: I,
    max_tokens: usize,
    /// Document that overflowed the previous chunk and opens the next one.
    pending: Option<(Document, usize)>,
}

impl<I: Iterator<Item = Document>> Iterator for Chunks<I> {
    type Item = Vec<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut chunk = Vec::new();
        let mut chunk_tokens = 0;

        if let Some((document, tokens)) = self.pending.take() {
            if tokens > self.max_tokens {
                return Some(vec![document]);
            }
            chunk.push(document);
            chunk_tokens = tokens;
        }

        for document in self.documents.by_ref() {
            let tokens = approximate_tokens(&document.text);

            if tokens > self.max_tokens {
                if chunk.is_empty() {
                    return Some(vec![document]);
                }
                self.pending = Some((document, tokens));
                return Some(chunk);
            }

            if chunk_tokens + tokens > self.max_tokens {
                self.pending = Some((document, tokens));
                return Some(chunk);
            }

            chunk.push(document);
            chunk_tokens += tokens;
        }

        (!chunk.is_empty()).then_some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn doc(id: &str, words: usize) -> Document {
        Document::new(id, "word ".repeat(words))
    }

    fn ids(chunk: &[Document]) -> Vec<&str> {
        chunk.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn estimate_rounds_and_is_monotone() {
        assert_eq!(approximate_tokens(""), 0);
        assert_eq!(approximate_tokens("one"), 1);
        assert_eq!(approximate_tokens("one two"), 3);
        assert_eq!(approximate_tokens("  spaced \n\t out  "), 3);
        let mut previous = 0;
        for n in 0..50 {
            let estimate = approximate_tokens(&"w ".repeat(n));
            assert!(estimate >= previous);
            previous = estimate;
        }
    }

    #[test]
    fn oversized_single_document_is_its_own_chunk() {
        let chunks: Vec<_> = chunk_documents(vec![doc("a", 100_000)], 70_000).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(ids(&chunks[0]), vec!["a"]);
    }

    #[test]
    fn oversized_document_flushes_current_chunk() {
        let docs = vec![doc("a", 10), doc("b", 200), doc("c", 10)];
        let chunks: Vec<_> = chunk_documents(docs, 100).collect();
        let shape: Vec<Vec<&str>> = chunks.iter().map(|c| ids(c)).collect();
        assert_eq!(shape, vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn greedy_packing_in_order() {
        // 50 words -> 65 tokens; two fit in 130, three do not
        let docs = (0..5).map(|i| doc(&i.to_string(), 50)).collect::<Vec<_>>();
        let chunks: Vec<_> = chunk_documents(docs, 130).collect();
        let shape: Vec<Vec<&str>> = chunks.iter().map(|c| ids(c)).collect();
        assert_eq!(shape, vec![vec!["0", "1"], vec!["2", "3"], vec!["4"]]);
    }

    #[test]
    fn every_document_appears_once_and_budget_holds() {
        let sizes = [3, 400, 17, 90, 1, 250, 60, 60, 60, 5, 0, 1000, 33];
        let docs: Vec<_> = sizes
            .iter()
            .enumerate()
            .map(|(i, &n)| doc(&format!("d{}", i), n))
            .collect();
        let budget = 300;

        let chunks: Vec<_> = chunk_documents(docs.clone(), budget).collect();

        let mut seen = HashSet::new();
        for chunk in &chunks {
            assert!(!chunk.is_empty());
            let total: usize = chunk.iter().map(|d| approximate_tokens(&d.text)).sum();
            assert!(chunk.len() == 1 || total <= budget);
            for d in chunk {
                assert!(seen.insert(d.id.clone()), "{} appeared twice", d.id);
            }
        }
        let expected: HashSet<_> = docs.iter().map(|d| d.id.clone()).collect();
        assert_eq!(seen, expected);

        // order is preserved across the flattened output
        let flattened: Vec<_> = chunks.iter().flatten().map(|d| d.id.clone()).collect();
        let original: Vec<_> = docs.iter().map(|d| d.id.clone()).collect();
        assert_eq!(flattened, original);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert_eq!(chunk_documents(Vec::new(), 10).count(), 0);
    }

    #[test]
    fn reinvoking_reproduces_the_same_chunks() {
        let docs: Vec<_> = (0..20).map(|i| doc(&i.to_string(), i * 7)).collect();
        let first: Vec<_> = chunk_documents(docs.clone(), 150).collect();
        let second: Vec<_> = chunk_documents(docs, 150).collect();
        assert_eq!(first, second);
    }
}
