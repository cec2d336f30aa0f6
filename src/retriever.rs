use std::collections::HashSet;

use serde::Serialize;

pub const DEFAULT_TOP_K: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrievalDoc {
    pub doc_id: String,
    pub text: String,
}

impl RetrievalDoc {
    pub fn new(doc_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            text: text.into(),
        }
    }
}

/// Lowercased ASCII alphanumeric tokens longer than two characters.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_ascii_lowercase() || c.is_ascii_digit()))
        .filter(|token| token.len() > 2)
        .map(str::to_string)
        .collect()
}

/// Keyword-overlap retriever over a small fixed corpus.
#[derive(Debug, Clone)]
pub struct MiniRetriever {
    docs: Vec<(RetrievalDoc, HashSet<String>)>,
}

impl MiniRetriever {
    pub fn new(docs: Vec<RetrievalDoc>) -> Self {
        let docs = docs
            .into_iter()
            .map(|doc| {
                let tokens = tokenize(&doc.text);
                (doc, tokens)
            })
            .collect();
        Self { docs }
    }

    /// Course notes served by default.
    pub fn course_notes() -> Self {
        Self::new(vec![
            RetrievalDoc::new(
                "course_policy",
                "Late work is accepted up to 3 days with a 10% penalty per day.",
            ),
            RetrievalDoc::new(
                "grading_weights",
                "Grades are computed from: Homework 30%, Quizzes 20%, Exams 40%, Participation 10%.",
            ),
            RetrievalDoc::new(
                "interventions",
                "High-impact interventions: missing work recovery plan, attendance plan, reteach weak standards.",
            ),
        ])
    }

    /// Top `k` documents by shared-token count. Zero-overlap documents are
    /// dropped after the cut, so fewer than `k` may come back.
    pub fn retrieve(&self, query: &str, k: usize) -> Vec<&RetrievalDoc> {
        let query = tokenize(query);
        let mut scored: Vec<(usize, &RetrievalDoc)> = self
            .docs
            .iter()
            .map(|(doc, tokens)| (query.intersection(tokens).count(), doc))
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(k)
            .filter(|(score, _)| *score > 0)
            .map(|(_, doc)| doc)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }
}
