//! Candidate ranking for ontology alignment
//!
//! Names are compared on normalized tokens: camelCase, snake_case, kebab-case and
//! spaces all split into lower-case words, so `FreshAirVentilation` and
//! `Fresh_Air_Ventilation` are the same token sequence.
//!
//! Ranking order is exact token equality, then prefix equality, then score, then the
//! lexicographically smaller IRI.

use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use crate::embedding::{cosine_similarity, TextEmbedder};
use crate::error::Result;
use crate::ontology::OntologyTerm;

/// Scores within this distance are a tie
pub const SCORE_EPSILON: f32 = 1e-6;

/// Split a name into lower-case word tokens
pub fn tokenize(name: &str) -> Vec<String> {
    static CAMEL_RE: OnceLock<Regex> = OnceLock::new();
    static ACRONYM_RE: OnceLock<Regex> = OnceLock::new();
    static SEPARATOR_RE: OnceLock<Regex> = OnceLock::new();

    let camel = CAMEL_RE.get_or_init(|| Regex::new(r"([a-z0-9])([A-Z])").expect("Invalid regex pattern"));
    let acronym = ACRONYM_RE
        .get_or_init(|| Regex::new(r"([A-Z]+)([A-Z][a-z])").expect("Invalid regex pattern"));
    let separator =
        SEPARATOR_RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9]+").expect("Invalid regex pattern"));

    let spaced = camel.replace_all(name, "$1 $2");
    let spaced = acronym.replace_all(&spaced, "$1 $2");

    separator
        .split(&spaced)
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Levenshtein distance over characters
pub fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b_chars.len()).collect();
    let mut current = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b_chars.len()]
}

fn edit_ratio(a: &str, b: &str) -> f32 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f32 / longest as f32
}

/// Edit-distance similarity in `[0, 1]`, insensitive to token order
pub fn string_similarity(a: &str, b: &str) -> f32 {
    let mut ta = tokenize(a);
    let mut tb = tokenize(b);
    let in_order = edit_ratio(&ta.join(" "), &tb.join(" "));
    ta.sort();
    tb.sort();
    in_order.max(edit_ratio(&ta.join(" "), &tb.join(" ")))
}

/// Token-level relation between a query and a term name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenRelation {
    pub exact: bool,
    pub prefix: bool,
}

impl TokenRelation {
    pub fn between(query: &str, name: &str) -> Self {
        let q = tokenize(query);
        let n = tokenize(name);
        if q.is_empty() || n.is_empty() {
            return Self::default();
        }
        let exact = q == n;
        Self {
            exact,
            prefix: exact || n.starts_with(&q) || q.starts_with(&n),
        }
    }

    fn merge(self, other: Self) -> Self {
        Self {
            exact: self.exact || other.exact,
            prefix: self.prefix || other.prefix,
        }
    }
}

/// A ranked ontology term
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub iri: String,
    pub key: String,
    pub score: f32,
    pub exact: bool,
    pub prefix: bool,
}

impl Candidate {
    /// Ranking order: best first
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .exact
            .cmp(&self.exact)
            .then_with(|| other.prefix.cmp(&self.prefix))
            .then_with(|| other.score.partial_cmp(&self.score).unwrap_or(Ordering::Equal))
            .then_with(|| self.iri.cmp(&other.iri))
    }

    /// Same rank apart from the IRI tie-break
    pub fn ties_with(&self, other: &Self) -> bool {
        self.exact == other.exact
            && self.prefix == other.prefix
            && (self.score - other.score).abs() < SCORE_EPSILON
    }
}

/// Scores a query against ontology terms
pub trait SimilarityScorer: Send + Sync {
    /// One score in `[0, 1]` per term, in order
    fn score_terms(&self, query: &str, terms: &[&OntologyTerm]) -> Result<Vec<f32>>;
}

/// Edit distance over normalized tokens
#[derive(Debug, Clone, Copy, Default)]
pub struct StringScorer;

impl SimilarityScorer for StringScorer {
    fn score_terms(&self, query: &str, terms: &[&OntologyTerm]) -> Result<Vec<f32>> {
        Ok(terms
            .iter()
            .map(|term| {
                string_similarity(query, &term.key).max(string_similarity(query, &term.local_name))
            })
            .collect())
    }
}

/// Cosine similarity of sentence embeddings
///
/// Term embeddings are computed once per text and cached.
pub struct SemanticScorer<'e> {
    embedder: &'e dyn TextEmbedder,
    cache: Mutex<HashMap<String, Vec<f32>>>,
}

impl<'e> SemanticScorer<'e> {
    pub fn new(embedder: &'e dyn TextEmbedder) -> Self {
        Self {
            embedder,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn embed_cached(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut cache = self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let missing: Vec<String> = texts
            .iter()
            .filter(|t| !cache.contains_key(*t))
            .cloned()
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        if !missing.is_empty() {
            let vectors = self.embedder.embed_batch(&missing)?;
            cache.extend(missing.into_iter().zip(vectors));
        }

        Ok(texts
            .iter()
            .map(|t| cache.get(t).cloned().unwrap_or_default())
            .collect())
    }
}

/// Words of a name joined by spaces (`Temperature_Sensor` -> `temperature sensor`)
fn natural_text(name: &str) -> String {
    tokenize(name).join(" ")
}

impl SimilarityScorer for SemanticScorer<'_> {
    fn score_terms(&self, query: &str, terms: &[&OntologyTerm]) -> Result<Vec<f32>> {
        let mut texts = Vec::with_capacity(terms.len() + 1);
        texts.push(natural_text(query));
        texts.extend(terms.iter().map(|t| natural_text(t.match_text())));

        let vectors = self.embed_cached(&texts)?;
        let (query_vector, term_vectors) = vectors.split_at(1);

        Ok(term_vectors
            .iter()
            .map(|v| cosine_similarity(&query_vector[0], v).clamp(0.0, 1.0))
            .collect())
    }
}

/// Rank `terms` against `query` and keep the best `top_k`
pub fn rank(
    query: &str,
    terms: &[&OntologyTerm],
    scorer: &dyn SimilarityScorer,
    top_k: usize,
) -> Result<Vec<Candidate>> {
    let scores = scorer.score_terms(query, terms)?;

    let mut candidates: Vec<Candidate> = terms
        .iter()
        .zip(scores)
        .map(|(term, score)| {
            let relation = TokenRelation::between(query, &term.key)
                .merge(TokenRelation::between(query, &term.local_name));
            Candidate {
                iri: term.iri.clone(),
                key: term.key.clone(),
                score: if relation.exact { 1.0 } else { score },
                exact: relation.exact,
                prefix: relation.prefix,
            }
        })
        .collect();

    candidates.sort_by(Candidate::rank_cmp);
    candidates.truncate(top_k);
    Ok(candidates)
}
