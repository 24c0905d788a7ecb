//! Prefix table extraction and re-serialization
//!
//! Prefixes come from the leading block of declarations of a Turtle document (`@prefix`
//! or SPARQL-style `PREFIX`). Comments and blank lines before and inside the block are
//! skipped; the block ends at the first other statement.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Standard namespaces every output graph may use
pub const RDF: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
pub const RDFS: &str = "http://www.w3.org/2000/01/rdf-schema#";
pub const OWL: &str = "http://www.w3.org/2002/07/owl#";
pub const XSD: &str = "http://www.w3.org/2001/XMLSchema#";

/// Prefix name -> namespace IRI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrefixTable {
    entries: BTreeMap<String, String>,
}

impl PrefixTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// rdf, rdfs, owl and xsd
    pub fn standard() -> Self {
        let mut table = Self::new();
        table.insert("rdf", RDF);
        table.insert("rdfs", RDFS);
        table.insert("owl", OWL);
        table.insert("xsd", XSD);
        table
    }

    /// Parse the first contiguous block of prefix declarations of a Turtle document
    pub fn from_leading_block(text: &str) -> Self {
        static PREFIX_RE: OnceLock<Regex> = OnceLock::new();

        let re = PREFIX_RE.get_or_init(|| {
            Regex::new(
                r"(?i)^\s*(?:@prefix\s+([A-Za-z][\w.\-]*)?:\s*<([^>]*)>\s*\.|prefix\s+([A-Za-z][\w.\-]*)?:\s*<([^>]*)>)\s*(?:#.*)?$",
            )
            .expect("Invalid regex pattern")
        });

        let mut table = Self::new();
        let mut in_block = false;

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if trimmed.to_ascii_lowercase().starts_with("@base")
                || trimmed.to_ascii_lowercase().starts_with("base ")
            {
                continue;
            }
            match re.captures(line) {
                Some(caps) => {
                    in_block = true;
                    let prefix = caps.get(1).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
                    let namespace = caps.get(2).or_else(|| caps.get(4)).map_or("", |m| m.as_str());
                    table.insert(prefix, namespace);
                }
                None if in_block => break,
                None => break,
            }
        }

        table
    }

    /// Insert a declaration, returning the namespace it replaced
    pub fn insert(&mut self, prefix: impl Into<String>, namespace: impl Into<String>) -> Option<String> {
        self.entries.insert(prefix.into(), namespace.into())
    }

    /// Add every declaration of `other` whose prefix is not bound yet
    pub fn merge(&mut self, other: &PrefixTable) {
        for (prefix, namespace) in &other.entries {
            self.entries
                .entry(prefix.clone())
                .or_insert_with(|| namespace.clone());
        }
    }

    pub fn get(&self, prefix: &str) -> Option<&str> {
        self.entries.get(prefix).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(p, n)| (p.as_str(), n.as_str()))
    }

    /// Render as a block of `@prefix` declarations
    pub fn to_turtle_header(&self) -> String {
        let mut output = String::new();
        for (prefix, namespace) in &self.entries {
            output.push_str(&format!("@prefix {prefix}: <{namespace}> .\n"));
        }
        output
    }

    /// Shorten an IRI to `prefix:local` using the longest matching namespace
    pub fn compact(&self, iri: &str) -> Option<String> {
        self.entries
            .iter()
            .filter(|(_, ns)| !ns.is_empty() && iri.starts_with(ns.as_str()))
            .max_by_key(|(_, ns)| ns.len())
            .and_then(|(prefix, ns)| {
                let local = &iri[ns.len()..];
                let valid = !local.is_empty()
                    && local
                        .chars()
                        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
                    && !local.ends_with('.');
                valid.then(|| format!("{prefix}:{local}"))
            })
    }

    /// Prefix name whose namespace is the longest prefix of `iri`
    pub fn prefix_of(&self, iri: &str) -> Option<&str> {
        self.entries
            .iter()
            .filter(|(_, ns)| !ns.is_empty() && iri.starts_with(ns.as_str()))
            .max_by_key(|(_, ns)| ns.len())
            .map(|(prefix, _)| prefix.as_str())
    }

    /// Expand `prefix:local` to a full IRI
    pub fn expand(&self, curie: &str) -> Option<String> {
        let (prefix, local) = curie.split_once(':')?;
        if local.starts_with("//") {
            return None;
        }
        self.get(prefix).map(|ns| format!("{ns}{local}"))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PrefixTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (prefix, namespace) in iter {
            table.insert(prefix, namespace);
        }
        table
    }
}
