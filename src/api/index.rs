//! Operation index
//!
//! Every path template is joined with every base path and split into segments.
//! A literal segment matches only an identical URI segment; a `{name}` segment matches
//! any non-empty one. Segment counts must agree, and the first matching template wins.

use serde_json::Value;
use std::fmt;

use super::spec::{ApiSpec, Parameter};
use crate::utils::collapse_slashes;

/// HTTP methods an OpenAPI path item can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HttpVerb {
    Get,
    Put,
    Post,
    Delete,
    Patch,
    Head,
    Options,
    Trace,
}

impl HttpVerb {
    pub const ALL: [HttpVerb; 8] = [
        Self::Get,
        Self::Put,
        Self::Post,
        Self::Delete,
        Self::Patch,
        Self::Head,
        Self::Options,
        Self::Trace,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
        }
    }

    /// Key of the method object inside a path item (`get`, `put`, ...)
    pub fn key(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Put => "put",
            Self::Post => "post",
            Self::Delete => "delete",
            Self::Patch => "patch",
            Self::Head => "head",
            Self::Options => "options",
            Self::Trace => "trace",
        }
    }

    /// Case-insensitive parse
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|verb| verb.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Variable(String),
}

impl Segment {
    fn parse(text: &str) -> Self {
        match text.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(name) if !name.is_empty() && !name.contains(['{', '}']) => Self::Variable(name.to_string()),
            _ => Self::Literal(text.to_string()),
        }
    }

    fn accepts(&self, segment: &str) -> bool {
        match self {
            Self::Literal(literal) => literal == segment,
            Self::Variable(_) => !segment.is_empty(),
        }
    }
}

/// Split a path into its segments after collapsing `//` and dropping the trailing `/`
pub fn split_segments(path: &str) -> Vec<&str> {
    path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect()
}

/// One declared method of a path item with its effective parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub verb: HttpVerb,
    pub parameters: Vec<Parameter>,
}

/// A path template mounted under one base path
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedPath {
    /// The key under `paths`
    pub template: String,
    pub base: String,
    pub segments: Vec<Segment>,
    pub operations: Vec<Operation>,
}

impl IndexedPath {
    /// Variable bindings when `path` matches, `None` otherwise
    pub fn unify(&self, path: &str) -> Option<Vec<(String, String)>> {
        let collapsed = collapse_slashes(path);
        let segments = split_segments(&collapsed);
        if segments.len() != self.segments.len() {
            return None;
        }

        let mut bindings = Vec::new();
        for (template, actual) in self.segments.iter().zip(&segments) {
            if !template.accepts(actual) {
                return None;
            }
            if let Segment::Variable(name) = template {
                bindings.push((name.clone(), (*actual).to_string()));
            }
        }
        Some(bindings)
    }

    pub fn verbs(&self) -> impl Iterator<Item = HttpVerb> + '_ {
        self.operations.iter().map(|op| op.verb)
    }
}

/// Path templates of an API description in declaration order
#[derive(Debug, Clone, Default)]
pub struct OperationIndex {
    entries: Vec<IndexedPath>,
}

impl OperationIndex {
    /// Index every path that declares at least one method
    pub fn build(spec: &ApiSpec) -> Self {
        let bases = spec.base_paths();
        let mut entries = Vec::new();

        for (template, item) in spec.paths().into_iter().flatten() {
            let operations = operations_of(item);
            if operations.is_empty() {
                continue;
            }
            for base in &bases {
                let full = collapse_slashes(&format!("{base}/{template}"));
                entries.push(IndexedPath {
                    template: template.clone(),
                    base: base.clone(),
                    segments: split_segments(&full).into_iter().map(Segment::parse).collect(),
                    operations: operations.clone(),
                });
            }
        }

        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[IndexedPath] {
        &self.entries
    }

    /// First template matching `path`
    pub fn find(&self, path: &str) -> Option<(&IndexedPath, Vec<(String, String)>)> {
        self.entries
            .iter()
            .find_map(|entry| entry.unify(path).map(|bindings| (entry, bindings)))
    }
}

/// Declared methods of a path item, path-level parameters merged under operation-level ones
fn operations_of(item: &Value) -> Vec<Operation> {
    let shared: Vec<Parameter> = parameter_list(item.get("parameters"));

    HttpVerb::ALL
        .into_iter()
        .filter_map(|verb| {
            let operation = item.get(verb.key())?.as_object()?;
            let own = parameter_list(operation.get("parameters"));
            let mut parameters: Vec<Parameter> = shared
                .iter()
                .filter(|p| !own.iter().any(|o| o.same_slot(p)))
                .cloned()
                .collect();
            parameters.extend(own);
            Some(Operation { verb, parameters })
        })
        .collect()
}

fn parameter_list(value: Option<&Value>) -> Vec<Parameter> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Parameter::from_value).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn index(document: Value) -> OperationIndex {
        OperationIndex::build(&ApiSpec::from_value(document, "test", None).unwrap())
    }

    #[test]
    fn test_verb_parsing() {
        assert_eq!(HttpVerb::parse("put"), Some(HttpVerb::Put));
        assert_eq!(HttpVerb::parse("CONNECT"), None);
        assert_eq!(HttpVerb::Patch.to_string(), "PATCH");
    }

    #[test]
    fn test_segments() {
        assert_eq!(split_segments("/v2/entities/"), vec!["v2", "entities"]);
        assert_eq!(Segment::parse("{entityId}"), Segment::Variable("entityId".to_string()));
        assert_eq!(Segment::parse("{id}.json"), Segment::Literal("{id}.json".to_string()));
    }

    #[test]
    fn test_base_path_joined_into_templates() {
        let index = index(json!({
            "swagger": "2.0",
            "basePath": "/v2",
            "paths": {
                "/entities/{entityId}/attrs/{attrName}/value": {"get": {}, "put": {}},
                "/version": {"parameters": []}
            }
        }));

        assert_eq!(index.len(), 1);
        let (entry, bindings) = index
            .find("/v2/entities/Hotel:main/attrs/t/value")
            .unwrap();
        assert_eq!(entry.verbs().collect::<Vec<_>>(), vec![HttpVerb::Get, HttpVerb::Put]);
        assert_eq!(
            bindings,
            vec![
                ("entityId".to_string(), "Hotel:main".to_string()),
                ("attrName".to_string(), "t".to_string())
            ]
        );
        assert!(index.find("/entities/Hotel:main/attrs/t/value").is_none());
    }

    #[test]
    fn test_literal_segments_must_match_exactly() {
        let index = index(json!({
            "openapi": "3.0.0",
            "paths": {"/entities/{id}/attrs/temperature/value": {"get": {}}}
        }));
        assert!(index.find("/entities/r1/attrs/temperature/value").is_some());
        assert!(index.find("/entities/r1/attrs/humidity/value").is_none());
        assert!(index.find("/entities/r1/attrs/temperature").is_none());
        assert!(index.find("//entities//r1/attrs/temperature/value/").is_some());
    }

    #[test]
    fn test_first_template_wins() {
        let index = index(json!({
            "openapi": "3.0.0",
            "paths": {
                "/entities/{id}": {"get": {}},
                "/entities/special": {"delete": {}}
            }
        }));
        let (entry, _) = index.find("/entities/special").unwrap();
        assert_eq!(entry.template, "/entities/{id}");
    }

    #[test]
    fn test_path_level_parameters_merged() {
        let index = index(json!({
            "openapi": "3.0.0",
            "paths": {"/a": {
                "parameters": [
                    {"name": "limit", "in": "query", "schema": {"default": 10}},
                    {"name": "Fiware-Service", "in": "header", "schema": {"default": "path-level"}}
                ],
                "get": {"parameters": [{"name": "fiware-service", "in": "header", "schema": {"default": "op"}}]}
            }}
        }));

        let params = &index.entries()[0].operations[0].parameters;
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "limit");
        assert_eq!(params[1].default_value, "op");
    }
}
