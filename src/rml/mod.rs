//! RML mapping emission
//!
//! Renders a [`NodeRelationshipReport`] as an RML Turtle document with one
//! `rr:TriplesMap` per report entry. The logical source names a placeholder file; the
//! generator binds the real source at materialization time.
//!
//! Iterators are JSONPath filters with string literals (`$[?(@.type=="Room")]`). They are
//! written as Turtle literals whose delimiter differs from the quote used inside the
//! filter, so `'$[?(@.type=="Room")]'` rather than an escaped `"$[?(@.type==\"Room\")]"`.

pub mod materialize;

pub use materialize::MappingDocument;

use crate::discovery::{NodeRelationshipReport, PredicateObject, TermType, TriplesMapEntry};
use crate::error::{Error, Result};
use crate::jsonpath::JsonPath;
use crate::ontology::PrefixTable;
use crate::rdf::vocab;
use std::collections::HashSet;

/// Namespace of the emitted triples maps
pub const MAP_NS: &str = "http://example.org/mapping#";

/// Logical source written into the mapping; replaced by the generator
pub const PLACEHOLDER_SOURCE: &str = "data.json";

const ARTIFACT: &str = "RML mapping";

/// Render `report` as RML Turtle
pub fn render(report: &NodeRelationshipReport) -> Result<String> {
    let ids: HashSet<&str> = report.data.iter().map(|e| e.id.as_str()).collect();

    let mut prefixes = report.context.clone();
    prefixes.insert("rr", vocab::rr::NS);
    prefixes.insert("rml", vocab::rml::NS);
    prefixes.insert("ql", vocab::ql::NS);
    prefixes.insert("map", MAP_NS);

    let mut out = prefixes.to_turtle_header();
    for entry in &report.data {
        out.push('\n');
        render_entry(&mut out, entry, &prefixes, &ids)?;
    }
    Ok(out)
}

fn render_entry(out: &mut String, entry: &TriplesMapEntry, prefixes: &PrefixTable, ids: &HashSet<&str>) -> Result<()> {
    let iterator = JsonPath::parse(&entry.iterator)
        .map_err(|e| Error::config(ARTIFACT, format!("map '{}': {e}", entry.id)))?;

    let mut blocks = vec![format!(
        concat!(
            "{} a rr:TriplesMap ;\n",
            "    rml:logicalSource [\n",
            "        rml:source {} ;\n",
            "        rml:referenceFormulation ql:JSONPath ;\n",
            "        rml:iterator {}\n",
            "    ] ;\n",
            "    rr:subjectMap [\n",
            "        rr:template {} ;\n",
            "        rr:class {}\n",
            "    ]"
        ),
        map_term(&entry.id),
        turtle_string(PLACEHOLDER_SOURCE, '"'),
        quote_iterator(&iterator),
        turtle_string(&entry.subject_template, '"'),
        iri_term(&entry.class, prefixes),
    )];

    for po in &entry.predicate_objects {
        let object_map = match po {
            PredicateObject::ValueLink {
                reference,
                term_type,
                ..
            } => {
                let term_type = match term_type {
                    TermType::Iri => "rr:IRI",
                    TermType::Literal => "rr:Literal",
                };
                format!(
                    "        rr:objectMap [ rml:reference {} ; rr:termType {term_type} ]",
                    turtle_string(reference, '"')
                )
            }
            PredicateObject::Join {
                parent_map,
                child,
                parent,
                ..
            } => {
                if !ids.contains(parent_map.as_str()) {
                    return Err(Error::config(
                        ARTIFACT,
                        format!("map '{}' joins unknown map '{parent_map}'", entry.id),
                    ));
                }
                format!(
                    concat!(
                        "        rr:objectMap [\n",
                        "            rr:parentTriplesMap {} ;\n",
                        "            rr:joinCondition [ rr:child {} ; rr:parent {} ]\n",
                        "        ]"
                    ),
                    map_term(parent_map),
                    turtle_string(child, '"'),
                    turtle_string(parent, '"')
                )
            }
        };
        blocks.push(format!(
            "    rr:predicateObjectMap [\n        rr:predicate {} ;\n{object_map}\n    ]",
            iri_term(po.predicate(), prefixes)
        ));
    }

    out.push_str(&blocks.join(" ;\n"));
    out.push_str(" .\n");
    Ok(())
}

fn map_term(id: &str) -> String {
    let local_ok = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if local_ok && !id.is_empty() {
        format!("map:{id}")
    } else {
        format!("<{MAP_NS}{}>", crate::utils::slugify(id))
    }
}

fn iri_term(iri: &str, prefixes: &PrefixTable) -> String {
    prefixes.compact(iri).unwrap_or_else(|| format!("<{iri}>"))
}

/// Turtle literal of an iterator with the delimiter chosen against its inner quotes
///
/// Inner `"` with outer `'` when the filter literals hold no `"`, inner `'` with outer
/// `"` when they hold no `'`; with both, inner `"` is kept and escaped as JSONPath.
pub fn quote_iterator(path: &JsonPath) -> String {
    if !path.literals_contain('"') {
        turtle_string(&path.render_with_quote('"'), '\'')
    } else if !path.literals_contain('\'') {
        turtle_string(&path.render_with_quote('\''), '"')
    } else {
        turtle_string(&path.render_with_quote('"'), '\'')
    }
}

/// Short Turtle string literal with `delimiter` as quote
pub fn turtle_string(text: &str, delimiter: char) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push(delimiter);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == delimiter => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(delimiter);
    out
}
