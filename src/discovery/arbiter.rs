//! LLM arbitration between close candidates
//!
//! The arbiter is asked once per undecided name with a fresh conversation; nothing is
//! carried between calls. Answers are JSON:
//!
//! - `{"pick": "<iri or key>", "confidence": 0.8}` selects a candidate
//! - `{"pick": null}` rejects every candidate
//! - `{"decline": true}` (or anything unparseable) is a refusal to decide

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::similarity::Candidate;
use crate::error::Result;
use crate::llm::{extract_json, ChatOracle, Conversation};
use crate::rdf::local_name;

const SYSTEM_PROMPT: &str = "You align names used by IoT platforms with terms of a building ontology. \
Answer with a single JSON object and nothing else.";

/// Which index a name is being matched against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Class,
    Property,
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class => write!(f, "class"),
            Self::Property => write!(f, "property"),
        }
    }
}

/// Outcome of one arbitration
#[derive(Debug, Clone, PartialEq)]
pub enum ArbiterVerdict {
    Pick { iri: String, confidence: f32 },
    NoMatch,
    Declined,
}

/// Picks one of several candidates for a name
#[async_trait]
pub trait Arbiter: Send + Sync {
    async fn arbitrate(&self, name: &str, kind: MatchKind, candidates: &[Candidate]) -> Result<ArbiterVerdict>;
}

/// Arbiter backed by a chat model
pub struct LlmArbiter {
    oracle: Arc<dyn ChatOracle>,
}

impl LlmArbiter {
    pub fn new(oracle: Arc<dyn ChatOracle>) -> Self {
        Self { oracle }
    }
}

#[async_trait]
impl Arbiter for LlmArbiter {
    async fn arbitrate(&self, name: &str, kind: MatchKind, candidates: &[Candidate]) -> Result<ArbiterVerdict> {
        let mut conversation = Conversation::with_system(SYSTEM_PROMPT);
        let reply = conversation
            .ask(self.oracle.as_ref(), build_prompt(name, kind, candidates))
            .await?;

        let verdict = parse_verdict(&reply, candidates);
        debug!(name, %kind, ?verdict, "Arbiter answered");
        Ok(verdict)
    }
}

/// Prompt listing the candidates with their scores
pub fn build_prompt(name: &str, kind: MatchKind, candidates: &[Candidate]) -> String {
    let mut prompt = format!("Platform {kind} name: \"{name}\"\n\nCandidate ontology {kind} terms:\n");
    for (i, candidate) in candidates.iter().enumerate() {
        prompt.push_str(&format!(
            "{}. <{}> (\"{}\", similarity {:.3})\n",
            i + 1,
            candidate.iri,
            candidate.key,
            candidate.score
        ));
    }
    prompt.push_str(
        "\nReply {\"pick\": \"<IRI>\", \"confidence\": <0..1>} with the best fitting candidate, \
{\"pick\": null} if none of them fits, or {\"decline\": true} if you cannot decide.",
    );
    prompt
}

/// Interpret an arbiter reply; unknown picks and malformed replies are declines
pub fn parse_verdict(reply: &str, candidates: &[Candidate]) -> ArbiterVerdict {
    let Ok(answer) = serde_json::from_str::<Value>(&extract_json(reply)) else {
        return ArbiterVerdict::Declined;
    };

    if answer.get("decline").and_then(Value::as_bool) == Some(true) {
        return ArbiterVerdict::Declined;
    }

    match answer.get("pick") {
        Some(Value::Null) => ArbiterVerdict::NoMatch,
        Some(Value::String(pick)) => match find_candidate(pick, candidates) {
            Some(candidate) => {
                let confidence = answer
                    .get("confidence")
                    .and_then(Value::as_f64)
                    .map_or(candidate.score, |c| c as f32)
                    .clamp(0.0, 1.0);
                ArbiterVerdict::Pick {
                    iri: candidate.iri.clone(),
                    confidence,
                }
            }
            None => ArbiterVerdict::Declined,
        },
        _ => ArbiterVerdict::Declined,
    }
}

fn find_candidate<'c>(pick: &str, candidates: &'c [Candidate]) -> Option<&'c Candidate> {
    let pick = pick.trim().trim_start_matches('<').trim_end_matches('>');
    let local = pick.rsplit_once(':').map_or(pick, |(_, l)| l);

    candidates
        .iter()
        .find(|c| c.iri == pick)
        .or_else(|| candidates.iter().find(|c| c.key.eq_ignore_ascii_case(pick)))
        .or_else(|| candidates.iter().find(|c| local_name(&c.iri) == local))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, LlmError};
    use std::sync::Mutex;

    fn candidates() -> Vec<Candidate> {
        vec![
            Candidate {
                iri: "https://brickschema.org/schema/Brick#Ventilation_Air_System".to_string(),
                key: "Ventilation_Air_System".to_string(),
                score: 0.727,
                exact: false,
                prefix: false,
            },
            Candidate {
                iri: "https://brickschema.org/schema/Brick#Fan".to_string(),
                key: "Fan".to_string(),
                score: 0.3,
                exact: false,
                prefix: false,
            },
        ]
    }

    struct Scripted {
        reply: std::result::Result<String, u16>,
        prompts: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl Scripted {
        fn ok(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatOracle for Scripted {
        async fn chat(&self, history: &[ChatMessage]) -> std::result::Result<String, LlmError> {
            self.prompts.lock().unwrap().push(history.to_vec());
            match &self.reply {
                Ok(reply) => Ok(reply.clone()),
                Err(status) => Err(LlmError::Status {
                    status: *status,
                    body: String::new(),
                }),
            }
        }
    }

    #[test]
    fn test_parse_pick_by_iri_curie_and_key() {
        let c = candidates();
        let expected = ArbiterVerdict::Pick {
            iri: c[0].iri.clone(),
            confidence: 0.9,
        };

        let by_iri = format!("{{\"pick\": \"{}\", \"confidence\": 0.9}}", c[0].iri);
        assert_eq!(parse_verdict(&by_iri, &c), expected);
        assert_eq!(
            parse_verdict(r#"```json
{"pick": "brick:Ventilation_Air_System", "confidence": 0.9}
```"#, &c),
            expected
        );
        assert_eq!(parse_verdict(r#"{"pick": "ventilation_air_system", "confidence": 0.9}"#, &c), expected);
    }

    #[test]
    fn test_parse_no_match_and_declines() {
        let c = candidates();
        assert_eq!(parse_verdict(r#"{"pick": null}"#, &c), ArbiterVerdict::NoMatch);
        assert_eq!(parse_verdict(r#"{"decline": true}"#, &c), ArbiterVerdict::Declined);
        assert_eq!(parse_verdict("I am not sure", &c), ArbiterVerdict::Declined);
        assert_eq!(parse_verdict(r#"{"pick": "brick:Boiler"}"#, &c), ArbiterVerdict::Declined);
    }

    #[test]
    fn test_confidence_defaults_to_score_and_is_clamped() {
        let c = candidates();
        assert_eq!(
            parse_verdict(r#"{"pick": "Fan"}"#, &c),
            ArbiterVerdict::Pick { iri: c[1].iri.clone(), confidence: 0.3 }
        );
        assert_eq!(
            parse_verdict(r#"{"pick": "Fan", "confidence": 7}"#, &c),
            ArbiterVerdict::Pick { iri: c[1].iri.clone(), confidence: 1.0 }
        );
    }

    #[tokio::test]
    async fn test_each_arbitration_starts_a_fresh_conversation() {
        let oracle = Arc::new(Scripted::ok(r#"{"pick": null}"#));
        let arbiter = LlmArbiter::new(oracle.clone());

        arbiter.arbitrate("FreshAirVentilation", MatchKind::Class, &candidates()).await.unwrap();
        arbiter.arbitrate("fanSpeed", MatchKind::Property, &candidates()).await.unwrap();

        let prompts = oracle.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[1].len(), 2);
        assert!(prompts[1][1].content.contains("\"fanSpeed\""));
        assert!(prompts[1][1].content.contains("similarity 0.727"));
    }

    #[tokio::test]
    async fn test_transport_errors_propagate() {
        let oracle = Arc::new(Scripted {
            reply: Err(500),
            prompts: Mutex::new(Vec::new()),
        });
        let arbiter = LlmArbiter::new(oracle);

        let err = arbiter
            .arbitrate("Room", MatchKind::Class, &candidates())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::LlmUnavailable(_)));
    }
}
