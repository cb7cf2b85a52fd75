//! Semantic query routing
//!
//! Classifies a query into one registered agent id. The primary strategy asks
//! a language model (through [`SemanticClassifier`]) to pick a domain from
//! short descriptions; every failure, timeout or unusable verdict falls back to
//! deterministic keyword counting. Classification never fails.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::agents::{billing, ev, solar, support};

/// Agent id reported when no domain fits
pub const NO_AGENT: &str = "none";

/// Confidence given to a non-JSON verdict that still names a known agent
const NAMED_AGENT_CONFIDENCE: f64 = 0.8;

/// Keyword lists used when the model is unavailable
const FALLBACK_KEYWORDS: &[(&str, &[&str])] = &[
    (
        billing::AGENT_ID,
        &["fatura", "conta", "pagar", "valor", "consumo", "kwh", "€"],
    ),
    (
        ev::AGENT_ID,
        &["carro", "elétrico", "carregar", "bateria", "ev", "tesla", "mobie"],
    ),
    (
        solar::AGENT_ID,
        &["painel", "solar", "fotovoltaico", "produção", "autoconsumo"],
    ),
    (
        support::AGENT_ID,
        &["avaria", "problema", "técnico", "suporte", "não funciona"],
    ),
];

/// A registered domain as shown to the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainDescription {
    pub id: String,
    pub description: String,
}

impl DomainDescription {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
        }
    }
}

/// Router verdict: an agent id (or none) with a confidence in [0.0, 1.0]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub agent: Option<String>,
    pub confidence: f64,
}

impl Classification {
    pub fn new(agent: impl Into<String>, confidence: f64) -> Self {
        Self {
            agent: Some(agent.into()),
            confidence,
        }
    }

    pub fn none() -> Self {
        Self {
            agent: None,
            confidence: 0.0,
        }
    }

    /// Agent id, or `"none"`
    pub fn agent_id(&self) -> &str {
        self.agent.as_deref().unwrap_or(NO_AGENT)
    }
}

/// External model call used for the primary strategy
#[async_trait]
pub trait SemanticClassifier: Send + Sync {
    async fn classify_via_model(
        &self,
        query: &str,
        domains: &[DomainDescription],
    ) -> anyhow::Result<Classification>;
}

/// Configuration for the router
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Whether to consult the classifier at all
    pub semantic: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { semantic: true }
    }
}

pub struct Router {
    domains: Vec<DomainDescription>,
    classifier: Option<Arc<dyn SemanticClassifier>>,
    config: RouterConfig,
}

impl Router {
    /// Keyword-only router over the given domains
    pub fn new(domains: Vec<DomainDescription>) -> Self {
        Self {
            domains,
            classifier: None,
            config: RouterConfig::default(),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn SemanticClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn domains(&self) -> &[DomainDescription] {
        &self.domains
    }

    fn is_known(&self, agent: &str) -> bool {
        self.domains.iter().any(|d| d.id == agent)
    }

    /// Classify a query. Falls back to keyword counting on any model failure.
    pub async fn classify(&self, query: &str) -> Classification {
        if self.config.semantic {
            if let Some(classifier) = &self.classifier {
                match classifier.classify_via_model(query, &self.domains).await {
                    Ok(verdict) => match verdict.agent.as_deref() {
                        Some(agent) if !self.is_known(agent) => {
                            warn!("Classifier named unknown agent '{}', using keywords", agent);
                        }
                        _ => {
                            debug!(
                                "Semantic classification: {} ({:.2})",
                                verdict.agent_id(),
                                verdict.confidence
                            );
                            return verdict;
                        }
                    },
                    Err(e) => {
                        warn!("Semantic classification failed, using keywords: {:#}", e);
                    }
                }
            }
        }

        let verdict = fallback_route(query);
        debug!(
            "Keyword classification: {} ({:.2})",
            verdict.agent_id(),
            verdict.confidence
        );
        verdict
    }
}

/// Deterministic keyword routing. The strictly highest hit count wins, the
/// first-listed domain keeps ties, and zero hits yields `none`.
pub fn fallback_route(query: &str) -> Classification {
    let query_lower = query.to_lowercase();
    let mut best: Option<(&str, usize)> = None;

    for (agent, words) in FALLBACK_KEYWORDS {
        let score = words.iter().filter(|w| query_lower.contains(**w)).count();
        if score > best.map_or(0, |(_, s)| s) {
            best = Some((*agent, score));
        }
    }

    match best {
        Some((agent, score)) => Classification::new(agent, (score as f64 / 2.0).min(1.0)),
        None => Classification::none(),
    }
}

/// Prompt asking the model for a strict `{"agent", "confidence"}` verdict
pub fn classification_prompt(query: &str, domains: &[DomainDescription]) -> String {
    let agents_list = domains
        .iter()
        .map(|d| format!("- {}: {}", d.id, d.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Analisa a pergunta do cliente e determina qual é o agente mais adequado para responder.\n\
         \n\
         AGENTES DISPONÍVEIS:\n\
         {agents_list}\n\
         \n\
         PERGUNTA DO CLIENTE: \"{query}\"\n\
         \n\
         INSTRUÇÕES:\n\
         - Escolhe APENAS UM agente da lista acima\n\
         - Responde em formato JSON exato: {{\"agent\": \"nome_do_agente\", \"confidence\": 0.95}}\n\
         - Confidence deve ser entre 0.0 e 1.0\n\
         - Se nenhum agente for adequado, usa: {{\"agent\": \"none\", \"confidence\": 0.0}}\n\
         \n\
         Responde APENAS com o JSON:"
    )
}

/// Strip a surrounding ```json or ``` fence, if any
fn strip_fences(content: &str) -> &str {
    let content = content.trim();
    let inner = if let Some((_, rest)) = content.split_once("```json") {
        rest
    } else if let Some((_, rest)) = content.split_once("```") {
        rest
    } else {
        return content;
    };
    inner.split("```").next().unwrap_or(inner).trim()
}

/// Parse raw model output into a verdict.
///
/// Returns `None` when the output is unusable: valid JSON naming an unknown
/// agent, JSON that is not an object, or free text mentioning no known agent.
pub fn parse_verdict(content: &str, domains: &[DomainDescription]) -> Option<Classification> {
    let body = strip_fences(content);

    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) => {
            return domains
                .iter()
                .find(|d| content.contains(d.id.as_str()))
                .map(|d| Classification::new(d.id.clone(), NAMED_AGENT_CONFIDENCE));
        }
    };

    let obj = value.as_object()?;
    let agent = obj.get("agent").and_then(Value::as_str).unwrap_or(NO_AGENT);
    let confidence = match obj.get("confidence") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().ok()?,
        _ => 0.0,
    };
    let confidence = if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };

    if agent == NO_AGENT {
        return Some(Classification {
            agent: None,
            confidence,
        });
    }
    domains
        .iter()
        .any(|d| d.id == agent)
        .then(|| Classification::new(agent, confidence))
}
