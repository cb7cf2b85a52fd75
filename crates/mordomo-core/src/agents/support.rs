//! Support agent: fault reports and technician interventions

use serde_json::json;
use tracing::info;

use super::billing::truncate;
use super::{Agent, AgentOutcome, AgentResponse, QueryContext, first_match, score_query};
use crate::error::AgentResult;
use crate::message::{AgentReply, AgentRequest};

pub const AGENT_ID: &str = "support_agent";

const KEYWORDS: &[&str] = &[
    "avaria",
    "problema",
    "não funciona",
    "sem luz",
    "técnico",
    "intervenção",
    "suporte",
    "ajuda técnica",
    "falha",
    "disjuntor",
    "corte",
];

const CANONICAL_INTENTS: &[&str] = &["report_fault", "technical_support"];

const CAPABILITIES: &[&str] = &[
    "reportar_avaria",
    "estado_intervencao",
    "faq_tecnico",
    "agendar_tecnico",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    ReportFault,
    InterventionStatus,
}

const ROUTES: &[(&[&str], Action)] = &[
    (&["avaria", "problema", "não funciona"], Action::ReportFault),
    (
        &["técnico", "intervenção", "estado"],
        Action::InterventionStatus,
    ),
];

pub struct SupportAgent;

impl SupportAgent {
    pub fn new() -> Self {
        info!("SupportAgent initialized");
        Self
    }
}

impl Default for SupportAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for SupportAgent {
    fn id(&self) -> &str {
        AGENT_ID
    }

    fn description(&self) -> &str {
        "Suporte técnico, avarias e intervenções"
    }

    fn routing_description(&self) -> &str {
        "Avarias, problemas técnicos, cortes de luz, intervenções de técnicos"
    }

    fn capabilities(&self) -> &[&'static str] {
        CAPABILITIES
    }

    fn can_handle(&self, intent: &str, context: &QueryContext) -> f64 {
        score_query(AGENT_ID, intent, context, KEYWORDS, CANONICAL_INTENTS)
    }

    fn process(&self, query: &str, _context: &QueryContext) -> AgentResult<AgentOutcome> {
        info!("Processing support query: {}", truncate(query, 100));
        let response = match first_match(&query.to_lowercase(), ROUTES) {
            Some(Action::ReportFault) => {
                let ticket_id = "AV-2024-001";
                info!("Fault registered: {}", ticket_id);
                AgentResponse::ok(
                    json!({
                        "ticket_id": ticket_id,
                        "status": "registered",
                        "priority": "medium",
                        "estimated_response": "4 horas",
                    }),
                    format!(
                        "🎫 Avaria registada com ID {}. Um técnico será enviado nas próximas 4 horas.",
                        ticket_id
                    ),
                    &["Verificar estado", "Cancelar pedido", "Contactar técnico"],
                )
            }
            Some(Action::InterventionStatus) => AgentResponse::ok(
                json!({
                    "ticket_id": "INT-2024-045",
                    "status": "in_progress",
                    "technician": "João Silva",
                    "estimated_arrival": "14:30",
                    "current_location": "A 2 km do destino",
                }),
                "🔧 Técnico João Silva em deslocação. Chegada estimada: 14:30 (2 km de distância).",
                &[
                    "Ver localização em tempo real",
                    "Contactar técnico",
                    "Reagendar",
                ],
            ),
            None => AgentResponse::ok(
                json!({ "agent": "support" }),
                "Posso ajudar com avarias, agendar técnicos ou verificar estado de intervenções. O que precisa?",
                &["Reportar avaria", "Ver estado de intervenção", "FAQ técnico"],
            ),
        };
        Ok(response.into())
    }

    fn handle_request(&self, request: &AgentRequest) -> AgentReply {
        match request {
            AgentRequest::GetTechnicianAvailability => AgentReply::TechnicianAvailability {
                next_available_slot: "2024-02-12 10:00".to_string(),
                technicians_on_duty: 3,
            },
            _ => AgentReply::not_implemented(),
        }
    }
}
