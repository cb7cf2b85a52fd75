//! EV agent: charging schedule, charging costs and public stations

use serde_json::json;
use tracing::info;

use super::billing::truncate;
use super::{
    Agent, AgentOutcome, AgentResponse, CollaborationRequest, QueryContext, first_match,
    score_query,
};
use crate::error::AgentResult;
use crate::message::{AgentReply, AgentRequest};

pub const AGENT_ID: &str = "ev_agent";

const KEYWORDS: &[&str] = &[
    "carro elétrico",
    "carro eletrico",
    "carregar",
    "bateria",
    "ev",
    "tesla",
    "kwh",
    "carregamento",
    "posto",
    "mobie",
    "wallbox",
    "carregador",
    "autonomia",
    "elétrico",
    "eletrico",
    "custo",
    "preço",
    "preco",
    "gasto",
    "quanto",
    "custa",
    "horário",
    "horario",
    "hora",
    "quando",
    "melhor",
    "veículo",
    "veiculo",
    "transporte",
    "automóvel",
    "automovel",
];

const CANONICAL_INTENTS: &[&str] = &["ev_charging", "carregar_carro"];

const CAPABILITIES: &[&str] = &[
    "melhor_horario_carregar",
    "custo_carregamento",
    "localizar_postos",
    "comparar_custo_eletrico_vs_combustao",
    "integracao_mobie",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    OptimalTime,
    CostAnalysis,
    Stations,
}

const ROUTES: &[(&[&str], Action)] = &[
    (
        &["horário", "horario", "hora", "quando", "melhor", "ótimo", "otimo"],
        Action::OptimalTime,
    ),
    (
        &[
            "custo",
            "custa",
            "custam",
            "preço",
            "preco",
            "gasto",
            "gastos",
            "pago",
            "paguei",
            "quanto",
            "valor",
            "eur",
            "€",
        ],
        Action::CostAnalysis,
    ),
    (
        &[
            "posto",
            "postos",
            "carregador",
            "público",
            "publico",
            "mobie",
            "local",
            "próximo",
            "proximo",
            "perto",
        ],
        Action::Stations,
    ),
];

pub struct EvAgent;

impl EvAgent {
    pub fn new() -> Self {
        info!("EvAgent initialized");
        Self
    }

    /// Off-peak window for the bi-hourly tariff; asks billing for the
    /// household usage pattern and customer value
    fn optimal_charging_time(&self) -> AgentOutcome {
        let start = "22:00";
        let savings = "€45/mês";
        info!("Optimal charging window computed: start={} savings={}", start, savings);
        AgentResponse::ok(
            json!({
                "optimization": {
                    "best_start_time": start,
                    "best_end_time": "06:00",
                    "savings_vs_peak": savings,
                    "current_tariff": "Bi-horária",
                    "recommendation": "Programar carregamento para iniciar às 22h",
                    "autonomy_gained": "~350 km por carga completa",
                }
            }),
            format!("💡 Melhor horário: {}. Poupa {}!", start, savings),
            &[
                "Como programar o carregador?",
                "Comparar com tarifa simples",
                "Ver consumo detalhado",
            ],
        )
        .with_collaboration(vec![
            CollaborationRequest::new(super::billing::AGENT_ID, AgentRequest::GetConsumptionPattern),
            CollaborationRequest::new(super::billing::AGENT_ID, AgentRequest::GetCustomerValue),
        ])
        .into()
    }

    fn charging_cost_analysis(&self) -> AgentOutcome {
        let total_monthly = 130.50;
        let vs_gasoline = "-€120/mês (poupança)";
        info!("Charging costs analysed: total_monthly={}", total_monthly);
        AgentResponse::ok(
            json!({
                "costs": {
                    "home_charging_monthly": 85.50,
                    "public_charging_monthly": 45.00,
                    "total_monthly": total_monthly,
                    "vs_gasoline": vs_gasoline,
                    "cost_per_100km": "€4.20",
                    "annual_projection": "€1,566",
                }
            }),
            format!("🔌 Gasta €{}/mês ({} vs gasolina)", total_monthly, vs_gasoline),
            &[
                "Como reduzir mais?",
                "Comparar tarifas",
                "Simular upgrade para trifásico",
            ],
        )
        .into()
    }

    fn find_charging_stations(&self) -> AgentOutcome {
        let stations = json!([
            {"name": "MOBI.E - Continente Benfica", "distance": "1.2 km", "available": true, "price": "€0.35/kWh"},
            {"name": "Tesla Supercharger - Colombo", "distance": "2.5 km", "available": true, "price": "€0.42/kWh"},
            {"name": "Ionity - A1", "distance": "5.8 km", "available": false, "price": "€0.65/kWh"},
        ]);
        let count = stations.as_array().map_or(0, |s| s.len());
        let nearest = &stations[0];
        info!("Charging stations found: {}", count);
        let message = format!(
            "📍 {} postos encontrados. Mais próximo: {} ({})",
            count,
            nearest["name"].as_str().unwrap_or_default(),
            nearest["distance"].as_str().unwrap_or_default()
        );
        AgentResponse::ok(
            json!({ "stations": stations }),
            message,
            &[
                "Navegar para lá",
                "Ver disponibilidade em tempo real",
                "Comparar preços",
            ],
        )
        .into()
    }
}

impl Default for EvAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for EvAgent {
    fn id(&self) -> &str {
        AGENT_ID
    }

    fn description(&self) -> &str {
        "Otimização de carregamento de veículos elétricos"
    }

    fn routing_description(&self) -> &str {
        "Carros elétricos, carregamento, baterias, postos de carregamento, Tesla, MOBI.E"
    }

    fn capabilities(&self) -> &[&'static str] {
        CAPABILITIES
    }

    fn can_handle(&self, intent: &str, context: &QueryContext) -> f64 {
        score_query(AGENT_ID, intent, context, KEYWORDS, CANONICAL_INTENTS)
    }

    fn process(&self, query: &str, _context: &QueryContext) -> AgentResult<AgentOutcome> {
        info!("Processing EV query: {}", truncate(query, 100));
        let outcome = match first_match(&query.to_lowercase(), ROUTES) {
            Some(Action::OptimalTime) => self.optimal_charging_time(),
            Some(Action::CostAnalysis) => self.charging_cost_analysis(),
            Some(Action::Stations) => self.find_charging_stations(),
            None => AgentResponse::ok(
                json!({ "agent": "ev" }),
                "Posso ajudar com otimização de carregamento, custos e localização de postos. O que precisa?",
                &[
                    "Melhor horário para carregar",
                    "Quanto gasto por mês?",
                    "Postos mais próximos",
                ],
            )
            .into(),
        };
        Ok(outcome)
    }

    fn handle_request(&self, request: &AgentRequest) -> AgentReply {
        match request {
            // 15% of charging lands in peak hours
            AgentRequest::GetEvImpactOnBill => AgentReply::EvImpact {
                monthly_consumption_kwh: 280.0,
                monthly_cost: 85.50,
                peak_hour_usage: 0.15,
            },
            _ => AgentReply::not_implemented(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(query: &str) -> AgentOutcome {
        EvAgent::new()
            .process(query, &QueryContext::new(query))
            .unwrap()
    }

    #[test]
    fn test_can_handle() {
        let agent = EvAgent::new();
        assert_eq!(
            agent.can_handle("", &QueryContext::new("quero carregar o tesla")),
            1.0
        );
        assert_eq!(agent.can_handle("", &QueryContext::new("xyz abc random text")), 0.0);
        assert_eq!(agent.can_handle("carregar_carro", &QueryContext::new("xyz")), 0.9);
    }

    #[test]
    fn test_schedule_beats_cost() {
        // "quando" (schedule) and "custa" (cost) both present
        let outcome = run("quando é que custa menos carregar?");
        assert!(outcome.response.data.contains_key("optimization"));
        assert_eq!(outcome.response.message, "💡 Melhor horário: 22:00. Poupa €45/mês!");
    }

    #[test]
    fn test_optimal_time_asks_billing() {
        let outcome = run("melhor altura para carregar");
        let requests = outcome.response.collaboration_requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.agent == "billing_agent"));
        assert_eq!(requests[0].request, AgentRequest::GetConsumptionPattern);
        assert_eq!(requests[1].request, AgentRequest::GetCustomerValue);
    }

    #[test]
    fn test_cost_analysis() {
        let outcome = run("preço da tarifa para o posto");
        assert_eq!(outcome.response.data["costs"]["total_monthly"], 130.5);
        assert!(!outcome.response.needs_collaboration());
    }

    #[test]
    fn test_stations() {
        let outcome = run("postos mobie perto de mim");
        let stations = outcome.response.data["stations"].as_array().unwrap();
        assert_eq!(stations.len(), 3);
        assert_eq!(
            outcome.response.message,
            "📍 3 postos encontrados. Mais próximo: MOBI.E - Continente Benfica (1.2 km)"
        );
    }

    #[test]
    fn test_default_response() {
        let outcome = run("olá");
        assert_eq!(outcome.response.data["agent"], "ev");
        assert_eq!(outcome.response.follow_up.len(), 3);
    }

    #[test]
    fn test_ev_impact_request() {
        let agent = EvAgent::new();
        assert_eq!(
            agent.handle_request(&AgentRequest::GetEvImpactOnBill),
            AgentReply::EvImpact {
                monthly_consumption_kwh: 280.0,
                monthly_cost: 85.5,
                peak_hour_usage: 0.15,
            }
        );
        assert_eq!(
            agent.handle_request(&AgentRequest::GetCustomerValue),
            AgentReply::not_implemented()
        );
    }
}
