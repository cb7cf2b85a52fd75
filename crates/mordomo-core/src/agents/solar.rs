//! Solar agent: PV production, grid sales, savings and forecasts

use serde_json::json;
use tracing::{debug, info};

use super::billing::truncate;
use super::{
    Agent, AgentOutcome, AgentResponse, CollaborationRequest, QueryContext, first_match,
    score_query,
};
use crate::error::AgentResult;
use crate::message::{AgentReply, AgentRequest};

pub const AGENT_ID: &str = "solar_agent";

const KEYWORDS: &[&str] = &[
    "painel",
    "solar",
    "fotovoltaico",
    "pv",
    "produção",
    "autoconsumo",
    "vender",
    "rede",
    "inversor",
    "kwh produzidos",
    "sun",
    "irradiância",
    "auto-consumo",
];

const CANONICAL_INTENTS: &[&str] = &["solar_production", "autoconsumo"];

const CAPABILITIES: &[&str] = &[
    "producao_diaria",
    "autoconsumo_vs_venda",
    "previsao_producao",
    "roi_solar",
    "alertas_performance",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Production,
    GridSales,
    Savings,
    Forecast,
}

const ROUTES: &[(&[&str], Action)] = &[
    (&["produzi", "produção", "hoje", "gerado"], Action::Production),
    (&["vendi", "venda", "rede", "compensação"], Action::GridSales),
    (
        &["poupança", "economia", "roi", "rentabilidade"],
        Action::Savings,
    ),
    (&["previsão", "amanhã", "sol", "tempo"], Action::Forecast),
];

pub struct SolarAgent;

impl SolarAgent {
    pub fn new() -> Self {
        info!("SolarAgent initialized");
        Self
    }

    fn production(&self) -> AgentOutcome {
        let today_kwh = 18.5;
        let efficiency = "94%";
        let autoconsumed = 12.3;
        info!(
            "Solar production retrieved: today_kwh={} efficiency={} autoconsumed={}",
            today_kwh, efficiency, autoconsumed
        );
        AgentResponse::ok(
            json!({
                "production": {
                    "today_kwh": today_kwh,
                    "today_vs_expected": "+12%",
                    "month_total": 420,
                    "month_vs_last_year": "+8%",
                    "peak_power_reached": "4.2 kW",
                    "system_efficiency": efficiency,
                    "autoconsumed": autoconsumed,
                    "sold_to_grid": 6.2,
                }
            }),
            format!(
                "☀️ Hoje: {} kWh (+12% vs esperado). Autoconsumo: {} kWh",
                today_kwh, autoconsumed
            ),
            &[
                "Ver gráfico detalhado",
                "Performance vs vizinhos",
                "Alerta se underperforming",
            ],
        )
        // household consumption pattern gives the coverage ratio
        .with_collaboration(vec![CollaborationRequest::new(
            super::billing::AGENT_ID,
            AgentRequest::GetConsumptionPattern,
        )])
        .into()
    }

    fn grid_sales(&self) -> AgentOutcome {
        let month_sold_kwh = 185;
        let month_earnings = 23.50;
        let year_earnings = 266;
        info!(
            "Grid sales retrieved: month_earnings={} year_earnings={}",
            month_earnings, year_earnings
        );
        AgentResponse::ok(
            json!({
                "sales": {
                    "month_sold_kwh": month_sold_kwh,
                    "month_earnings": month_earnings,
                    "year_sold_kwh": 2100,
                    "year_earnings": year_earnings,
                    "current_price_per_kwh": 0.127,
                    "market_trend": "stable",
                }
            }),
            format!(
                "💰 Este mês vendeu {} kWh = €{}. Este ano: €{}",
                month_sold_kwh, month_earnings, year_earnings
            ),
            &[
                "Previsão anual",
                "Histórico de preços",
                "Otimizar autoconsumo vs venda",
            ],
        )
        .into()
    }

    fn savings(&self) -> AgentOutcome {
        let monthly_savings = 89.50;
        let payback_remaining_years = 4.5;
        info!(
            "Solar savings calculated: monthly_savings={} payback_years={}",
            monthly_savings, payback_remaining_years
        );
        AgentResponse::ok(
            json!({
                "savings": {
                    "monthly_savings": monthly_savings,
                    "annual_savings": 1074,
                    "lifetime_savings_25y": 26850,
                    "payback_remaining_years": payback_remaining_years,
                    "roi_percent": 12.5,
                    "co2_avoided_kg": 1800,
                }
            }),
            format!(
                "💚 Poupa €{}/mês. Retorno do investimento: {} anos restantes",
                monthly_savings, payback_remaining_years
            ),
            &[
                "Comparar com investimento alternativo",
                "Impacto ambiental detalhado",
                "Otimizar para máximo ROI",
            ],
        )
        .into()
    }

    fn forecast(&self) -> AgentOutcome {
        let tomorrow_kwh = 16.2;
        let weather = "Parcialmente nublado";
        info!(
            "Solar forecast generated: tomorrow_kwh={} weather={}",
            tomorrow_kwh, weather
        );
        AgentResponse::ok(
            json!({
                "forecast": {
                    "tomorrow_kwh": tomorrow_kwh,
                    "confidence": 0.82,
                    "weather": weather,
                    "irradiance": "5.8 kWh/m²",
                    "recommendation": "Bom dia para lavar painéis à tarde",
                }
            }),
            format!("🔮 Amanhã: {} kWh previstos ({})", tomorrow_kwh, weather),
            &[
                "Previsão 7 dias",
                "Melhores dias do mês",
                "Alerta de nuvem/poeira",
            ],
        )
        .into()
    }
}

impl Default for SolarAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for SolarAgent {
    fn id(&self) -> &str {
        AGENT_ID
    }

    fn description(&self) -> &str {
        "Monitorização solar, produção PV e venda à rede"
    }

    fn routing_description(&self) -> &str {
        "Painéis solares, produção fotovoltaica, autoconsumo, venda de energia à rede"
    }

    fn capabilities(&self) -> &[&'static str] {
        CAPABILITIES
    }

    fn can_handle(&self, intent: &str, context: &QueryContext) -> f64 {
        score_query(AGENT_ID, intent, context, KEYWORDS, CANONICAL_INTENTS)
    }

    fn process(&self, query: &str, _context: &QueryContext) -> AgentResult<AgentOutcome> {
        info!("Processing solar query: {}", truncate(query, 100));
        let action = first_match(&query.to_lowercase(), ROUTES);
        debug!("Solar dispatch: {:?}", action);
        let outcome = match action {
            Some(Action::Production) => self.production(),
            Some(Action::GridSales) => self.grid_sales(),
            Some(Action::Savings) => self.savings(),
            Some(Action::Forecast) => self.forecast(),
            None => {
                info!("No solar action matched, returning default response");
                AgentResponse::ok(
                    json!({ "agent": "solar" }),
                    "Posso ajudar com monitorização solar, autoconsumo e vendas à rede. O que precisa?",
                    &["Produção de hoje", "Quanto vendi à rede?", "Poupança total"],
                )
                .into()
            }
        };
        Ok(outcome)
    }

    fn handle_request(&self, request: &AgentRequest) -> AgentReply {
        match request {
            AgentRequest::GetSolarContribution => {
                debug!("Returning solar contribution");
                AgentReply::SolarContribution {
                    monthly_production: 420.0,
                    autoconsume_rate: 0.65,
                    grid_injection: 185.0,
                    bill_reduction_percent: 45.0,
                }
            }
            _ => AgentReply::not_implemented(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(query: &str) -> AgentOutcome {
        SolarAgent::new()
            .process(query, &QueryContext::new(query))
            .unwrap()
    }

    #[test]
    fn test_can_handle() {
        let agent = SolarAgent::new();
        assert_eq!(
            agent.can_handle("", &QueryContext::new("o meu painel")),
            0.5
        );
        assert_eq!(
            agent.can_handle("", &QueryContext::new("painel solar fotovoltaico")),
            1.0
        );
        assert_eq!(agent.can_handle("autoconsumo", &QueryContext::new("xyz")), 0.9);
        assert_eq!(agent.can_handle("", &QueryContext::new("xyz abc random text")), 0.0);
    }

    #[test]
    fn test_production_first() {
        // "hoje" (production) wins over "rede" (sales)
        let outcome = run("quanto vendi hoje à rede?");
        assert!(outcome.response.data.contains_key("production"));
        assert_eq!(
            outcome.response.message,
            "☀️ Hoje: 18.5 kWh (+12% vs esperado). Autoconsumo: 12.3 kWh"
        );
        let requests = outcome.response.collaboration_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].request, AgentRequest::GetConsumptionPattern);
    }

    #[test]
    fn test_sales_savings_forecast() {
        assert_eq!(
            run("quanto vendi este mês").response.message,
            "💰 Este mês vendeu 185 kWh = €23.5. Este ano: €266"
        );
        assert!(run("qual a rentabilidade").response.data.contains_key("savings"));
        assert!(run("previsão para amanhã").response.data.contains_key("forecast"));
    }

    #[test]
    fn test_default_response() {
        let outcome = run("olá");
        assert_eq!(outcome.response.data["agent"], "solar");
    }

    #[test]
    fn test_solar_contribution_request() {
        let agent = SolarAgent::new();
        assert!(matches!(
            agent.handle_request(&AgentRequest::GetSolarContribution),
            AgentReply::SolarContribution { bill_reduction_percent, .. } if bill_reduction_percent == 45.0
        ));
        assert_eq!(
            agent.handle_request(&AgentRequest::Unsupported),
            AgentReply::not_implemented()
        );
    }
}
