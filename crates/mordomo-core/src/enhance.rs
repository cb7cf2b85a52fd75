//! Natural-language enhancement of agent responses
//!
//! Runs after routing, outside the orchestrator: the structured response is
//! summarised per agent and handed to a language model that rewrites it as a
//! short customer-facing reply. Any failure keeps the agent's own message.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::agents::{AgentResponse, billing, ev, solar};

/// Shown to the model when no recognised data is present
pub const NO_DATA: &str = "- Dados não disponíveis";

/// Rewrites a structured response as display text
#[async_trait]
pub trait Enhancer: Send + Sync {
    async fn enhance(
        &self,
        query: &str,
        response: &AgentResponse,
        agent_id: &str,
    ) -> anyhow::Result<String>;
}

/// Enhance when an enhancer is configured, otherwise or on failure return `response.message`
pub async fn enhance_or_fallback(
    enhancer: Option<&dyn Enhancer>,
    query: &str,
    response: &AgentResponse,
    agent_id: &str,
) -> String {
    let Some(enhancer) = enhancer else {
        return response.message.clone();
    };
    match enhancer.enhance(query, response, agent_id).await {
        Ok(text) if !text.trim().is_empty() => {
            debug!("Enhanced response for {}", agent_id);
            text.trim().to_string()
        }
        Ok(_) => {
            warn!("Enhancer returned empty text for {}, keeping agent message", agent_id);
            response.message.clone()
        }
        Err(e) => {
            warn!("Enhancement failed for {}, keeping agent message: {:#}", agent_id, e);
            response.message.clone()
        }
    }
}

fn field(section: &Map<String, Value>, key: &str) -> String {
    match section.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "N/A".to_string(),
        Some(other) => other.to_string(),
    }
}

fn section<'a>(data: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    data.get(key).and_then(Value::as_object)
}

/// Summarise the recognised parts of a response's data, one `- ` line each
pub fn build_context(response: &AgentResponse, agent_id: &str) -> String {
    let data = &response.data;
    let mut parts = Vec::new();

    match agent_id {
        billing::AGENT_ID => {
            if let Some(inv) = section(data, "invoice") {
                parts.push(format!("- Fatura: {}", field(inv, "number")));
                parts.push(format!("- Valor: €{}", field(inv, "amount")));
                parts.push(format!("- Data: {}", field(inv, "date")));
                parts.push(format!("- Consumo: {} kWh", field(inv, "consumption_kwh")));
                parts.push(format!("- Estado: {}", field(inv, "status")));
            }
        }
        ev::AGENT_ID => {
            if let Some(costs) = section(data, "costs") {
                parts.push(format!("- Custo mensal: €{}", field(costs, "total_monthly")));
                parts.push(format!("- Custo por 100km: {}", field(costs, "cost_per_100km")));
            }
            if let Some(opt) = section(data, "optimization") {
                parts.push(format!("- Melhor horário: {}", field(opt, "best_start_time")));
                parts.push(format!(
                    "- Poupança vs horário caro: {}",
                    field(opt, "savings_vs_peak")
                ));
            }
            if let Some(stations) = data.get("stations").and_then(Value::as_array) {
                parts.push(format!(
                    "- {} postos de carregamento encontrados",
                    stations.len()
                ));
            }
        }
        solar::AGENT_ID => {
            if let Some(prod) = section(data, "production") {
                parts.push(format!("- Produção hoje: {} kWh", field(prod, "today_kwh")));
                parts.push(format!("- Autoconsumo: {} kWh", field(prod, "autoconsumed")));
                parts.push(format!("- Vendido à rede: {} kWh", field(prod, "sold_to_grid")));
            }
            if let Some(sales) = section(data, "sales") {
                parts.push(format!("- Vendas este mês: €{}", field(sales, "month_earnings")));
            }
            if let Some(savings) = section(data, "savings") {
                parts.push(format!(
                    "- Poupança mensal: €{}",
                    field(savings, "monthly_savings")
                ));
            }
        }
        _ => {}
    }

    if parts.is_empty() {
        NO_DATA.to_string()
    } else {
        parts.join("\n")
    }
}

/// Prompt asking for a short PT-PT customer reply built from `context`
pub fn enhancement_prompt(query: &str, context: &str, agent_id: &str) -> String {
    format!(
        "Responde como assistente de atendimento de uma empresa de energia em Portugal.\n\
         \n\
         PERGUNTA DO CLIENTE: \"{query}\"\n\
         \n\
         DADOS DO AGENTE ({agent_id}):\n\
         {context}\n\
         \n\
         INSTRUÇÕES:\n\
         - Responde de forma natural e amigável em português (PT-PT)\n\
         - Usa os dados acima mas reformula de forma conversacional\n\
         - Máximo 2-3 frases curtas\n\
         - Tom profissional mas próximo\n\
         - Não uses linguagem técnica excessiva\n\
         - Se houver valores em euros, formata como €XX.XX\n\
         \n\
         Responde APENAS com a mensagem ao cliente:"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::json;

    struct Fixed(Result<String, String>);

    #[async_trait]
    impl Enhancer for Fixed {
        async fn enhance(
            &self,
            _query: &str,
            _response: &AgentResponse,
            _agent_id: &str,
        ) -> anyhow::Result<String> {
            self.0.clone().map_err(|e| anyhow!(e))
        }
    }

    fn invoice_response() -> AgentResponse {
        AgentResponse::ok(
            json!({"invoice": {
                "number": "FT-2024-001", "amount": 127.5, "date": "2024-01-15",
                "consumption_kwh": 450, "status": "pending"
            }}),
            "Fatura FT-2024-001: €127.5",
            &[],
        )
    }

    #[test]
    fn test_billing_context() {
        let ctx = build_context(&invoice_response(), "billing_agent");
        assert_eq!(
            ctx,
            "- Fatura: FT-2024-001\n- Valor: €127.5\n- Data: 2024-01-15\n- Consumo: 450 kWh\n- Estado: pending"
        );
    }

    #[test]
    fn test_ev_context_counts_stations() {
        let response = AgentResponse::ok(json!({"stations": [{}, {}, {}]}), "m", &[]);
        assert_eq!(
            build_context(&response, "ev_agent"),
            "- 3 postos de carregamento encontrados"
        );
    }

    #[test]
    fn test_missing_fields_render_na() {
        let response = AgentResponse::ok(json!({"costs": {}}), "m", &[]);
        assert_eq!(
            build_context(&response, "ev_agent"),
            "- Custo mensal: €N/A\n- Custo por 100km: N/A"
        );
    }

    #[test]
    fn test_unrecognised_data() {
        let response = AgentResponse::ok(json!({"ticket_id": "AV-2024-001"}), "m", &[]);
        assert_eq!(build_context(&response, "support_agent"), NO_DATA);
        assert_eq!(build_context(&invoice_response(), "orchestrator"), NO_DATA);
    }

    #[test]
    fn test_prompt_contents() {
        let prompt = enhancement_prompt("Quanto pago?", "- Valor: €127.5", "billing_agent");
        assert!(prompt.contains("PERGUNTA DO CLIENTE: \"Quanto pago?\""));
        assert!(prompt.contains("DADOS DO AGENTE (billing_agent):\n- Valor: €127.5"));
    }

    #[tokio::test]
    async fn test_enhance_or_fallback() {
        let response = invoice_response();
        assert_eq!(
            enhance_or_fallback(None, "q", &response, "billing_agent").await,
            "Fatura FT-2024-001: €127.5"
        );

        let ok = Fixed(Ok("  A sua fatura é de €127.50.  ".to_string()));
        assert_eq!(
            enhance_or_fallback(Some(&ok), "q", &response, "billing_agent").await,
            "A sua fatura é de €127.50."
        );

        let failing = Fixed(Err("502".to_string()));
        assert_eq!(
            enhance_or_fallback(Some(&failing), "q", &response, "billing_agent").await,
            response.message
        );

        let empty = Fixed(Ok("   ".to_string()));
        assert_eq!(
            enhance_or_fallback(Some(&empty), "q", &response, "billing_agent").await,
            response.message
        );
    }
}
