//! Billing agent: invoices, payments and consumption history

use serde_json::{Map, Value, json};
use tracing::{debug, info};

use super::{
    Agent, AgentOutcome, AgentResponse, CollaborationRequest, QueryContext, first_match,
    score_query,
};
use crate::error::AgentResult;
use crate::message::{AgentReply, AgentRequest, Message};

pub const AGENT_ID: &str = "billing_agent";

const KEYWORDS: &[&str] = &[
    "fatura",
    "factura",
    "conta",
    "pagar",
    "valor",
    "consumo",
    "kwh",
    "eletricidade",
    "gás",
    "referência",
    "mb",
    "débito",
    "direto",
    "preço",
    "tarifa",
    "gastei",
    "gasto",
    "mês",
    "mes",
    "este mês",
    "último mês",
    "faturação",
    "montante",
    "total",
    "paguei",
    "custo",
    "despesa",
];

const CANONICAL_INTENTS: &[&str] = &["get_invoice", "get_consumption"];

const CAPABILITIES: &[&str] = &[
    "consultar_fatura",
    "historico_consumo",
    "proxima_fatura",
    "metodos_pagamento",
    "comparativo_consumo",
];

/// Invoices above this amount mark a commercial customer in context broadcasts
const COMMERCIAL_THRESHOLD: f64 = 200.0;
/// Invoices above this amount mark a premium customer for peers
const PREMIUM_THRESHOLD: f64 = 150.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Invoice,
    Consumption,
    PredictNextBill,
    Compare,
    Details,
    AutomaticPayment,
}

const ROUTES: &[(&[&str], Action)] = &[
    (&["fatura", "conta", "valor", "pagar"], Action::Invoice),
    (&["consumo", "kwh", "gastei", "gasto"], Action::Consumption),
    (
        &["próxima", "proxima", "previsão", "previsao", "vai custar", "estimativa"],
        Action::PredictNextBill,
    ),
    (
        &[
            "comparar",
            "comparação",
            "comparacao",
            "diferença",
            "difereca",
            "anterior",
            "mês passado",
            "mes passado",
        ],
        Action::Compare,
    ),
    (
        &["detalhes", "detalhe", "especificação", "especificacao", "itemizado"],
        Action::Details,
    ),
    (
        &[
            "pagamento automático",
            "pagamento automatico",
            "débito direto",
            "debito direto",
            "automatizar",
        ],
        Action::AutomaticPayment,
    ),
];

/// A stored invoice
#[derive(Debug, Clone, PartialEq)]
struct Invoice {
    number: &'static str,
    amount: f64,
    date: &'static str,
    consumption_kwh: u32,
    status: &'static str,
    due_date: &'static str,
}

impl Invoice {
    fn to_json(&self) -> Value {
        json!({
            "number": self.number,
            "amount": self.amount,
            "date": self.date,
            "consumption_kwh": self.consumption_kwh,
            "status": self.status,
            "due_date": self.due_date,
        })
    }
}

const LATEST_INVOICE: Invoice = Invoice {
    number: "FT-2024-001",
    amount: 127.50,
    date: "2024-01-15",
    consumption_kwh: 450,
    status: "pending",
    due_date: "2024-02-05",
};

const INVOICES: &[Invoice] = &[LATEST_INVOICE];

pub struct BillingAgent {
    invoices: &'static [Invoice],
}

impl BillingAgent {
    pub fn new() -> Self {
        info!("BillingAgent initialized");
        Self { invoices: INVOICES }
    }

    fn latest(&self) -> &Invoice {
        self.invoices.first().unwrap_or(&LATEST_INVOICE)
    }

    /// Look up by number; `latest` and unknown numbers return the latest invoice
    fn find_invoice(&self, number: &str) -> &Invoice {
        self.invoices
            .iter()
            .find(|inv| inv.number == number)
            .unwrap_or_else(|| self.latest())
    }

    fn invoice(&self, number: &str) -> AgentOutcome {
        let inv = self.find_invoice(number);
        info!(
            "Invoice retrieved: {} amount={} status={}",
            inv.number, inv.amount, inv.status
        );

        let segment = if inv.amount < COMMERCIAL_THRESHOLD {
            "residential"
        } else {
            "commercial"
        };
        let mut update = Map::new();
        update.insert("last_invoice_amount".to_string(), json!(inv.amount));
        update.insert("last_consumption".to_string(), json!(inv.consumption_kwh));
        update.insert("customer_segment".to_string(), json!(segment));

        AgentOutcome::from(AgentResponse::ok(
            json!({ "invoice": inv.to_json() }),
            format!("Fatura {}: €{}", inv.number, inv.amount),
            &[
                "Comparar com mês anterior",
                "Ver detalhes de consumo",
                "Configurar pagamento automático",
            ],
        ))
        .with_broadcast(Message::context_update(AGENT_ID, update))
    }

    fn consumption(&self, period: &str) -> AgentOutcome {
        let current_month = 450;
        let trend = "+18% vs mês anterior";
        info!(
            "Consumption data retrieved: period={} current_month={} trend={}",
            period, current_month, trend
        );
        AgentResponse::ok(
            json!({
                "consumption": {
                    "period": period,
                    "current_month": current_month,
                    "previous_month": 380,
                    "same_month_last_year": 420,
                    "trend": trend,
                    "projection_next_month": 480,
                }
            }),
            format!("Consumo: {} kWh ({})", current_month, trend),
            &["Porque aumentou?", "Comparar com vizinhos", "Dicas para reduzir"],
        )
        .into()
    }

    fn predict_next_bill(&self) -> AgentOutcome {
        let estimated_amount = 135.0;
        let confidence = 0.85;
        info!(
            "Next bill predicted: estimated_amount={} confidence={}",
            estimated_amount, confidence
        );
        AgentResponse::ok(
            json!({
                "prediction": {
                    "estimated_amount": estimated_amount,
                    "confidence": confidence,
                    "factors": [
                        "Inverno = maior consumo",
                        "Tendência crescente (+5%)",
                        "Previsão meteorológica: frio prolongado",
                    ],
                }
            }),
            format!(
                "Próxima fatura estimada: €{} (confiança: {:.0}%)",
                estimated_amount,
                confidence * 100.0
            ),
            &["Como reduzir?", "Simular mudança de tarifa", "Alertas de consumo"],
        )
        .into()
    }

    /// Comparison asks the EV and solar agents how much of the bill they explain
    fn compare(&self) -> AgentOutcome {
        let difference_percent = "+18.4%";
        let difference_kwh = 70;
        let amount_difference = 19.30;
        info!(
            "Consumption comparison generated: difference={} amount_difference={}",
            difference_percent, amount_difference
        );
        AgentResponse::ok(
            json!({
                "comparison": {
                    "current_month": 450,
                    "previous_month": 380,
                    "difference_kwh": difference_kwh,
                    "difference_percent": difference_percent,
                    "current_amount": 127.50,
                    "previous_amount": 108.20,
                    "amount_difference": amount_difference,
                    "reasons": [
                        "Maior utilização de aquecimento (inverno)",
                        "Mais dias no período de faturação",
                        "Possível uso de equipamentos novos",
                    ],
                }
            }),
            format!(
                "Comparação: Consumo subiu {} ({} kWh). Fatura aumentou €{}.",
                difference_percent, difference_kwh, amount_difference
            ),
            &[
                "Ver detalhes de consumo",
                "Dicas para reduzir",
                "Previsão próxima fatura",
            ],
        )
        .with_collaboration(vec![
            CollaborationRequest::new(super::ev::AGENT_ID, AgentRequest::GetEvImpactOnBill),
            CollaborationRequest::new(super::solar::AGENT_ID, AgentRequest::GetSolarContribution),
        ])
        .into()
    }

    fn details(&self) -> AgentOutcome {
        let breakdown = json!([
            {"category": "Aquecimento", "kwh": 180, "percent": 40, "cost": 51.00},
            {"category": "Águas quentes", "kwh": 90, "percent": 20, "cost": 25.50},
            {"category": "Eletrodomésticos", "kwh": 112, "percent": 25, "cost": 31.75},
            {"category": "Iluminação", "kwh": 45, "percent": 10, "cost": 12.75},
            {"category": "Outros", "kwh": 23, "percent": 5, "cost": 6.50},
        ]);
        info!("Detailed consumption retrieved: total_kwh=450 categories=5");
        AgentResponse::ok(
            json!({ "details": { "total_kwh": 450, "breakdown": breakdown } }),
            "Maior consumo: Aquecimento (40% = €51).",
            &[
                "Comparar com mês anterior",
                "Dicas para reduzir",
                "Simular mudança de tarifa",
            ],
        )
        .into()
    }

    fn automatic_payment(&self) -> AgentOutcome {
        info!("Automatic payment information requested");
        AgentResponse::ok(
            json!({
                "payment_methods": [
                    {"type": "Débito Direto", "description": "Pagamento automático na data de vencimento"}
                ]
            }),
            "Posso configurar débito direto para pagamento automático. Deseja ativar?",
            &["Ativar débito direto", "Ver outras opções"],
        )
        .into()
    }
}

impl Default for BillingAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for BillingAgent {
    fn id(&self) -> &str {
        AGENT_ID
    }

    fn description(&self) -> &str {
        "Gestão de faturas, pagamentos e histórico de consumo"
    }

    fn routing_description(&self) -> &str {
        "Faturas, pagamentos, consumo de energia, valores em euros, histórico de faturação"
    }

    fn capabilities(&self) -> &[&'static str] {
        CAPABILITIES
    }

    fn can_handle(&self, intent: &str, context: &QueryContext) -> f64 {
        score_query(AGENT_ID, intent, context, KEYWORDS, CANONICAL_INTENTS)
    }

    fn process(&self, query: &str, context: &QueryContext) -> AgentResult<AgentOutcome> {
        let query_lower = query.to_lowercase();
        info!("Processing billing query: {}", truncate(query, 100));

        let outcome = match first_match(&query_lower, ROUTES) {
            Some(Action::Invoice) => {
                let number = context.get_str("invoice_number").unwrap_or("latest");
                debug!("Routing to invoice lookup ({})", number);
                self.invoice(number)
            }
            Some(Action::Consumption) => {
                let period = context.get_str("period").unwrap_or("current");
                debug!("Routing to consumption ({})", period);
                self.consumption(period)
            }
            Some(Action::PredictNextBill) => self.predict_next_bill(),
            Some(Action::Compare) => self.compare(),
            Some(Action::Details) => self.details(),
            Some(Action::AutomaticPayment) => self.automatic_payment(),
            None => {
                info!("No billing action matched, returning default response");
                AgentResponse::ok(
                    json!({ "agent": "billing" }),
                    "Posso ajudar com faturas, consumo ou previsões. O que precisa?",
                    &[
                        "Ver última fatura",
                        "Consumo deste mês",
                        "Previsão próxima fatura",
                    ],
                )
                .into()
            }
        };
        Ok(outcome)
    }

    fn handle_request(&self, request: &AgentRequest) -> AgentReply {
        let last = self.latest();
        match request {
            AgentRequest::GetCustomerValue => AgentReply::CustomerValue {
                annual_value: last.amount * 12.0,
                segment: if last.amount > PREMIUM_THRESHOLD {
                    "premium"
                } else {
                    "standard"
                }
                .to_string(),
            },
            AgentRequest::GetConsumptionPattern => AgentReply::ConsumptionPattern {
                peak_hours: vec!["19:00".into(), "20:00".into(), "21:00".into()],
                off_peak_usage: 0.35,
                monthly_trend: "increasing".to_string(),
            },
            _ => AgentReply::not_implemented(),
        }
    }
}

/// Char-boundary-safe prefix for log lines
pub(crate) fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
