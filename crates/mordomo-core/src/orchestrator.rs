//! Orchestrator: agent selection, processing, collaboration and context
//!
//! The orchestrator owns a read-only [`AgentRegistry`] and a [`Router`]. All
//! mutable state lives in the [`Session`] passed to each call, so a single
//! orchestrator can be shared (`Arc`) across concurrent conversations as long
//! as each session is accessed by one caller at a time.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};

use crate::agents::{Agent, AgentInfo, AgentOutcome, AgentResponse, Domain, QueryContext};
use crate::error::{AgentError, AgentResult};
use crate::message::{Message, Payload, Recipient};
use crate::router::{DomainDescription, Router, RouterConfig, SemanticClassifier};
use crate::session::{Session, Turn};

/// Agent id reported when no domain agent answered
pub const ORCHESTRATOR_ID: &str = "orchestrator";

/// Data key under which collaboration replies are merged
pub const COLLABORATION: &str = "collaboration";

const FALLBACK_MESSAGE: &str = "Não tenho a certeza de como ajudar com isso. Posso ajudar com:\n\
    • Faturas e consumo de energia\n\
    • Carregamento de veículos elétricos\n\
    • Painéis solares e autoconsumo\n\
    \n\
    O que gostaria de saber?";

const FALLBACK_FOLLOW_UP: &[&str] = &["Ver minha fatura", "Otimizar carregamento EV", "Produção solar"];

/// Selection thresholds
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// A candidate must score strictly above this
    pub acceptance_threshold: f64,
    /// Top two keyword scores closer than this are both selected
    pub tie_margin: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.3,
            tie_margin: 0.2,
        }
    }
}

/// Registered agents, in registration order
#[derive(Default)]
pub struct AgentRegistry {
    agents: Vec<Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the four built-in domain agents
    pub fn standard() -> Self {
        Self {
            agents: Domain::ALL.into_iter().map(Domain::build).collect(),
        }
    }

    /// Add an agent. Ids must be unique.
    pub fn register(&mut self, agent: Arc<dyn Agent>) -> AgentResult<()> {
        if self.find(agent.id()).is_some() {
            return Err(AgentError::DuplicateAgent(agent.id().to_string()));
        }
        info!(
            "Agent registered: {} ({} capabilities)",
            agent.id(),
            agent.capabilities().len()
        );
        self.agents.push(agent);
        Ok(())
    }

    pub fn find(&self, id: &str) -> Option<&Arc<dyn Agent>> {
        self.agents.iter().find(|a| a.id() == id)
    }

    pub fn get(&self, id: &str) -> AgentResult<&Arc<dyn Agent>> {
        self.find(id)
            .ok_or_else(|| AgentError::AgentNotFound(id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Agent>> {
        self.agents.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn info(&self) -> Vec<AgentInfo> {
        self.agents.iter().map(|a| a.info()).collect()
    }

    /// Routing descriptions shown to the semantic classifier
    pub fn descriptions(&self) -> Vec<DomainDescription> {
        self.agents
            .iter()
            .map(|a| DomainDescription::new(a.id(), a.routing_description()))
            .collect()
    }
}

/// A secondary agent's contribution to a routed query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollaboratorData {
    pub agent: String,
    pub data: Map<String, Value>,
}

/// Result envelope of [`Orchestrator::route_query`]
#[derive(Debug, Clone, Serialize)]
pub struct RoutedQuery {
    pub primary_agent: String,
    pub collaborating_agents: Vec<CollaboratorData>,
    pub response: AgentResponse,
    /// Snapshot of the session's shared context after the query
    pub context: crate::session::SharedContext,
}

pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    router: Router,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Orchestrator over a registry, routing by keywords until a classifier is attached
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        let router = Router::new(registry.descriptions());
        info!("Orchestrator ready with {} agents", registry.len());
        Self {
            registry,
            router,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn SemanticClassifier>) -> Self {
        self.router = self.router.with_classifier(classifier);
        self
    }

    pub fn with_router_config(mut self, config: RouterConfig) -> Self {
        self.router = self.router.with_config(config);
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn agents_info(&self) -> Vec<AgentInfo> {
        self.registry.info()
    }

    /// Answer one user query within `session`.
    ///
    /// Only a failure of the primary agent is returned as an error; secondary
    /// agents and collaboration requests fail soft.
    pub async fn route_query(
        &self,
        session: &mut Session,
        query: &str,
        user_context: Option<Map<String, Value>>,
    ) -> AgentResult<RoutedQuery> {
        let context = QueryContext::with_values(query, user_context.unwrap_or_default());
        session.shared.push_user(query);

        let candidates = self.select_agents(query, &context).await;
        let Some(primary) = candidates.first() else {
            info!("No agent cleared the acceptance threshold, using fallback response");
            return Ok(self.fallback_response(session));
        };

        let outcome = primary.process(query, &context).inspect_err(|e| {
            error!("Primary agent {} failed: {}", primary.id(), e);
        })?;
        let AgentOutcome {
            mut response,
            broadcasts,
        } = outcome;
        self.deliver_all(session, &broadcasts);

        let mut collaborating_agents = Vec::new();
        for agent in &candidates[1..] {
            match agent.process(query, &context) {
                Ok(outcome) => {
                    self.deliver_all(session, &outcome.broadcasts);
                    collaborating_agents.push(CollaboratorData {
                        agent: agent.id().to_string(),
                        data: outcome.response.data,
                    });
                }
                Err(e) => warn!("Secondary agent {} failed, omitting: {}", agent.id(), e),
            }
        }

        if response.needs_collaboration() {
            let collab = self.request_collaboration(session, primary.id(), &response);
            response = merge_responses(response, collab);
        }

        update_profile(session, &response);
        session.shared.push_assistant(&response.message, primary.id());

        info!(
            "Query answered by {} ({} collaborators)",
            primary.id(),
            collaborating_agents.len()
        );
        Ok(RoutedQuery {
            primary_agent: primary.id().to_string(),
            collaborating_agents,
            response,
            context: session.shared.clone(),
        })
    }

    /// Semantic verdict first; otherwise every agent's own score
    async fn select_agents(&self, query: &str, context: &QueryContext) -> Vec<Arc<dyn Agent>> {
        let threshold = self.config.acceptance_threshold;
        let verdict = self.router.classify(query).await;

        if let Some(agent) = verdict
            .agent
            .as_deref()
            .filter(|_| verdict.confidence > threshold)
            .and_then(|id| self.registry.find(id))
        {
            info!(
                "Routed to {} (confidence {:.2})",
                agent.id(),
                verdict.confidence
            );
            return vec![Arc::clone(agent)];
        }

        debug!(
            "Router verdict {} ({:.2}) not accepted, scoring agents",
            verdict.agent_id(),
            verdict.confidence
        );
        let mut scored: Vec<(f64, &Arc<dyn Agent>)> = self
            .registry
            .iter()
            .map(|agent| (agent.can_handle("", context), agent))
            .filter(|(confidence, _)| *confidence > threshold)
            .collect();
        // stable: equal scores keep registration order
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let keep = match scored.as_slice() {
            [first, second, ..] if first.0 - second.0 < self.config.tie_margin => 2,
            _ => 1,
        };
        scored
            .into_iter()
            .take(keep)
            .map(|(_, agent)| Arc::clone(agent))
            .collect()
    }

    /// Send typed requests to peers; replies from one agent merge into one map
    fn request_collaboration(
        &self,
        session: &mut Session,
        requester: &str,
        response: &AgentResponse,
    ) -> Map<String, Value> {
        let mut collab = Map::new();

        for request in response.collaboration_requests() {
            let Some(target) = self.registry.find(&request.agent) else {
                warn!(
                    "{} asked unknown agent {} for collaboration",
                    requester, request.agent
                );
                continue;
            };
            let message = Message::request(requester, target.id(), request.request);
            let reply = target.receive_message(&message, session.agent_memory_mut(target.id()));

            let Some(Payload::Response(reply)) = reply.as_ref().map(Message::payload) else {
                warn!("{} gave no response to {}", target.id(), requester);
                continue;
            };
            match serde_json::to_value(reply) {
                Ok(Value::Object(mut fields)) => {
                    fields.remove("reply_type");
                    let entry = collab
                        .entry(target.id().to_string())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if let Value::Object(existing) = entry {
                        existing.extend(fields);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Dropping reply from {}: {}", target.id(), e),
            }
        }

        debug!("Collaboration replies from {} agents", collab.len());
        collab
    }

    /// The message bus. Returns any replies produced by recipients.
    pub fn route_message(&self, session: &mut Session, message: &Message) -> Vec<Message> {
        let mut replies = Vec::new();
        match message.recipient() {
            Recipient::Broadcast => {
                for agent in self.registry.iter().filter(|a| a.id() != message.sender()) {
                    if let Some(reply) =
                        agent.receive_message(message, session.agent_memory_mut(agent.id()))
                    {
                        replies.push(reply);
                    }
                }
            }
            Recipient::Agent(id) => match self.registry.find(id) {
                Some(agent) => {
                    if let Some(reply) =
                        agent.receive_message(message, session.agent_memory_mut(agent.id()))
                    {
                        replies.push(reply);
                    }
                }
                None => warn!("Message to unknown agent: {}", id),
            },
        }
        debug!(
            "Delivered {} from {} to {}",
            message.kind(),
            message.sender(),
            message.recipient()
        );
        replies
    }

    fn deliver_all(&self, session: &mut Session, messages: &[Message]) {
        for message in messages {
            self.route_message(session, message);
        }
    }

    /// Run one agent directly, bypassing selection
    pub fn query_agent(
        &self,
        session: &mut Session,
        agent_id: &str,
        query: &str,
        user_context: Option<Map<String, Value>>,
    ) -> AgentResult<AgentResponse> {
        let agent = self.registry.get(agent_id)?;
        let context = QueryContext::with_values(query, user_context.unwrap_or_default());
        let outcome = agent.process(query, &context)?;
        self.deliver_all(session, &outcome.broadcasts);
        Ok(outcome.response)
    }

    pub fn conversation_history<'a>(&self, session: &'a Session) -> &'a [Turn] {
        session.history()
    }

    /// Start over: shared context and every agent's private context are emptied
    pub fn clear_context(&self, session: &mut Session) {
        session.clear();
        info!("Session context cleared");
    }

    fn fallback_response(&self, session: &Session) -> RoutedQuery {
        RoutedQuery {
            primary_agent: ORCHESTRATOR_ID.to_string(),
            collaborating_agents: Vec::new(),
            response: AgentResponse::ok(json!({}), FALLBACK_MESSAGE, FALLBACK_FOLLOW_UP),
            context: session.shared.clone(),
        }
    }
}

fn merge_responses(mut response: AgentResponse, collab: Map<String, Value>) -> AgentResponse {
    let addendum = collaboration_addendum(&collab);
    if !addendum.is_empty() {
        response.message = format!("{}\n\n{}", response.message, addendum);
    }
    response
        .data
        .insert(COLLABORATION.to_string(), Value::Object(collab));
    response
}

/// Amount as shown to customers: whole values print without a decimal part
/// (`1530`, not `1530.0`), fractional ones keep it (`127.5`).
fn number(value: &Value) -> String {
    match value.as_f64() {
        Some(n) => n.to_string(),
        None => value.to_string(),
    }
}

/// One sentence per recognised reply shape, joined by spaces
fn collaboration_addendum(collab: &Map<String, Value>) -> String {
    let field = |agent: Domain, key: &str| collab.get(agent.id()).and_then(|v| v.get(key));
    let mut parts = Vec::new();

    if let Some(annual) = field(Domain::Billing, "annual_value") {
        parts.push(format!(
            "💡 Com base no seu histórico (valor anual: €{}), tem acesso a tarifas especiais.",
            number(annual)
        ));
    }
    if let Some(kwh) = field(Domain::Ev, "monthly_consumption_kwh") {
        parts.push(format!(
            "🔋 O seu carro elétrico representa {} kWh/mês da fatura.",
            number(kwh)
        ));
    }
    if let Some(pct) = field(Domain::Solar, "bill_reduction_percent") {
        parts.push(format!(
            "☀️ Os seus painéis solares estão a reduzir a fatura em {}%.",
            number(pct)
        ));
    }
    parts.join(" ")
}

/// Persist the recognised invoice and consumption facts into the user profile
fn update_profile(session: &mut Session, response: &AgentResponse) {
    let profile = &mut session.shared.user_profile;
    if let Some(invoice) = response.data.get("invoice") {
        profile.insert(
            "last_invoice".to_string(),
            invoice.get("amount").cloned().unwrap_or(Value::Null),
        );
        profile.insert(
            "monthly_consumption".to_string(),
            invoice.get("consumption_kwh").cloned().unwrap_or(Value::Null),
        );
    }
    if let Some(consumption) = response.data.get("consumption") {
        profile.insert(
            "consumption_trend".to_string(),
            consumption.get("trend").cloned().unwrap_or(Value::Null),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::score_query;
    use crate::router::Classification;
    use crate::session::Role;
    use anyhow::anyhow;
    use async_trait::async_trait;

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(Arc::new(AgentRegistry::standard()))
    }

    /// Scores 0.5 (capped at `score`) on queries containing "sonda"
    struct Stub {
        id: &'static str,
        score: f64,
        fail: bool,
    }

    impl Agent for Stub {
        fn id(&self) -> &str {
            self.id
        }
        fn description(&self) -> &str {
            "stub"
        }
        fn routing_description(&self) -> &str {
            "stub"
        }
        fn capabilities(&self) -> &[&'static str] {
            &[]
        }
        fn can_handle(&self, intent: &str, context: &QueryContext) -> f64 {
            score_query(self.id, intent, context, &["sonda"], &[]).min(self.score)
        }
        fn process(&self, query: &str, _context: &QueryContext) -> AgentResult<AgentOutcome> {
            if self.fail {
                return Err(AgentError::processing(self.id, "stub failure"));
            }
            Ok(AgentResponse::ok(json!({"stub": self.id}), query, &[]).into())
        }
    }

    fn stubs(list: Vec<Stub>) -> Orchestrator {
        let mut registry = AgentRegistry::new();
        for stub in list {
            registry.register(Arc::new(stub)).unwrap();
        }
        Orchestrator::new(Arc::new(registry))
    }

    struct Verdict(Classification);

    #[async_trait]
    impl SemanticClassifier for Verdict {
        async fn classify_via_model(
            &self,
            _query: &str,
            _domains: &[DomainDescription],
        ) -> anyhow::Result<Classification> {
            Ok(self.0.clone())
        }
    }

    struct Down;

    #[async_trait]
    impl SemanticClassifier for Down {
        async fn classify_via_model(
            &self,
            _query: &str,
            _domains: &[DomainDescription],
        ) -> anyhow::Result<Classification> {
            Err(anyhow!("connection refused"))
        }
    }

    #[test]
    fn test_duplicate_registration_is_an_error() {
        let mut registry = AgentRegistry::standard();
        let err = registry
            .register(Domain::Billing.build())
            .unwrap_err();
        assert!(matches!(err, AgentError::DuplicateAgent(id) if id == "billing_agent"));
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_registry_lookup_and_order() {
        let registry = AgentRegistry::standard();
        assert_eq!(
            registry.ids(),
            vec!["billing_agent", "ev_agent", "solar_agent", "support_agent"]
        );
        assert!(matches!(
            registry.get("ghost_agent"),
            Err(AgentError::AgentNotFound(_))
        ));
        assert_eq!(registry.descriptions().len(), 4);
        assert!(registry.info().iter().all(|i| i.status == "active"));
    }

    #[tokio::test]
    async fn test_billing_query_end_to_end() {
        let orch = orchestrator();
        let mut session = Session::new();

        let routed = orch
            .route_query(&mut session, "Quanto tenho que pagar na fatura?", None)
            .await
            .unwrap();

        assert_eq!(routed.primary_agent, "billing_agent");
        assert!(routed.collaborating_agents.is_empty());
        assert!(routed.response.success);
        assert_eq!(routed.response.data["invoice"]["number"], "FT-2024-001");

        let history = orch.conversation_history(&session);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].agent.as_deref(), Some("billing_agent"));
        assert_eq!(history[1].content, routed.response.message);

        assert_eq!(session.shared.user_profile["last_invoice"], 127.5);
        assert_eq!(session.shared.user_profile["monthly_consumption"], 450);
        assert_eq!(routed.context.user_profile["last_invoice"], 127.5);
    }

    #[tokio::test]
    async fn test_invoice_broadcast_reaches_peers_only() {
        let orch = orchestrator();
        let mut session = Session::new();
        orch.route_query(&mut session, "ver a minha fatura", None)
            .await
            .unwrap();

        for peer in ["ev_agent", "solar_agent", "support_agent"] {
            let memory = session.agent_memory(peer).unwrap();
            assert_eq!(memory["customer_segment"], "residential");
            assert_eq!(memory["last_invoice_amount"], 127.5);
        }
        assert!(session.agent_memory("billing_agent").is_none());
    }

    #[tokio::test]
    async fn test_no_candidate_records_only_user_turn() {
        let orch = orchestrator();
        let mut session = Session::new();

        let routed = orch
            .route_query(&mut session, "xyz abc random text", None)
            .await
            .unwrap();

        assert_eq!(routed.primary_agent, ORCHESTRATOR_ID);
        assert!(routed.response.success);
        assert_eq!(routed.response.follow_up.len(), 3);
        assert!(routed.response.message.starts_with("Não tenho a certeza"));
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history()[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_close_scores_select_two_agents() {
        let orch = orchestrator();
        let mut session = Session::new();

        let routed = orch
            .route_query(&mut session, "preço da tarifa para o posto", None)
            .await
            .unwrap();

        assert_eq!(routed.primary_agent, "billing_agent");
        assert_eq!(routed.collaborating_agents.len(), 1);
        assert_eq!(routed.collaborating_agents[0].agent, "ev_agent");
        assert!(routed.collaborating_agents[0].data.contains_key("costs"));
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test]
    async fn test_semantic_verdict_selects_single_agent() {
        let orch = orchestrator().with_classifier(Arc::new(Verdict(Classification::new(
            "ev_agent", 0.95,
        ))));
        let mut session = Session::new();

        let routed = orch
            .route_query(&mut session, "preço da tarifa para o posto", None)
            .await
            .unwrap();
        assert_eq!(routed.primary_agent, "ev_agent");
        assert!(routed.collaborating_agents.is_empty());
    }

    #[tokio::test]
    async fn test_weak_semantic_verdict_is_not_accepted() {
        // 0.3 is not strictly above the threshold
        let orch = orchestrator().with_classifier(Arc::new(Verdict(Classification::new(
            "solar_agent", 0.3,
        ))));
        let mut session = Session::new();

        let routed = orch
            .route_query(&mut session, "Quanto tenho que pagar na fatura?", None)
            .await
            .unwrap();
        assert_eq!(routed.primary_agent, "billing_agent");
    }

    #[tokio::test]
    async fn test_classifier_outage_falls_back() {
        let orch = orchestrator().with_classifier(Arc::new(Down));
        let mut session = Session::new();
        let routed = orch
            .route_query(&mut session, "tenho uma avaria em casa", None)
            .await
            .unwrap();
        assert_eq!(routed.primary_agent, "support_agent");
    }

    #[tokio::test]
    async fn test_collaboration_merges_peer_data() {
        let orch = orchestrator();
        let mut session = Session::new();

        let routed = orch
            .route_query(&mut session, "comparar com o mês passado", None)
            .await
            .unwrap();

        assert_eq!(routed.primary_agent, "billing_agent");
        let collab = &routed.response.data[COLLABORATION];
        assert_eq!(collab["ev_agent"]["monthly_consumption_kwh"], 280.0);
        assert_eq!(collab["solar_agent"]["bill_reduction_percent"], 45.0);
        assert!(collab["ev_agent"].get("reply_type").is_none());
        assert!(routed.response.message.ends_with(
            "\n\n🔋 O seu carro elétrico representa 280 kWh/mês da fatura. \
             ☀️ Os seus painéis solares estão a reduzir a fatura em 45%."
        ));
        assert_eq!(session.history()[1].content, routed.response.message);
    }

    #[tokio::test]
    async fn test_two_requests_to_one_agent_merge() {
        let orch = orchestrator();
        let mut session = Session::new();

        let routed = orch
            .route_query(&mut session, "qual o melhor horário para carregar?", None)
            .await
            .unwrap();

        assert_eq!(routed.primary_agent, "ev_agent");
        let billing = &routed.response.data[COLLABORATION]["billing_agent"];
        assert_eq!(billing["annual_value"], 1530.0);
        assert_eq!(billing["monthly_trend"], "increasing");
        assert!(routed.response.message.contains("valor anual: €1530"));
    }

    #[tokio::test]
    async fn test_consumption_trend_lands_in_profile() {
        let orch = orchestrator();
        let mut session = Session::new();
        let mut values = Map::new();
        values.insert("period".to_string(), json!("2024-01"));

        let routed = orch
            .route_query(&mut session, "quanto gastei em kwh", Some(values))
            .await
            .unwrap();
        assert_eq!(routed.response.data["consumption"]["period"], "2024-01");
        assert_eq!(
            session.shared.user_profile["consumption_trend"],
            "+18% vs mês anterior"
        );
    }

    #[tokio::test]
    async fn test_primary_failure_propagates() {
        let orch = stubs(vec![Stub {
            id: "broken_agent",
            score: 1.0,
            fail: true,
        }]);
        let mut session = Session::new();

        let err = orch
            .route_query(&mut session, "sonda sonda", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Processing { ref agent, .. } if agent == "broken_agent"));
        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test]
    async fn test_secondary_failure_is_omitted() {
        let orch = stubs(vec![
            Stub {
                id: "good_agent",
                score: 1.0,
                fail: false,
            },
            Stub {
                id: "broken_agent",
                score: 0.9,
                fail: true,
            },
        ]);
        let mut session = Session::new();

        let routed = orch
            .route_query(&mut session, "sonda sonda", None)
            .await
            .unwrap();
        assert_eq!(routed.primary_agent, "good_agent");
        assert!(routed.collaborating_agents.is_empty());
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test]
    async fn test_equal_scores_keep_registration_order() {
        let orch = stubs(vec![
            Stub {
                id: "first_agent",
                score: 1.0,
                fail: false,
            },
            Stub {
                id: "second_agent",
                score: 1.0,
                fail: false,
            },
        ]);
        let mut session = Session::new();
        let routed = orch
            .route_query(&mut session, "sonda sonda", None)
            .await
            .unwrap();
        assert_eq!(routed.primary_agent, "first_agent");
        assert_eq!(routed.collaborating_agents[0].agent, "second_agent");
    }

    #[test]
    fn test_broadcast_skips_sender() {
        let orch = orchestrator();
        let mut session = Session::new();
        let mut update = Map::new();
        update.insert("tariff".to_string(), json!("bi-horária"));

        let replies = orch.route_message(&mut session, &Message::context_update("ev_agent", update));

        assert!(replies.is_empty());
        assert!(session.agent_memory("ev_agent").is_none());
        for peer in ["billing_agent", "solar_agent", "support_agent"] {
            assert_eq!(session.agent_memory(peer).unwrap()["tariff"], "bi-horária");
        }
    }

    #[test]
    fn test_direct_request_returns_reply() {
        let orch = orchestrator();
        let mut session = Session::new();
        let msg = Message::request(
            "billing_agent",
            "support_agent",
            crate::message::AgentRequest::GetTechnicianAvailability,
        );
        let replies = orch.route_message(&mut session, &msg);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].sender(), "support_agent");
    }

    #[test]
    fn test_unknown_recipient_is_dropped() {
        let orch = orchestrator();
        let mut session = Session::new();
        let msg = Message::notification("billing_agent", "ghost_agent", Map::new());
        assert!(orch.route_message(&mut session, &msg).is_empty());
    }

    #[test]
    fn test_query_agent_directly() {
        let orch = orchestrator();
        let mut session = Session::new();
        let response = orch
            .query_agent(&mut session, "solar_agent", "produção de hoje", None)
            .unwrap();
        assert!(response.data.contains_key("production"));
        assert!(matches!(
            orch.query_agent(&mut session, "ghost_agent", "olá", None),
            Err(AgentError::AgentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_clear_context() {
        let orch = orchestrator();
        let mut session = Session::new();
        orch.route_query(&mut session, "ver a minha fatura", None)
            .await
            .unwrap();
        assert!(!session.history().is_empty());

        orch.clear_context(&mut session);

        assert!(orch.conversation_history(&session).is_empty());
        assert!(session.shared.user_profile.is_empty());
        for id in orch.registry().ids() {
            assert!(session.agent_memory(id).is_none());
        }
    }
}
