//! Per-turn orchestration of the conversation memory
//!
//! One sequential primary loop appends turns, builds requests and enforces
//! the budget. Compaction and topic decomposition run as fire-and-forget
//! tasks alongside it. Their results may land before, during or after the
//! next request is built; the id-addressed store update keeps late arrivals
//! harmless.

use super::anatomizer::Anatomizer;
use super::assembler::{ContextAssembler, Strategy};
use super::budget::{BudgetEnforcer, EvictionReport};
use super::compactor::Compactor;
use super::models::{ChatMessage, Role, TurnId};
use super::relevance::RelevanceSelector;
use super::store::{MessageStore, SharedStore};
use super::token_estimator::TokenEstimator;
use super::topics::{SharedTopicIndex, TopicIndex};
use crate::completion::CompletionService;
use crate::config::Config;
use crate::error::Result;
use crate::metrics::METRICS;
use futures::future::join_all;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What one completed turn did to the memory
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub user_turn: TurnId,
    pub assistant_turn: TurnId,
    pub response: String,
    pub eviction: EvictionReport,
    pub ledger_total: usize,
}

/// Owns the conversation's working memory and drives it turn by turn
pub struct ConversationManager {
    store: SharedStore,
    topics: SharedTopicIndex,
    service: Arc<dyn CompletionService>,
    enforcer: BudgetEnforcer,
    assembler: ContextAssembler,
    compactor: Compactor,
    anatomizer: Anatomizer,
    selector: RelevanceSelector,
    response_max_tokens: usize,
    background: Vec<JoinHandle<()>>,
}

impl ConversationManager {
    /// Create a manager for the configured strategy
    pub fn new(
        config: &Config,
        service: Arc<dyn CompletionService>,
        estimator: Arc<dyn TokenEstimator>,
    ) -> Result<Self> {
        config.validate()?;

        let store = MessageStore::shared(estimator.clone());
        let topics = TopicIndex::shared();

        let compactor = Compactor::new(
            service.clone(),
            estimator.clone(),
            store.clone(),
            config.compaction.clone(),
        );
        let anatomizer = Anatomizer::new(service.clone(), topics.clone(), config.topics.clone());
        let selector = RelevanceSelector::new(service.clone(), estimator, &config.topics);

        info!(
            "Conversation manager ready: strategy={:?}, budget={} tokens",
            config.strategy, config.budget.max_total
        );

        Ok(Self {
            store,
            topics,
            service,
            enforcer: BudgetEnforcer::from_config(&config.budget),
            assembler: ContextAssembler::new(config.strategy, config.topics.recent_turns),
            compactor,
            anatomizer,
            selector,
            response_max_tokens: config.completion.response_max_tokens,
            background: Vec::new(),
        })
    }

    pub fn strategy(&self) -> Strategy {
        self.assembler.strategy()
    }

    /// Append a turn and launch the strategy's background work for it
    pub async fn record_turn(&mut self, role: Role, content: impl Into<String>) -> Result<TurnId> {
        let content = content.into();

        let (id, token_count) = {
            let mut store = self.store.write().await;
            let id = store.append(role, content.clone())?;
            let token_count = store.get(id).map(|t| t.token_count).unwrap_or_default();
            METRICS.record_append(role.as_str(), store.total_tokens());
            (id, token_count)
        };

        self.background.retain(|handle| !handle.is_finished());

        let strategy = self.strategy();
        if strategy.compacts_turns() {
            self.background
                .push(self.compactor.spawn(id, token_count, content));
        } else if strategy.indexes_topics() {
            self.background
                .push(self.anatomizer.spawn(token_count, content));
        }

        Ok(id)
    }

    /// Build the outbound message list for a new query.
    ///
    /// A failed relevance lookup only costs the retrieved excerpts.
    pub async fn build_request(&self, query: &str) -> Vec<ChatMessage> {
        let excerpts = if self.strategy().indexes_topics() {
            self.retrieve_excerpts(query).await
        } else {
            Vec::new()
        };

        let store = self.store.read().await;
        self.assembler.assemble(&store, &excerpts)
    }

    async fn retrieve_excerpts(&self, query: &str) -> Vec<String> {
        let topic_names = self.topics.read().await.topic_names();

        match self.selector.select_relevant(query, &topic_names).await {
            Ok(selected) => {
                let excerpts = self.topics.read().await.gather(&selected);
                debug!(
                    "Retrieved {} excerpts from {} relevant topics",
                    excerpts.len(),
                    selected.len()
                );
                excerpts
            }
            Err(e) if e.is_contained() => {
                debug!("No usable topic selection, continuing without excerpts: {}", e);
                METRICS.record_relevance("skipped");
                Vec::new()
            }
            Err(e) => {
                warn!("Relevance lookup failed, continuing without excerpts: {}", e);
                METRICS.record_relevance("failed");
                Vec::new()
            }
        }
    }

    /// Evict the oldest turns until the store fits the budget
    pub async fn enforce_budget(&self) -> Result<EvictionReport> {
        let mut store = self.store.write().await;
        self.enforcer.enforce(&mut store)
    }

    /// Run one full exchange: store the user input, stream the response
    /// through `on_chunk`, store it, then enforce the budget.
    ///
    /// If the completion fails, the user turn is withdrawn again and the
    /// store is left as it was before the call. An oversized turn is not an
    /// error here; see [`Self::check_budget`].
    pub async fn run_turn(
        &mut self,
        input: &str,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<TurnReport> {
        let user_turn = self.record_turn(Role::User, input).await?;
        let messages = self.build_request(input).await;

        let response = match crate::time_operation!(
            METRICS.completion_duration,
            "primary",
            self.service
                .complete_stream(&messages, self.response_max_tokens, on_chunk)
                .await
        ) {
            Ok(response) => response,
            Err(e) => {
                self.discard_turn(user_turn).await;
                return Err(e);
            }
        };

        let assistant_turn = self.record_turn(Role::Assistant, response.clone()).await?;
        let eviction = self.enforce_budget().await?;
        let ledger_total = self.ledger_total().await;

        debug!(
            "Turn complete: {} turns live, {} tokens, {} evicted, {} background tasks pending",
            self.store.read().await.len(),
            ledger_total,
            eviction.evicted.len(),
            self.pending_background()
        );

        Ok(TurnReport {
            user_turn,
            assistant_turn,
            response,
            eviction,
            ledger_total,
        })
    }

    /// `BudgetTooSmall` when the turn left a single turn larger than the
    /// budget and the overflow policy is `fail`
    pub fn check_budget(&self, report: &TurnReport) -> Result<()> {
        self.enforcer.check(&report.eviction)
    }

    async fn discard_turn(&self, id: TurnId) {
        let mut store = self.store.write().await;
        if store.remove_by_id(id).is_some() {
            debug!("Withdrew turn {} after failed completion", id);
        }
        METRICS.ledger_total.set(store.total_tokens() as f64);
    }

    /// Wait for every outstanding background task to finish
    pub async fn settle(&mut self) {
        let handles: Vec<_> = self.background.drain(..).collect();
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!("Background task did not complete: {}", e);
            }
        }
    }

    /// Abort outstanding background tasks. Returns how many were still running.
    pub fn shutdown(&mut self) -> usize {
        let mut aborted = 0;
        for handle in self.background.drain(..) {
            if !handle.is_finished() {
                handle.abort();
                aborted += 1;
            }
        }
        if aborted > 0 {
            info!("Aborted {} background tasks", aborted);
        }
        aborted
    }

    pub fn pending_background(&self) -> usize {
        self.background.iter().filter(|h| !h.is_finished()).count()
    }

    pub async fn snapshot(&self) -> Vec<ChatMessage> {
        self.store.read().await.snapshot()
    }

    pub async fn ledger_total(&self) -> usize {
        self.store.read().await.total_tokens()
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn topics(&self) -> &SharedTopicIndex {
        &self.topics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ScriptedCompletion;
    use crate::context::budget::OverflowPolicy;
    use crate::context::token_estimator::WordBasedEstimator;
    use crate::error::ContextError;

    fn words(n: usize) -> String {
        vec!["w"; n].join(" ")
    }

    fn config(strategy: Strategy, max_total: usize) -> Config {
        let mut config = Config::default();
        config.strategy = strategy;
        config.budget.max_total = max_total;
        config
    }

    fn build(
        config: Config,
        service: ScriptedCompletion,
    ) -> (ConversationManager, Arc<ScriptedCompletion>) {
        let service = Arc::new(service);
        let manager = ConversationManager::new(
            &config,
            service.clone(),
            Arc::new(WordBasedEstimator::new(1.0)),
        )
        .unwrap();
        (manager, service)
    }

    #[tokio::test]
    async fn test_raw_window_scenario_evicts_user_turn() {
        let (mut manager, service) = build(
            config(Strategy::RawWindow, 100),
            ScriptedCompletion::with_responses([words(60)]),
        );

        let report = manager.run_turn(&words(60), &mut |_: &str| {}).await.unwrap();

        assert_eq!(report.eviction.evicted, vec![report.user_turn]);
        assert_eq!(report.ledger_total, 60);
        let snapshot = manager.snapshot().await;
        assert_eq!(snapshot, vec![ChatMessage::assistant(words(60))]);
        assert_eq!(service.call_count(), 1);
        assert_eq!(manager.pending_background(), 0);
    }

    #[tokio::test]
    async fn test_raw_window_request_is_full_history() {
        let (mut manager, service) = build(
            config(Strategy::RawWindow, 1000),
            ScriptedCompletion::from_fn(|_, _| Ok("ok".to_string())),
        );

        manager.run_turn("first question", &mut |_: &str| {}).await.unwrap();
        manager.run_turn("second question", &mut |_: &str| {}).await.unwrap();

        let last = service.calls().pop().unwrap();
        assert_eq!(
            last.messages,
            vec![
                ChatMessage::user("first question"),
                ChatMessage::assistant("ok"),
                ChatMessage::user("second question"),
            ]
        );
        assert_eq!(last.max_output_tokens, 300);
    }

    #[tokio::test]
    async fn test_streamed_chunks_reach_callback() {
        let (mut manager, _) = build(
            config(Strategy::RawWindow, 1000),
            ScriptedCompletion::with_responses(["streamed reply here"]),
        );

        let mut received = String::new();
        let report = manager
            .run_turn("hi", &mut |chunk: &str| received.push_str(chunk))
            .await
            .unwrap();
        assert_eq!(received, "streamed reply here");
        assert_eq!(report.response, received);
    }

    #[tokio::test]
    async fn test_completion_error_withdraws_user_turn() {
        let service = ScriptedCompletion::with_responses(["fine thanks"]);
        service.push_error("upstream down");
        let (mut manager, _) = build(config(Strategy::RawWindow, 1000), service);

        manager.run_turn("how are you", &mut |_: &str| {}).await.unwrap();
        let before = manager.snapshot().await;

        let result = manager.run_turn("hello there", &mut |_: &str| {}).await;
        assert!(matches!(result, Err(ContextError::Completion(_))));

        assert_eq!(manager.snapshot().await, before);
        assert_eq!(manager.ledger_total().await, 5);
    }

    #[tokio::test]
    async fn test_completion_error_leaves_store_within_budget() {
        let service = ScriptedCompletion::new();
        service.push_error("upstream down");
        let (mut manager, _) = build(config(Strategy::RawWindow, 10), service);

        let result = manager.run_turn(&words(50), &mut |_: &str| {}).await;
        assert!(result.is_err());
        assert!(manager.ledger_total().await <= 10);
        assert!(manager.store().read().await.is_empty());
    }

    #[tokio::test]
    async fn test_fail_policy_surfaces_budget_too_small() {
        let mut config = config(Strategy::RawWindow, 10);
        config.budget.overflow = OverflowPolicy::Fail;
        let (mut manager, _) = build(config, ScriptedCompletion::with_responses([words(20)]));

        let report = manager.run_turn("hi", &mut |_: &str| {}).await.unwrap();
        assert_eq!(report.response, words(20));
        assert_eq!(report.eviction.evicted, vec![report.user_turn]);
        assert!(report.eviction.overflow);
        assert_eq!(manager.store().read().await.len(), 1);

        assert!(matches!(
            manager.check_budget(&report),
            Err(ContextError::BudgetTooSmall {
                budget: 10,
                smallest: 20
            })
        ));
    }

    #[tokio::test]
    async fn test_summarized_window_compacts_in_background() {
        let (mut manager, service) = build(
            config(Strategy::SummarizedWindow, 1000),
            ScriptedCompletion::from_fn(|messages, _| {
                let prompt = &messages[0].content;
                if prompt.starts_with("Summarize") {
                    Ok("short".to_string())
                } else {
                    Ok("a fairly long assistant answer".to_string())
                }
            }),
        );

        manager
            .run_turn("please tell me a lot about rust ownership", &mut |_: &str| {})
            .await
            .unwrap();
        manager.settle().await;

        let snapshot = manager.snapshot().await;
        assert_eq!(
            snapshot,
            vec![ChatMessage::user("short"), ChatMessage::assistant("short")]
        );
        assert_eq!(manager.ledger_total().await, 2);
        assert_eq!(service.call_count(), 3);
    }

    #[tokio::test]
    async fn test_raw_window_launches_no_background_work() {
        let (mut manager, service) = build(
            config(Strategy::RawWindow, 1000),
            ScriptedCompletion::with_responses(["answer"]),
        );
        manager.record_turn(Role::User, "hello").await.unwrap();
        manager.settle().await;
        assert_eq!(service.call_count(), 0);
    }

    #[tokio::test]
    async fn test_retrieval_without_topics_skips_relevance_call() {
        let (mut manager, service) = build(
            config(Strategy::RetrievalAugmented, 1000),
            ScriptedCompletion::from_fn(|messages, _| {
                if messages[0].content.starts_with("Go through") {
                    Ok("{}".to_string())
                } else {
                    Ok("answer".to_string())
                }
            }),
        );

        manager.record_turn(Role::User, "hello").await.unwrap();
        manager.settle().await;
        let request = manager.build_request("hello").await;

        assert_eq!(request.len(), 2);
        assert_eq!(request[0].role, Role::System);
        assert!(service
            .calls()
            .iter()
            .all(|c| !c.prompt().starts_with("Which of the following topics")));
    }

    #[tokio::test]
    async fn test_relevance_failure_is_contained() {
        let (mut manager, _) = build(
            config(Strategy::RetrievalAugmented, 1000),
            ScriptedCompletion::from_fn(|messages, _| {
                let prompt = &messages[0].content;
                if prompt.starts_with("Go through") {
                    Ok(r#"{"billing": ["card declined"]}"#.to_string())
                } else if prompt.starts_with("Which of the following topics") {
                    Err(ContextError::Completion("relevance down".to_string()))
                } else {
                    Ok("answer".to_string())
                }
            }),
        );

        manager.record_turn(Role::User, "my card was declined").await.unwrap();
        manager.settle().await;

        let report = manager.run_turn("any update?", &mut |_: &str| {}).await.unwrap();
        assert_eq!(report.response, "answer");
    }

    #[tokio::test]
    async fn test_shutdown_aborts_pending_tasks() {
        let (mut manager, _) = build(
            config(Strategy::SummarizedWindow, 1000),
            ScriptedCompletion::new(),
        );
        manager.record_turn(Role::User, "one two three").await.unwrap();
        manager.shutdown();
        assert_eq!(manager.pending_background(), 0);
        assert_eq!(manager.store().read().await.len(), 1);
    }
}
