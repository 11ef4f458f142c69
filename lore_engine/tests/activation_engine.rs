use async_trait::async_trait;
use std::sync::Arc;

use lore_engine::{
    ActivationContext, ActivationEngine, ActivationResult, BudgetConfig, EmbeddingService,
    EngineConfig, FixedProbability, InMemoryKnowledgeStore, InMemoryVectorIndex, LogMode,
    PromptBuilder, RetrievalError, ACTIVATION_FAILED,
};
use lorebook::{
    ActivationMethod, ActivationMode, BotId, ChatMessage, ConversationId, EntryId,
    InsertionPosition, KnowledgeEntry, SelectiveLogic, UserId,
};

const ENTRIES: &str = "knowledge";
const LOGS: &str = "knowledge_activation_logs";

struct UnitEmbeddings;

#[async_trait]
impl EmbeddingService for UnitEmbeddings {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, RetrievalError> {
        Ok(vec![1.0, 0.0])
    }
}

struct FailingEmbeddings;

#[async_trait]
impl EmbeddingService for FailingEmbeddings {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, RetrievalError> {
        Err(RetrievalError::Embedding("service down".into()))
    }
}

struct Harness {
    store: Arc<InMemoryKnowledgeStore>,
    index: Arc<InMemoryVectorIndex>,
    config: EngineConfig,
}

impl Harness {
    fn new() -> Self {
        let mut config = EngineConfig::default();
        config.logging.mode = LogMode::Inline;
        Self {
            store: Arc::new(InMemoryKnowledgeStore::new()),
            index: Arc::new(InMemoryVectorIndex::new(2)),
            config,
        }
    }

    fn add(&self, entry: KnowledgeEntry) {
        self.store.insert_entry(ENTRIES, &entry).unwrap();
    }

    /// Index one chunk of an entry at the given cosine similarity to the
    /// query vector.
    fn index_chunk(&self, entry: &str, chunk: usize, similarity: f32) {
        let orthogonal = (1.0 - similarity * similarity).max(0.0).sqrt();
        self.index
            .upsert(
                UserId::from("u1"),
                EntryId::from(entry),
                chunk,
                format!("{entry} chunk {chunk}"),
                vec![similarity, orthogonal],
            )
            .unwrap();
    }

    fn engine(&self, roll: f64) -> ActivationEngine {
        ActivationEngine::new(self.store.clone(), self.config.clone())
            .with_vector_services(Arc::new(UnitEmbeddings), self.index.clone())
            .with_probability(Arc::new(FixedProbability(roll)))
    }
}

fn user() -> UserId {
    UserId::from("u1")
}

fn entry(id: &str, content: &str) -> KnowledgeEntry {
    KnowledgeEntry::new(user(), content).with_id(id)
}

fn keyword_entry(id: &str, keyword: &str) -> KnowledgeEntry {
    entry(id, &format!("Lore about {keyword}.")).with_primary_keywords([keyword])
}

fn vector_entry(id: &str, mode: ActivationMode) -> KnowledgeEntry {
    let mut entry = entry(id, &format!("Vector lore {id}.")).with_mode(mode);
    entry.activation_settings.similarity_threshold = 0.05;
    entry
}

fn turn(index: u32, text: &str) -> ActivationContext {
    ActivationContext::new(
        user(),
        ConversationId::from("c1"),
        vec![ChatMessage::user(text)],
        index,
    )
}

fn included_ids(result: &ActivationResult) -> Vec<&str> {
    result
        .activated_entries
        .iter()
        .map(|a| a.id().as_str())
        .collect()
}

#[tokio::test]
async fn test_sword_and_shield_and_all() {
    let harness = Harness::new();
    harness.add(
        entry("arms", "The armory.")
            .with_primary_keywords(["sword", "shield"])
            .with_logic(SelectiveLogic::AndAll),
    );
    let engine = harness.engine(0.0);

    let result = engine.activate(&turn(1, "I draw my sword")).await.unwrap();
    assert!(result.is_empty());

    let result = engine
        .activate(&turn(2, "I draw my sword and raise my shield"))
        .await
        .unwrap();
    let hit = result.get(&EntryId::from("arms")).unwrap();
    assert!((hit.activation_score - 4.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_cooldown_suppression() {
    let harness = Harness::new();
    harness.add(keyword_entry("storm", "storm").with_timing(0, 3, 0));
    let engine = harness.engine(0.0);

    let result = engine.activate(&turn(5, "a storm rolls in")).await.unwrap();
    assert_eq!(included_ids(&result), vec!["storm"]);

    for index in [6, 7] {
        let result = engine.activate(&turn(index, "the storm rages")).await.unwrap();
        assert!(result.is_empty(), "turn {index}");
        assert_eq!(result.summary.entries_excluded_by_cooldown, 1);
    }

    let result = engine.activate(&turn(8, "another storm")).await.unwrap();
    assert_eq!(included_ids(&result), vec!["storm"]);
}

#[tokio::test]
async fn test_sticky_override_without_match() {
    let harness = Harness::new();
    harness.add(keyword_entry("ghost", "ghost").with_timing(2, 0, 0));
    let engine = harness.engine(0.0);

    let result = engine.activate(&turn(1, "a ghost appears")).await.unwrap();
    let first = result.get(&EntryId::from("ghost")).unwrap();
    assert_eq!(first.method, ActivationMethod::Keyword);

    for index in [2, 3] {
        let result = engine.activate(&turn(index, "nothing here")).await.unwrap();
        let carried = result.get(&EntryId::from("ghost")).expect("sticky entry");
        assert_eq!(carried.method, ActivationMethod::Sticky);
        assert!(carried.sticky_forced);
    }

    let result = engine.activate(&turn(4, "nothing here")).await.unwrap();
    assert!(result.is_empty());
}

#[tokio::test]
async fn test_sticky_overrides_filter() {
    let harness = Harness::new();
    let mut gated = keyword_entry("gated", "relic").with_timing(3, 0, 0);
    gated.filtering.bots.enabled = true;
    gated.filtering.bots.deny = vec![BotId::from("skeptic")];
    harness.add(gated);
    let engine = harness.engine(0.0);

    engine.activate(&turn(1, "the relic glows")).await.unwrap();
    let result = engine
        .activate(&turn(2, "the relic glows").with_bot(BotId::from("skeptic")))
        .await
        .unwrap();
    assert!(result.get(&EntryId::from("gated")).unwrap().sticky_forced);
}

#[tokio::test]
async fn test_sticky_rescue_after_match_refreshes_windows() {
    let harness = Harness::new();
    harness.add(keyword_entry("dragon", "dragon").with_timing(3, 2, 0));
    let engine = harness.engine(0.0);
    let conversation = ConversationId::from("c1");

    engine.activate(&turn(5, "a dragon lands")).await.unwrap();
    let state = engine.conversation_state(&conversation).await.unwrap().unwrap();
    let dragon = state.entry(&EntryId::from("dragon")).unwrap();
    assert_eq!(dragon.sticky_until, Some(8));
    assert_eq!(dragon.cooldown_until, Some(7));

    let result = engine.activate(&turn(6, "the dragon roars")).await.unwrap();
    let rescued = result.get(&EntryId::from("dragon")).unwrap();
    assert!(rescued.sticky_forced);
    assert_eq!(rescued.method, ActivationMethod::Keyword);

    let state = engine.conversation_state(&conversation).await.unwrap().unwrap();
    let dragon = state.entry(&EntryId::from("dragon")).unwrap();
    assert_eq!(dragon.last_activated_at, 6);
    assert_eq!(dragon.sticky_until, Some(9));
    assert_eq!(dragon.cooldown_until, Some(8));
}

#[tokio::test]
async fn test_engine_context_uses_configured_budget() {
    let mut harness = Harness::new();
    harness.config.budget.defaults = BudgetConfig {
        budget_percentage: 100,
        budget_cap_tokens: 100_000,
        ..BudgetConfig::default()
    };
    harness.add(entry("world", "The world.").with_mode(ActivationMode::Constant));
    let engine = harness.engine(0.0);

    let context = engine.context(
        user(),
        ConversationId::from("c1"),
        vec![ChatMessage::user("hello")],
        1,
    );
    let result = engine.activate(&context).await.unwrap();
    assert_eq!(result.summary.total_budget, 8192);

    let result = engine.activate(&turn(2, "hello")).await.unwrap();
    assert_eq!(result.summary.total_budget, BudgetConfig::default().knowledge_budget());
}

#[tokio::test]
async fn test_budget_exceeded_ordering() {
    let harness = Harness::new();
    harness.add(vector_entry("high", ActivationMode::Vector).with_token_cost(500));
    harness.add(vector_entry("low", ActivationMode::Vector).with_token_cost(500));
    harness.index_chunk("high", 0, 0.9);
    harness.index_chunk("low", 0, 0.1);
    let engine = harness.engine(0.0);

    let budget = BudgetConfig {
        max_context_tokens: 2400,
        budget_percentage: 25,
        budget_cap_tokens: 2048,
        reserved_for_conversation: 0,
        min_activations: 1,
    };
    let result = engine
        .activate(&turn(1, "what is out there").with_budget(budget))
        .await
        .unwrap();

    assert_eq!(included_ids(&result), vec!["high"]);
    assert!((result.activated_entries[0].activation_score - 90.0).abs() < 1e-3);
    assert_eq!(result.summary.total_budget, 600);
    assert_eq!(result.summary.total_tokens, 500);
    assert_eq!(result.summary.budget_remaining, 100);
    assert_eq!(result.summary.entries_excluded_by_budget, 1);
}

#[tokio::test]
async fn test_min_activations_floor_exceeds_budget() {
    let harness = Harness::new();
    for id in ["a", "b", "c"] {
        harness.add(
            entry(id, "always")
                .with_mode(ActivationMode::Constant)
                .with_token_cost(400),
        );
    }
    let engine = harness.engine(0.0);

    let budget = BudgetConfig {
        max_context_tokens: 1000,
        budget_percentage: 10,
        budget_cap_tokens: 2048,
        reserved_for_conversation: 0,
        min_activations: 2,
    };
    let result = engine
        .activate(&turn(1, "hi").with_budget(budget))
        .await
        .unwrap();

    assert_eq!(result.activated_entries.len(), 2);
    assert_eq!(result.summary.total_tokens, 800);
    assert_eq!(result.summary.budget_remaining, 0);
    assert_eq!(result.summary.entries_excluded_by_budget, 1);
}

#[tokio::test]
async fn test_ignore_budget_always_included() {
    let harness = Harness::new();
    harness.add(
        entry("core", "Core rules.")
            .with_mode(ActivationMode::Constant)
            .with_token_cost(5000)
            .ignoring_budget(),
    );
    let engine = harness.engine(0.0);

    let result = engine.activate(&turn(1, "hi")).await.unwrap();
    assert_eq!(included_ids(&result), vec!["core"]);
    assert_eq!(result.summary.total_tokens, 5000);
    assert_eq!(result.summary.budget_remaining, result.summary.total_budget);
}

#[tokio::test]
async fn test_constant_scores_100_without_messages() {
    let harness = Harness::new();
    harness.add(entry("world", "The world is flat.").with_mode(ActivationMode::Constant));
    let engine = harness.engine(0.0);

    let context = ActivationContext::new(user(), ConversationId::from("c1"), Vec::new(), 0);
    let result = engine.activate(&context).await.unwrap();
    let hit = result.get(&EntryId::from("world")).unwrap();
    assert_eq!(hit.method, ActivationMethod::Constant);
    assert!((hit.activation_score - 100.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_hybrid_merge_score() {
    let harness = Harness::new();
    harness.add(
        vector_entry("castle", ActivationMode::Hybrid)
            .with_primary_keywords(["castle"])
            .with_order(3),
    );
    harness.index_chunk("castle", 0, 0.8);
    let engine = harness.engine(0.0);

    let result = engine.activate(&turn(1, "the castle gate")).await.unwrap();
    let hit = result.get(&EntryId::from("castle")).unwrap();
    assert_eq!(hit.method, ActivationMethod::Keyword);
    assert_eq!(hit.order, 3);
    let similarity = hit.vector_similarity.unwrap();
    assert!((similarity - 0.8).abs() < 1e-4);
    assert!((hit.activation_score - (2.0 + 0.5 * similarity * 100.0)).abs() < 1e-9);
}

#[tokio::test]
async fn test_vector_chunks_collapse_and_respect_entry_threshold() {
    let harness = Harness::new();
    harness.add(vector_entry("multi", ActivationMode::Vector));
    let mut strict = vector_entry("strict", ActivationMode::Vector);
    strict.activation_settings.similarity_threshold = 0.95;
    harness.add(strict);
    harness.index_chunk("multi", 0, 0.6);
    harness.index_chunk("multi", 1, 0.9);
    harness.index_chunk("strict", 0, 0.8);
    let engine = harness.engine(0.0);

    let result = engine.activate(&turn(1, "tell me")).await.unwrap();
    assert_eq!(included_ids(&result), vec!["multi"]);
    let similarity = result.activated_entries[0].vector_similarity.unwrap();
    assert!((similarity - 0.9).abs() < 1e-4);
}

#[tokio::test]
async fn test_vector_failure_degrades_to_keyword_only() {
    let harness = Harness::new();
    harness.add(keyword_entry("kw", "lantern"));
    harness.add(vector_entry("vec", ActivationMode::Vector));
    harness.index_chunk("vec", 0, 0.9);
    let engine = ActivationEngine::new(harness.store.clone(), harness.config.clone())
        .with_vector_services(Arc::new(FailingEmbeddings), harness.index.clone())
        .with_probability(Arc::new(FixedProbability(0.0)));

    let result = engine.activate(&turn(1, "light the lantern")).await.unwrap();
    assert_eq!(included_ids(&result), vec!["kw"]);
}

#[tokio::test]
async fn test_filter_exclusion() {
    let harness = Harness::new();
    let mut gated = keyword_entry("gated", "moon");
    gated.filtering.bots.enabled = true;
    gated.filtering.bots.allow = vec![BotId::from("luna")];
    harness.add(gated);
    let engine = harness.engine(0.0);

    let result = engine
        .activate(&turn(1, "the moon").with_bot(BotId::from("sol")))
        .await
        .unwrap();
    assert!(result.is_empty());
    assert_eq!(result.summary.entries_excluded_by_filter, 1);

    let result = engine
        .activate(&turn(2, "the moon").with_bot(BotId::from("luna")))
        .await
        .unwrap();
    assert_eq!(included_ids(&result), vec!["gated"]);
}

#[tokio::test]
async fn test_delay() {
    let harness = Harness::new();
    harness.add(keyword_entry("late", "secret").with_timing(0, 0, 3));
    let engine = harness.engine(0.0);

    let result = engine.activate(&turn(2, "the secret")).await.unwrap();
    assert!(result.is_empty());
    assert_eq!(result.summary.entries_excluded_by_delay, 1);

    let result = engine.activate(&turn(3, "the secret")).await.unwrap();
    assert_eq!(included_ids(&result), vec!["late"]);
}

#[tokio::test]
async fn test_group_exclusivity() {
    let harness = Harness::new();
    for (id, weight) in [("sun", 1.0), ("rain", 2.0), ("snow", 1.0)] {
        harness.add(
            entry(id, id)
                .with_mode(ActivationMode::Constant)
                .in_group("weather", weight),
        );
    }
    let engine = harness.engine(0.0);

    let result = engine.activate(&turn(1, "hi")).await.unwrap();
    assert_eq!(included_ids(&result), vec!["rain"]);
    assert_eq!(result.summary.entries_excluded_by_group_scoring, 2);
}

#[tokio::test]
async fn test_probability_with_fixed_roll() {
    let harness = Harness::new();
    harness.add(keyword_entry("maybe", "coin").with_probability(30));

    let result = harness.engine(50.0).activate(&turn(1, "flip a coin")).await.unwrap();
    assert!(result.is_empty());
    assert_eq!(result.summary.entries_excluded_by_probability, 1);

    let result = harness.engine(10.0).activate(&turn(2, "flip a coin")).await.unwrap();
    assert_eq!(included_ids(&result), vec!["maybe"]);
}

#[tokio::test]
async fn test_fetch_failure_is_activation_failed() {
    let harness = Harness::new();
    harness.add(entry("world", "x").with_mode(ActivationMode::Constant));
    harness.store.set_fail_reads(true);
    let engine = harness.engine(0.0);

    let err = engine.activate(&turn(1, "hi")).await.unwrap_err();
    assert_eq!(err.code(), ACTIVATION_FAILED);

    let result = engine.activate_or_empty(&turn(1, "hi")).await;
    assert!(result.is_empty());
    assert_eq!(result.summary.total_budget, BudgetConfig::default().knowledge_budget());
}

#[tokio::test]
async fn test_logs_written_inline() {
    let harness = Harness::new();
    harness.add(keyword_entry("hit", "tower"));
    harness.add(keyword_entry("late", "tower").with_timing(0, 0, 10));
    let engine = harness.engine(0.0);

    engine.activate(&turn(4, "the tower")).await.unwrap();

    let rows = harness.store.documents(LOGS);
    assert_eq!(rows.len(), 2);
    let late = rows.iter().find(|r| r["entry_id"] == "late").unwrap();
    assert_eq!(late["included"], false);
    assert_eq!(late["exclusion_reason"], "delay_not_met");
    assert_eq!(late["message_index"], 4);
    let hit = rows.iter().find(|r| r["entry_id"] == "hit").unwrap();
    assert_eq!(hit["included"], true);
    assert_eq!(hit["matched_keywords"][0], "tower");
    assert_eq!(hit["position"], "after_character");
}

#[tokio::test]
async fn test_background_logs_eventually_written() {
    let mut harness = Harness::new();
    harness.config.logging.mode = LogMode::Background;
    harness.add(keyword_entry("hit", "tower"));
    let engine = harness.engine(0.0);

    engine.activate(&turn(1, "the tower")).await.unwrap();
    for _ in 0..50 {
        if harness.store.count(LOGS) > 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(harness.store.count(LOGS), 1);
}

#[tokio::test]
async fn test_log_failures_swallowed() {
    let harness = Harness::new();
    harness.add(keyword_entry("hit", "tower"));
    harness.store.set_fail_writes(true);
    let engine = harness.engine(0.0);

    let result = engine.activate(&turn(1, "the tower")).await.unwrap();
    assert_eq!(included_ids(&result), vec!["hit"]);
    assert_eq!(harness.store.count(LOGS), 0);
}

#[tokio::test]
async fn test_conversations_do_not_share_state() {
    let harness = Harness::new();
    harness.add(keyword_entry("storm", "storm").with_timing(0, 5, 0));
    let engine = harness.engine(0.0);

    engine.activate(&turn(1, "storm")).await.unwrap();

    let other = ActivationContext::new(
        user(),
        ConversationId::from("c2"),
        vec![ChatMessage::user("storm")],
        2,
    );
    let result = engine.activate(&other).await.unwrap();
    assert_eq!(included_ids(&result), vec!["storm"]);
}

#[tokio::test]
async fn test_result_feeds_prompt_builder() {
    let harness = Harness::new();
    harness.add(
        keyword_entry("map", "map")
            .with_tag("Geography")
            .with_position(InsertionPosition::SystemTop),
    );
    let mut depth = keyword_entry("whisper", "map").with_position(InsertionPosition::AtDepth);
    depth.positioning.depth = 1;
    harness.add(depth);
    let engine = harness.engine(0.0);

    let context = ActivationContext::new(
        user(),
        ConversationId::from("c1"),
        vec![ChatMessage::assistant("Welcome."), ChatMessage::user("Show me the map")],
        1,
    );
    let result = engine.activate(&context).await.unwrap();

    let prompt =
        PromptBuilder::new().build_prompt("You are a guide.", &result.activated_entries, None, None);
    assert_eq!(prompt, "[Geography] Lore about map.\n\nYou are a guide.");

    let messages = PromptBuilder::build_messages_with_depth_entries(
        &context.messages,
        &result.activated_entries,
    );
    let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["Welcome.", "Lore about map.", "Show me the map"]);
}

#[tokio::test]
async fn test_exclusion_counts_reflect_processed_entries() {
    let harness = Harness::new();
    harness.add(keyword_entry("a", "bell"));
    harness.add(keyword_entry("b", "bell").with_timing(0, 0, 9));
    harness.add(keyword_entry("quiet", "silence"));
    let engine = harness.engine(0.0);

    let result = engine.activate(&turn(1, "the bell tolls")).await.unwrap();
    assert_eq!(included_ids(&result), vec!["a"]);
    assert_eq!(result.summary.total_excluded(), 1);
    assert!(result
        .activated_entries
        .iter()
        .all(|a| a.exclusion_reason.is_none() && a.included));
    assert_eq!(result.summary.entries_excluded_by_delay, 1);
}
