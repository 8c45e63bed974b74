//! End-to-end flows through the engine façade: long-conversation
//! compaction, degraded retrieval, and idempotent consolidation.

use std::sync::Arc;

use chrono::{Duration, Utc};
use wake_core::ids::OwnerId;
use wake_core::llm::ScriptedLlm;
use wake_core::messages::Message;
use wake_embeddings::service::{FailingEmbedder, HashEmbedder};
use wake_engine::{Engine, MemoryCommand, TurnOutcome};
use wake_jobs::ConsolidationJob;
use wake_settings::{MemorySettings, WakeSettings};
use wake_store::{RecordKind, RecordQuery, RetrievalPath};

fn owner() -> OwnerId {
    OwnerId::from("owner-1")
}

fn small_budget_settings() -> WakeSettings {
    WakeSettings {
        memory: MemorySettings {
            max_hot_tokens: 340,
            compaction_margin_tokens: 220,
            preserve_tail_messages: 2,
            ..MemorySettings::default()
        },
        ..WakeSettings::default()
    }
}

/// Fifty short messages cross the budget mid-conversation: compaction
/// fires exactly once, produces one summary over the oldest span, and the
/// hot context from then on is that summary plus the verbatim tail.
#[tokio::test]
async fn long_conversation_compacts_exactly_once() {
    let engine = Engine::in_memory(
        &small_budget_settings(),
        Arc::new(ScriptedLlm::new().then_respond("early turns summary")),
        Arc::new(HashEmbedder::new(64)),
    )
    .unwrap();
    let conv = engine.create_conversation(&owner()).unwrap();

    for i in 0..25 {
        let ticket = engine
            .begin_turn(&conv.id, &Message::user(format!("short user message number {i}")))
            .await
            .unwrap();
        let outcome = engine
            .complete_turn(&ticket, &Message::agent(format!("short agent reply number {i}")))
            .await
            .unwrap();
        assert!(matches!(outcome, TurnOutcome::Appended { .. }));

        // The budget invariant holds at every point in the conversation.
        let rendered = engine.get_hot_context(&conv.id).unwrap();
        let tokens: u32 = rendered.iter().map(|m| m.token_count).sum();
        assert!(tokens <= 340, "hot context over budget after turn {i}: {tokens}");
    }

    let store = engine.store();
    let summaries = store.summaries(&conv.id).unwrap();
    assert_eq!(summaries.len(), 1, "compaction fired exactly once");
    assert_eq!(summaries[0].start_seq, 1);
    assert!(summaries[0].end_seq >= 20);
    assert_eq!(summaries[0].body, "early turns summary");

    // Partition: the summary's range plus the hot tail is the full history.
    let all = store.messages(&conv.id).unwrap();
    assert_eq!(all.len(), 50);
    let hot = store.hot_context(&conv.id).unwrap();
    assert_eq!(
        summaries[0].end_seq as usize + hot.tail.len(),
        all.len(),
        "no message lost or duplicated across tiers"
    );

    // The rendered hot context is the summary followed by the tail.
    let rendered = engine.get_hot_context(&conv.id).unwrap();
    assert!(rendered[0].content.contains("early turns summary"));
    assert_eq!(rendered.len(), 1 + hot.tail.len());
    assert_eq!(
        rendered.last().unwrap().content,
        "short agent reply number 24"
    );
}

/// The embedding provider is down: retrieval degrades to keyword matching
/// instead of failing, and turn assembly keeps working.
#[tokio::test]
async fn embedding_outage_degrades_retrieval() {
    let engine = Engine::in_memory(
        &WakeSettings::default(),
        Arc::new(ScriptedLlm::new()),
        Arc::new(FailingEmbedder::new(64)),
    )
    .unwrap();

    let outcome = engine
        .dispatch(MemoryCommand::AddObservation {
            owner_id: owner(),
            category: "hobby".to_owned(),
            content: "keeps a vegetable garden behind the house".to_owned(),
        })
        .await
        .unwrap();
    let _ = outcome;

    let results = engine
        .query_records(&RecordQuery::semantic(owner(), "vegetable garden", 5))
        .await
        .unwrap();
    assert_eq!(results.len(), 1, "degraded, not failed");
    assert_eq!(results[0].via, RetrievalPath::Keyword);

    // Assembly still succeeds with whatever retrieval returned.
    let conv = engine.create_conversation(&owner()).unwrap();
    let _ = engine
        .append_message(&conv.id, &Message::user("how is the garden?"))
        .await
        .unwrap();
    let blob = engine.assemble(&conv.id, "how is the garden?").await.unwrap();
    assert!(!blob.hot_messages.is_empty());
}

/// Two consolidation runs over the same window produce no duplicate
/// artifacts: the second run finds the committed boundary and is a no-op.
#[tokio::test]
async fn double_consolidation_produces_no_duplicates() {
    let engine = Engine::in_memory(
        &WakeSettings::default(),
        Arc::new(
            ScriptedLlm::new()
                .then_respond("weekly digest")
                .then_respond("weekly digest (should never be requested)"),
        ),
        Arc::new(HashEmbedder::new(64)),
    )
    .unwrap();

    let _ = engine
        .dispatch(MemoryCommand::AddObservation {
            owner_id: owner(),
            category: "week".to_owned(),
            content: "finished the fence, started the shed".to_owned(),
        })
        .await
        .unwrap();

    let job = ConsolidationJob::new(engine.store(), engine.summarizer(), 7);
    let end = Utc::now().date_naive() + Duration::days(1);

    let first = job.run_for_owner(&owner(), end).await;
    assert!(!first.already_committed);
    assert_eq!(first.journals_written, 1);

    let second = job.run_for_owner(&owner(), end).await;
    assert!(second.already_committed);
    assert_eq!(second.journals_written, 0);

    let journals = engine
        .query_records(&RecordQuery::recent(owner(), 10).with_kinds(vec![RecordKind::Journal]))
        .await
        .unwrap();
    assert_eq!(journals.len(), 1, "no duplicate journal entries");
    assert_eq!(journals[0].record.text, "weekly digest");
}

/// Retrieval never crosses owner boundaries, even when the other owner's
/// content is the better semantic match.
#[tokio::test]
async fn owner_isolation_end_to_end() {
    let engine = Engine::in_memory(
        &WakeSettings::default(),
        Arc::new(ScriptedLlm::new()),
        Arc::new(HashEmbedder::new(64)),
    )
    .unwrap();
    let other = OwnerId::from("owner-2");

    let _ = engine
        .dispatch(MemoryCommand::AddObservation {
            owner_id: other.clone(),
            category: "hobby".to_owned(),
            content: "vegetable garden with tomatoes and beans".to_owned(),
        })
        .await
        .unwrap();
    let _ = engine
        .dispatch(MemoryCommand::AddObservation {
            owner_id: owner(),
            category: "hobby".to_owned(),
            content: "collects vintage radios".to_owned(),
        })
        .await
        .unwrap();

    let results = engine
        .query_records(&RecordQuery::semantic(owner(), "vegetable garden tomatoes", 5))
        .await
        .unwrap();
    for hit in &results {
        assert_eq!(hit.record.owner_id, owner());
    }
}
