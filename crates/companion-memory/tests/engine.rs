//! Integration tests for the memory engine.
//!
//! The router is wired to in-process adapters so summarization outcomes are
//! fully scripted.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use companion_memory::{
    ConversationBuffer, ConversationTurn, MemoryEngine, MemoryError, MemoryPolicy, MemoryStore,
    SizeUnit, SummarizeFailure, Summarizer, SummaryOutcome, SummaryPrompt,
};
use companion_router::{
    BackoffPolicy, CallErrorKind, ChatAdapter, ChatPayload, ChatReply, ProviderCallError,
    ProviderProfile, ProviderRegistry, ProviderRole, RequestRouter, RouterConfig, RouterContext,
};
use tokio::sync::Notify;

// ═══════════════════════════════════════════════════════════════════════
//  Fake adapters
// ═══════════════════════════════════════════════════════════════════════

/// Always answers with a fixed memory entry.
struct Answering {
    text: &'static str,
    calls: AtomicUsize,
}

#[async_trait]
impl ChatAdapter for Answering {
    async fn call(
        &self,
        _profile: &ProviderProfile,
        _payload: &ChatPayload,
        _timeout: Duration,
    ) -> Result<ChatReply, ProviderCallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ChatReply::new(self.text))
    }
}

/// Always fails with the given kind.
struct Failing(CallErrorKind);

#[async_trait]
impl ChatAdapter for Failing {
    async fn call(
        &self,
        _profile: &ProviderProfile,
        _payload: &ChatPayload,
        _timeout: Duration,
    ) -> Result<ChatReply, ProviderCallError> {
        Err(ProviderCallError::new(self.0, "scripted failure"))
    }
}

/// Signals when a call starts, then waits to be released.
struct Gated {
    started: Notify,
    release: Notify,
}

#[async_trait]
impl ChatAdapter for Gated {
    async fn call(
        &self,
        _profile: &ProviderProfile,
        _payload: &ChatPayload,
        _timeout: Duration,
    ) -> Result<ChatReply, ProviderCallError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(ChatReply::new("**Importance**: 2\n**Summary**: A gated summary."))
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Helpers
// ═══════════════════════════════════════════════════════════════════════

fn memory_router(adapter: Arc<dyn ChatAdapter>) -> Arc<RequestRouter> {
    let registry = ProviderRegistry::new(
        ["m1", "m2", "m3"]
            .iter()
            .enumerate()
            .map(|(i, id)| {
                ProviderProfile::new(*id, ProviderRole::Memory, i as i32 + 1, "http://fake", "m")
                    .with_timeout(Duration::from_secs(30))
            }),
    )
    .unwrap();
    let context = Arc::new(RouterContext::new(registry, BackoffPolicy::default()));
    Arc::new(RequestRouter::new(context, adapter, RouterConfig::default()))
}

struct Fixture {
    _dir: tempfile::TempDir,
    engine: MemoryEngine,
}

fn fixture(adapter: Arc<dyn ChatAdapter>, policy: MemoryPolicy) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let buffer = Arc::new(
        ConversationBuffer::open(dir.path().join("chat_today.log"), SizeUnit::Turns).unwrap(),
    );
    let store = Arc::new(MemoryStore::open(dir.path().join("memory.md"), 3).unwrap());
    let summarizer = Summarizer::new(memory_router(adapter), SummaryPrompt::default());
    Fixture {
        _dir: dir,
        engine: MemoryEngine::new(buffer, store, summarizer, policy),
    }
}

async fn fill(engine: &MemoryEngine, n: usize) {
    for i in 0..n {
        let turn = if i % 2 == 0 {
            ConversationTurn::user(format!("user message {i}"))
        } else {
            ConversationTurn::bot(format!("bot reply {i}"))
        };
        engine.record_turn(turn).await.unwrap();
    }
}

const ENTRY: &str = "## Memory Entry [2026-10-18 Sunday 21:00]\n**Importance**: 4\n**Summary**: We talked about the weekend.";

// ═══════════════════════════════════════════════════════════════════════
//  Threshold cycles
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn reaching_threshold_stores_entry_and_clears_buffer() {
    let adapter = Arc::new(Answering {
        text: ENTRY,
        calls: AtomicUsize::new(0),
    });
    let f = fixture(
        adapter.clone(),
        MemoryPolicy {
            threshold: 6,
            window: None,
        },
    );

    fill(&f.engine, 5).await;
    assert_eq!(
        f.engine.maybe_summarize().await.unwrap(),
        SummaryOutcome::NotNeeded
    );
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);

    fill(&f.engine, 1).await;
    let outcome = f.engine.maybe_summarize().await.unwrap();
    match outcome {
        SummaryOutcome::Stored {
            entry,
            summarized_turns,
            remaining_turns,
        } => {
            assert_eq!(summarized_turns, 6);
            assert_eq!(remaining_turns, 0);
            assert_eq!(entry.importance, 4);
            assert_eq!(entry.summary, "We talked about the weekend.");
        }
        other => panic!("expected a stored entry, got {other:?}"),
    }

    assert_eq!(f.engine.buffer().size().await, 0);
    assert_eq!(f.engine.store().count().unwrap(), 1);
    let log = std::fs::read_to_string(f.engine.buffer().log_path().unwrap()).unwrap();
    assert!(log.is_empty());
}

#[tokio::test]
async fn router_failure_keeps_buffer_and_adds_nothing() {
    let f = fixture(
        Arc::new(Failing(CallErrorKind::RateLimited)),
        MemoryPolicy {
            threshold: 4,
            window: None,
        },
    );
    fill(&f.engine, 4).await;

    let err = f.engine.maybe_summarize().await.unwrap_err();
    match &err {
        MemoryError::Summarize(SummarizeFailure::Router(router_err)) => {
            assert_eq!(router_err.attempts().len(), 3);
        }
        other => panic!("expected a summarize failure, got {other:?}"),
    }

    assert_eq!(f.engine.buffer().size().await, 4);
    assert_eq!(f.engine.store().count().unwrap(), 0);

    // Every memory provider is cooling down now; the next cycle fails fast
    // and still keeps the buffer.
    assert!(f.engine.summarize_now().await.unwrap_err().is_summarize_failure());
    assert_eq!(f.engine.buffer().size().await, 4);
}

#[tokio::test]
async fn empty_summary_is_a_failure() {
    let f = fixture(
        Arc::new(Answering {
            text: "**Importance**: 5\n**Summary**:",
            calls: AtomicUsize::new(0),
        }),
        MemoryPolicy::default(),
    );
    fill(&f.engine, 3).await;

    let err = f.engine.summarize_now().await.unwrap_err();
    assert!(matches!(
        err,
        MemoryError::Summarize(SummarizeFailure::EmptySummary)
    ));
    assert_eq!(f.engine.buffer().len().await, 3);
}

#[tokio::test]
async fn missing_importance_defaults() {
    let f = fixture(
        Arc::new(Answering {
            text: "Nothing structured, just a sentence about tea.",
            calls: AtomicUsize::new(0),
        }),
        MemoryPolicy::default(),
    );
    fill(&f.engine, 2).await;

    let SummaryOutcome::Stored { entry, .. } = f.engine.summarize_now().await.unwrap() else {
        panic!("expected a stored entry");
    };
    assert_eq!(entry.importance, 3);
    assert_eq!(entry.summary, "Nothing structured, just a sentence about tea.");
}

#[tokio::test]
async fn empty_buffer_is_not_summarized() {
    let adapter = Arc::new(Answering {
        text: ENTRY,
        calls: AtomicUsize::new(0),
    });
    let f = fixture(adapter.clone(), MemoryPolicy::default());
    assert_eq!(f.engine.summarize_now().await.unwrap(), SummaryOutcome::Empty);
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn blank_turns_are_rejected() {
    let f = fixture(
        Arc::new(Failing(CallErrorKind::ServerError)),
        MemoryPolicy::default(),
    );
    let err = f
        .engine
        .record_turn(ConversationTurn::user("   "))
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::InvalidTurn(_)));
    assert!(f.engine.buffer().is_empty().await);
}

// ═══════════════════════════════════════════════════════════════════════
//  Sliding window
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn sliding_window_summarizes_oldest_turns_only() {
    let f = fixture(
        Arc::new(Answering {
            text: ENTRY,
            calls: AtomicUsize::new(0),
        }),
        MemoryPolicy {
            threshold: 10,
            window: Some(4),
        },
    );
    fill(&f.engine, 10).await;

    let SummaryOutcome::Stored {
        summarized_turns,
        remaining_turns,
        ..
    } = f.engine.maybe_summarize().await.unwrap()
    else {
        panic!("expected a stored entry");
    };
    assert_eq!(summarized_turns, 4);
    assert_eq!(remaining_turns, 6);

    let remaining = f.engine.buffer().recent(100).await;
    assert_eq!(remaining[0].text, "user message 4");

    // The daily log holds the same six turns.
    let log = std::fs::read_to_string(f.engine.buffer().log_path().unwrap()).unwrap();
    assert_eq!(log.lines().count(), 6);
}

#[tokio::test]
async fn summarize_all_empties_a_windowed_buffer() {
    let adapter = Arc::new(Answering {
        text: ENTRY,
        calls: AtomicUsize::new(0),
    });
    let f = fixture(
        adapter.clone(),
        MemoryPolicy {
            threshold: 100,
            window: Some(4),
        },
    );
    fill(&f.engine, 10).await;

    assert_eq!(f.engine.summarize_all().await.unwrap(), 3);
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 3);
    assert!(f.engine.buffer().is_empty().await);
    assert_eq!(f.engine.store().count().unwrap(), 3);
    let log = std::fs::read_to_string(f.engine.buffer().log_path().unwrap()).unwrap();
    assert!(log.is_empty());

    assert_eq!(f.engine.summarize_all().await.unwrap(), 0);
}

#[tokio::test]
async fn summarize_all_stops_at_failure_and_keeps_turns() {
    let f = fixture(
        Arc::new(Failing(CallErrorKind::ServerError)),
        MemoryPolicy {
            threshold: 100,
            window: Some(4),
        },
    );
    fill(&f.engine, 10).await;

    assert!(f.engine.summarize_all().await.unwrap_err().is_summarize_failure());
    assert_eq!(f.engine.buffer().len().await, 10);
    assert_eq!(f.engine.store().count().unwrap(), 0);
}

// ═══════════════════════════════════════════════════════════════════════
//  Concurrency
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn appends_during_summarization_are_kept() {
    let gate = Arc::new(Gated {
        started: Notify::new(),
        release: Notify::new(),
    });
    let f = Arc::new(fixture(
        gate.clone(),
        MemoryPolicy {
            threshold: 3,
            window: None,
        },
    ));
    fill(&f.engine, 3).await;

    let cycle = {
        let f = Arc::clone(&f);
        tokio::spawn(async move { f.engine.summarize_now().await })
    };

    gate.started.notified().await;
    f.engine
        .record_turn(ConversationTurn::user("said while summarizing"))
        .await
        .unwrap();
    gate.release.notify_one();

    let outcome = cycle.await.unwrap().unwrap();
    assert!(matches!(
        outcome,
        SummaryOutcome::Stored {
            summarized_turns: 3,
            remaining_turns: 1,
            ..
        }
    ));

    let remaining = f.engine.buffer().recent(10).await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].text, "said while summarizing");
    assert_eq!(f.engine.store().count().unwrap(), 1);
}

#[tokio::test]
async fn diagnostics_report_sizes_and_providers() {
    let f = fixture(
        Arc::new(Failing(CallErrorKind::AuthError)),
        MemoryPolicy::default(),
    );
    fill(&f.engine, 2).await;
    let _ = f.engine.summarize_now().await;

    let report = f.engine.diagnostics().await.unwrap();
    assert_eq!(report.buffer_turns, 2);
    assert_eq!(report.memory_entries, 0);
    let memory = report
        .roles
        .iter()
        .find(|r| r.role == ProviderRole::Memory)
        .unwrap();
    assert_eq!(memory.providers.len(), 3);
    assert!(memory.providers.iter().all(|p| p.auth_failure && !p.eligible));
}
