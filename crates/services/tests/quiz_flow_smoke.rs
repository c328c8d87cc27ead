//! End-to-end flow over in-memory stores: a full quiz run, an offline run
//! that reconciles later, and recovery after an interrupted process.

use std::sync::Arc;
use std::time::Duration;

use quiz_core::model::{OwnerId, QuestionId, SessionMode, SessionStatus};
use quiz_core::time::fixed_clock;
use services::{AnswerSyncPipeline, AutoSaveScheduler, NetworkMonitor, RetryPolicy, StudyFlowService};
use storage::local_cache::MemoryCache;
use storage::repository::{InMemoryRemoteStore, PerformanceStore, RemoteStore};
use uuid::Uuid;

struct Harness {
    monitor: NetworkMonitor,
    remote: InMemoryRemoteStore,
    service: StudyFlowService,
}

fn harness(online: bool) -> Harness {
    let monitor = NetworkMonitor::new(online);
    let remote = InMemoryRemoteStore::new();
    let cache = MemoryCache::new();
    let pipeline = Arc::new(
        AnswerSyncPipeline::new(
            Arc::new(remote.clone()),
            Arc::new(cache.clone()),
            monitor.handle(),
            fixed_clock(),
        )
        .with_policy(RetryPolicy::immediate(3)),
    );
    let autosave = Arc::new(AutoSaveScheduler::new(Arc::new(cache), fixed_clock()));
    let service = StudyFlowService::new(
        RemoteStore::from_memory_store(remote.clone()),
        pipeline,
        autosave,
        fixed_clock(),
    );
    Harness {
        monitor,
        remote,
        service,
    }
}

fn owner() -> OwnerId {
    OwnerId::from_uuid(Uuid::from_u128(1234))
}

async fn settle(harness: &Harness, expected_delivered: u64) {
    for _ in 0..200 {
        if harness.service.pipeline().delivered_count() >= expected_delivered {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {expected_delivered} deliveries");
}

#[tokio::test]
async fn perfect_quick_session_scores_one() {
    let harness = harness(true);
    let questions: Vec<QuestionId> = (0..5).map(QuestionId::new).collect();

    let mut session = harness
        .service
        .start_session(owner(), SessionMode::Quick, questions)
        .await
        .unwrap();

    for i in 0..5 {
        harness
            .service
            .select_answer(&mut session, i, true, 1500, Some(5))
            .await
            .unwrap();
        harness.service.next_question(&mut session).await.unwrap();
    }

    assert_eq!(session.status(), SessionStatus::Completed);
    assert_eq!(session.score(), Some(1.0));
    settle(&harness, 5).await;
    assert_eq!(harness.remote.answers_for(session.id()).len(), 5);

    // five perfect attempts feed five fresh performance records
    let records = harness.remote.records_for_owner(owner()).await.unwrap();
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|r| r.accuracy() == Some(1.0)));
}

#[tokio::test]
async fn offline_session_reconciles_to_exactly_one_value_per_question() {
    let harness = harness(false);
    let questions: Vec<QuestionId> = (0..3).map(QuestionId::new).collect();

    let mut session = harness
        .service
        .start_session(owner(), SessionMode::Quick, questions)
        .await
        .unwrap();

    for i in 0..3 {
        harness
            .service
            .select_answer(&mut session, i + 10, true, 900, None)
            .await
            .unwrap();
        harness.service.next_question(&mut session).await.unwrap();
    }
    assert_eq!(session.status(), SessionStatus::Completed);

    // everything queued, nothing delivered
    for _ in 0..200 {
        if harness.service.pipeline().pending_len().await.unwrap() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(harness.remote.answers_for(session.id()).is_empty());

    harness.monitor.set_online(true);
    // run twice: at-least-once delivery with keyed overwrites stays exact
    harness.service.pipeline().reconcile().await.unwrap();
    let report = harness.service.pipeline().reconcile().await.unwrap();
    assert_eq!(report.remaining, 0);

    let answers = harness.remote.answers_for(session.id());
    assert_eq!(answers.len(), 3);
    let values: Vec<u32> = answers.iter().map(|a| a.answer_index).collect();
    assert_eq!(values, vec![10, 11, 12]);
}

#[tokio::test]
async fn interrupted_session_recovers_from_snapshot() {
    let harness = harness(true);
    let questions: Vec<QuestionId> = (0..4).map(QuestionId::new).collect();

    let mut session = harness
        .service
        .start_session(owner(), SessionMode::Timed, questions)
        .await
        .unwrap();
    harness
        .service
        .select_answer(&mut session, 2, false, 2000, Some(2))
        .await
        .unwrap();
    harness.service.next_question(&mut session).await.unwrap();
    harness.service.autosave().save_now(&session).await;

    // simulated process restart: only the snapshot survives
    let id = session.id();
    drop(session);

    let mut recovered = harness
        .service
        .recover_session(id)
        .await
        .unwrap()
        .expect("snapshot present");
    assert_eq!(recovered.status(), SessionStatus::Active);
    assert_eq!(recovered.answered_count(), 1);
    assert_eq!(recovered.current_index(), 1);

    for _ in 0..3 {
        harness
            .service
            .select_answer(&mut recovered, 0, true, 1000, None)
            .await
            .unwrap();
        harness.service.next_question(&mut recovered).await.unwrap();
    }
    assert_eq!(recovered.status(), SessionStatus::Completed);
    assert_eq!(recovered.score(), Some(0.75));
}
