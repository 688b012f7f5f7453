use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Duration;

use mathometer::clock::ImmediateFrameSync;
use mathometer::config::ExperimentConfig;
use mathometer::content::{CharacterAssociation, SentenceInfo, CHARACTER_IDS};
use mathometer::plan::{build_session_plan, PlanOptions};
use mathometer::progress::{
    now_epoch_ms, MemoryProgressStore, ProgressRecord, ProgressStore, Subject,
};
use mathometer::record::MemoryRecordSink;
use mathometer::response::{KEY_LEFT, KEY_RIGHT};
use mathometer::session::{
    run_session, spawn_scripted_responder, AutoOperator, SessionDeps, SessionOutcome,
};
use mathometer::trial::{SimulatedMediaPlayer, ONSET_SENTINEL};

fn sentences(total_runs: u32, per_run: usize) -> Vec<SentenceInfo> {
    let mut out = Vec::new();
    let mut id = 0;
    for run in 1..=total_runs {
        for k in 0..per_run {
            id += 1;
            out.push(SentenceInfo {
                sentence_id: id,
                run,
                category: if k % 2 == 0 { "Math" } else { "Nonmath" }.into(),
                theme: "Geometry".into(),
                truth_value: if k % 3 == 0 { "True" } else { "False" }.into(),
            });
        }
    }
    out
}

fn associations(total_runs: u32, len: usize) -> Vec<CharacterAssociation> {
    (1..=total_runs)
        .map(|run| CharacterAssociation {
            run,
            characters: (0..len).map(|k| CHARACTER_IDS[k % 4]).collect(),
        })
        .collect()
}

fn deps(
    store: Arc<MemoryProgressStore>,
    sink: Arc<MemoryRecordSink>,
    config: &ExperimentConfig,
) -> SessionDeps {
    let (tx, rx) = mpsc::channel(256);
    spawn_scripted_responder(tx, Duration::from_secs(3), vec![KEY_RIGHT, KEY_LEFT]);
    SessionDeps {
        store,
        sink,
        player: Arc::new(SimulatedMediaPlayer::from_config(config)),
        operator: Arc::new(AutoOperator),
        frame_sync: Arc::new(ImmediateFrameSync),
        input_rx: rx,
    }
}

#[tokio::test(start_paused = true)]
async fn full_session_for_subject_7_produces_six_complete_run_records() {
    let config = ExperimentConfig::default();
    assert_eq!(config.total_runs, 6);
    assert_eq!(config.trials_per_run, 20);

    let store = Arc::new(MemoryProgressStore::new());
    let sink = Arc::new(MemoryRecordSink::new());
    let subject = Subject::new(7).unwrap();

    let plan = build_session_plan(
        store.as_ref(),
        subject,
        &sentences(6, 25),
        &associations(6, 20),
        &config,
        &PlanOptions { rng_seed: Some(7) },
    )
    .await
    .unwrap();

    let outcome = run_session(deps(store.clone(), sink.clone(), &config), &plan, &config)
        .await
        .unwrap();
    assert_eq!(outcome, SessionOutcome::Completed { runs_executed: 6 });

    let records = sink.runs();
    assert_eq!(records.len(), 6);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.run_index, (i + 1) as u32);
        assert_eq!(record.run_order, plan.run_order);
        assert_eq!(record.questions.onsets.len(), 20);
        assert_eq!(record.questions.response.len(), 20);
        assert_eq!(record.questions.rt.len(), 20);
        for (row, onsets) in record.questions.onsets.iter().enumerate() {
            for (slot, value) in onsets.iter().enumerate() {
                assert!(
                    *value > ONSET_SENTINEL,
                    "run {} trial {row} onset {slot} left at sentinel",
                    record.run_index
                );
            }
        }
    }
    // Execution order follows the persisted run order.
    for (record, run) in records.iter().zip(&plan.runs) {
        assert_eq!(record.run_number, run.run_number);
    }

    let progress = store.load(subject).await.unwrap().unwrap();
    assert_eq!(progress.last_run_completed, 6);
}

#[tokio::test(start_paused = true)]
async fn resume_executes_only_remaining_runs_with_preserved_order() {
    let config = ExperimentConfig::default();
    let store = Arc::new(MemoryProgressStore::new());
    let sink = Arc::new(MemoryRecordSink::new());
    let subject = Subject::new(7).unwrap();

    let run_order = vec![4, 5, 6, 1, 2, 3];
    store
        .save(
            subject,
            &ProgressRecord {
                run_order: run_order.clone(),
                last_run_completed: 3,
                created_at_ms: now_epoch_ms(),
                updated_at_ms: now_epoch_ms(),
            },
        )
        .await
        .unwrap();

    let plan = build_session_plan(
        store.as_ref(),
        subject,
        &sentences(6, 25),
        &associations(6, 20),
        &config,
        &PlanOptions { rng_seed: Some(7) },
    )
    .await
    .unwrap();
    assert_eq!(plan.run_order, run_order);
    assert_eq!(plan.last_run_completed, 3);

    let outcome = run_session(deps(store.clone(), sink.clone(), &config), &plan, &config)
        .await
        .unwrap();
    assert_eq!(outcome, SessionOutcome::Completed { runs_executed: 3 });

    let records = sink.runs();
    let executed: Vec<u32> = records.iter().map(|r| r.run_index).collect();
    assert_eq!(executed, vec![4, 5, 6]);
    assert_eq!(records[0].run_order, run_order);
    // Run 4 executes content run 1 under this order.
    assert_eq!(records[0].run_number, 1);

    let progress = store.load(subject).await.unwrap().unwrap();
    assert_eq!(progress.last_run_completed, 6);
}

#[tokio::test(start_paused = true)]
async fn completed_subject_session_runs_nothing() {
    let config = ExperimentConfig::default();
    let store = Arc::new(MemoryProgressStore::new());
    let sink = Arc::new(MemoryRecordSink::new());
    let subject = Subject::new(2).unwrap();

    store
        .save(
            subject,
            &ProgressRecord {
                run_order: vec![1, 2, 3, 4, 5, 6],
                last_run_completed: 6,
                created_at_ms: now_epoch_ms(),
                updated_at_ms: now_epoch_ms(),
            },
        )
        .await
        .unwrap();

    let plan = build_session_plan(
        store.as_ref(),
        subject,
        &sentences(6, 25),
        &associations(6, 20),
        &config,
        &PlanOptions { rng_seed: Some(3) },
    )
    .await
    .unwrap();

    let outcome = run_session(deps(store.clone(), sink.clone(), &config), &plan, &config)
        .await
        .unwrap();
    assert_eq!(outcome, SessionOutcome::AlreadyComplete);
    assert!(sink.runs().is_empty());
    assert!(sink.params().is_empty());
}
