//! Pipeline executor behaviour against a scripted engine.

mod fixtures;
mod helpers;

use helpers::{Harness, ScriptedEngine};
use media_batch::models::{LifecycleStatus, OperationKind, OperationSpec, OutputFormat};
use media_batch::services::broker::NotificationTopic;
use media_batch::services::pipeline::PipelineError;
use std::path::PathBuf;
use uuid::Uuid;

fn chain() -> Vec<OperationSpec> {
    vec![
        OperationSpec::Cut {
            start: "00:00:05".to_string(),
            end: "00:00:10".to_string(),
        },
        OperationSpec::Resize {
            width: 1280,
            height: 720,
        },
        OperationSpec::Convert {
            target_format: OutputFormat::Webm,
        },
    ]
}

#[tokio::test]
async fn test_each_stage_reads_previous_output() {
    let harness = Harness::new(ScriptedEngine::new(), 3);
    let asset = harness.seed_asset().await;
    let batch_id = Uuid::new_v4();

    let output = harness
        .executor()
        .execute(batch_id, &asset, &PathBuf::from(&asset.local_path), &chain())
        .await
        .expect("chain should succeed");

    let calls = harness.engine.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0].input, PathBuf::from(&asset.local_path));
    assert_eq!(calls[1].input, calls[0].output);
    assert_eq!(calls[2].input, calls[1].output);

    assert_eq!(output.final_format, "webm");
    assert_eq!(output.final_path, calls[2].output);
    let kinds: Vec<OperationKind> = output.stages.iter().map(|s| s.kind).collect();
    assert_eq!(
        kinds,
        vec![OperationKind::Cut, OperationKind::Resize, OperationKind::Convert]
    );
}

#[tokio::test]
async fn test_success_leaves_only_final_output_in_scratch() {
    let harness = Harness::new(ScriptedEngine::new(), 3);
    let asset = harness.seed_asset().await;

    let output = harness
        .executor()
        .execute(Uuid::new_v4(), &asset, &PathBuf::from(&asset.local_path), &chain())
        .await
        .unwrap();

    assert_eq!(harness.scratch_files(), vec![output.final_path.clone()]);
    let content = std::fs::read(&output.final_path).unwrap();
    assert!(content.ends_with(b"|cut|resize|convert"));
    // The source belongs to the asset and is never touched.
    assert!(PathBuf::from(&asset.local_path).exists());
}

#[tokio::test]
async fn test_every_stage_gets_a_completed_record() {
    let harness = Harness::new(ScriptedEngine::new(), 3);
    let asset = harness.seed_asset().await;
    let batch_id = Uuid::new_v4();

    harness
        .executor()
        .execute(batch_id, &asset, &PathBuf::from(&asset.local_path), &chain())
        .await
        .unwrap();

    let records = harness.operations.all().await;
    assert_eq!(records.len(), 3);
    for record in &records {
        assert_eq!(record.status, LifecycleStatus::Completed);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.batch_id, batch_id);
        assert!(record.output_path.is_some());
    }
    assert_eq!(harness.broker.pending(NotificationTopic::Cut).await.len(), 1);
    assert_eq!(harness.broker.pending(NotificationTopic::Resize).await.len(), 1);
    assert_eq!(harness.broker.pending(NotificationTopic::Convert).await.len(), 1);
}

#[tokio::test]
async fn test_failure_on_second_stage_stops_the_chain() {
    let harness = Harness::new(ScriptedEngine::failing_at(1), 3);
    let asset = harness.seed_asset().await;

    let error = harness
        .executor()
        .execute(Uuid::new_v4(), &asset, &PathBuf::from(&asset.local_path), &chain())
        .await
        .expect_err("stage 2 should fail");

    match error {
        PipelineError::Stage {
            index, kind, status, ..
        } => {
            assert_eq!(index, 1);
            assert_eq!(kind, OperationKind::Resize);
            assert_eq!(status, LifecycleStatus::Error);
        }
        other => panic!("unexpected error: {other}"),
    }

    // Stage 3 never ran and stage 1's intermediate is gone.
    let calls = harness.engine.calls();
    assert_eq!(calls.len(), 2);
    assert!(!calls[0].output.exists());
    assert!(harness.scratch_files().is_empty());

    let records = harness.operations.all().await;
    assert_eq!(records.len(), 2);
    let cut = records.iter().find(|r| r.kind == OperationKind::Cut).unwrap();
    let resize = records.iter().find(|r| r.kind == OperationKind::Resize).unwrap();
    assert_eq!(cut.status, LifecycleStatus::Completed);
    assert_eq!(resize.status, LifecycleStatus::Error);
    assert_eq!(resize.retry_count, 1);
    assert!(resize.error.as_deref().unwrap().contains("scripted failure"));
}

#[tokio::test]
async fn test_empty_chain_is_rejected() {
    let harness = Harness::new(ScriptedEngine::new(), 3);
    let asset = harness.seed_asset().await;

    let error = harness
        .executor()
        .execute(Uuid::new_v4(), &asset, &PathBuf::from(&asset.local_path), &[])
        .await
        .unwrap_err();

    assert!(matches!(error, PipelineError::Empty));
    assert!(harness.engine.calls().is_empty());
}
