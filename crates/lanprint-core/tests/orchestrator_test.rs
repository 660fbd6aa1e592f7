#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::time::Instant;

use common::{Harness, Wire, artifact, device, eventually};
use lanprint_core::{
    AgentConfig, CancelFn, CoreError, JobHooks, JobStatus, PrintOptions, PrintRequest, StatusFn,
    TransferRequest,
};

fn quick() -> AgentConfig {
    AgentConfig {
        settle_delay: Duration::from_millis(20),
        ..AgentConfig::default()
    }
}

fn recording_hooks() -> (JobHooks, Arc<Mutex<Vec<JobStatus>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let on_status: StatusFn = Arc::new(move |s: &JobStatus| sink.lock().push(s.clone()));
    (
        JobHooks {
            on_status: Some(on_status),
            was_cancelled: None,
        },
        seen,
    )
}

fn ams_only() -> PrintOptions {
    PrintOptions {
        timelapse: false,
        bed_leveling: false,
        flow_cali: false,
        vibration_cali: false,
        layer_inspect: false,
        use_ams: true,
    }
}

#[tokio::test]
async fn print_publishes_one_start_command_after_upload() {
    let harness = Harness::with_config(quick());
    harness.agent.connect(device("P1")).await.unwrap();
    let file = artifact(4096);
    let (hooks, statuses) = recording_hooks();

    let mut request = PrintRequest::new("P1", file.path());
    request.options = ams_only();
    let outcome = harness.agent.start_print(request, &hooks).await.unwrap();

    assert_eq!((outcome.sequence_id, outcome.bytes), (0, 4096));
    assert!(eventually(|| harness.publishes().len() == 1).await);

    let wire = harness.wire();
    assert!(matches!(wire[0], Wire::Connect { .. }));
    assert_eq!(
        wire[1],
        Wire::Upload {
            device_id: "P1".into(),
            remote_name: "print.gcode.3mf".into(),
            bytes: 4096,
        }
    );
    assert!(matches!(wire[2], Wire::Publish { .. }));

    let (dev, payload) = harness.publishes().remove(0);
    assert_eq!(dev, "P1");
    assert_eq!(
        payload,
        json!({"print": {
            "sequence_id": 0,
            "command": "project_file",
            "param": "Metadata/plate_1.gcode",
            "subtask_name": "print.gcode.3mf",
            "url": "ftp://print.gcode.3mf",
            "timelapse": false,
            "bed_leveling": false,
            "flow_cali": false,
            "vibration_cali": false,
            "layer_inspect": false,
            "use_ams": true
        }})
    );

    let stages: Vec<i32> = statuses.lock().iter().map(JobStatus::stage).collect();
    assert_eq!(stages.first(), Some(&1));
    assert_eq!(stages.last(), Some(&5));
    assert!(stages.windows(2).all(|w| w[0] <= w[1]), "stages: {stages:?}");
}

#[tokio::test]
async fn print_without_session_fails_fast() {
    let harness = Harness::with_config(quick());
    let file = artifact(128);

    let err = harness
        .agent
        .start_print(PrintRequest::new("P1", file.path()), &JobHooks::default())
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::NotConnected { .. }));
    assert_eq!(harness.uploads(), 0);
    assert!(harness.publishes().is_empty());
}

#[tokio::test]
async fn failed_upload_never_publishes() {
    let harness = Harness::with_config(quick());
    harness.agent.connect(device("P1")).await.unwrap();
    harness.uploader.set_failing(true);
    let file = artifact(128);
    let (hooks, statuses) = recording_hooks();

    let err = harness
        .agent
        .start_print(PrintRequest::new("P1", file.path()), &hooks)
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), -5);
    assert!(err.to_string().contains("553"), "{err}");
    assert!(matches!(
        statuses.lock().last(),
        Some(JobStatus::Failed(CoreError::TransferFailed { .. }))
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.publishes().is_empty());
}

#[tokio::test]
async fn missing_source_is_transfer_failure() {
    let harness = Harness::with_config(quick());
    harness.agent.connect(device("P1")).await.unwrap();

    let err = harness
        .agent
        .start_print(
            PrintRequest::new("P1", "/definitely/not/here.3mf"),
            &JobHooks::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::TransferFailed { .. }));
    assert_eq!(harness.uploads(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_settle_never_publishes() {
    let harness = Harness::with_config(AgentConfig {
        settle_delay: Duration::from_secs(2),
        ..AgentConfig::default()
    });
    harness.agent.connect(device("P1")).await.unwrap();
    let file = artifact(256);

    let flag = Arc::new(AtomicBool::new(false));
    let (mut hooks, statuses) = recording_hooks();
    let raised = Arc::clone(&flag);
    let cancelled: CancelFn = Arc::new(move || raised.load(Ordering::SeqCst));
    hooks.was_cancelled = Some(cancelled);

    let job = {
        let agent = harness.agent.clone();
        let request = PrintRequest::new("P1", file.path());
        tokio::spawn(async move { agent.start_print(request, &hooks).await })
    };
    assert!(eventually(|| statuses.lock().iter().any(|s| matches!(s, JobStatus::Settling))).await);
    flag.store(true, Ordering::SeqCst);

    let err = job.await.unwrap().unwrap_err();
    assert!(matches!(err, CoreError::Cancelled));
    assert!(matches!(statuses.lock().last(), Some(JobStatus::Cancelled)));
    assert_eq!(harness.uploads(), 1);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(harness.publishes().is_empty());
}

#[tokio::test]
async fn link_lost_during_upload_fails_without_publishing() {
    let harness = Harness::with_config(quick());
    harness.agent.connect(device("P1")).await.unwrap();
    harness.uploader.set_delay(Duration::from_millis(300));
    let file = artifact(256);
    let (hooks, statuses) = recording_hooks();

    let job = {
        let agent = harness.agent.clone();
        let request = PrintRequest::new("P1", file.path());
        tokio::spawn(async move { agent.start_print(request, &hooks).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    harness.connector.drop_link("P1", "broker went away").await;

    let err = job.await.unwrap().unwrap_err();
    assert!(matches!(err, CoreError::NotConnected { .. }), "{err}");
    assert_eq!(err.status_code(), -3);
    assert!(matches!(
        statuses.lock().last(),
        Some(JobStatus::Failed(CoreError::NotConnected { .. }))
    ));
    // The upload is not rolled back.
    assert_eq!(harness.uploads(), 1);
    assert!(harness.publishes().is_empty());
}

#[tokio::test]
async fn cancelled_before_settle_never_publishes() {
    let harness = Harness::with_config(quick());
    harness.agent.connect(device("P1")).await.unwrap();
    let file = artifact(64);
    let cancelled: CancelFn = Arc::new(|| true);
    let hooks = JobHooks {
        on_status: None,
        was_cancelled: Some(cancelled),
    };

    let err = harness
        .agent
        .start_print(PrintRequest::new("P1", file.path()), &hooks)
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), -6);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.publishes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn settle_delay_separates_upload_and_start() {
    let harness = Harness::with_config(AgentConfig {
        settle_delay: Duration::from_secs(1),
        ..AgentConfig::default()
    });
    harness.agent.connect(device("P1")).await.unwrap();
    let file = artifact(64);

    let started = Instant::now();
    harness
        .agent
        .start_print(PrintRequest::new("P1", file.path()), &JobHooks::default())
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn slow_upload_times_out_as_transfer_failure() {
    let harness = Harness::with_config(AgentConfig {
        upload_timeout: Duration::from_secs(5),
        ..quick()
    });
    harness.agent.connect(device("P1")).await.unwrap();
    harness.uploader.set_delay(Duration::from_secs(60));
    let file = artifact(64);

    let err = harness
        .agent
        .start_print(PrintRequest::new("P1", file.path()), &JobHooks::default())
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::TransferFailed { .. }));
    assert!(err.to_string().contains("timed out"), "{err}");
    assert!(harness.publishes().is_empty());
}

#[tokio::test]
async fn consecutive_prints_use_increasing_sequence_ids() {
    let harness = Harness::with_config(quick());
    harness.agent.connect(device("P1")).await.unwrap();
    let file = artifact(64);

    let mut job_ids = Vec::new();
    for expected in 0..2 {
        let (hooks, statuses) = recording_hooks();
        let outcome = harness
            .agent
            .start_print(PrintRequest::new("P1", file.path()), &hooks)
            .await
            .unwrap();
        assert_eq!(outcome.sequence_id, expected);
        assert!(matches!(
            statuses.lock().last(),
            Some(JobStatus::Started { sequence_id }) if *sequence_id == expected
        ));
        job_ids.push(outcome.job_id);
    }
    assert_ne!(job_ids[0], job_ids[1]);

    assert!(eventually(|| harness.publishes().len() == 2).await);
    let ids: Vec<u64> = harness
        .publishes()
        .iter()
        .map(|(_, p)| p["print"]["sequence_id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![0, 1]);
}

#[tokio::test]
async fn project_name_and_ams_mapping_reach_the_payload() {
    let harness = Harness::with_config(quick());
    harness.agent.connect(device("P1")).await.unwrap();
    let file = artifact(64);

    let mut request = PrintRequest::new("P1", file.path());
    request.project_name = Some("benchy".into());
    request.transfer.remote_name = Some("benchy.gcode.3mf".into());
    request.ams_mapping = vec![0, -1, 2];
    harness
        .agent
        .start_print(request, &JobHooks::default())
        .await
        .unwrap();

    assert!(eventually(|| harness.publishes().len() == 1).await);
    let (_, payload) = harness.publishes().remove(0);
    assert_eq!(payload["print"]["subtask_name"], "benchy");
    assert_eq!(payload["print"]["url"], "ftp://benchy.gcode.3mf");
    assert_eq!(payload["print"]["ams_mapping"], json!([0, -1, 2]));
}

#[tokio::test]
async fn send_to_storage_uploads_without_starting() {
    let harness = Harness::with_config(quick());
    harness.agent.connect(device("P1")).await.unwrap();
    let file = artifact(2048);
    let (hooks, statuses) = recording_hooks();

    let job = harness
        .agent
        .send_to_storage(
            TransferRequest {
                device_id: "P1".into(),
                source: file.path().to_path_buf(),
                remote_name: Some("plate.gcode".into()),
            },
            &hooks,
        )
        .await
        .unwrap();

    assert!(job.completed);
    assert_eq!((job.bytes_sent, job.remote_name.as_str()), (2048, "plate.gcode"));
    assert!(matches!(
        statuses.lock().last(),
        Some(JobStatus::Uploaded { bytes: 2048 })
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.uploads(), 1);
    assert!(harness.publishes().is_empty());
}
