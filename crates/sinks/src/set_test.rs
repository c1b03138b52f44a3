use super::*;
use crate::reader::read_delimited;
use crate::test_utils::{MockHost, TestEvent, decode_batches, events};
use pstrace_config::{FileTracerConfig, RemoteTracerConfig};
use std::time::Duration;
use tempfile::TempDir;

fn file_config(path: std::path::PathBuf) -> FileTracerConfig {
    FileTracerConfig {
        path,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_empty_config_has_no_tracers() {
    let set = TracerSet::<TestEvent>::from_config(&TracersConfig::default(), CancellationToken::new())
        .unwrap();
    assert!(set.is_empty());

    // Tracing into an empty set is a no-op.
    set.trace(TestEvent::new("nowhere", 0));
    assert!(set.shutdown().await.is_empty());
}

#[tokio::test]
async fn test_fans_out_to_every_file() {
    let dir = TempDir::new().unwrap();
    let json_path = dir.path().join("trace.json");
    let pb_path = dir.path().join("trace.pb");
    let config = TracersConfig {
        json: Some(file_config(json_path.clone())),
        protobuf: Some(file_config(pb_path.clone())),
        remote: None,
    };

    let set = TracerSet::from_config(&config, CancellationToken::new()).unwrap();
    assert_eq!(set.len(), 2);

    let expected = events(3);
    for event in expected.clone() {
        set.trace(event);
    }
    let results = set.shutdown().await;

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|(_, snapshot)| snapshot.events_written == 3));

    let json: Vec<TestEvent> = std::fs::read_to_string(&json_path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(json, expected);

    let protobuf: Vec<TestEvent> = read_delimited(&pb_path).unwrap();
    assert_eq!(protobuf, expected);
}

#[tokio::test]
async fn test_disabled_tracer_is_skipped() {
    let dir = TempDir::new().unwrap();
    let config = TracersConfig {
        json: Some(FileTracerConfig {
            enabled: false,
            ..file_config(dir.path().join("trace.json"))
        }),
        ..Default::default()
    };

    let set = TracerSet::<TestEvent>::from_config(&config, CancellationToken::new()).unwrap();
    assert!(set.is_empty());
    assert!(!dir.path().join("trace.json").exists());
}

#[tokio::test]
async fn test_remote_through_host() {
    let host = Arc::new(MockHost::new());
    let config = TracersConfig {
        remote: Some(RemoteTracerConfig {
            peer_id: "collector".into(),
            addrs: vec!["127.0.0.1:4001".into()],
            batch_window: Duration::from_millis(10),
            ..Default::default()
        }),
        ..Default::default()
    };

    let set = TracerSet::from_config_with_host(&config, CancellationToken::new(), Arc::clone(&host))
        .unwrap();
    set.trace(TestEvent::new("remote", 1));
    set.shutdown().await;

    assert_eq!(
        decode_batches(&host.streams()[0].data).concat(),
        vec![TestEvent::new("remote", 1)]
    );
}

#[tokio::test]
async fn test_shutdown_with_unreachable_remote_returns() {
    let dir = TempDir::new().unwrap();
    let host = Arc::new(MockHost::new().fail_connects(usize::MAX));
    let config = TracersConfig {
        json: Some(file_config(dir.path().join("trace.json"))),
        remote: Some(RemoteTracerConfig {
            peer_id: "collector".into(),
            addrs: vec!["127.0.0.1:4001".into()],
            ..Default::default()
        }),
        ..Default::default()
    };

    let set = TracerSet::from_config_with_host(&config, CancellationToken::new(), Arc::clone(&host))
        .unwrap();
    set.trace(TestEvent::new("local-only", 1));
    host.wait_for_connects(1).await;

    let results = tokio::time::timeout(Duration::from_secs(2), set.shutdown())
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].1.events_written, 1);
    assert_eq!(results[1].1.events_written, 0);
    assert_eq!(results[1].1.events_dropped, 1);
}

#[test]
fn test_from_config_outside_runtime_is_an_error() {
    let dir = TempDir::new().unwrap();
    let config = TracersConfig {
        json: Some(file_config(dir.path().join("trace.json"))),
        ..Default::default()
    };

    let result = TracerSet::<TestEvent>::from_config(&config, CancellationToken::new());
    assert!(matches!(result, Err(TracerError::NoRuntime)));
}

#[tokio::test]
async fn test_remote_without_addresses_is_rejected() {
    let config = TracersConfig {
        remote: Some(RemoteTracerConfig {
            peer_id: "collector".into(),
            ..Default::default()
        }),
        ..Default::default()
    };

    let result = TracerSet::<TestEvent>::from_config(&config, CancellationToken::new());
    assert!(matches!(result, Err(TracerError::Config(_))));
}

#[tokio::test]
async fn test_open_failure_is_reported() {
    let dir = TempDir::new().unwrap();
    let config = TracersConfig {
        protobuf: Some(file_config(dir.path().join("missing").join("trace.pb"))),
        ..Default::default()
    };

    let result = TracerSet::<TestEvent>::from_config(&config, CancellationToken::new());
    assert!(matches!(result, Err(TracerError::Open { .. })));
}
