//! Compute-manager tests against the fake REST API: request protocol,
//! power idempotence, destroy cascade ordering, bounded action waits, and
//! error-envelope surfacing.

mod common;

use daytona_provider_hetzner::hcloud::ComputeManager;
use daytona_provider_hetzner::logs::LogSink;
use daytona_provider_hetzner::target::TargetOptions;
use daytona_provider_hetzner::ProviderError;

use common::FakeHetzner;

fn options(server_type: &str) -> TargetOptions {
    TargetOptions {
        location: "fsn1".to_string(),
        disk_image: "ubuntu-22.04".to_string(),
        disk_size: 20,
        server_type: server_type.to_string(),
        api_token: "test-token".to_string(),
    }
}

fn manager(api: &FakeHetzner, server_type: &str) -> ComputeManager {
    ComputeManager::new(&options(server_type), Some(api.endpoint())).unwrap()
}

fn as_strs(calls: &[String]) -> Vec<&str> {
    calls.iter().map(String::as_str).collect()
}

// ---------------------------------------------------------------------------
// create
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_create_workspace_request_protocol() {
    let api = FakeHetzner::start().await;
    let log = LogSink::workspace(None, "123").await;

    manager(&api, "cpx11")
        .create_workspace("123", &options("cpx11"), "#!/bin/bash\n", &log)
        .await
        .unwrap();

    let calls = api.calls();
    assert_eq!(
        as_strs(&calls),
        vec![
            "GET /locations?name=fsn1",
            "POST /volumes",
            "GET /server_types?name=cpx11",
            "GET /images?name=ubuntu-22.04&architecture=x86",
            "POST /servers",
        ]
    );

    let server = api.server("daytona-123").unwrap();
    assert_eq!(server.user_data, "#!/bin/bash\n");
    assert_eq!(server.volumes.len(), 1);
    assert_eq!(server.volumes[0], api.volumes()[0].id);
}

#[tokio::test]
async fn test_arm_server_type_selects_arm_image() {
    let api = FakeHetzner::start().await;
    let log = LogSink::workspace(None, "123").await;

    manager(&api, "cax11")
        .create_workspace("123", &options("cax11"), "#!/bin/bash\n", &log)
        .await
        .unwrap();

    assert!(api
        .calls()
        .contains(&"GET /images?name=ubuntu-22.04&architecture=arm".to_string()));
    let server = api.server("daytona-123").unwrap();
    assert_eq!(server.server_type, "cax11");
    assert_eq!(server.image_id, 102);
}

#[tokio::test]
async fn test_create_failure_surfaces_the_api_error_envelope() {
    let api = FakeHetzner::start().await;
    api.set_fail_volume_create(true);
    let log = LogSink::workspace(None, "123").await;

    let err = manager(&api, "cpx11")
        .create_workspace("123", &options("cpx11"), "#!/bin/bash\n", &log)
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Api(_)));
    assert!(err
        .to_string()
        .contains("volume create failed: volume limit exceeded (forbidden)"));
    // The sequence stopped at the volume; no server was requested.
    assert!(!api.calls().contains(&"POST /servers".to_string()));
}

// ---------------------------------------------------------------------------
// power actions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_start_skips_poweron_when_already_running() {
    let api = FakeHetzner::start().await;
    api.seed_server("daytona-123", "running", "cpx11", &[501]);

    manager(&api, "cpx11").start_workspace("123").await.unwrap();

    assert_eq!(as_strs(&api.calls()), vec!["GET /servers?name=daytona-123"]);
}

#[tokio::test]
async fn test_start_powers_on_stopped_server() {
    let api = FakeHetzner::start().await;
    let id = api.seed_server("daytona-123", "off", "cpx11", &[501]);

    manager(&api, "cpx11").start_workspace("123").await.unwrap();

    assert!(api
        .calls()
        .contains(&format!("POST /servers/{id}/actions/poweron")));
    assert_eq!(api.server("daytona-123").unwrap().status, "running");
}

#[tokio::test]
async fn test_stop_noop_when_off_or_stopping() {
    let api = FakeHetzner::start().await;
    api.seed_server("daytona-a", "off", "cpx11", &[]);
    api.seed_server("daytona-b", "stopping", "cpx11", &[]);

    let m = manager(&api, "cpx11");
    m.stop_workspace("a").await.unwrap();
    m.stop_workspace("b").await.unwrap();

    assert!(!api.calls().iter().any(|c| c.ends_with("/poweroff")));
}

#[tokio::test]
async fn test_stop_powers_off_running_server() {
    let api = FakeHetzner::start().await;
    let id = api.seed_server("daytona-123", "running", "cpx11", &[]);

    manager(&api, "cpx11").stop_workspace("123").await.unwrap();

    assert!(api
        .calls()
        .contains(&format!("POST /servers/{id}/actions/poweroff")));
    assert_eq!(api.server("daytona-123").unwrap().status, "off");
}

// ---------------------------------------------------------------------------
// destroy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_destroy_deletes_server_then_volumes_in_order() {
    let api = FakeHetzner::start().await;
    let id = api.seed_server("daytona-123", "running", "cpx11", &[501, 502]);

    manager(&api, "cpx11")
        .destroy_workspace("123")
        .await
        .unwrap();

    assert_eq!(
        api.calls(),
        vec![
            "GET /servers?name=daytona-123".to_string(),
            format!("DELETE /servers/{id}"),
            "DELETE /volumes/501".to_string(),
            "DELETE /volumes/502".to_string(),
        ]
    );
    assert!(api.server("daytona-123").is_none());
    assert!(api.volumes().is_empty());
}

#[tokio::test]
async fn test_destroy_aborts_when_a_volume_delete_fails() {
    let api = FakeHetzner::start().await;
    api.seed_server("daytona-123", "running", "cpx11", &[501, 502]);
    api.set_locked_volume(501);

    let err = manager(&api, "cpx11")
        .destroy_workspace("123")
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Api(_)));
    assert!(err.to_string().contains("volume is locked (locked)"));
    // The failing volume stops the cascade; the second one is left alone.
    assert!(!api.calls().contains(&"DELETE /volumes/502".to_string()));
    assert_eq!(api.volumes().len(), 2);
}

// ---------------------------------------------------------------------------
// action waits
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_action_wait_is_bounded() {
    let api = FakeHetzner::start().await;
    api.set_stuck_actions(true);
    api.seed_server("daytona-123", "off", "cpx11", &[]);

    let err = manager(&api, "cpx11")
        .start_workspace("123")
        .await
        .unwrap_err();

    let minutes = err.timeout_minutes().expect("timeout error");
    assert!(
        (10.0..10.5).contains(&minutes),
        "expected ten-minute deadline, got {minutes}"
    );
    assert!(err
        .to_string()
        .contains("waiting for server action timed out after"));
}

// ---------------------------------------------------------------------------
// lookups
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_missing_server_lookup_is_an_error() {
    let api = FakeHetzner::start().await;

    let err = manager(&api, "cpx11")
        .server_info("missing")
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Api(_)));
    assert!(err.to_string().contains("server not found: daytona-missing"));
}
