//! Integration tests for request dispatch

mod support;

use support::Fixture;
use serde_json::json;
use vrrp::VirtualRouterDefinition;
use vrrp_server::{ControlRequest, ControlResponse};
use vrrp_server::types::{InstanceStatus, VrfStatus};

fn commit(vrf: &str, config: serde_json::Value) -> ControlRequest {
    ControlRequest::Commit {
        path: vec!["vrf".to_string(), "name".to_string(), vrf.to_string(), "vrrp".to_string()],
        config,
    }
}

async fn exec(fixture: &Fixture, line: &str) {
    let response = fixture
        .handler
        .handle(ControlRequest::ExecLine {
            line: line.to_string(),
        })
        .await;
    assert!(matches!(response, ControlResponse::Ok), "{line}: {response:?}");
}

async fn status(fixture: &Fixture) -> Vec<VrfStatus> {
    match fixture.handler.handle(ControlRequest::Status).await {
        ControlResponse::Status { vrfs } => vrfs,
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn test_commit_starts_instances() {
    let fixture = Fixture::new();

    let response = fixture
        .handler
        .handle(commit(
            "vrf3",
            json!([{
                "vrid": 1,
                "interface": "eth0",
                "priority": 150,
                "preempt": true,
                "state": "master",
                "virtual-address": "10.0.0.100",
                "unicast-peer": [{"address": "10.0.0.2"}]
            }]),
        ))
        .await;

    match response {
        ControlResponse::Committed { outcomes } => {
            assert_eq!(outcomes.len(), 1);
            assert!(outcomes[0].started);
            assert_eq!(outcomes[0].interface, "eth0");
        }
        other => panic!("unexpected response: {other:?}"),
    }

    let config = fixture.config_file("eth0");
    assert!(config.contains("vrrp_instance vrrp1-eth0-10.0.0.0/24 {"));
    assert!(config.contains("state MASTER"));
    assert!(config.contains("priority 150"));
    assert!(config.contains("10.0.0.100 dev eth0"));

    assert_eq!(fixture.supervisor.running(), 1);
    assert_eq!(
        status(&fixture).await,
        vec![VrfStatus {
            vrf: "vrf3".to_string(),
            instances: vec![InstanceStatus {
                interface: "eth0".to_string(),
                vrid: 1,
                running: true,
            }],
        }]
    );
}

#[tokio::test]
async fn test_malformed_commit_leaves_instances() {
    let fixture = Fixture::new();

    fixture
        .handler
        .handle(commit("vrf3", json!([{"vrid": 1, "interface": "eth0"}])))
        .await;

    let response = fixture
        .handler
        .handle(commit("vrf3", json!({"vrid": 1})))
        .await;
    assert!(matches!(response, ControlResponse::Error { .. }));

    assert_eq!(fixture.supervisor.running(), 1);
    assert_eq!(status(&fixture).await[0].instances.len(), 1);
}

#[tokio::test]
async fn test_candidate_commit_round_trip() {
    let fixture = Fixture::new();

    exec(&fixture, "set vrf name vrf2 vrrp 5").await;
    exec(&fixture, "set vrf name vrf2 vrrp 5 interface eth1").await;
    exec(&fixture, "set vrf name vrf2 vrrp 5 priority 90").await;
    exec(&fixture, "set vrf name vrf2 vrrp 5 state backup").await;

    // Nothing runs before commit
    assert_eq!(fixture.supervisor.running(), 0);

    let response = fixture.handler.handle(ControlRequest::CommitCandidate).await;
    assert!(matches!(response, ControlResponse::Ok));
    assert_eq!(fixture.supervisor.running(), 1);

    let config = fixture.config_file("eth1");
    assert!(config.contains("interface vrf2"));
    assert!(config.contains("priority 90"));
    assert!(config.contains("nopreempt"));

    exec(&fixture, "delete vrf name vrf2 vrrp 5").await;
    fixture.handler.handle(ControlRequest::CommitCandidate).await;
    assert_eq!(fixture.supervisor.running(), 0);
    assert!(status(&fixture).await.is_empty());
}

#[tokio::test]
async fn test_invalid_line_is_rejected() {
    let fixture = Fixture::new();

    let response = fixture
        .handler
        .handle(ControlRequest::ExecLine {
            line: "set vrf name vrf2 vrrp 5 priority loud".to_string(),
        })
        .await;
    assert!(matches!(response, ControlResponse::Error { .. }));
}

#[tokio::test]
async fn test_cluster_sync_replaces_instances() {
    let fixture = Fixture::new();

    fixture
        .handler
        .handle(commit(
            "vrf4",
            json!([
                {"vrid": 1, "interface": "eth0"},
                {"vrid": 2, "interface": "eth1"}
            ]),
        ))
        .await;

    let desired: Vec<VirtualRouterDefinition> =
        serde_json::from_value(json!([{"vrid": 7, "interface": "eth2", "priority": 120}])).unwrap();
    let response = fixture
        .handler
        .handle(ControlRequest::ClusterSync {
            vrf_id: 4,
            vrrp: desired,
        })
        .await;
    assert!(matches!(response, ControlResponse::Ok));

    let vrfs = status(&fixture).await;
    assert_eq!(vrfs.len(), 1);
    assert_eq!(
        vrfs[0].instances,
        vec![InstanceStatus {
            interface: "eth2".to_string(),
            vrid: 7,
            running: true,
        }]
    );
    assert_eq!(fixture.supervisor.running(), 1);
}

#[tokio::test]
async fn test_delete_vrf_removes_state() {
    let fixture = Fixture::new();

    fixture
        .handler
        .handle(commit(
            "vrf6",
            json!([
                {"vrid": 1, "interface": "eth0"},
                {"vrid": 2, "interface": "eth1"}
            ]),
        ))
        .await;
    fixture.publish(json!({
        "eth0": {"state": "MASTER", "changed_at": 1},
        "eth1": {"state": "BACKUP", "changed_at": 2},
        "eth9": {"state": "BACKUP", "changed_at": 3}
    }));

    let response = fixture
        .handler
        .handle(ControlRequest::DeleteVrf { vrf_id: 6 })
        .await;
    assert!(matches!(response, ControlResponse::Ok));

    assert!(status(&fixture).await.is_empty());
    assert_eq!(fixture.supervisor.running(), 0);

    let published = fixture.published().unwrap();
    assert!(published.get("eth0").is_none());
    assert!(published.get("eth1").is_none());
    assert!(published.get("eth9").is_some());
}

#[tokio::test]
async fn test_stop_all_clears_everything() {
    let fixture = Fixture::new();

    fixture
        .handler
        .handle(commit("vrf1", json!([{"vrid": 1, "interface": "eth0"}])))
        .await;
    fixture
        .handler
        .handle(commit("vrf2", json!([{"vrid": 2, "interface": "eth1"}])))
        .await;
    fixture.publish(json!({"eth0": {"state": "MASTER", "changed_at": 1}}));

    let response = fixture.handler.handle(ControlRequest::StopAll).await;
    assert!(matches!(response, ControlResponse::Ok));

    assert_eq!(fixture.supervisor.running(), 0);
    assert!(status(&fixture).await.is_empty());
    assert!(fixture.published().is_none());
}

#[tokio::test]
async fn test_cluster_sync_after_stop_all_restarts_instances() {
    let fixture = Fixture::new();
    let config = json!([{"vrid": 1, "interface": "eth0"}]);

    fixture.handler.handle(commit("vrf1", config.clone())).await;
    assert_eq!(fixture.supervisor.running(), 1);

    let response = fixture.handler.handle(ControlRequest::StopAll).await;
    assert!(matches!(response, ControlResponse::Ok));
    assert_eq!(fixture.supervisor.running(), 0);

    let desired: Vec<VirtualRouterDefinition> = serde_json::from_value(config).unwrap();
    let response = fixture
        .handler
        .handle(ControlRequest::ClusterSync {
            vrf_id: 1,
            vrrp: desired,
        })
        .await;
    assert!(matches!(response, ControlResponse::Ok));

    assert_eq!(fixture.supervisor.running(), 1);
    assert_eq!(
        status(&fixture).await,
        vec![VrfStatus {
            vrf: "vrf1".to_string(),
            instances: vec![InstanceStatus {
                interface: "eth0".to_string(),
                vrid: 1,
                running: true,
            }],
        }]
    );
}

#[tokio::test]
async fn test_stop_all_forgets_committed_configuration() {
    let fixture = Fixture::new();

    exec(&fixture, "set vrf name vrf2 vrrp 5").await;
    exec(&fixture, "set vrf name vrf2 vrrp 5 interface eth1").await;
    fixture.handler.handle(ControlRequest::CommitCandidate).await;
    assert_eq!(fixture.supervisor.running(), 1);

    fixture.handler.handle(ControlRequest::StopAll).await;

    // Re-entering the same lines is a change again and restarts the instance
    exec(&fixture, "set vrf name vrf2 vrrp 5").await;
    exec(&fixture, "set vrf name vrf2 vrrp 5 interface eth1").await;
    fixture.handler.handle(ControlRequest::CommitCandidate).await;
    assert_eq!(fixture.supervisor.running(), 1);
}
