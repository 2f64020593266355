use staticpod_operator::staticpod::controller::installer::InstallerError;
use staticpod_operator::staticpod::k8s::client::PodApi;
use staticpod_operator::staticpod::operator::client::OperatorClient;
use staticpod_operator::staticpod::operator::types::NodeStatus;
use staticpod_operator::staticpod::test_support::{RolloutHarness, TEST_NAMESPACE};

const MAX_PASSES: usize = 50;

fn healthy_fleet(names: &[&str], current: i32, latest: i32) -> RolloutHarness {
    let nodes = names
        .iter()
        .map(|name| NodeStatus::at_generation(*name, current))
        .collect();
    let harness = RolloutHarness::new(nodes, latest);
    for name in names {
        harness.set_mirror_pod(name, current, true);
    }
    harness
}

#[test]
fn scenario_nodes_join_and_leave_mid_rollout() {
    let mut harness = healthy_fleet(&["node-0", "node-1", "node-2"], 1, 2);
    harness.sync().expect("node-0 targeted");
    harness.sync().expect("installer launched");
    harness.complete_installers();

    let stale = harness.operator.get().expect("state");
    let mut membership = harness.status().node_statuses;
    membership.retain(|node| node.node_name != "node-2");
    membership.push(NodeStatus::new("node-3"));
    harness.set_nodes(membership);

    let err = harness
        .controller
        .advance(&stale)
        .expect_err("snapshot predates the membership change");
    assert!(matches!(err, InstallerError::Status(ref status) if status.is_conflict()));
    let status = harness.status();
    assert!(status.node("node-2").is_none());
    assert_eq!(status.node("node-0").map(|n| n.current_deployment_generation), Some(1));

    let mut snapshot = harness.status();
    assert!(!snapshot.set_node_status(NodeStatus::at_generation("node-2", 2)));
    assert!(snapshot.node("node-2").is_none());
    assert_eq!(snapshot, harness.status());

    let order = harness.run_to_convergence(MAX_PASSES);

    assert_eq!(order, vec!["node-0", "node-3", "node-1"]);
    let names: Vec<String> = harness
        .status()
        .node_statuses
        .into_iter()
        .map(|node| {
            assert_eq!(node.current_deployment_generation, 2, "{}", node.node_name);
            node.node_name
        })
        .collect();
    assert_eq!(names, vec!["node-0", "node-1", "node-3"]);
    assert!(harness.pods.get(TEST_NAMESPACE, "installer-2-node-2").is_err());
}

#[test]
fn scenario_node_removed_while_in_flight_is_forgotten() {
    let mut harness = healthy_fleet(&["node-0", "node-1"], 1, 2);
    harness.sync().expect("node-0 targeted");
    harness.sync().expect("installer launched");
    assert_eq!(harness.node("node-0").target_deployment_generation, 2);

    harness.set_nodes(vec![NodeStatus::at_generation("node-1", 1)]);
    harness.complete_installers();

    let order = harness.run_to_convergence(MAX_PASSES);

    assert_eq!(order, vec!["node-0", "node-1"]);
    let status = harness.status();
    assert_eq!(status.node_statuses.len(), 1);
    assert_eq!(status.node_statuses[0].current_deployment_generation, 2);
}
