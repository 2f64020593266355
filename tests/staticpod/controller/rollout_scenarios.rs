use staticpod_operator::staticpod::operator::types::NodeStatus;
use staticpod_operator::staticpod::test_support::{
    assert_wavefront, is_converged, RolloutHarness,
};

const MAX_PASSES: usize = 50;

fn nodes(count: usize, current: i32) -> Vec<NodeStatus> {
    (0..count)
        .map(|i| NodeStatus::at_generation(format!("node-{}", i), current))
        .collect()
}

fn healthy_fleet(count: usize, current: i32, latest: i32) -> RolloutHarness {
    let harness = RolloutHarness::new(nodes(count, current), latest);
    for i in 0..count {
        harness.set_mirror_pod(&format!("node-{}", i), current, true);
    }
    harness
}

/// Converges while checking the list-order wavefront after every pass.
fn converge_in_list_order(harness: &mut RolloutHarness) -> Vec<String> {
    for _ in 0..MAX_PASSES {
        harness.sync().expect("sync");
        assert_wavefront(&harness.status());
        harness.complete_installers();
        if is_converged(&harness.status()) {
            return harness.upgrade_order().to_vec();
        }
    }
    panic!("rollout did not converge: {:?}", harness.status().node_statuses);
}

#[test]
fn scenario_fresh_nodes_upgrade_in_list_order() {
    let mut harness = RolloutHarness::new(nodes(3, 0), 1);

    let order = converge_in_list_order(&mut harness);

    assert_eq!(order, vec!["node-0", "node-1", "node-2"]);
    for node in harness.status().node_statuses {
        assert_eq!(node.current_deployment_generation, 1);
        assert_eq!(node.last_failed_deployment_generation, 0);
    }
}

#[test]
fn scenario_healthy_fleet_upgrades_sequentially() {
    let mut harness = healthy_fleet(3, 1, 2);

    let order = converge_in_list_order(&mut harness);

    assert_eq!(order, vec!["node-0", "node-1", "node-2"]);
}

#[test]
fn scenario_unready_node_jumps_the_queue() {
    let mut harness = healthy_fleet(3, 1, 2);
    harness.set_mirror_pod("node-1", 1, false);

    let order = harness.run_to_convergence(MAX_PASSES);

    assert_eq!(order, vec!["node-1", "node-0", "node-2"]);
}

#[test]
fn scenario_unready_nodes_are_repaired_first() {
    let mut harness = healthy_fleet(3, 1, 2);
    harness.set_mirror_pod("node-1", 1, false);
    harness.set_mirror_pod("node-2", 1, false);

    let order = harness.run_to_convergence(MAX_PASSES);

    assert_eq!(order, vec!["node-1", "node-2", "node-0"]);
}

#[test]
fn scenario_successive_generations_each_sweep_the_fleet() {
    let mut harness = healthy_fleet(3, 1, 2);
    converge_in_list_order(&mut harness);

    harness.operator.set_latest_available_generation(3);
    converge_in_list_order(&mut harness);

    assert_eq!(
        harness.upgrade_order(),
        &["node-0", "node-1", "node-2", "node-0", "node-1", "node-2"]
    );
    for node in harness.status().node_statuses {
        assert_eq!(node.current_deployment_generation, 3);
    }
}

#[test]
fn scenario_single_node_fleet_converges() {
    let mut harness = RolloutHarness::new(nodes(1, 0), 4);

    let order = harness.run_to_convergence(MAX_PASSES);

    assert_eq!(order, vec!["node-0"]);
    assert_eq!(harness.node("node-0").current_deployment_generation, 4);
}

#[test]
fn scenario_empty_fleet_is_a_noop() {
    let mut harness = RolloutHarness::new(Vec::new(), 1);

    harness.sync().expect("sync");

    assert!(harness.installer_pods().is_empty());
    assert!(harness.upgrade_order().is_empty());
}
