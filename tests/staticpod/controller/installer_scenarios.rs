use staticpod_operator::staticpod::controller::conditions::{
    CONDITION_AVAILABLE, CONDITION_INSTALLER_CONTROLLER_FAILING, CONDITION_NODE_INSTALLER_FAILING,
    CONDITION_PROGRESSING,
};
use staticpod_operator::staticpod::controller::installer::{
    InstallerError, NEW_GENERATION_PENDING_MESSAGE,
};
use staticpod_operator::staticpod::operator::types::{find_condition, NodeStatus};
use staticpod_operator::staticpod::test_support::{RolloutHarness, TEST_IMAGE};

#[test]
fn scenario_failed_status_write_creates_no_installer() {
    let mut harness = RolloutHarness::new(vec![NodeStatus::new("node-a")], 1);
    harness.fail_next_update();

    let err = harness.sync().expect_err("status write rejected");
    assert!(matches!(err, InstallerError::Status(_)));
    assert!(harness.installer_pods().is_empty());
    assert_eq!(harness.node("node-a").target_deployment_generation, 0);

    harness.sync().expect("store recovered");
    assert_eq!(harness.node("node-a").target_deployment_generation, 1);

    harness.sync().expect("installer launched");
    let installers = harness.installer_pods();
    assert_eq!(installers.len(), 1);
    assert_eq!(installers[0].name(), "installer-1-node-a");
    assert_eq!(
        installers[0].spec.containers[0].image.as_deref(),
        Some(TEST_IMAGE)
    );
    assert_eq!(installers[0].spec.node_name.as_deref(), Some("node-a"));
}

#[test]
fn scenario_installer_fake_death() {
    let mut harness = RolloutHarness::new(vec![NodeStatus::new("node-a")], 1);
    harness.sync().expect("target set");
    harness.sync().expect("installer launched");

    harness.fail_installer("installer-1-node-a", None, "fake death");
    harness.sync().expect("failure recorded");

    let node = harness.node("node-a");
    assert_eq!(node.last_failed_deployment_errors, vec!["installer: fake death"]);
    assert_eq!(node.last_failed_deployment_generation, 1);
    assert_eq!(node.target_deployment_generation, 0);

    let status = harness.status();
    let failing = find_condition(&status.conditions, CONDITION_NODE_INSTALLER_FAILING)
        .expect("node installer condition");
    assert!(failing.is_true());
    assert!(failing
        .message
        .as_deref()
        .unwrap_or_default()
        .contains("installer: fake death"));
    let controller = find_condition(&status.conditions, CONDITION_INSTALLER_CONTROLLER_FAILING)
        .expect("controller condition");
    assert!(!controller.is_true());

    harness.sync().expect("failed generation is not retried");
    assert_eq!(harness.node("node-a"), node);
    assert_eq!(harness.installer_pods().len(), 1);
}

#[test]
fn scenario_failed_generation_is_superseded_by_newer_one() {
    let mut harness = RolloutHarness::new(
        vec![
            NodeStatus::at_generation("node-0", 1),
            NodeStatus::at_generation("node-1", 1),
        ],
        2,
    );
    harness.set_mirror_pod("node-0", 1, true);
    harness.set_mirror_pod("node-1", 1, true);

    harness.sync().expect("target set");
    harness.sync().expect("installer launched");
    harness.fail_installer("installer-2-node-0", None, "disk full");
    harness.sync().expect("failure recorded");
    assert_eq!(harness.node("node-0").last_failed_deployment_generation, 2);

    harness.sync().expect("nothing to do");
    assert_eq!(harness.node("node-1"), NodeStatus::at_generation("node-1", 1));

    harness.operator.set_latest_available_generation(3);
    harness.run_to_convergence(50);

    for node in harness.status().node_statuses {
        assert_eq!(node.current_deployment_generation, 3);
        assert_eq!(node.last_failed_deployment_generation, 0);
        assert!(node.last_failed_deployment_errors.is_empty());
    }
}

#[test]
fn scenario_generation_published_mid_install_restarts_rollout() {
    let mut harness = RolloutHarness::new(
        vec![
            NodeStatus::at_generation("node-0", 1),
            NodeStatus::at_generation("node-1", 1),
        ],
        2,
    );
    harness.set_mirror_pod("node-0", 1, true);
    harness.set_mirror_pod("node-1", 1, true);

    harness.sync().expect("target set");
    harness.sync().expect("installer launched");
    harness.operator.set_latest_available_generation(3);
    harness.complete_installers();

    harness.sync().expect("stale install abandoned");
    let node = harness.node("node-0");
    assert_eq!(node.current_deployment_generation, 1);
    assert_eq!(node.last_failed_deployment_generation, 2);
    assert_eq!(node.last_failed_deployment_errors, vec![NEW_GENERATION_PENDING_MESSAGE]);

    harness.run_to_convergence(50);
    assert_eq!(harness.node("node-0").current_deployment_generation, 3);
    assert_eq!(harness.node("node-1").current_deployment_generation, 3);
}

#[test]
fn scenario_conditions_follow_rollout_progress() {
    let mut harness = RolloutHarness::new(
        vec![NodeStatus::new("node-0"), NodeStatus::new("node-1")],
        1,
    );

    harness.sync().expect("first pass");
    let status = harness.status();
    let available = find_condition(&status.conditions, CONDITION_AVAILABLE).expect("available");
    assert!(!available.is_true());
    let progressing =
        find_condition(&status.conditions, CONDITION_PROGRESSING).expect("progressing");
    assert!(progressing.is_true());

    harness.run_to_convergence(50);
    harness.sync().expect("settled pass");

    let status = harness.status();
    let available = find_condition(&status.conditions, CONDITION_AVAILABLE).expect("available");
    assert!(available.is_true());
    assert_eq!(
        available.message.as_deref(),
        Some("2 nodes are active; 2 nodes are at generation 1")
    );
    let progressing =
        find_condition(&status.conditions, CONDITION_PROGRESSING).expect("progressing");
    assert!(!progressing.is_true());
}
