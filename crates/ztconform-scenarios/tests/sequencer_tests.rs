//! Sequencer behaviour against the in-memory ZeroTier fake.

mod common;

use common::{registry, FakeOptions, FakeZeroTier, NODE_ID};
use semver::Version;
use serde_json::json;
use ztconform_core::{
    ApiResponse, HarnessError, Method, NotFoundPolicy, RegistryError, VersionGate,
};
use ztconform_scenarios::catalog;
use ztconform_scenarios::{
    Expectation, GroupReport, Outcome, ParamValue, ScenarioGroup, Sequencer, Step, StepFailure,
};

fn gate(version: &str) -> VersionGate {
    VersionGate::parse(version).unwrap()
}

fn create_network() -> Step {
    Step::post("create network", "/controller/network", "ControllerNetwork")
        .body(json!({}))
        .extract("/id", "network_id")
}

fn network_step(name: &str, method: Method) -> Step {
    Step::new(name, method, "/controller/network/{network_id}", "ControllerNetwork")
        .param("network_id", ParamValue::state("network_id"))
}

fn find<'a>(report: &'a GroupReport, name: &str) -> &'a GroupReport {
    report
        .walk()
        .into_iter()
        .map(|(_, g)| g)
        .find(|g| g.name == name)
        .unwrap_or_else(|| panic!("no group named {name}"))
}

// ============================================================================
// State threading
// ============================================================================

/// The identifier returned by create is used verbatim by the next call
#[tokio::test]
async fn test_created_id_flows_into_next_step() {
    let fake = FakeZeroTier::new();
    let registry = registry();
    let gate = gate("1.14.0");

    let group = ScenarioGroup::new("create then get")
        .step(create_network())
        .step(network_step("get network", Method::Get));
    let report = Sequencer::new(&fake, &registry, &gate).run(&group).await.unwrap();

    assert_eq!(report.outcome, Outcome::Passed);
    let requests = fake.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].param("network_id"), Some("abcd1234"));
    assert_eq!(requests[1].path.to_string(), "/controller/network/abcd1234");
}

/// A missing state key fails the group before anything is sent
#[tokio::test]
async fn test_unresolved_reference_sends_nothing() {
    let fake = FakeZeroTier::new();
    let registry = registry();
    let gate = gate("1.14.0");

    let group = ScenarioGroup::new("orphan").step(network_step("get network", Method::Get));
    let report = Sequencer::new(&fake, &registry, &gate).run(&group).await.unwrap();

    assert_eq!(
        report.outcome,
        Outcome::Failed {
            step: "get network".into(),
            failure: StepFailure::UnresolvedReference {
                key: "network_id".into()
            },
        }
    );
    assert!(fake.calls().is_empty());
    assert_eq!(report.steps[0].status, None);
}

/// An expectation naming an unset key stops the step before its POST goes out
#[tokio::test]
async fn test_unresolved_expectation_sends_nothing() {
    let fake = FakeZeroTier::new();
    let registry = registry();
    let gate = gate("1.14.0");

    let group = ScenarioGroup::new("typo").step(
        Step::post("create network", "/controller/network", "ControllerNetwork")
            .body(json!({}))
            .expect(Expectation::equals("/id", ParamValue::state("never_set"))),
    );
    let report = Sequencer::new(&fake, &registry, &gate).run(&group).await.unwrap();

    assert_eq!(
        report.outcome,
        Outcome::Failed {
            step: "create network".into(),
            failure: StepFailure::UnresolvedReference {
                key: "never_set".into()
            },
        }
    );
    assert!(fake.calls().is_empty());
}

/// Two steps writing the same key in one scope is a conflict
#[tokio::test]
async fn test_state_conflict_between_steps() {
    let fake = FakeZeroTier::new();
    let registry = registry();
    let gate = gate("1.14.0");

    let group = ScenarioGroup::new("conflict").step(create_network()).step(
        Step::post("create another", "/controller/network", "ControllerNetwork")
            .body(json!({}))
            .extract("/id", "network_id"),
    );
    let report = Sequencer::new(&fake, &registry, &gate).run(&group).await.unwrap();

    match report.outcome {
        Outcome::Failed {
            step,
            failure: StepFailure::StateConflict { key, owner },
        } => {
            assert_eq!(step, "create another");
            assert_eq!(key, "network_id");
            assert_eq!(owner, "create network");
        }
        other => panic!("expected state conflict, got {:?}", other),
    }
}

/// A nested seed shadows the parent's key only inside the nested group
#[tokio::test]
async fn test_nested_seed_shadows_parent() {
    let fake = FakeZeroTier::new();
    let registry = registry();
    let gate = gate("1.14.0");

    let group = ScenarioGroup::new("outer")
        .step(create_network())
        .group(
            ScenarioGroup::new("join")
                .seed("network_id", catalog::JOIN_NETWORK_ID)
                .step(
                    Step::post("join", "/network/{network_id}", "JoinedNetwork")
                        .param("network_id", ParamValue::state("network_id"))
                        .body(json!({})),
                ),
        )
        .step(network_step("delete network", Method::Delete));
    let report = Sequencer::new(&fake, &registry, &gate).run(&group).await.unwrap();

    assert_eq!(report.outcome, Outcome::Passed);
    assert_eq!(
        fake.calls(),
        vec![
            "POST /controller/network",
            "POST /network/ff00160016000000",
            "DELETE /controller/network/abcd1234",
        ]
    );
}

/// Promoted keys become visible to later steps of the parent
#[tokio::test]
async fn test_promoted_key_reaches_parent() {
    let fake = FakeZeroTier::new();
    let registry = registry();
    let gate = gate("1.14.0");

    let group = ScenarioGroup::new("outer")
        .group(ScenarioGroup::new("setup").step(create_network()).promote("network_id"))
        .step(network_step("get network", Method::Get));
    let report = Sequencer::new(&fake, &registry, &gate).run(&group).await.unwrap();

    assert_eq!(report.outcome, Outcome::Passed);
    assert_eq!(fake.calls()[1], "GET /controller/network/abcd1234");
}

// ============================================================================
// Failure isolation
// ============================================================================

/// A failed step stops its siblings but not independent groups
#[tokio::test]
async fn test_failure_stops_group_not_siblings() {
    let fake = FakeZeroTier::new();
    fake.respond(Method::Get, "/status", ApiResponse::new(500, None));
    let registry = registry();
    let gate = gate("1.14.0");

    let groups = vec![
        ScenarioGroup::new("broken")
            .step(Step::get("status", "/status", "NodeStatus"))
            .step(Step::get("peers", "/peer", "Peers")),
        ScenarioGroup::new("independent").step(Step::get("controller", "/controller", "ControllerStatus")),
    ];
    let reports = Sequencer::new(&fake, &registry, &gate).run_all(&groups).await.unwrap();

    assert!(matches!(
        reports[0].outcome,
        Outcome::Failed {
            failure: StepFailure::UnexpectedStatus { status: 500, .. },
            ..
        }
    ));
    assert_eq!(reports[0].steps.len(), 1);
    assert_eq!(reports[1].outcome, Outcome::Passed);
    assert_eq!(fake.calls(), vec!["GET /status", "GET /controller"]);
}

/// A non-conforming body reports the schema, the errors and the payload
#[tokio::test]
async fn test_validation_failure_carries_payload() {
    let fake = FakeZeroTier::new();
    fake.respond(
        Method::Get,
        "/status",
        ApiResponse::ok(json!({ "address": NODE_ID, "online": "yes" })),
    );
    let registry = registry();
    let gate = gate("1.14.0");

    let group = ScenarioGroup::new("status").step(Step::get("status", "/status", "NodeStatus"));
    let report = Sequencer::new(&fake, &registry, &gate).run(&group).await.unwrap();

    match report.outcome {
        Outcome::Failed {
            failure:
                StepFailure::Validation {
                    schema,
                    errors,
                    payload,
                },
            ..
        } => {
            assert_eq!(schema, "NodeStatus");
            assert!(errors.iter().any(|e| e.pointer == "/online"));
            assert!(errors.iter().any(|e| e.message.contains("version")));
            assert_eq!(payload.unwrap()["online"], "yes");
        }
        other => panic!("expected validation failure, got {:?}", other),
    }
}

/// An empty success body is invalid rather than a fault
#[tokio::test]
async fn test_empty_body_is_invalid() {
    let fake = FakeZeroTier::new();
    fake.respond(Method::Get, "/peer", ApiResponse::new(200, None));
    let registry = registry();
    let gate = gate("1.14.0");

    let group = ScenarioGroup::new("peers").step(Step::get("peers", "/peer", "Peers"));
    let report = Sequencer::new(&fake, &registry, &gate).run(&group).await.unwrap();

    assert!(matches!(
        report.outcome,
        Outcome::Failed {
            failure: StepFailure::Validation { payload: None, .. },
            ..
        }
    ));
}

/// Deleting twice: the second delete reports not found
#[tokio::test]
async fn test_repeated_delete_reports_not_found() {
    let fake = FakeZeroTier::new();
    let registry = registry();
    let gate = gate("1.14.0");

    let group = ScenarioGroup::new("delete twice")
        .step(create_network())
        .step(network_step("delete network", Method::Delete))
        .step(network_step("delete again", Method::Delete));
    let report = Sequencer::new(&fake, &registry, &gate).run(&group).await.unwrap();

    assert_eq!(
        report.outcome,
        Outcome::Failed {
            step: "delete again".into(),
            failure: StepFailure::NotFound {
                method: Method::Delete,
                path: "/controller/network/abcd1234".into(),
            },
        }
    );
    assert!(report.steps[1].passed);
    assert_eq!(report.steps[2].status, Some(404));
}

/// A failed expectation names what was expected
#[tokio::test]
async fn test_expectation_failure() {
    let fake = FakeZeroTier::new();
    let registry = registry();
    let gate = gate("1.14.0");

    let group = ScenarioGroup::new("expect").step(
        Step::get("list networks", "/controller/network", "ControllerNetworkIDList")
            .expect(Expectation::array_contains("", "nope")),
    );
    let report = Sequencer::new(&fake, &registry, &gate).run(&group).await.unwrap();

    match report.outcome {
        Outcome::Failed {
            failure: StepFailure::Expectation { description, actual },
            ..
        } => {
            assert_eq!(description, "/ contains \"nope\"");
            assert_eq!(actual, Some(json!([])));
        }
        other => panic!("expected expectation failure, got {:?}", other),
    }
}

/// A schema missing from the bundle ends the run before the call
#[tokio::test]
async fn test_missing_schema_is_fatal() {
    let fake = FakeZeroTier::new();
    let registry = registry();
    let gate = gate("1.14.0");

    let groups = vec![ScenarioGroup::new("bad").step(Step::get("status", "/status", "NoSuchSchema"))];
    let err = Sequencer::new(&fake, &registry, &gate)
        .run_all(&groups)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        HarnessError::Registry(RegistryError::SchemaNotFound(ref id)) if id == "NoSuchSchema"
    ));
    assert!(fake.calls().is_empty());
}

// ============================================================================
// Version gate and not-found policy
// ============================================================================

/// An excluded group runs none of its steps
#[tokio::test]
async fn test_gated_group_is_skipped() {
    let fake = FakeZeroTier::new();
    let registry = registry();
    let gate = gate("1.12.2");

    let group = ScenarioGroup::new("unstable")
        .min_version(Version::new(1, 12, 3))
        .step(Step::get("list", "/unstable/controller/network", "ControllerNetworks"));
    let report = Sequencer::new(&fake, &registry, &gate).run(&group).await.unwrap();

    assert_eq!(
        report.outcome,
        Outcome::Skipped {
            reason: "requires >= 1.12.3, target is 1.12.2".into()
        }
    );
    assert!(report.steps.is_empty());
    assert!(fake.calls().is_empty());
}

fn unstable_catalog_run(policy: NotFoundPolicy) -> (GroupReport, Vec<String>) {
    let fake = FakeZeroTier::with_options(FakeOptions {
        unstable_missing: true,
    });
    let registry = registry();
    let gate = gate("1.14.0");
    let groups = catalog::zerotier(NODE_ID);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let reports = runtime
        .block_on(
            Sequencer::new(&fake, &registry, &gate)
                .with_not_found_policy(policy)
                .run_all(&groups),
        )
        .unwrap();
    (reports[1].clone(), fake.calls())
}

/// With the skip policy a 404 from an unstable endpoint skips the group
#[test]
fn test_not_found_skip_policy() {
    let (exercise, calls) = unstable_catalog_run(NotFoundPolicy::Skip);

    let unstable = find(&exercise, "Unstable APIs");
    assert!(matches!(unstable.outcome, Outcome::Skipped { .. }));
    assert_eq!(exercise.outcome, Outcome::Passed);
    // The network is still cleaned up after the skipped group.
    assert_eq!(calls.last().map(String::as_str), Some("DELETE /controller/network/abcd1234"));
}

/// With the default policy the same 404 fails the group
#[test]
fn test_not_found_fail_policy() {
    let (exercise, calls) = unstable_catalog_run(NotFoundPolicy::Fail);

    let unstable = find(&exercise, "Unstable APIs");
    assert!(matches!(
        unstable.outcome,
        Outcome::Failed {
            failure: StepFailure::NotFound { .. },
            ..
        }
    ));
    assert_eq!(
        exercise.outcome,
        Outcome::NestedFailed {
            groups: vec!["Unstable APIs".into()]
        }
    );
    assert_eq!(calls.last().map(String::as_str), Some("DELETE /controller/network/abcd1234"));
}

/// Groups without the degrade flag fail on 404 even under the skip policy
#[tokio::test]
async fn test_skip_policy_requires_flag() {
    let fake = FakeZeroTier::new();
    let registry = registry();
    let gate = gate("1.14.0");

    let group = ScenarioGroup::new("plain").step(Step::get("missing", "/controller/network/zz", "ControllerNetwork"));
    let report = Sequencer::new(&fake, &registry, &gate)
        .with_not_found_policy(NotFoundPolicy::Skip)
        .run(&group)
        .await
        .unwrap();

    assert!(matches!(
        report.outcome,
        Outcome::Failed {
            failure: StepFailure::NotFound { .. },
            ..
        }
    ));
}
