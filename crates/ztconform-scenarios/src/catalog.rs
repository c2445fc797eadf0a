//! Built-in ZeroTier One API scenarios.

use semver::Version;
use serde_json::json;

use crate::step::{Expectation, ParamValue, ScenarioGroup, Step};

/// Network the join/leave scenarios use; joining needs no controller.
pub const JOIN_NETWORK_ID: &str = "ff00160016000000";

/// First release serving the `/unstable` controller endpoints.
pub const UNSTABLE_MIN_VERSION: Version = Version::new(1, 12, 3);

/// Top-level groups, in run order.
pub fn zerotier(node_id: &str) -> Vec<ScenarioGroup> {
    vec![get_endpoints(), api_exercise(node_id)]
}

/// Every schema ID the catalog validates against, without duplicates.
pub fn schema_ids(groups: &[ScenarioGroup]) -> Vec<&str> {
    let mut ids: Vec<&str> = Vec::new();
    for id in groups.iter().flat_map(ScenarioGroup::schema_ids) {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

fn get_endpoints() -> ScenarioGroup {
    [
        ("/status", "NodeStatus"),
        ("/controller", "ControllerStatus"),
        ("/network", "JoinedNetworks"),
        ("/peer", "Peers"),
    ]
    .into_iter()
    .fold(ScenarioGroup::new("GET endpoints"), |group, (path, schema)| {
        group.group(ScenarioGroup::new(schema).step(Step::get(format!("GET {path}"), path, schema)))
    })
}

fn network_id() -> ParamValue {
    ParamValue::state("network_id")
}

fn api_exercise(node_id: &str) -> ScenarioGroup {
    const NETWORK: &str = "/controller/network/{network_id}";
    const MEMBERS: &str = "/controller/network/{network_id}/member";
    const MEMBER: &str = "/controller/network/{network_id}/member/{node_id}";

    ScenarioGroup::new("API exercise")
        .step(
            Step::post("create network", "/controller/network", "ControllerNetwork")
                .body(json!({}))
                .extract("/id", "network_id"),
        )
        .step(
            Step::get("get network", NETWORK, "ControllerNetwork")
                .param("network_id", network_id())
                .expect(Expectation::equals("/id", network_id())),
        )
        .step(
            Step::get("list networks", "/controller/network", "ControllerNetworkIDList")
                .expect(Expectation::array_contains("", network_id())),
        )
        .step(
            Step::post("create member", MEMBER, "ControllerNetworkMember")
                .param("network_id", network_id())
                .param("node_id", node_id)
                .body(json!({ "authorized": true }))
                .expect(Expectation::equals("/id", node_id)),
        )
        .step(
            Step::get("list members", MEMBERS, "ControllerNetworkMemberList")
                .param("network_id", network_id())
                .expect(Expectation::has_key("", node_id)),
        )
        .step(
            Step::delete("delete member", MEMBER, "ControllerNetworkMember")
                .param("network_id", network_id())
                .param("node_id", node_id),
        )
        .group(joining_networks())
        .group(unstable_apis(node_id))
        .step(
            Step::delete("delete network", NETWORK, "ControllerNetwork")
                .param("network_id", network_id()),
        )
}

fn joining_networks() -> ScenarioGroup {
    const JOINED: &str = "/network/{network_id}";

    ScenarioGroup::new("Joining networks")
        .seed("network_id", JOIN_NETWORK_ID)
        .step(
            Step::post("join network", JOINED, "JoinedNetwork")
                .param("network_id", network_id())
                .body(json!({})),
        )
        .step(
            Step::get("list joined networks", "/network", "JoinedNetworks")
                .expect(Expectation::array_field_contains("", "id", network_id())),
        )
        .step(
            Step::get("get joined network", JOINED, "JoinedNetwork")
                .param("network_id", network_id())
                .expect(Expectation::equals("/id", network_id())),
        )
        .step(
            Step::delete("leave network", JOINED, "LeaveResult").param("network_id", network_id()),
        )
}

fn unstable_apis(node_id: &str) -> ScenarioGroup {
    const MEMBER: &str = "/controller/network/{network_id}/member/{node_id}";

    ScenarioGroup::new("Unstable APIs")
        .min_version(UNSTABLE_MIN_VERSION)
        .degrade_on_not_found()
        .step(
            Step::post("set member name", MEMBER, "ControllerNetworkMember")
                .param("network_id", network_id())
                .param("node_id", node_id)
                .body(json!({ "authorized": true, "name": "bob" })),
        )
        .step(Step::get(
            "list full networks",
            "/unstable/controller/network",
            "ControllerNetworks",
        ))
        .step(
            Step::get(
                "list full members",
                "/unstable/controller/network/{network_id}/member",
                "ControllerNetworkMemberListFull",
            )
            .param("network_id", network_id()),
        )
        .step(
            Step::get("get member name", MEMBER, "ControllerNetworkMember")
                .param("network_id", network_id())
                .param("node_id", node_id)
                .expect(Expectation::equals("/name", "bob")),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::Node;

    #[test]
    fn test_catalog_order() {
        let groups = zerotier("1122334455");
        let names: Vec<_> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["GET endpoints", "API exercise"]);

        let exercise = &groups[1];
        let order: Vec<_> = exercise
            .children
            .iter()
            .map(|child| match child {
                Node::Step(step) => step.name.as_str(),
                Node::Group(group) => group.name.as_str(),
            })
            .collect();
        assert_eq!(
            order,
            vec![
                "create network",
                "get network",
                "list networks",
                "create member",
                "list members",
                "delete member",
                "Joining networks",
                "Unstable APIs",
                "delete network",
            ]
        );
    }

    #[test]
    fn test_schema_ids() {
        let groups = zerotier("1122334455");
        let ids = schema_ids(&groups);
        for expected in [
            "NodeStatus",
            "ControllerStatus",
            "JoinedNetworks",
            "Peers",
            "ControllerNetwork",
            "ControllerNetworkIDList",
            "ControllerNetworkMember",
            "ControllerNetworkMemberList",
            "JoinedNetwork",
            "LeaveResult",
            "ControllerNetworks",
            "ControllerNetworkMemberListFull",
        ] {
            assert!(ids.contains(&expected), "missing {expected}");
        }
        assert_eq!(ids.len(), 12);
    }

    #[test]
    fn test_unstable_group_is_gated() {
        let groups = zerotier("1122334455");
        let unstable = groups[1]
            .children
            .iter()
            .find_map(|child| match child {
                Node::Group(g) if g.name == "Unstable APIs" => Some(g),
                _ => None,
            })
            .unwrap();
        assert_eq!(unstable.min_version, Some(Version::new(1, 12, 3)));
        assert!(unstable.degrade_on_not_found);
    }
}
