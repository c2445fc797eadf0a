//! In-memory stand-in for the ZeroTier One local API plus a matching
//! schema bundle.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde_json::{json, Value};
use ztconform_core::{
    ApiRequest, ApiResponse, ApiTransport, CallError, Method, SchemaBundle, ValidatorRegistry,
};

pub const NODE_ID: &str = "1122334455";

#[derive(Debug, Clone, Default)]
pub struct FakeOptions {
    /// Answer every `/unstable` route with 404, like releases before 1.12.3
    pub unstable_missing: bool,
}

#[derive(Default)]
struct FakeState {
    created: usize,
    networks: BTreeMap<String, Value>,
    members: BTreeMap<(String, String), Value>,
    joined: BTreeMap<String, Value>,
}

pub struct FakeZeroTier {
    options: FakeOptions,
    state: Mutex<FakeState>,
    overrides: Mutex<HashMap<String, ApiResponse>>,
    calls: Mutex<Vec<ApiRequest>>,
}

impl FakeZeroTier {
    pub fn new() -> Self {
        Self::with_options(FakeOptions::default())
    }

    pub fn with_options(options: FakeOptions) -> Self {
        Self {
            options,
            state: Mutex::new(FakeState::default()),
            overrides: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer `METHOD /rendered/path` with a fixed response.
    pub fn respond(&self, method: Method, path: &str, response: ApiResponse) {
        self.overrides
            .lock()
            .insert(format!("{method} {path}"), response);
    }

    /// Every call received, as `METHOD /rendered/path`.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|r| format!("{} {}", r.method, r.path))
            .collect()
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.calls.lock().clone()
    }

    fn handle(&self, request: &ApiRequest) -> ApiResponse {
        let key = format!("{} {}", request.method, request.path);
        if let Some(response) = self.overrides.lock().get(&key) {
            return response.clone();
        }
        if self.options.unstable_missing && request.template.starts_with("/unstable") {
            return not_found();
        }

        let mut state = self.state.lock();
        let network_id = request.param("network_id").unwrap_or_default().to_string();
        let node_id = request.param("node_id").unwrap_or_default().to_string();

        match (request.method, request.template.as_str()) {
            (Method::Get, "/status") => ApiResponse::ok(json!({
                "address": NODE_ID,
                "online": true,
                "version": "1.14.0"
            })),
            (Method::Get, "/controller") => ApiResponse::ok(json!({
                "controller": true,
                "apiVersion": 4,
                "clock": 1700000000000u64
            })),
            (Method::Get, "/peer") => ApiResponse::ok(json!([
                { "address": "778cde7190", "role": "PLANET" }
            ])),

            (Method::Post, "/controller/network") => {
                let id = format!("abcd{}", 1234 + state.created);
                state.created += 1;
                let network = json!({ "id": id, "name": "" });
                state.networks.insert(id, network.clone());
                ApiResponse::ok(network)
            }
            (Method::Get, "/controller/network") => {
                ApiResponse::ok(json!(state.networks.keys().collect::<Vec<_>>()))
            }
            (Method::Get, "/controller/network/{network_id}") => {
                found(state.networks.get(&network_id).cloned())
            }
            (Method::Delete, "/controller/network/{network_id}") => {
                found(state.networks.remove(&network_id))
            }

            (Method::Post, "/controller/network/{network_id}/member/{node_id}") => {
                if !state.networks.contains_key(&network_id) {
                    return not_found();
                }
                let body = request.body.clone().unwrap_or_else(|| json!({}));
                let member = state
                    .members
                    .entry((network_id.clone(), node_id.clone()))
                    .or_insert_with(|| json!({ "id": node_id, "nwid": network_id, "name": "" }));
                if let (Some(target), Some(update)) = (member.as_object_mut(), body.as_object()) {
                    for (k, v) in update {
                        target.insert(k.clone(), v.clone());
                    }
                }
                ApiResponse::ok(member.clone())
            }
            (Method::Get, "/controller/network/{network_id}/member/{node_id}") => {
                found(state.members.get(&(network_id, node_id)).cloned())
            }
            (Method::Delete, "/controller/network/{network_id}/member/{node_id}") => {
                found(state.members.remove(&(network_id, node_id)))
            }
            (Method::Get, "/controller/network/{network_id}/member") => {
                let list: serde_json::Map<String, Value> = state
                    .members
                    .keys()
                    .filter(|(nwid, _)| *nwid == network_id)
                    .map(|(_, id)| (id.clone(), json!(1)))
                    .collect();
                ApiResponse::ok(Value::Object(list))
            }

            (Method::Post, "/network/{network_id}") => {
                let network = json!({ "id": network_id, "status": "REQUESTING_CONFIGURATION" });
                state.joined.insert(network_id, network.clone());
                ApiResponse::ok(network)
            }
            (Method::Get, "/network") => {
                ApiResponse::ok(json!(state.joined.values().collect::<Vec<_>>()))
            }
            (Method::Get, "/network/{network_id}") => {
                found(state.joined.get(&network_id).cloned())
            }
            (Method::Delete, "/network/{network_id}") => match state.joined.remove(&network_id) {
                Some(_) => ApiResponse::ok(json!({ "result": true })),
                None => not_found(),
            },

            (Method::Get, "/unstable/controller/network") => {
                ApiResponse::ok(json!(state.networks.values().collect::<Vec<_>>()))
            }
            (Method::Get, "/unstable/controller/network/{network_id}/member") => {
                let data: Vec<_> = state
                    .members
                    .iter()
                    .filter(|((nwid, _), _)| *nwid == network_id)
                    .map(|(_, member)| member.clone())
                    .collect();
                ApiResponse::ok(json!({ "data": data }))
            }

            _ => not_found(),
        }
    }
}

impl ApiTransport for FakeZeroTier {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, CallError> {
        self.calls.lock().push(request.clone());
        Ok(self.handle(&request))
    }
}

fn not_found() -> ApiResponse {
    ApiResponse::new(404, Some(json!({ "error": "not found" })))
}

fn found(value: Option<Value>) -> ApiResponse {
    value.map(ApiResponse::ok).unwrap_or_else(not_found)
}

/// Schemas for every route the fake serves.
pub fn bundle() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$defs": {
            "NodeStatus": {
                "$id": "NodeStatus.json",
                "type": "object",
                "properties": {
                    "address": { "type": "string" },
                    "online": { "type": "boolean" },
                    "version": { "type": "string" }
                },
                "required": ["address", "online", "version"]
            },
            "ControllerStatus": {
                "$id": "ControllerStatus.json",
                "type": "object",
                "properties": { "controller": { "type": "boolean" } },
                "required": ["controller"]
            },
            "Peer": {
                "$id": "Peer.json",
                "type": "object",
                "properties": { "address": { "type": "string" } },
                "required": ["address"]
            },
            "Peers": { "$id": "Peers.json", "type": "array", "items": { "$ref": "Peer.json" } },
            "ControllerNetwork": {
                "$id": "ControllerNetwork.json",
                "type": "object",
                "properties": { "id": { "type": "string", "minLength": 1 } },
                "required": ["id"]
            },
            "ControllerNetworks": {
                "$id": "ControllerNetworks.json",
                "type": "array",
                "items": { "$ref": "ControllerNetwork.json" }
            },
            "ControllerNetworkIDList": {
                "$id": "ControllerNetworkIDList.json",
                "type": "array",
                "items": { "type": "string" }
            },
            "ControllerNetworkMember": {
                "$id": "ControllerNetworkMember.json",
                "type": "object",
                "properties": {
                    "id": { "type": "string" },
                    "nwid": { "type": "string" },
                    "name": { "type": "string" },
                    "authorized": { "type": "boolean" }
                },
                "required": ["id", "nwid"]
            },
            "ControllerNetworkMemberList": {
                "$id": "ControllerNetworkMemberList.json",
                "type": "object",
                "additionalProperties": { "type": "integer" }
            },
            "ControllerNetworkMemberListFull": {
                "$id": "ControllerNetworkMemberListFull.json",
                "type": "object",
                "properties": {
                    "data": { "type": "array", "items": { "$ref": "ControllerNetworkMember.json" } }
                },
                "required": ["data"]
            },
            "JoinedNetwork": {
                "$id": "JoinedNetwork.json",
                "type": "object",
                "properties": { "id": { "type": "string" }, "status": { "type": "string" } },
                "required": ["id", "status"]
            },
            "JoinedNetworks": {
                "$id": "JoinedNetworks.json",
                "type": "array",
                "items": { "$ref": "JoinedNetwork.json" }
            },
            "LeaveResult": {
                "$id": "LeaveResult.json",
                "type": "object",
                "properties": { "result": { "type": "boolean" } },
                "required": ["result"]
            }
        }
    })
}

pub fn registry() -> ValidatorRegistry {
    ValidatorRegistry::new(SchemaBundle::from_value(bundle()).expect("test bundle loads"))
}
