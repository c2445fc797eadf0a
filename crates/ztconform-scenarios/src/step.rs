//! Declarative scenario model: steps, expectations and groups.
//!
//! Every API exercise is data. One executor in [`crate::sequencer`]
//! interprets all of it, so adding an endpoint never means new control flow.

use std::collections::BTreeMap;
use std::fmt;

use semver::Version;
use serde_json::Value;
use ztconform_core::Method;

/// A parameter value: fixed text, or a key read from scenario state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Literal(String),
    State(String),
}

impl ParamValue {
    pub fn literal(value: impl Into<String>) -> Self {
        ParamValue::Literal(value.into())
    }

    pub fn state(key: impl Into<String>) -> Self {
        ParamValue::State(key.into())
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Literal(value.to_string())
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Literal(value) => write!(f, "{value:?}"),
            ParamValue::State(key) => write!(f, "${key}"),
        }
    }
}

/// Store the response value at `pointer` in state under `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub pointer: String,
    pub key: String,
}

/// Checks on a response body that already passed schema validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// Value at `pointer` is the string `value`
    Equals { pointer: String, value: ParamValue },
    /// Array at `pointer` contains the string `value`
    ArrayContains { pointer: String, value: ParamValue },
    /// Some object in the array at `pointer` has `field == value`
    ArrayFieldContains {
        pointer: String,
        field: String,
        value: ParamValue,
    },
    /// Object at `pointer` has a member named `key`
    HasKey { pointer: String, key: ParamValue },
}

impl Expectation {
    pub fn equals(pointer: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        Expectation::Equals {
            pointer: pointer.into(),
            value: value.into(),
        }
    }

    pub fn array_contains(pointer: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        Expectation::ArrayContains {
            pointer: pointer.into(),
            value: value.into(),
        }
    }

    pub fn array_field_contains(
        pointer: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<ParamValue>,
    ) -> Self {
        Expectation::ArrayFieldContains {
            pointer: pointer.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn has_key(pointer: impl Into<String>, key: impl Into<ParamValue>) -> Self {
        Expectation::HasKey {
            pointer: pointer.into(),
            key: key.into(),
        }
    }

    /// The parameter this expectation compares against.
    pub fn value(&self) -> &ParamValue {
        match self {
            Expectation::Equals { value, .. }
            | Expectation::ArrayContains { value, .. }
            | Expectation::ArrayFieldContains { value, .. } => value,
            Expectation::HasKey { key, .. } => key,
        }
    }

    /// Check `body` with the parameter already resolved to `expected`.
    pub fn holds(&self, body: &Value, expected: &str) -> bool {
        let at = |pointer: &str| body.pointer(pointer);
        match self {
            Expectation::Equals { pointer, .. } => {
                at(pointer).and_then(Value::as_str) == Some(expected)
            }
            Expectation::ArrayContains { pointer, .. } => at(pointer)
                .and_then(Value::as_array)
                .map(|items| items.iter().any(|item| item.as_str() == Some(expected)))
                .unwrap_or(false),
            Expectation::ArrayFieldContains { pointer, field, .. } => at(pointer)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .any(|item| item.get(field).and_then(Value::as_str) == Some(expected))
                })
                .unwrap_or(false),
            Expectation::HasKey { pointer, .. } => at(pointer)
                .and_then(Value::as_object)
                .map(|map| map.contains_key(expected))
                .unwrap_or(false),
        }
    }

    pub fn describe(&self, expected: &str) -> String {
        let root = |p: &str| if p.is_empty() { "/".to_string() } else { p.to_string() };
        match self {
            Expectation::Equals { pointer, .. } => format!("{} == {expected:?}", root(pointer)),
            Expectation::ArrayContains { pointer, .. } => {
                format!("{} contains {expected:?}", root(pointer))
            }
            Expectation::ArrayFieldContains { pointer, field, .. } => {
                format!("{}[*].{field} contains {expected:?}", root(pointer))
            }
            Expectation::HasKey { pointer, .. } => format!("{} has key {expected:?}", root(pointer)),
        }
    }

    pub fn pointer(&self) -> &str {
        match self {
            Expectation::Equals { pointer, .. }
            | Expectation::ArrayContains { pointer, .. }
            | Expectation::ArrayFieldContains { pointer, .. }
            | Expectation::HasKey { pointer, .. } => pointer,
        }
    }
}

/// One API call plus its schema check, extractions and expectations.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub name: String,
    pub method: Method,
    /// Path template text, parsed when the step runs
    pub path: String,
    pub params: BTreeMap<String, ParamValue>,
    pub query: Vec<(String, ParamValue)>,
    pub body: Option<Value>,
    /// Values written into `body` at JSON pointers before sending
    pub injections: Vec<(String, ParamValue)>,
    /// Schema the response body must conform to
    pub schema: String,
    pub extract: Vec<Extraction>,
    pub expect: Vec<Expectation>,
}

impl Step {
    pub fn new(
        name: impl Into<String>,
        method: Method,
        path: impl Into<String>,
        schema: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            method,
            path: path.into(),
            params: BTreeMap::new(),
            query: Vec::new(),
            body: None,
            injections: Vec::new(),
            schema: schema.into(),
            extract: Vec::new(),
            expect: Vec::new(),
        }
    }

    pub fn get(name: impl Into<String>, path: impl Into<String>, schema: impl Into<String>) -> Self {
        Self::new(name, Method::Get, path, schema)
    }

    pub fn post(name: impl Into<String>, path: impl Into<String>, schema: impl Into<String>) -> Self {
        Self::new(name, Method::Post, path, schema)
    }

    pub fn delete(name: impl Into<String>, path: impl Into<String>, schema: impl Into<String>) -> Self {
        Self::new(name, Method::Delete, path, schema)
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Write a value into the body at `pointer` when the step runs.
    pub fn inject(mut self, pointer: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.injections.push((pointer.into(), value.into()));
        self
    }

    pub fn extract(mut self, pointer: impl Into<String>, key: impl Into<String>) -> Self {
        self.extract.push(Extraction {
            pointer: pointer.into(),
            key: key.into(),
        });
        self
    }

    pub fn expect(mut self, expectation: Expectation) -> Self {
        self.expect.push(expectation);
        self
    }

    /// State keys that must be set before this step issues its call.
    ///
    /// Expectations may also compare against keys this step extracts itself;
    /// those are excluded.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        let expected = self
            .expect
            .iter()
            .map(Expectation::value)
            .filter(move |value| match value {
                ParamValue::State(key) => !self.extract.iter().any(|rule| &rule.key == key),
                ParamValue::Literal(_) => false,
            });
        self.params
            .values()
            .chain(self.query.iter().map(|(_, v)| v))
            .chain(self.injections.iter().map(|(_, v)| v))
            .chain(expected)
            .filter_map(|value| match value {
                ParamValue::State(key) => Some(key.as_str()),
                ParamValue::Literal(_) => None,
            })
    }
}

/// A child of a group.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Step(Step),
    Group(ScenarioGroup),
}

/// Ordered steps and nested groups sharing one state scope and one
/// minimum-version requirement.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioGroup {
    pub name: String,
    pub min_version: Option<Version>,
    /// Entries written into the group's scope before its first child runs
    pub seeds: Vec<(String, String)>,
    /// A 404 may mark this group skipped when the not-found policy allows it
    pub degrade_on_not_found: bool,
    /// Keys copied into the parent scope once the group passes
    pub promote: Vec<String>,
    pub children: Vec<Node>,
}

impl ScenarioGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_version: None,
            seeds: Vec::new(),
            degrade_on_not_found: false,
            promote: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn min_version(mut self, version: Version) -> Self {
        self.min_version = Some(version);
        self
    }

    pub fn seed(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.seeds.push((key.into(), value.into()));
        self
    }

    pub fn degrade_on_not_found(mut self) -> Self {
        self.degrade_on_not_found = true;
        self
    }

    pub fn promote(mut self, key: impl Into<String>) -> Self {
        self.promote.push(key.into());
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.children.push(Node::Step(step));
        self
    }

    pub fn group(mut self, group: ScenarioGroup) -> Self {
        self.children.push(Node::Group(group));
        self
    }

    /// Schema IDs referenced anywhere in this group, nested groups included.
    pub fn schema_ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        self.collect_schema_ids(&mut ids);
        ids
    }

    fn collect_schema_ids<'a>(&'a self, ids: &mut Vec<&'a str>) {
        for child in &self.children {
            match child {
                Node::Step(step) => {
                    if !ids.contains(&step.schema.as_str()) {
                        ids.push(&step.schema);
                    }
                }
                Node::Group(group) => group.collect_schema_ids(ids),
            }
        }
    }

    /// Number of steps, nested groups included.
    pub fn step_count(&self) -> usize {
        self.children
            .iter()
            .map(|child| match child {
                Node::Step(_) => 1,
                Node::Group(group) => group.step_count(),
            })
            .sum()
    }
}
