//! Runs scenario groups against an [`ApiTransport`].
//!
//! Groups run one at a time in declaration order, and so do the children of
//! each group. A failed step stops its own group; nested and top-level
//! sibling groups are unaffected.

use std::collections::BTreeMap;
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use ztconform_core::{
    ApiRequest, ApiResponse, ApiTransport, HarnessResult, NotFoundPolicy,
    PathTemplate, ValidationResult, ValidatorRegistry, VersionGate,
};

use crate::error::StepFailure;
use crate::report::{GroupReport, Outcome, StepRecord};
use crate::state::{Promoted, ScenarioState};
use crate::step::{Node, ParamValue, ScenarioGroup, Step};

/// What a group hands back to whoever ran it.
struct GroupRun {
    report: GroupReport,
    promoted: Vec<Promoted>,
}

pub struct Sequencer<'a, T: ApiTransport> {
    transport: &'a T,
    registry: &'a ValidatorRegistry,
    gate: &'a VersionGate,
    not_found: NotFoundPolicy,
}

impl<'a, T: ApiTransport> Sequencer<'a, T> {
    pub fn new(transport: &'a T, registry: &'a ValidatorRegistry, gate: &'a VersionGate) -> Self {
        Self {
            transport,
            registry,
            gate,
            not_found: NotFoundPolicy::default(),
        }
    }

    pub fn with_not_found_policy(mut self, policy: NotFoundPolicy) -> Self {
        self.not_found = policy;
        self
    }

    /// Run top-level groups in order.
    ///
    /// Step failures are reported per group. Only faults that make every
    /// result untrustworthy, such as a schema missing from the bundle, end
    /// the run with an error.
    pub async fn run_all(&self, groups: &[ScenarioGroup]) -> HarnessResult<Vec<GroupReport>> {
        let mut root = ScenarioState::root();
        let mut reports = Vec::with_capacity(groups.len());
        for group in groups {
            let run = self.run_group(group, &root).await?;
            if !run.promoted.is_empty() {
                // Top-level groups share nothing, so promotion into the root
                // scope can only conflict between identically named steps.
                if let Err(failure) = root.accept(run.promoted) {
                    tracing::warn!(group = %group.name, error = %failure, "Discarding promoted state");
                }
            }
            reports.push(run.report);
        }
        Ok(reports)
    }

    /// Run a single group with a fresh root scope.
    pub async fn run(&self, group: &ScenarioGroup) -> HarnessResult<GroupReport> {
        let root = ScenarioState::root();
        Ok(self.run_group(group, &root).await?.report)
    }

    fn run_group<'s>(
        &'s self,
        group: &'s ScenarioGroup,
        parent: &'s ScenarioState<'s>,
    ) -> BoxFuture<'s, HarnessResult<GroupRun>> {
        async move {
            let decision = self.gate.decide(group.min_version.as_ref());
            if !decision.is_included() {
                let reason = decision.to_string();
                tracing::info!(group = %group.name, reason = %reason, "Skipping group");
                return Ok(GroupRun {
                    report: GroupReport::skipped(&group.name, reason),
                    promoted: Vec::new(),
                });
            }

            tracing::info!(group = %group.name, "Running group");
            let mut scope = parent.child();
            let mut steps = Vec::new();
            let mut children = Vec::new();
            let mut failed_children = Vec::new();
            let mut outcome = None;

            let seed_owner = format!("{} (seed)", group.name);
            for (key, value) in &group.seeds {
                if let Err(failure) = scope.insert(key, value, &seed_owner) {
                    outcome = Some(Outcome::Failed {
                        step: seed_owner.clone(),
                        failure,
                    });
                }
            }

            for child in &group.children {
                if outcome.is_some() {
                    break;
                }
                match child {
                    Node::Step(step) => {
                        let (record, result) = self.execute(step, &mut scope).await?;
                        steps.push(record);
                        if let Err(failure) = result {
                            outcome = Some(self.on_failure(group, step, failure));
                        }
                    }
                    Node::Group(nested) => {
                        let run = self.run_group(nested, &scope).await?;
                        if run.report.outcome.is_failed() {
                            failed_children.push(nested.name.clone());
                        } else if let Err(failure) = scope.accept(run.promoted) {
                            outcome = Some(Outcome::Failed {
                                step: nested.name.clone(),
                                failure,
                            });
                        }
                        children.push(run.report);
                    }
                }
            }

            let outcome = match outcome {
                Some(outcome) => outcome,
                None if !failed_children.is_empty() => Outcome::NestedFailed {
                    groups: failed_children,
                },
                None => Outcome::Passed,
            };

            let promoted = match outcome {
                Outcome::Passed => scope.promoted(&group.promote),
                _ => Vec::new(),
            };

            match &outcome {
                Outcome::Passed => tracing::info!(group = %group.name, "Group passed"),
                Outcome::Skipped { reason } => {
                    tracing::info!(group = %group.name, reason = %reason, "Group skipped")
                }
                Outcome::Failed { step, failure } => {
                    tracing::warn!(group = %group.name, step = %step, error = %failure, "Group failed")
                }
                Outcome::NestedFailed { groups } => {
                    tracing::warn!(group = %group.name, nested = ?groups, "Group failed in nested groups")
                }
            }

            Ok(GroupRun {
                report: GroupReport {
                    name: group.name.clone(),
                    outcome,
                    steps,
                    children,
                },
                promoted,
            })
        }
        .boxed()
    }

    fn on_failure(&self, group: &ScenarioGroup, step: &Step, failure: StepFailure) -> Outcome {
        if failure.is_not_found()
            && group.degrade_on_not_found
            && self.not_found == NotFoundPolicy::Skip
        {
            // Earlier steps of the group may already have changed the target.
            tracing::warn!(
                group = %group.name,
                step = %step.name,
                "Endpoint not found, skipping group; earlier steps may have applied side effects"
            );
            return Outcome::Skipped {
                reason: format!("{failure} (not-found policy: skip)"),
            };
        }
        Outcome::Failed {
            step: step.name.clone(),
            failure,
        }
    }

    /// Issue one step. The outer error is session-fatal; the inner one fails
    /// only the step.
    async fn execute(
        &self,
        step: &Step,
        scope: &mut ScenarioState<'_>,
    ) -> HarnessResult<(StepRecord, Result<(), StepFailure>)> {
        let mut record = StepRecord {
            name: step.name.clone(),
            method: step.method,
            path: step.path.clone(),
            status: None,
            elapsed_ms: 0,
            passed: false,
        };

        let request = match build_request(step, scope) {
            Ok(request) => request,
            Err(failure) => {
                tracing::warn!(step = %step.name, error = %failure, "Step not issued");
                return Ok((record, Err(failure)));
            }
        };
        record.path = request.path.to_string();

        // Resolve before sending so a broken bundle never costs a side effect.
        let validator = self.registry.resolve(&step.schema)?;

        tracing::debug!(step = %step.name, method = %request.method, path = %record.path, "Issuing step");
        let started = Instant::now();
        let sent = self.transport.send(request).await;
        record.elapsed_ms = started.elapsed().as_millis() as u64;

        let response = match sent {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(step = %step.name, error = %err, "Call failed");
                return Ok((record, Err(err.into())));
            }
        };
        record.status = Some(response.status);

        let result = check_response(step, &record.path, response, |body| validator.check(body))
            .and_then(|body| apply_extractions(step, body.as_ref(), scope).map(|_| body))
            .and_then(|body| check_expectations(step, body.as_ref(), scope));

        record.passed = result.is_ok();
        match &result {
            Ok(()) => tracing::info!(
                step = %step.name,
                status = record.status.unwrap_or_default(),
                elapsed_ms = record.elapsed_ms,
                "Step passed"
            ),
            Err(failure) => tracing::warn!(step = %step.name, error = %failure, "Step failed"),
        }
        Ok((record, result))
    }
}

fn resolve(value: &ParamValue, scope: &ScenarioState<'_>) -> Result<String, StepFailure> {
    match value {
        ParamValue::Literal(text) => Ok(text.clone()),
        ParamValue::State(key) => scope
            .get(key)
            .map(str::to_string)
            .ok_or_else(|| StepFailure::UnresolvedReference { key: key.clone() }),
    }
}

/// Resolve every reference and render the request. Nothing is sent if any
/// reference is missing.
fn build_request(step: &Step, scope: &ScenarioState<'_>) -> Result<ApiRequest, StepFailure> {
    if let Some(key) = step.references().find(|key| scope.get(key).is_none()) {
        return Err(StepFailure::UnresolvedReference {
            key: key.to_string(),
        });
    }
    let template = PathTemplate::parse(&step.path)?;

    let params = step
        .params
        .iter()
        .map(|(name, value)| Ok((name.clone(), resolve(value, scope)?)))
        .collect::<Result<BTreeMap<_, _>, StepFailure>>()?;
    let query = step
        .query
        .iter()
        .map(|(name, value)| Ok((name.clone(), resolve(value, scope)?)))
        .collect::<Result<Vec<_>, StepFailure>>()?;

    let mut request = ApiRequest::new(step.method, &template, params)?.with_query(query);

    if let Some(body) = &step.body {
        let mut body = body.clone();
        for (pointer, value) in &step.injections {
            let resolved = resolve(value, scope)?;
            set_pointer(&mut body, pointer, Value::String(resolved)).map_err(|reason| {
                StepFailure::InvalidParameter {
                    name: pointer.clone(),
                    reason,
                }
            })?;
        }
        request = request.with_body(body);
    } else if let Some((pointer, _)) = step.injections.first() {
        return Err(StepFailure::InvalidParameter {
            name: pointer.clone(),
            reason: "step has no body to inject into".to_string(),
        });
    }

    Ok(request)
}

/// Write `value` at `pointer`, creating the last member if it is missing.
fn set_pointer(target: &mut Value, pointer: &str, value: Value) -> Result<(), String> {
    if pointer.is_empty() {
        *target = value;
        return Ok(());
    }
    let (parent, last) = pointer
        .rsplit_once('/')
        .ok_or_else(|| format!("{pointer:?} is not a JSON pointer"))?;
    let last = last.replace("~1", "/").replace("~0", "~");
    match target.pointer_mut(parent) {
        Some(Value::Object(map)) => {
            map.insert(last, value);
            Ok(())
        }
        Some(Value::Array(items)) => {
            let slot = last
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get_mut(index))
                .ok_or_else(|| format!("no array element at {pointer}"))?;
            *slot = value;
            Ok(())
        }
        _ => Err(format!("no object or array at {parent:?}")),
    }
}

fn check_response(
    step: &Step,
    path: &str,
    response: ApiResponse,
    validate: impl FnOnce(Option<&Value>) -> ValidationResult,
) -> Result<Option<Value>, StepFailure> {
    if response.is_not_found() {
        return Err(StepFailure::NotFound {
            method: step.method,
            path: path.to_string(),
        });
    }
    if !response.is_success() {
        return Err(StepFailure::UnexpectedStatus {
            method: step.method,
            path: path.to_string(),
            status: response.status,
            body: response.body,
        });
    }
    match validate(response.body.as_ref()) {
        ValidationResult::Valid => Ok(response.body),
        ValidationResult::Invalid(errors) => Err(StepFailure::Validation {
            schema: step.schema.clone(),
            errors,
            payload: response.body,
        }),
    }
}

fn apply_extractions(
    step: &Step,
    body: Option<&Value>,
    scope: &mut ScenarioState<'_>,
) -> Result<(), StepFailure> {
    for rule in &step.extract {
        let value = body
            .and_then(|b| b.pointer(&rule.pointer))
            .filter(|v| !v.is_null())
            .ok_or_else(|| StepFailure::Extraction {
                pointer: rule.pointer.clone(),
                key: rule.key.clone(),
            })?;
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        tracing::debug!(step = %step.name, key = %rule.key, value = %text, "Extracted state");
        scope.insert(&rule.key, text, &step.name)?;
    }
    Ok(())
}

fn check_expectations(
    step: &Step,
    body: Option<&Value>,
    scope: &ScenarioState<'_>,
) -> Result<(), StepFailure> {
    for expectation in &step.expect {
        let expected = resolve(expectation.value(), scope)?;
        let holds = body.map(|b| expectation.holds(b, &expected)).unwrap_or(false);
        if !holds {
            return Err(StepFailure::Expectation {
                description: expectation.describe(&expected),
                actual: body.and_then(|b| b.pointer(expectation.pointer())).cloned(),
            });
        }
    }
    Ok(())
}
