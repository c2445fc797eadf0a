//! Conformance session: bundle, instance, scenarios and report in one place.

use ztconform_core::{
    ApiRequest, ApiResponse, ApiTransport, HarnessConfig, HarnessError, HarnessResult, HttpClient,
    Method, TargetEndpoint, ValidatorRegistry, VersionGate,
};

use crate::catalog;
use crate::instance::{Provisioner, RunningInstance};
use crate::report::RunReport;
use crate::sequencer::Sequencer;
use crate::step::ScenarioGroup;

pub struct ConformanceSession {
    config: HarnessConfig,
    groups: Vec<ScenarioGroup>,
}

impl ConformanceSession {
    /// A session running the built-in catalog.
    pub fn new(config: HarnessConfig) -> Self {
        let groups = catalog::zerotier(&config.node_id);
        Self { config, groups }
    }

    pub fn with_groups(mut self, groups: Vec<ScenarioGroup>) -> Self {
        self.groups = groups;
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn groups(&self) -> &[ScenarioGroup] {
        &self.groups
    }

    /// Load and preflight the bundle so missing schemas fail before any
    /// instance is started.
    pub fn load_registry(&self) -> HarnessResult<ValidatorRegistry> {
        let registry = ValidatorRegistry::load(&self.config.schema_bundle)?;
        let resolved = registry.preflight(catalog::schema_ids(&self.groups))?;
        tracing::info!(schemas = resolved, "Resolved scenario schemas");
        Ok(registry)
    }

    /// Full run: load bundle, provision, run every group, tear down.
    ///
    /// The instance is stopped on every path once it has started.
    pub async fn run(&self) -> HarnessResult<RunReport> {
        let registry = self.load_registry()?;
        let mut instance = self.start_instance().await?;

        let result = match HttpClient::build(instance.endpoint(), self.config.request_timeout) {
            Ok(client) => self.run_with(&client, &registry).await,
            Err(err) => Err(err.into()),
        };

        if let Err(err) = instance.stop().await {
            tracing::warn!(error = %err, "Teardown failed");
        }
        result
    }

    /// Run every group over an existing transport.
    pub async fn run_with<T: ApiTransport>(
        &self,
        transport: &T,
        registry: &ValidatorRegistry,
    ) -> HarnessResult<RunReport> {
        let gate = VersionGate::new(self.config.target_version.clone());
        tracing::info!(
            version = %gate.target(),
            groups = self.groups.len(),
            not_found = %self.config.not_found,
            "Starting conformance run"
        );

        let reports = Sequencer::new(transport, registry, &gate)
            .with_not_found_policy(self.config.not_found)
            .run_all(&self.groups)
            .await?;

        let report = RunReport::new(gate.target().to_string(), reports);
        let summary = report.summary();
        tracing::info!(
            passed = summary.passed,
            failed = summary.failed,
            skipped = summary.skipped,
            "Conformance run finished"
        );
        Ok(report)
    }

    /// Provision (or attach to) the instance and fetch `/status` once.
    pub async fn status(&self) -> HarnessResult<(TargetEndpoint, ApiResponse)> {
        let mut instance = self.start_instance().await?;
        let endpoint = instance.endpoint().clone();

        let result = async {
            let client = HttpClient::build(&endpoint, self.config.request_timeout)?;
            let probe = ApiRequest::simple(Method::Get, "/status")?;
            Ok::<_, HarnessError>(client.send(probe).await?)
        }
        .await;

        if let Err(err) = instance.stop().await {
            tracing::warn!(error = %err, "Teardown failed");
        }
        result.map(|response| (endpoint, response))
    }

    async fn start_instance(&self) -> HarnessResult<RunningInstance> {
        tracing::info!(mode = %self.config.target.describe(), "Starting instance");
        Ok(Provisioner::from_config(&self.config).start().await?)
    }
}
