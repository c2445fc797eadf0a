//! Lifecycle of the service instance under test.
//!
//! A provisioned instance is a docker container created for the session and
//! removed exactly once: by [`RunningInstance::stop`], or on drop if the
//! session never got that far.

use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use rand::distr::Alphanumeric;
use rand::Rng;
use tokio::process::Command;
use ztconform_core::config::{API_PORT, LOCAL_CONF, LOCAL_CONF_PATH, SECRET_ENV};
use ztconform_core::{
    ApiRequest, ApiTransport, ContainerSettings, HarnessConfig, HttpClient, Method, ProvisionError,
    TargetEndpoint, TargetMode,
};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const DOCKER: &str = "docker";

/// Where the session's endpoint comes from.
#[derive(Debug, Clone)]
pub enum Provisioner {
    /// Create a disposable container
    Container(ContainerSettings),
    /// Use an instance someone else runs
    External(TargetEndpoint),
}

impl Provisioner {
    pub fn from_config(config: &HarnessConfig) -> Self {
        match &config.target {
            TargetMode::Provision(settings) => Provisioner::Container(settings.clone()),
            TargetMode::External { host, port, token } => {
                Provisioner::External(TargetEndpoint::new(host.clone(), *port, token.clone()))
            }
        }
    }

    /// Bring the endpoint up and wait until it answers.
    pub async fn start(&self) -> Result<RunningInstance, ProvisionError> {
        match self {
            Provisioner::External(endpoint) => {
                tracing::info!(host = %endpoint.host, port = endpoint.port, "Using external instance");
                Ok(RunningInstance {
                    endpoint: endpoint.clone(),
                    container: None,
                })
            }
            Provisioner::Container(settings) => start_container(settings).await,
        }
    }
}

async fn start_container(settings: &ContainerSettings) -> Result<RunningInstance, ProvisionError> {
    let token = settings.token.clone().unwrap_or_else(generate_token);
    tracing::info!(image = %settings.image_ref(), "Creating container");

    let id = docker(DOCKER, &create_args(settings, &token)).await?;
    // Any early return from here on removes the container on drop.
    let mut container = Container::new(DOCKER, id);
    let id = container.id().to_string();

    let mut seed = tempfile::NamedTempFile::new()?;
    seed.write_all(LOCAL_CONF.as_bytes())?;
    seed.flush()?;
    let seed_path = seed.path().display().to_string();
    docker(DOCKER, &["cp".into(), seed_path, format!("{id}:{LOCAL_CONF_PATH}")]).await?;

    docker(DOCKER, &["start".into(), id.clone()]).await?;
    let mapping = docker(DOCKER, &["port".into(), id.clone(), format!("{API_PORT}/tcp")]).await?;
    let port = parse_port_mapping(&mapping)?;
    tracing::info!(container = %short_id(&id), port, "Container started");

    let endpoint = TargetEndpoint::new("127.0.0.1", port, token);
    let client = HttpClient::build(&endpoint, settings.startup_timeout)?;
    if let Err(err) = wait_ready(&client, settings.startup_timeout).await {
        return Err(abandon(&mut container, err).await);
    }

    Ok(RunningInstance {
        endpoint,
        container: Some(container),
    })
}

/// A started endpoint. Dropping it tears a provisioned container down.
#[derive(Debug)]
pub struct RunningInstance {
    endpoint: TargetEndpoint,
    container: Option<Container>,
}

impl RunningInstance {
    pub fn endpoint(&self) -> &TargetEndpoint {
        &self.endpoint
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container.as_ref().and_then(|c| c.id.as_deref())
    }

    /// Release the instance. Safe to call more than once.
    pub async fn stop(&mut self) -> Result<(), ProvisionError> {
        match self.container.take() {
            Some(mut container) => container.remove().await,
            None => Ok(()),
        }
    }
}

/// Remove a container that never became usable, keeping `err` as the
/// reported cause. If removal fails the drop guard retries.
async fn abandon(container: &mut Container, err: ProvisionError) -> ProvisionError {
    if let Err(rm) = container.remove().await {
        tracing::warn!(container = %short_id(container.id()), error = %rm, "Failed to remove container");
    }
    err
}

#[derive(Debug)]
struct Container {
    program: &'static str,
    id: Option<String>,
}

impl Container {
    fn new(program: &'static str, id: String) -> Self {
        Self {
            program,
            id: Some(id),
        }
    }

    fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    /// The id is only forgotten once `rm` succeeded.
    async fn remove(&mut self) -> Result<(), ProvisionError> {
        if let Some(id) = &self.id {
            tracing::info!(container = %short_id(id), "Removing container");
            docker(self.program, &["rm".into(), "-f".into(), id.clone()]).await?;
            self.id = None;
        }
        Ok(())
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            tracing::info!(container = %short_id(&id), "Removing container on drop");
            let _ = std::process::Command::new(self.program)
                .args(["rm", "-f", &id])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
    }
}

/// Poll `GET /status` until it answers 2xx or `timeout` elapses.
pub async fn wait_ready<T: ApiTransport>(transport: &T, timeout: Duration) -> Result<(), ProvisionError> {
    let probe = ApiRequest::simple(Method::Get, "/status")?;
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(ProvisionError::NotReachable { timeout });
        }
        match tokio::time::timeout(remaining, transport.send(probe.clone())).await {
            Ok(Ok(response)) if response.is_success() => {
                tracing::debug!("Instance ready");
                return Ok(());
            }
            Ok(Ok(response)) => tracing::debug!(status = response.status, "Instance not ready"),
            Ok(Err(err)) => tracing::debug!(error = %err, "Instance not reachable yet"),
            Err(_) => return Err(ProvisionError::NotReachable { timeout }),
        }
        tokio::time::sleep(POLL_INTERVAL.min(remaining)).await;
    }
}

fn create_args(settings: &ContainerSettings, token: &str) -> Vec<String> {
    vec![
        "create".into(),
        "--privileged".into(),
        "--cap-add".into(),
        "NET_ADMIN".into(),
        "-p".into(),
        format!("{API_PORT}/tcp"),
        "-e".into(),
        format!("{SECRET_ENV}={token}"),
        settings.image_ref(),
    ]
}

/// First host port in `docker port` output such as
/// `0.0.0.0:49153\n[::]:49153`.
fn parse_port_mapping(output: &str) -> Result<u16, ProvisionError> {
    output
        .lines()
        .filter_map(|line| line.trim().rsplit_once(':'))
        .find_map(|(_, port)| port.parse::<u16>().ok())
        .ok_or_else(|| ProvisionError::PortMapping(output.trim().to_string()))
}

fn generate_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect()
}

fn short_id(id: &str) -> &str {
    &id[..id.len().min(12)]
}

/// Run `<program> <args>`, returning trimmed stdout.
async fn docker(program: &str, args: &[String]) -> Result<String, ProvisionError> {
    let command = args.first().cloned().unwrap_or_default();
    tracing::debug!(command = %command, "Running docker");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|err| ProvisionError::Docker {
            command: command.clone(),
            reason: err.to_string(),
        })?;

    if !output.status.success() {
        return Err(ProvisionError::Docker {
            command,
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use ztconform_core::{ApiResponse, CallError};

    /// Refuses `failures` calls, then answers 200.
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    impl ApiTransport for Flaky {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, CallError> {
            assert_eq!(request.path.to_string(), "/status");
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(CallError::Transport("connection refused".into()))
            } else {
                Ok(ApiResponse::ok(serde_json::json!({ "online": true })))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_retries_until_up() {
        let transport = Flaky {
            failures: 3,
            calls: AtomicUsize::new(0),
        };
        wait_ready(&transport, Duration::from_secs(10)).await.unwrap();
        assert_eq!(transport.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_times_out() {
        let transport = Flaky {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        };
        let err = wait_ready(&transport, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, ProvisionError::NotReachable { .. }));
    }

    #[test]
    fn test_create_args() {
        let settings = ContainerSettings::new("zerotier/zerotier", "1.14.0");
        let args = create_args(&settings, "asdf");
        assert_eq!(args.first().map(String::as_str), Some("create"));
        assert!(args.contains(&"--privileged".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "--cap-add" && w[1] == "NET_ADMIN"));
        assert!(args.contains(&"ZEROTIER_API_SECRET=asdf".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("zerotier/zerotier:1.14.0"));
    }

    #[test]
    fn test_parse_port_mapping() {
        assert_eq!(parse_port_mapping("0.0.0.0:49153\n[::]:49153").unwrap(), 49153);
        assert!(matches!(
            parse_port_mapping(""),
            Err(ProvisionError::PortMapping(_))
        ));
    }

    #[test]
    fn test_generated_token() {
        let token = generate_token();
        assert_eq!(token.len(), 24);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    const MISSING_DOCKER: &str = "/nonexistent/ztconform-docker";

    #[tokio::test]
    async fn test_failed_removal_keeps_id_for_drop() {
        let mut container = Container::new(MISSING_DOCKER, "0123456789abcdef".into());
        let err = container.remove().await.unwrap_err();
        assert!(matches!(err, ProvisionError::Docker { ref command, .. } if command == "rm"));
        assert_eq!(container.id.as_deref(), Some("0123456789abcdef"));
    }

    #[tokio::test]
    async fn test_abandon_reports_readiness_failure() {
        let mut container = Container::new(MISSING_DOCKER, "0123456789abcdef".into());
        let timeout = Duration::from_secs(10);
        let err = abandon(&mut container, ProvisionError::NotReachable { timeout }).await;
        assert!(matches!(err, ProvisionError::NotReachable { timeout: t } if t == timeout));
        assert!(container.id.is_some());
    }

    #[tokio::test]
    async fn test_external_stop_is_noop() {
        let provisioner = Provisioner::External(TargetEndpoint::new("localhost", 9993, "t"));
        let mut instance = provisioner.start().await.unwrap();
        assert_eq!(instance.endpoint().port, 9993);
        assert!(instance.container_id().is_none());
        instance.stop().await.unwrap();
        instance.stop().await.unwrap();
    }
}
