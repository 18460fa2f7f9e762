//! Thin wrapper over `bollard`'s Docker Engine API client
//!
//! Exposes exactly the three operations the watcher needs: a one-shot list of
//! running containers for startup/resync, per-id inspection for label and
//! network detail, and a filtered event stream for the steady-state path.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use bollard::container::ListContainersOptions;
use bollard::system::EventsOptions;
use bollard::Docker;
use futures::stream::{Stream, StreamExt};
use log::debug;

use crate::common::{DevproxyError, Result};

/// A container's network attachment, as seen from the daemon's perspective
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAttachment {
    /// Docker network name (e.g. the compose project's default network)
    pub network: String,
    /// IPv4 address on that network, if assigned
    pub ipv4: Option<Ipv4Addr>,
}

/// A point-in-time snapshot of one container, per the data model's
/// "Container observation" record. Carries no lifetime beyond the
/// reconciliation pass that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerObservation {
    /// Full container id
    pub id: String,
    /// Daemon-reported state (`running`, `exited`, ...)
    pub state: String,
    /// Raw label map
    pub labels: HashMap<String, String>,
    /// Every network this container is attached to
    pub networks: Vec<NetworkAttachment>,
    /// Ports the container image declares as exposed
    pub exposed_ports: Vec<u16>,
}

/// A single lifecycle transition observed on the event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    pub id: String,
    pub action: String,
}

/// Thin async wrapper over a `bollard::Docker` connection
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Connect using the given Unix socket path, or the platform default
    /// (`/var/run/docker.sock` on Linux) if `socket` is `None`.
    pub fn connect(socket: Option<&str>) -> Result<Self> {
        let docker = match socket {
            Some(path) => {
                debug!("connecting to docker daemon over {}", path);
                Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION).map_err(docker_err)?
            }
            None => Docker::connect_with_local_defaults().map_err(docker_err)?,
        };
        Ok(Self { docker })
    }

    /// List every currently running container with full label/network detail
    pub async fn list_running(&self) -> Result<Vec<ContainerObservation>> {
        let mut filters = HashMap::new();
        filters.insert("status".to_string(), vec!["running".to_string()]);

        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: false,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(docker_err)?;

        let mut observations = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let Some(id) = summary.id else { continue };
            if let Some(observation) = self.inspect(&id).await? {
                observations.push(observation);
            }
        }
        Ok(observations)
    }

    /// Inspect a single container by id. Returns `None` if it has since
    /// disappeared (not an error — the caller should simply drop it).
    pub async fn inspect(&self, id: &str) -> Result<Option<ContainerObservation>> {
        let inspect = match self.docker.inspect_container(id, None).await {
            Ok(inspect) => inspect,
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                return Ok(None);
            }
            Err(e) => return Err(docker_err(e)),
        };

        let state = inspect
            .state
            .as_ref()
            .and_then(|s| s.status)
            .map(|s| format!("{:?}", s).to_lowercase())
            .unwrap_or_else(|| "unknown".to_string());

        let labels = inspect
            .config
            .as_ref()
            .and_then(|c| c.labels.clone())
            .unwrap_or_default();

        let networks = inspect
            .network_settings
            .as_ref()
            .and_then(|n| n.networks.as_ref())
            .map(|networks| {
                networks
                    .iter()
                    .map(|(name, endpoint)| NetworkAttachment {
                        network: name.clone(),
                        ipv4: endpoint
                            .as_ref()
                            .and_then(|e| e.ip_address.as_deref())
                            .filter(|ip| !ip.is_empty())
                            .and_then(|ip| ip.parse().ok()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let exposed_ports = inspect
            .config
            .as_ref()
            .and_then(|c| c.exposed_ports.as_ref())
            .map(|ports| {
                ports
                    .keys()
                    .filter_map(|spec| spec.split('/').next())
                    .filter_map(|port| port.parse().ok())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Some(ContainerObservation {
            id: inspect.id.unwrap_or_else(|| id.to_string()),
            state,
            labels,
            networks,
            exposed_ports,
        }))
    }

    /// Stream container lifecycle events, filtered to the four actions the
    /// synchronizer reacts to.
    pub fn events(&self) -> impl Stream<Item = Result<ContainerEvent>> + '_ {
        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);
        filters.insert(
            "event".to_string(),
            vec![
                "start".to_string(),
                "die".to_string(),
                "stop".to_string(),
                "destroy".to_string(),
            ],
        );

        self.docker
            .events(Some(EventsOptions::<String> {
                since: None,
                until: None,
                filters,
            }))
            .map(|item| {
                let message = item.map_err(docker_err)?;
                let id = message.actor.and_then(|a| a.id).unwrap_or_default();
                let action = message.action.unwrap_or_default();
                Ok(ContainerEvent { id, action })
            })
    }
}

fn docker_err(e: bollard::errors::Error) -> DevproxyError {
    DevproxyError::Docker(e.to_string())
}
