//! Docker-backed instance provider.
//!
//! Every instance is a long-running container whose runtime port is published
//! on a freshly picked loopback port.

use crate::{ExecutorError, Result};
use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use faas_common::{FunctionTemplate, InstanceProvider, LaunchedInstance, Result as CommonResult};
use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const LOOPBACK: &str = "127.0.0.1";

#[derive(Clone)]
pub struct DockerProvider {
    docker_client: Arc<Docker>,
    // Distinguishes containers of this process from leftovers of earlier runs.
    run_id: String,
}

impl DockerProvider {
    pub fn new(docker_client: Arc<Docker>) -> Self {
        let run_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            docker_client,
            run_id,
        }
    }

    pub fn container_name(&self, name: &str) -> String {
        format!("faas-{}-{}", self.run_id, name)
    }

    #[instrument(skip(self, template), fields(image = %template.image))]
    async fn launch_inner(&self, template: &FunctionTemplate, name: &str) -> Result<LaunchedInstance> {
        let host_port = pick_free_port()?;
        let container_port = format!("{}/tcp", template.port);

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(container_port.clone(), HashMap::new());

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            container_port,
            Some(vec![PortBinding {
                host_ip: Some(LOOPBACK.to_string()),
                host_port: Some(host_port.to_string()),
            }]),
        );

        let config = ContainerConfig {
            image: Some(template.image.clone()),
            cmd: if template.command.is_empty() {
                None
            } else {
                Some(template.command.clone())
            },
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        let container_name = self.container_name(name);
        let created = self
            .docker_client
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name.clone(),
                    ..Default::default()
                }),
                config,
            )
            .await
            .map_err(ExecutorError::CreationFailed)?;
        debug!(container_id = %created.id, name = %container_name, "Container created");

        if let Err(e) = self
            .docker_client
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            // A created but never started container is invisible to the pool.
            if let Err(cleanup) = self.force_remove(&created.id).await {
                warn!(container_id = %created.id, error = %cleanup, "Failed to remove container after start failure");
            }
            return Err(ExecutorError::StartFailed(e));
        }

        info!(container_id = %created.id, %host_port, "Container started");
        Ok(LaunchedInstance {
            provider_id: created.id,
            invoke_url: format!("http://{}:{}{}", LOOPBACK, host_port, template.invoke_path),
            ready_url: format!("http://{}:{}{}", LOOPBACK, host_port, template.ready_path),
        })
    }

    async fn force_remove(&self, container_id: &str) -> std::result::Result<(), bollard::errors::Error> {
        self.docker_client
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
    }
}

#[async_trait]
impl InstanceProvider for DockerProvider {
    async fn launch(&self, template: &FunctionTemplate, name: &str) -> CommonResult<LaunchedInstance> {
        Ok(self.launch_inner(template, name).await?)
    }

    async fn stop(&self, provider_id: &str) -> CommonResult<()> {
        self.docker_client
            .stop_container(provider_id, None::<StopContainerOptions>)
            .await
            .map_err(ExecutorError::StopFailed)?;
        debug!(container_id = %provider_id, "Container stopped");
        Ok(())
    }

    async fn remove(&self, provider_id: &str) -> CommonResult<()> {
        self.force_remove(provider_id)
            .await
            .map_err(ExecutorError::RemovalFailed)?;
        debug!(container_id = %provider_id, "Container removed");
        Ok(())
    }
}

/// Asks the OS for an unused loopback port. The listener is dropped right away,
/// so the port is only very likely (not guaranteed) to still be free when
/// docker binds it.
pub fn pick_free_port() -> Result<u16> {
    let listener = TcpListener::bind((LOOPBACK, 0)).map_err(ExecutorError::PortUnavailable)?;
    let port = listener
        .local_addr()
        .map_err(ExecutorError::PortUnavailable)?
        .port();
    Ok(port)
}
