//! Docker engine backed by bollard

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::BuildImageOptions;
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::{ContainerEngine, ContainerSpec, ContainerState, ContainerSummary, ExecOutput, ExecSpec};
use crate::error::{Error, Result};

/// Docker engine client
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect with local defaults and verify the daemon answers
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Container(format!("Failed to connect to Docker: {}", e)))?;

        docker
            .ping()
            .await
            .map_err(|e| Error::Container(format!("Docker ping failed: {}", e)))?;

        info!("Connected to Docker");

        Ok(DockerEngine { docker })
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> Result<()> {
        self.docker.ping().await?;
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) => match Error::from(e) {
                Error::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn build_image(&self, tag: &str, context_dir: &Path, dockerfile: &str) -> Result<()> {
        info!("Building image {} from {}", tag, context_dir.display());

        let context = tar_context(context_dir)?;

        let options = BuildImageOptions {
            dockerfile: dockerfile.to_string(),
            t: tag.to_string(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self
            .docker
            .build_image(options, None, Some(context.into()));

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(detail) = info.error {
                        return Err(Error::Provision(format!("Image build failed: {}", detail)));
                    }
                    if let Some(line) = info.stream {
                        debug!("Build: {}", line.trim_end());
                    }
                }
                Err(e) => {
                    return Err(Error::Provision(format!("Image build failed: {}", e)));
                }
            }
        }

        info!("Image {} built", tag);
        Ok(())
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String> {
        let container_config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            working_dir: Some(spec.working_dir.clone()),
            user: Some(spec.user.clone()),
            network_disabled: Some(spec.network_disabled),
            labels: Some(spec.labels.clone()),
            host_config: Some(bollard::service::HostConfig {
                memory: spec.memory_bytes,
                nano_cpus: spec.nano_cpus,
                network_mode: spec.network_disabled.then(|| "none".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let created = self
            .docker
            .create_container(Some(create_options), container_config)
            .await
            .map_err(|e| Error::Provision(format!("Failed to create container: {}", e)))?;

        debug!("Created container: {}", spec.name);

        self.docker
            .start_container(&spec.name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::Provision(format!("Failed to start container: {}", e)))?;

        Ok(created.id)
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>> {
        let response = match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return match Error::from(e) {
                    Error::NotFound(_) => Ok(None),
                    other => Err(other),
                }
            }
        };

        let state = response.state.unwrap_or_default();
        let created_at = response
            .created
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));

        Ok(Some(ContainerState {
            id: response.id.unwrap_or_default(),
            name: name.to_string(),
            image: response.config.and_then(|c| c.image).unwrap_or_default(),
            running: state.running.unwrap_or(false),
            status: state
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            created_at,
        }))
    }

    async fn stop(&self, name: &str, grace: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };

        match self.docker.stop_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        self.docker.remove_container(name, Some(options)).await?;

        debug!("Removed container: {}", name);
        Ok(())
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<ContainerSummary>> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![prefix.to_string()]);

        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;

        // The engine's name filter is a substring match
        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let name = c
                    .names
                    .unwrap_or_default()
                    .into_iter()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .find(|n| n.starts_with(prefix))?;
                Some(ContainerSummary {
                    id: c.id.unwrap_or_default(),
                    name,
                    image: c.image.unwrap_or_default(),
                    status: c.state.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn exec(&self, name: &str, spec: &ExecSpec) -> Result<ExecOutput> {
        let options = CreateExecOptions {
            cmd: Some(spec.cmd.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            user: spec.user.clone(),
            working_dir: spec.working_dir.clone(),
            ..Default::default()
        };

        let exec = self.docker.create_exec(name, options).await?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        match self.docker.start_exec(&exec.id, None).await? {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    match chunk {
                        Ok(LogOutput::StdOut { message }) => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(LogOutput::StdErr { message }) => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!("Error reading exec output: {}", e);
                            break;
                        }
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(Error::Exec("Exec started detached".to_string()));
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code: inspect.exit_code.unwrap_or(-1),
        })
    }

    async fn upload_archive(&self, name: &str, dest_dir: &str, archive: Vec<u8>) -> Result<()> {
        let options = UploadToContainerOptions {
            path: dest_dir.to_string(),
            ..Default::default()
        };

        self.docker
            .upload_to_container(name, Some(options), archive.into())
            .await?;

        Ok(())
    }
}

/// Pack a build context directory into a tar stream
fn tar_context(context_dir: &Path) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.append_dir_all(".", context_dir)?;
    builder.into_inner()
}
