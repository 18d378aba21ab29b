//! In-memory engine for tests

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{ContainerEngine, ContainerSpec, ContainerState, ContainerSummary, ExecOutput, ExecSpec};
use crate::error::{Error, Result};

type ExecHandler = Arc<dyn Fn(&ExecSpec) -> ExecOutput + Send + Sync>;

/// A file extracted from an uploaded archive
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub path: String,
    pub content: String,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
}

#[derive(Debug, Clone)]
struct MockContainer {
    state: ContainerState,
    spec: Option<ContainerSpec>,
}

/// Engine double that keeps containers in a map
///
/// Exec results come from a programmable handler; commands wrapped in
/// `timeout -s KILL <secs>` that are slower than the bound return 137
/// after sleeping the bound, like a real container would.
pub struct MockEngine {
    containers: Mutex<HashMap<String, MockContainer>>,
    images: Mutex<HashSet<String>>,
    handler: Mutex<Option<ExecHandler>>,
    delays: Mutex<Vec<(String, Duration)>>,
    create_delay: Mutex<Duration>,
    fail_create: Mutex<bool>,
    execs: Mutex<Vec<(String, ExecSpec)>>,
    uploads: Mutex<Vec<(String, UploadedFile)>>,
    built: Mutex<Vec<String>>,
    next_id: AtomicUsize,
    created: AtomicUsize,
    removed: AtomicUsize,
}

impl MockEngine {
    /// Engine with every given image present
    pub fn with_images<I, S>(images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MockEngine {
            containers: Mutex::new(HashMap::new()),
            images: Mutex::new(images.into_iter().map(Into::into).collect()),
            handler: Mutex::new(None),
            delays: Mutex::new(Vec::new()),
            create_delay: Mutex::new(Duration::ZERO),
            fail_create: Mutex::new(false),
            execs: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            built: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            created: AtomicUsize::new(0),
            removed: AtomicUsize::new(0),
        }
    }

    /// Engine with the default per-language images present
    pub fn new() -> Self {
        Self::with_images([
            "code-executor-python:latest",
            "code-executor-c:latest",
            "code-executor-cpp:latest",
            "code-executor-java:latest",
            "code-executor-eiffel:latest",
        ])
    }

    /// Program the exec handler
    pub fn on_exec<F>(&self, handler: F)
    where
        F: Fn(&ExecSpec) -> ExecOutput + Send + Sync + 'static,
    {
        *self.handler.lock().unwrap() = Some(Arc::new(handler));
    }

    /// Execs whose command line contains `needle` take `delay` to finish
    pub fn delay_exec(&self, needle: &str, delay: Duration) {
        self.delays.lock().unwrap().push((needle.to_string(), delay));
    }

    /// Slow down container creation
    pub fn delay_create(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = delay;
    }

    /// Make container creation fail
    pub fn fail_create(&self, fail: bool) {
        *self.fail_create.lock().unwrap() = fail;
    }

    /// Add a container the registry knows nothing about
    pub fn insert_container(&self, name: &str, image: &str) {
        let id = self.allocate_id();
        self.containers.lock().unwrap().insert(
            name.to_string(),
            MockContainer {
                state: ContainerState {
                    id,
                    name: name.to_string(),
                    image: image.to_string(),
                    running: true,
                    status: "running".to_string(),
                    created_at: Some(Utc::now()),
                },
                spec: None,
            },
        );
    }

    /// Simulate a container dying on its own
    pub fn halt(&self, name: &str) {
        if let Some(c) = self.containers.lock().unwrap().get_mut(name) {
            c.state.running = false;
            c.state.status = "exited".to_string();
        }
    }

    /// Simulate a container vanishing from the engine
    pub fn vanish(&self, name: &str) {
        self.containers.lock().unwrap().remove(name);
    }

    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.containers.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn container_spec(&self, name: &str) -> Option<ContainerSpec> {
        self.containers
            .lock()
            .unwrap()
            .get(name)
            .and_then(|c| c.spec.clone())
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn removed_count(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }

    /// Every exec issued so far as (container, spec)
    pub fn execs(&self) -> Vec<(String, ExecSpec)> {
        self.execs.lock().unwrap().clone()
    }

    /// Command lines of the execs joined by spaces
    pub fn exec_lines(&self) -> Vec<String> {
        self.execs
            .lock()
            .unwrap()
            .iter()
            .map(|(_, spec)| spec.cmd.join(" "))
            .collect()
    }

    /// Files extracted from uploaded archives as (container, file)
    pub fn uploads(&self) -> Vec<(String, UploadedFile)> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn uploaded(&self, path: &str) -> Option<UploadedFile> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(_, f)| f.path == path)
            .map(|(_, f)| f.clone())
    }

    pub fn built_images(&self) -> Vec<String> {
        self.built.lock().unwrap().clone()
    }

    fn allocate_id(&self) -> String {
        format!("mock-{:04}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn delay_for(&self, spec: &ExecSpec) -> Option<Duration> {
        let line = spec.cmd.join(" ");
        self.delays
            .lock()
            .unwrap()
            .iter()
            .find(|(needle, _)| line.contains(needle.as_str()))
            .map(|(_, d)| *d)
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Bound of a `timeout -s KILL <secs> ...` wrapper
fn wrapped_timeout(cmd: &[String]) -> Option<Duration> {
    if cmd.first().map(String::as_str) != Some("timeout") {
        return None;
    }
    cmd.iter()
        .skip(1)
        .find_map(|arg| arg.parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.images.lock().unwrap().contains(image))
    }

    async fn build_image(&self, tag: &str, _context_dir: &Path, _dockerfile: &str) -> Result<()> {
        self.built.lock().unwrap().push(tag.to_string());
        self.images.lock().unwrap().insert(tag.to_string());
        Ok(())
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String> {
        let delay = *self.create_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if *self.fail_create.lock().unwrap() {
            return Err(Error::Provision("engine refused to create container".to_string()));
        }

        let mut containers = self.containers.lock().unwrap();
        if containers.contains_key(&spec.name) {
            return Err(Error::Provision(format!(
                "Conflict: container name {} already in use",
                spec.name
            )));
        }

        let id = self.allocate_id();
        containers.insert(
            spec.name.clone(),
            MockContainer {
                state: ContainerState {
                    id: id.clone(),
                    name: spec.name.clone(),
                    image: spec.image.clone(),
                    running: true,
                    status: "running".to_string(),
                    created_at: Some(Utc::now()),
                },
                spec: Some(spec.clone()),
            },
        );
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .get(name)
            .map(|c| c.state.clone()))
    }

    async fn stop(&self, name: &str, _grace: Duration) -> Result<()> {
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("No such container: {}", name)))?;
        container.state.running = false;
        container.state.status = "exited".to_string();
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        match self.containers.lock().unwrap().remove(name) {
            Some(_) => {
                self.removed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(Error::NotFound(format!("No such container: {}", name))),
        }
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<ContainerSummary>> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.state.name.starts_with(prefix))
            .map(|c| ContainerSummary {
                id: c.state.id.clone(),
                name: c.state.name.clone(),
                image: c.state.image.clone(),
                status: c.state.status.clone(),
            })
            .collect())
    }

    async fn exec(&self, name: &str, spec: &ExecSpec) -> Result<ExecOutput> {
        {
            let containers = self.containers.lock().unwrap();
            let container = containers
                .get(name)
                .ok_or_else(|| Error::NotFound(format!("No such container: {}", name)))?;
            if !container.state.running {
                return Err(Error::Container(format!("Container {} is not running", name)));
            }
        }
        self.execs
            .lock()
            .unwrap()
            .push((name.to_string(), spec.clone()));

        if let Some(delay) = self.delay_for(spec) {
            match wrapped_timeout(&spec.cmd) {
                Some(bound) if bound < delay => {
                    tokio::time::sleep(bound).await;
                    return Ok(ExecOutput {
                        stdout: String::new(),
                        stderr: String::new(),
                        exit_code: 137,
                    });
                }
                _ => tokio::time::sleep(delay).await,
            }
        }

        let handler = self.handler.lock().unwrap().clone();
        Ok(match handler {
            Some(handler) => handler(spec),
            None => ExecOutput::default(),
        })
    }

    async fn upload_archive(&self, name: &str, dest_dir: &str, archive: Vec<u8>) -> Result<()> {
        if !self.containers.lock().unwrap().contains_key(name) {
            return Err(Error::NotFound(format!("No such container: {}", name)));
        }

        let mut reader = tar::Archive::new(archive.as_slice());
        let mut files = Vec::new();
        for entry in reader.entries()? {
            let mut entry = entry?;
            let header = entry.header().clone();
            let path = entry.path()?.to_string_lossy().into_owned();
            let mut content = String::new();
            entry.read_to_string(&mut content)?;
            files.push(UploadedFile {
                path: format!("{}/{}", dest_dir.trim_end_matches('/'), path),
                content,
                mode: header.mode()?,
                uid: header.uid()?,
                gid: header.gid()?,
            });
        }

        let mut uploads = self.uploads.lock().unwrap();
        uploads.extend(files.into_iter().map(|f| (name.to_string(), f)));
        Ok(())
    }
}
