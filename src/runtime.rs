//! The container runtime: creating, finding, and destroying containers
//!
//! The runtime owns the containers directory and the in-memory table of
//! live [Container] values. Process lifecycle lives on the container itself;
//! the runtime is the registry and the create/destroy path.

use crate::{
    container::{Config, Container, ContainerRecord, NetworkSettings, State},
    errors::RuntimeError,
};
use chrono::Utc;
use rand::Rng;
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{process::Command, sync::Mutex};

/// Builds the process for a container's entry command
///
/// Implementations own namespace, chroot, and port-forwarding setup; the
/// runtime only requires a spawnable [Command] whose standard streams it can
/// pipe.
pub trait Launcher: Send + Sync {
    fn command(&self, record: &ContainerRecord, rootfs: &Path) -> Command;
}

/// Launcher that runs entry commands directly on the host
///
/// The command gets the assembled root as its working directory instead of
/// being confined to it. Suitable for development and tests.
pub struct HostLauncher;

impl Launcher for HostLauncher {
    fn command(&self, record: &ContainerRecord, rootfs: &Path) -> Command {
        let mut command = Command::new(&record.path);
        command
            .args(&record.args)
            .current_dir(rootfs)
            .env("HOSTNAME", &record.config.hostname);
        command
    }
}

pub struct Runtime {
    root: PathBuf,
    launcher: Arc<dyn Launcher>,
    containers: Mutex<BTreeMap<String, Arc<Container>>>,
}

impl Runtime {
    /// Open a runtime rooted at `root` with the host launcher
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Runtime, RuntimeError> {
        Runtime::with_launcher(root, Arc::new(HostLauncher))
    }

    /// Open a runtime with a specific launcher, restoring containers a
    /// previous daemon left on disk
    pub fn with_launcher<P: AsRef<Path>>(
        root: P,
        launcher: Arc<dyn Launcher>,
    ) -> Result<Runtime, RuntimeError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let mut containers = BTreeMap::new();
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match Container::restore(entry.path(), launcher.clone()) {
                Ok(container) => {
                    containers.insert(container.id().to_string(), Arc::new(container));
                }
                Err(err) => {
                    log::warn!("skipping unreadable container at {:?}: {}", entry.path(), err);
                }
            }
        }
        if !containers.is_empty() {
            log::info!("restored {} containers", containers.len());
        }
        Ok(Runtime {
            root,
            launcher,
            containers: Mutex::new(containers),
        })
    }

    /// A fresh 8-character hex container id
    pub fn generate_id() -> String {
        format!("{:08x}", rand::thread_rng().gen::<u32>())
    }

    /// Materialize a new container on disk; does not start it
    pub async fn create(
        &self,
        id: &str,
        path: &str,
        args: Vec<String>,
        layers: Vec<PathBuf>,
        config: Config,
    ) -> Result<Arc<Container>, RuntimeError> {
        let dir = self.root.join(id);
        if dir.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("container directory {:?} already exists", dir),
            )
            .into());
        }
        fs::create_dir_all(&dir)?;
        let record = ContainerRecord {
            id: id.to_string(),
            created: Utc::now(),
            path: path.to_string(),
            args,
            config,
            layers,
            state: State::default(),
            network: NetworkSettings::default(),
            userdata: BTreeMap::new(),
        };
        let container = Arc::new(Container::new(dir, record, self.launcher.clone())?);
        // make the logs exist so `logs` works before any start
        fs::File::create(container.stdout_log_path())?;
        fs::File::create(container.stderr_log_path())?;
        container.persist_blocking()?;
        self.containers
            .lock()
            .await
            .insert(id.to_string(), container.clone());
        log::info!("created container {}", id);
        Ok(container)
    }

    /// Remove a stopped container, its RW layer, and its record
    pub async fn destroy(&self, container: &Arc<Container>) -> Result<(), RuntimeError> {
        if container.is_running().await {
            return Err(RuntimeError::Busy(container.id().to_string()));
        }
        container.filesystem().umount()?;
        let mut containers = self.containers.lock().await;
        fs::remove_dir_all(container.dir())?;
        containers.remove(container.id());
        log::info!("destroyed container {}", container.id());
        Ok(())
    }

    /// Look a container up by exact id or any unique id prefix
    pub async fn get(&self, name: &str) -> Result<Arc<Container>, RuntimeError> {
        let containers = self.containers.lock().await;
        if let Some(container) = containers.get(name) {
            return Ok(container.clone());
        }
        let mut matches = containers
            .iter()
            .filter(|(id, _)| id.starts_with(name) && !name.is_empty());
        match (matches.next(), matches.next()) {
            (Some((_, container)), None) => Ok(container.clone()),
            (Some(_), Some(_)) => Err(RuntimeError::AmbiguousName(name.to_string())),
            _ => Err(RuntimeError::NoSuchContainer(name.to_string())),
        }
    }

    /// All containers, most recently created first
    pub async fn list(&self) -> Vec<Arc<Container>> {
        let containers = self.containers.lock().await;
        let mut list: Vec<Arc<Container>> = containers.values().cloned().collect();
        list.sort_by(|a, b| b.created().cmp(&a.created()));
        list
    }

    pub async fn count(&self) -> usize {
        self.containers.lock().await.len()
    }
}
