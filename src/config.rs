//! Daemon configuration
//!
//! Every setting has a built-in default and an environment override, so the
//! daemon can run with no arguments. Programs embedding the daemon use
//! [DaemonConfig::configure] to override settings explicitly.

use std::{
    env,
    path::{Path, PathBuf},
};

const DEFAULT_ROOT: &str = "/var/lib/boxd";
const DEFAULT_LISTEN: &str = "127.0.0.1:4242";

/// Settings for a daemon instance
#[derive(Clone, Debug)]
pub struct DaemonConfig {
    /// Directory holding the image store and container state
    pub root: PathBuf,
    /// Address the command socket binds to
    pub listen: String,
    /// Base url that `pull` resolves bare image names against
    pub mirror: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            root: PathBuf::from(DEFAULT_ROOT),
            listen: DEFAULT_LISTEN.to_string(),
            mirror: None,
        }
    }
}

impl DaemonConfig {
    /// Build a configuration from the environment
    ///
    /// Recognized variables: `BOXD_ROOT`, `BOXD_LISTEN`, `BOXD_MIRROR`.
    pub fn from_env() -> Self {
        let mut config = DaemonConfig::default();
        if let Ok(root) = env::var("BOXD_ROOT") {
            config.root = PathBuf::from(root);
        }
        if let Ok(listen) = env::var("BOXD_LISTEN") {
            config.listen = listen;
        }
        if let Ok(mirror) = env::var("BOXD_MIRROR") {
            if !mirror.is_empty() {
                config.mirror = Some(mirror);
            }
        }
        config
    }

    /// Begin building a configuration with explicit settings
    pub fn configure() -> DaemonConfigBuilder {
        DaemonConfigBuilder {
            config: DaemonConfig::default(),
        }
    }

    /// Directory the image store lives under
    pub fn images_root(&self) -> PathBuf {
        self.root.join("images")
    }

    /// Directory container state lives under
    pub fn containers_root(&self) -> PathBuf {
        self.root.join("containers")
    }
}

/// Setup for [DaemonConfig], starting at [DaemonConfig::configure]
#[derive(Clone, Debug)]
pub struct DaemonConfigBuilder {
    config: DaemonConfig,
}

impl DaemonConfigBuilder {
    pub fn root<P: AsRef<Path>>(mut self, root: P) -> Self {
        self.config.root = root.as_ref().to_path_buf();
        self
    }

    pub fn listen<S: Into<String>>(mut self, addr: S) -> Self {
        self.config.listen = addr.into();
        self
    }

    pub fn mirror<S: Into<String>>(mut self, url: S) -> Self {
        self.config.mirror = Some(url.into());
        self
    }

    pub fn build(self) -> DaemonConfig {
        self.config
    }
}
