//! Container records and their run state
//!
//! A container is a directory on disk (record, RW layer, mount root, logs)
//! plus the live plumbing of a possibly running process. The record is the
//! serialized truth; the watch channels carry what cannot be serialized:
//! run phase transitions and log growth, which back `wait` and the attach
//! plane.

use crate::{
    errors::RuntimeError,
    filesystem::Filesystem,
    runtime::Launcher,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs, io,
    os::unix::process::ExitStatusExt,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    process::{Child, ChildStderr, ChildStdin, ChildStdout},
    sync::{watch, Mutex},
};

/// How long `stop` waits after TERM before escalating to KILL
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

const RECORD_FILE: &str = "record.json";
const STDOUT_LOG: &str = "stdout.log";
const STDERR_LOG: &str = "stderr.log";

/// Settings a container is created with
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    pub hostname: String,
    /// Private ports the entry command expects to expose
    pub ports: Vec<u16>,
    pub user: String,
    pub tty: bool,
    pub open_stdin: bool,
}

/// Run state, persisted across daemon restarts
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct State {
    pub running: bool,
    pub pid: Option<u32>,
    pub exit_code: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl State {
    /// One-word-ish status for listings
    pub fn status_line(&self, now: DateTime<Utc>) -> String {
        if self.running {
            match self.started_at {
                Some(started) => format!("Up {}", crate::server::human_duration(now - started)),
                None => "Up".to_string(),
            }
        } else if self.started_at.is_some() {
            format!("Exit {}", self.exit_code)
        } else {
            "Created".to_string()
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// private port -> public port, both as decimal strings
    pub port_mapping: BTreeMap<String, String>,
}

/// The serialized container record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    pub created: DateTime<Utc>,
    /// Entry command path
    pub path: String,
    /// Entry command arguments
    pub args: Vec<String>,
    pub config: Config,
    /// Resolved layer directories, top to bottom
    pub layers: Vec<PathBuf>,
    pub state: State,
    pub network: NetworkSettings,
    /// Free-form per-container metadata; "image" and "comment" are reserved
    pub userdata: BTreeMap<String, String>,
}

/// Phases a container moves through; restart loops back to Running
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunPhase {
    Created,
    Running,
    Exited(i32),
}

/// A container on disk plus its live process plumbing
pub struct Container {
    id: String,
    created: DateTime<Utc>,
    dir: PathBuf,
    fs: Filesystem,
    launcher: Arc<dyn Launcher>,
    record: Mutex<ContainerRecord>,
    stdin: Mutex<Option<ChildStdin>>,
    phase_tx: watch::Sender<RunPhase>,
    phase_rx: watch::Receiver<RunPhase>,
    stdout_len_tx: watch::Sender<u64>,
    stdout_len_rx: watch::Receiver<u64>,
    stderr_len_tx: watch::Sender<u64>,
    stderr_len_rx: watch::Receiver<u64>,
    /// Listeners reserving the allocated public ports while running
    port_guards: std::sync::Mutex<Vec<std::net::TcpListener>>,
}

impl Container {
    pub(crate) fn new(
        dir: PathBuf,
        record: ContainerRecord,
        launcher: Arc<dyn Launcher>,
    ) -> Result<Container, RuntimeError> {
        let fs = Filesystem::new(&dir, record.layers.clone())?;
        let phase = if record.state.started_at.is_some() {
            RunPhase::Exited(record.state.exit_code)
        } else {
            RunPhase::Created
        };
        let (phase_tx, phase_rx) = watch::channel(phase);
        let (stdout_len_tx, stdout_len_rx) = watch::channel(file_len(&dir.join(STDOUT_LOG)));
        let (stderr_len_tx, stderr_len_rx) = watch::channel(file_len(&dir.join(STDERR_LOG)));
        Ok(Container {
            id: record.id.clone(),
            created: record.created,
            dir,
            fs,
            launcher,
            record: Mutex::new(record),
            stdin: Mutex::new(None),
            phase_tx,
            phase_rx,
            stdout_len_tx,
            stdout_len_rx,
            stderr_len_tx,
            stderr_len_rx,
            port_guards: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn filesystem(&self) -> &Filesystem {
        &self.fs
    }

    pub fn stdout_log_path(&self) -> PathBuf {
        self.dir.join(STDOUT_LOG)
    }

    pub fn stderr_log_path(&self) -> PathBuf {
        self.dir.join(STDERR_LOG)
    }

    /// Snapshot of the serialized record
    pub async fn record(&self) -> ContainerRecord {
        self.record.lock().await.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.record.lock().await.state.running
    }

    pub async fn get_user_data(&self, key: &str) -> String {
        self.record
            .lock()
            .await
            .userdata
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn set_user_data(&self, key: &str, value: &str) -> Result<(), RuntimeError> {
        let mut record = self.record.lock().await;
        record.userdata.insert(key.to_string(), value.to_string());
        self.save_record(&record)
    }

    /// The public port mapped to a private port, while one is recorded
    pub async fn public_port(&self, private: &str) -> Result<String, RuntimeError> {
        let record = self.record.lock().await;
        record
            .network
            .port_mapping
            .get(private)
            .cloned()
            .ok_or_else(|| RuntimeError::NoSuchPort {
                id: self.id.clone(),
                private: private.to_string(),
            })
    }

    /// Mount and spawn the entry command
    ///
    /// Allocates a public port for each configured private port and wires
    /// the three standard streams: stdin is held for writers, stdout and
    /// stderr are tee'd into the append-only logs that feed live followers.
    pub async fn start(self: Arc<Self>) -> Result<(), RuntimeError> {
        let mut record = self.record.lock().await;
        if record.state.running {
            return Err(RuntimeError::AlreadyRunning(self.id.clone()));
        }
        self.fs.mount()?;

        let mut guards = Vec::new();
        record.network.port_mapping.clear();
        for private in record.config.ports.clone() {
            let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
            let public = listener.local_addr()?.port();
            record
                .network
                .port_mapping
                .insert(private.to_string(), public.to_string());
            guards.push(listener);
        }

        let mut command = self.launcher.command(&record, self.fs.root());
        command
            .stdin(if record.config.open_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                record.network.port_mapping.clear();
                return Err(err.into());
            }
        };
        let stdout = child.stdout.take().expect("child stdout is piped");
        let stderr = child.stderr.take().expect("child stderr is piped");
        *self.stdin.lock().await = child.stdin.take();

        record.state.running = true;
        record.state.pid = child.id();
        record.state.started_at = Some(Utc::now());
        record.state.finished_at = None;
        self.save_record(&record)?;
        drop(record);

        *self.port_guards.lock().unwrap() = guards;
        let _ = self.phase_tx.send(RunPhase::Running);
        log::info!("container {} started", self.id);

        let this = self.clone();
        tokio::spawn(async move {
            this.supervise(child, stdout, stderr).await;
        });
        Ok(())
    }

    /// Pump both output streams into their logs, reap the child, finalize
    async fn supervise(self: Arc<Self>, mut child: Child, stdout: ChildStdout, stderr: ChildStderr) {
        let out_pump = pump_stream(stdout, self.stdout_log_path(), &self.stdout_len_tx);
        let err_pump = pump_stream(stderr, self.stderr_log_path(), &self.stderr_len_tx);
        let (status, out_pumped, err_pumped) = tokio::join!(child.wait(), out_pump, err_pump);
        if let Err(err) = out_pumped {
            log::warn!("container {} stdout pump failed: {}", self.id, err);
        }
        if let Err(err) = err_pumped {
            log::warn!("container {} stderr pump failed: {}", self.id, err);
        }
        let code = match status {
            Ok(status) => exit_code(status),
            Err(err) => {
                log::warn!("container {} could not be reaped: {}", self.id, err);
                255
            }
        };

        let mut record = self.record.lock().await;
        record.state.running = false;
        record.state.pid = None;
        record.state.exit_code = code;
        record.state.finished_at = Some(Utc::now());
        if let Err(err) = self.save_record(&record) {
            log::error!("container {} record was not persisted: {}", self.id, err);
        }
        drop(record);

        self.stdin.lock().await.take();
        self.port_guards.lock().unwrap().clear();
        let _ = self.phase_tx.send(RunPhase::Exited(code));
        log::info!("container {} exited with code {}", self.id, code);
    }

    /// Ask the process to terminate, escalating to KILL after [STOP_TIMEOUT]
    pub async fn stop(&self) -> Result<(), RuntimeError> {
        let pid = self.running_pid().await?;
        signal(pid, libc::SIGTERM)?;
        if tokio::time::timeout(STOP_TIMEOUT, self.wait_for_exit())
            .await
            .is_err()
        {
            log::warn!(
                "container {} ignored TERM for {:?}, killing it",
                self.id,
                STOP_TIMEOUT
            );
            signal(pid, libc::SIGKILL).ok();
            self.wait_for_exit().await;
        }
        Ok(())
    }

    /// Terminate immediately
    pub async fn kill(&self) -> Result<(), RuntimeError> {
        let pid = self.running_pid().await?;
        signal(pid, libc::SIGKILL)?;
        self.wait_for_exit().await;
        Ok(())
    }

    pub async fn restart(self: Arc<Self>) -> Result<(), RuntimeError> {
        self.stop().await?;
        self.start().await
    }

    /// Block until the inner process terminates and return its exit code
    ///
    /// Every concurrent waiter sees the same code. A container that is not
    /// running reports its last exit code immediately.
    pub async fn wait(&self) -> i32 {
        let mut rx = self.phase_rx.clone();
        loop {
            let phase = *rx.borrow_and_update();
            match phase {
                RunPhase::Exited(code) => return code,
                RunPhase::Created => return self.record.lock().await.state.exit_code,
                RunPhase::Running => {}
            }
            if rx.changed().await.is_err() {
                return self.record.lock().await.state.exit_code;
            }
        }
    }

    async fn wait_for_exit(&self) {
        let mut rx = self.phase_rx.clone();
        loop {
            if matches!(*rx.borrow_and_update(), RunPhase::Exited(_)) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Write into the container's stdin
    pub async fn write_stdin(&self, data: &[u8]) -> Result<(), RuntimeError> {
        let mut stdin = self.stdin.lock().await;
        match stdin.as_mut() {
            Some(writer) => {
                writer.write_all(data).await?;
                writer.flush().await?;
                Ok(())
            }
            None => Err(RuntimeError::StdinNotOpen(self.id.clone())),
        }
    }

    /// Propagate end-of-input to the container without touching its outputs
    pub async fn close_stdin(&self) {
        self.stdin.lock().await.take();
    }

    /// Follow the stdout log from its current end
    pub fn stdout_pipe(&self) -> LogFollower {
        LogFollower::new(
            self.stdout_log_path(),
            self.stdout_len_rx.clone(),
            self.phase_rx.clone(),
        )
    }

    /// Follow the stderr log from its current end
    pub fn stderr_pipe(&self) -> LogFollower {
        LogFollower::new(
            self.stderr_log_path(),
            self.stderr_len_rx.clone(),
            self.phase_rx.clone(),
        )
    }

    /// Open the persisted stdout log for reading
    pub async fn stdout_log(&self) -> io::Result<tokio::fs::File> {
        tokio::fs::File::open(self.stdout_log_path()).await
    }

    /// Open the persisted stderr log for reading
    pub async fn stderr_log(&self) -> io::Result<tokio::fs::File> {
        tokio::fs::File::open(self.stderr_log_path()).await
    }

    async fn running_pid(&self) -> Result<u32, RuntimeError> {
        let record = self.record.lock().await;
        if !record.state.running {
            return Err(RuntimeError::NotRunning(self.id.clone()));
        }
        record
            .state
            .pid
            .ok_or_else(|| RuntimeError::NotRunning(self.id.clone()))
    }

    fn save_record(&self, record: &ContainerRecord) -> Result<(), RuntimeError> {
        let data = serde_json::to_vec(record)?;
        let path = self.dir.join(RECORD_FILE);
        let temp = path.with_extension("tmp");
        fs::write(&temp, &data)?;
        fs::rename(&temp, &path)?;
        Ok(())
    }
}

impl Container {
    /// Rebuild a container from the record a previous daemon left on disk
    ///
    /// Any process the old daemon supervised is gone, so a record claiming
    /// to be running is corrected before use.
    pub(crate) fn restore(dir: PathBuf, launcher: Arc<dyn Launcher>) -> Result<Container, RuntimeError> {
        let data = fs::read(dir.join(RECORD_FILE))?;
        let mut record: ContainerRecord = serde_json::from_slice(&data)?;
        if record.state.running {
            log::warn!(
                "container {} was recorded as running, marking it exited",
                record.id
            );
            record.state.running = false;
            record.state.pid = None;
        }
        let container = Container::new(dir, record, launcher)?;
        container.persist_blocking()?;
        Ok(container)
    }

    /// Write the current record out; used right after construction
    pub(crate) fn persist_blocking(&self) -> Result<(), RuntimeError> {
        let record = self
            .record
            .try_lock()
            .expect("record is unshared during construction");
        self.save_record(&record)
    }
}

fn file_len(path: &Path) -> u64 {
    fs::metadata(path).map(|meta| meta.len()).unwrap_or(0)
}

fn signal(pid: u32, sig: libc::c_int) -> Result<(), RuntimeError> {
    let rc = unsafe { libc::kill(pid as libc::pid_t, sig) };
    if rc != 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(255)
}

async fn pump_stream<R: AsyncRead + Unpin>(
    mut from: R,
    log_path: PathBuf,
    len_tx: &watch::Sender<u64>,
) -> io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .await?;
    let mut buf = [0u8; 8192];
    loop {
        let len = from.read(&mut buf).await?;
        if len == 0 {
            return Ok(());
        }
        file.write_all(&buf[..len]).await?;
        file.flush().await?;
        let total = *len_tx.borrow() + len as u64;
        let _ = len_tx.send(total);
    }
}

/// A live reader over one of a container's log-backed output streams
///
/// Each follower starts at the log's current end and sees every byte the
/// child writes from that point on, exactly once, ending when the container
/// exits and the log is drained.
pub struct LogFollower {
    path: PathBuf,
    file: Option<tokio::fs::File>,
    offset: u64,
    len_rx: watch::Receiver<u64>,
    phase_rx: watch::Receiver<RunPhase>,
}

impl LogFollower {
    fn new(path: PathBuf, len_rx: watch::Receiver<u64>, phase_rx: watch::Receiver<RunPhase>) -> Self {
        let offset = *len_rx.borrow();
        LogFollower {
            path,
            file: None,
            offset,
            len_rx,
            phase_rx,
        }
    }

    /// Next chunk of output, or None once the stream is complete
    pub async fn read_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            let available = *self.len_rx.borrow_and_update();
            if self.offset < available {
                if self.file.is_none() {
                    let mut file = tokio::fs::File::open(&self.path).await?;
                    file.seek(io::SeekFrom::Start(self.offset)).await?;
                    self.file = Some(file);
                }
                let file = self.file.as_mut().expect("follower file is open");
                let mut buf = vec![0u8; 8192];
                let len = file.read(&mut buf).await?;
                if len > 0 {
                    self.offset += len as u64;
                    buf.truncate(len);
                    return Ok(Some(buf));
                }
                // the announced length ran ahead of a visible write; wait
            }
            let exited = matches!(*self.phase_rx.borrow_and_update(), RunPhase::Exited(_));
            if exited && self.offset >= *self.len_rx.borrow() {
                return Ok(None);
            }
            tokio::select! {
                changed = self.len_rx.changed() => {
                    if changed.is_err() {
                        return Ok(None);
                    }
                }
                changed = self.phase_rx.changed() => {
                    if changed.is_err() {
                        return Ok(None);
                    }
                }
            }
        }
    }
}
