//! Error types you might see while managing images or running containers

use thiserror::Error;

/// Errors from the image store, index, and layer store
#[derive(Error, Debug)]
pub enum ImageError {
    /// empty or otherwise unusable image name
    #[error("illegal image name: {0:?}")]
    IllegalName(String),

    /// no image registered under this name or id
    #[error("no such image: {0}")]
    NoSuchImage(String),

    /// rename target is already registered
    #[error("image name is already in use: {0}")]
    NameInUse(String),

    /// an image must reference at least one layer
    #[error("no layers provided")]
    NoLayers,

    /// no layer stored under this digest
    #[error("no such layer: {0}")]
    NoSuchLayer(String),

    /// bad regular expression given to a match operation
    #[error("bad name pattern: {0}")]
    BadPattern(#[from] regex::Error),

    /// storage io error
    #[error("storage io error: {0}")]
    Storage(#[from] std::io::Error),

    /// index document failed to serialize or deserialize
    #[error("index serialization error: {0}")]
    IndexFormat(#[from] serde_json::Error),
}

/// Errors from a container's filesystem view
#[derive(Error, Debug)]
pub enum FsError {
    /// path would resolve outside the container root
    #[error("path escapes the container filesystem: {0:?}")]
    PathEscape(String),

    /// io error
    #[error("filesystem io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that occur while creating or driving containers
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// no container matches this name or id prefix
    #[error("no such container: {0}")]
    NoSuchContainer(String),

    /// the id prefix matches more than one container
    #[error("container name is ambiguous: {0}")]
    AmbiguousName(String),

    /// start was requested on a running container
    #[error("container is already running: {0}")]
    AlreadyRunning(String),

    /// a signal or stop was requested on a container that is not running
    #[error("container is not running: {0}")]
    NotRunning(String),

    /// the operation needs the container stopped first
    #[error("container is running, stop or kill it first: {0}")]
    Busy(String),

    /// no public port has been allocated for this private port
    #[error("no private port {private:?} allocated on {id}")]
    NoSuchPort { id: String, private: String },

    /// the container was not created with stdin open
    #[error("container stdin is not open: {0}")]
    StdinNotOpen(String),

    /// unparsable port number
    #[error("invalid port: {0:?}")]
    InvalidPort(String),

    /// io error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// container record failed to serialize or deserialize
    #[error("container record error: {0}")]
    RecordFormat(#[from] serde_json::Error),

    /// filesystem view error
    #[error("filesystem error: {0}")]
    Fs(#[from] FsError),

    /// image store error
    #[error("image error: {0}")]
    Image(#[from] ImageError),

    /// asynchronous task failed while supervising a container
    #[error("task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Errors surfaced to clients of the command socket
#[derive(Error, Debug)]
pub enum ServerError {
    /// verb is not in the dispatch table
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// flag parsing failed; the message carries the usage text
    #[error("{0}")]
    Usage(String),

    /// missing positional arguments
    #[error("not enough arguments")]
    NotEnoughArguments,

    /// request framing was not a valid argv line
    #[error("bad request: {0}")]
    BadRequest(String),

    /// neither a container nor an image matches the name
    #[error("no such container or image: {0}")]
    NoSuchObject(String),

    /// feature is recognized but not implemented
    #[error("{0} is not implemented")]
    Unsupported(&'static str),

    /// no download mirror is configured and the name is not a full url
    #[error("no download mirror configured, set BOXD_MIRROR or pass a full url")]
    NoMirror,

    /// download failed
    #[error("download error: {0}")]
    Download(#[from] reqwest::Error),

    /// io error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Image(#[from] ImageError),

    #[error("{0}")]
    Runtime(#[from] RuntimeError),
}
