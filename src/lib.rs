#[cfg(not(any(target_os = "linux", target_os = "android")))]
compile_error!("boxd only works on linux or android");

pub mod config;
pub mod container;
pub mod dispatch;
pub mod errors;
pub mod filesystem;
pub mod image;
pub mod runtime;
pub mod server;

pub use crate::{
    config::DaemonConfig,
    container::Container,
    image::{Image, Store},
    runtime::Runtime,
    server::Server,
};
