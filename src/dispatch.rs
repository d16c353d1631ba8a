//! The line-framed command socket
//!
//! One request per connection: the first line is a json argv, every byte
//! after it is the verb's stdin, and the response is the verb's stdout,
//! terminated by close. A failing verb gets a single `Error:` line before
//! the close.

use crate::{errors::ServerError, server::Server};
use std::{fmt, io, sync::Arc};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::Mutex,
};

/// The client's remaining inbound bytes, handed to a verb as its stdin
pub type ClientIn = Box<dyn AsyncBufRead + Send + Unpin>;

/// The connection's outbound side, shared between a verb's stream copies
pub type ClientOut = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

pub async fn write_all(out: &ClientOut, data: &[u8]) -> io::Result<()> {
    let mut guard = out.lock().await;
    guard.write_all(data).await?;
    guard.flush().await
}

pub async fn write_line<T: fmt::Display>(out: &ClientOut, line: T) -> io::Result<()> {
    write_all(out, format!("{}\n", line).as_bytes()).await
}

/// Accept connections forever, serving each one on its own task
pub async fn listen_and_serve(server: Arc<Server>) -> Result<(), ServerError> {
    let listener = TcpListener::bind(server.config().listen.as_str()).await?;
    log::info!("boxd listening on {}", server.config().listen);
    loop {
        let (socket, peer) = listener.accept().await?;
        let server = server.clone();
        tokio::spawn(async move {
            log::debug!("connection from {}", peer);
            if let Err(err) = serve_connection(server, socket).await {
                log::warn!("connection from {} failed: {}", peer, err);
            }
        });
    }
}

/// Serve exactly one request on an accepted connection
pub async fn serve_connection(server: Arc<Server>, socket: TcpStream) -> io::Result<()> {
    let (read_half, write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);
    let stdout: ClientOut = Arc::new(Mutex::new(Box::new(write_half)));

    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let result = match parse_request(&line) {
        Ok((verb, args)) => {
            log::debug!("request: {} {:?}", verb, args);
            let stdin: ClientIn = Box::new(reader);
            server.dispatch(&verb, args, stdin, stdout.clone()).await
        }
        Err(err) => Err(err),
    };
    if let Err(err) = result {
        log::debug!("request failed: {}", err);
        let _ = write_line(&stdout, format!("Error: {}", err)).await;
    }
    let result = stdout.lock().await.shutdown().await;
    result
}

fn parse_request(line: &str) -> Result<(String, Vec<String>), ServerError> {
    let argv: Vec<String> = serde_json::from_str(line.trim_end())
        .map_err(|err| ServerError::BadRequest(err.to_string()))?;
    match argv.split_first() {
        Some((verb, args)) => Ok((verb.clone(), args.to_vec())),
        None => Err(ServerError::BadRequest("empty command".to_string())),
    }
}
