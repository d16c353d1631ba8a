use clap::{App, AppSettings, Arg};
use env_logger::Env;
use std::process::exit;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

const DEFAULT_ADDR: &str = "127.0.0.1:4242";

#[tokio::main]
async fn main() {
    let matches = App::new("boxctl")
        .about("Send a command to the boxd container daemon")
        .setting(AppSettings::TrailingVarArg)
        .arg(
            Arg::with_name("addr")
                .short("H")
                .long("host")
                .takes_value(true)
                .help("Daemon address (default 127.0.0.1:4242)"),
        )
        .arg(
            Arg::with_name("log_level")
                .long("log-level")
                .takes_value(true)
                .default_value("warn"),
        )
        .arg(
            Arg::with_name("command")
                .required(true)
                .multiple(true)
                .help("Verb and its arguments"),
        )
        .get_matches();

    let log_level = matches.value_of("log_level").unwrap();
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    let addr = matches.value_of("addr").unwrap_or(DEFAULT_ADDR);
    let argv: Vec<String> = matches
        .values_of("command")
        .map(|values| values.map(str::to_string).collect())
        .unwrap_or_default();

    exit(run(addr, argv).await);
}

async fn run(addr: &str, argv: Vec<String>) -> i32 {
    let stream = match TcpStream::connect(addr).await {
        Ok(stream) => stream,
        Err(err) => {
            log::error!("cannot connect to {}: {}", addr, err);
            return 1;
        }
    };
    let (mut from_server, mut to_server) = stream.into_split();

    let request = match serde_json::to_string(&argv) {
        Ok(request) => request,
        Err(err) => {
            log::error!("cannot encode request: {}", err);
            return 1;
        }
    };
    if let Err(err) = to_server.write_all(format!("{}\n", request).as_bytes()).await {
        log::error!("cannot send request: {}", err);
        return 1;
    }

    // bridge our stdin to the daemon; half-close when it ends
    let stdin_bridge = tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 8192];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(len) => {
                    if to_server.write_all(&buf[..len]).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = to_server.shutdown().await;
    });

    // stream the response through, remembering the last line so a trailing
    // Error line can set the exit status
    let mut stdout = tokio::io::stdout();
    let mut lines = LineTracker::default();
    let mut buf = [0u8; 8192];
    let mut failed = false;
    loop {
        match from_server.read(&mut buf).await {
            Ok(0) => break,
            Ok(len) => {
                if stdout.write_all(&buf[..len]).await.is_err() {
                    failed = true;
                    break;
                }
                lines.push(&buf[..len]);
            }
            Err(err) => {
                log::error!("connection error: {}", err);
                failed = true;
                break;
            }
        }
    }
    let _ = stdout.flush().await;
    stdin_bridge.abort();

    if failed || String::from_utf8_lossy(lines.last_line()).starts_with("Error:") {
        1
    } else {
        0
    }
}

#[derive(Default)]
struct LineTracker {
    current: Vec<u8>,
    last: Vec<u8>,
}

impl LineTracker {
    fn push(&mut self, chunk: &[u8]) {
        for &byte in chunk {
            if byte == b'\n' {
                self.last = std::mem::take(&mut self.current);
            } else {
                self.current.push(byte);
            }
        }
    }

    fn last_line(&self) -> &[u8] {
        if self.current.is_empty() {
            &self.last
        } else {
            &self.current
        }
    }
}
