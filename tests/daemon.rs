use boxd::{dispatch, DaemonConfig, Server};
use std::{fs, net::SocketAddr, path::PathBuf, sync::Arc};
use tempfile::TempDir;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

/// Serve a daemon on an ephemeral port, returning its address
async fn start_daemon(root: PathBuf) -> SocketAddr {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = DaemonConfig::configure()
        .root(root)
        .listen("127.0.0.1:0")
        .build();
    let server = Arc::new(Server::new(config).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => break,
            };
            let server = server.clone();
            tokio::spawn(async move {
                dispatch::serve_connection(server, socket).await.ok();
            });
        }
    });
    addr
}

/// One request over one connection: argv line, stdin bytes, response out
async fn request(addr: SocketAddr, argv: &[&str], stdin: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let line = serde_json::to_string(argv).unwrap();
    stream
        .write_all(format!("{}\n", line).as_bytes())
        .await
        .unwrap();
    stream.write_all(stdin).await.unwrap();
    stream.shutdown().await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).to_string()
}

fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, path, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

async fn put_base(addr: SocketAddr) -> String {
    let archive = tar_bytes(&[("greeting", b"hello from base")]);
    let response = request(addr, &["put", "base"], &archive).await;
    let id = response.trim().to_string();
    assert!(id.starts_with("base:"), "unexpected put response: {}", response);
    id
}

#[test]
fn put_then_images() {
    let dir = TempDir::new().unwrap();
    tokio::runtime::Runtime::new().unwrap().block_on(async {
        let addr = start_daemon(dir.path().to_path_buf()).await;
        let id = put_base(addr).await;

        let listing = request(addr, &["images"], b"").await;
        assert!(listing.starts_with("NAME\tID\tCREATED\tPARENT\n"));
        assert!(listing.contains("base\t"));

        let quiet = request(addr, &["images", "-q"], b"").await;
        assert_eq!(quiet.trim(), id);
    });
}

#[test]
fn detached_run_wait_logs() {
    let dir = TempDir::new().unwrap();
    tokio::runtime::Runtime::new().unwrap().block_on(async {
        let addr = start_daemon(dir.path().to_path_buf()).await;
        put_base(addr).await;

        let id = request(addr, &["run", "-d", "base", "/bin/echo", "hello"], b"").await;
        let id = id.trim().to_string();
        assert_eq!(id.len(), 8, "expected a container id, got {:?}", id);

        assert_eq!(request(addr, &["wait", &id], b"").await, "0\n");
        assert_eq!(request(addr, &["logs", &id], b"").await, "hello\n");
    });
}

#[test]
fn attached_run_bridges_stdin() {
    let dir = TempDir::new().unwrap();
    tokio::runtime::Runtime::new().unwrap().block_on(async {
        let addr = start_daemon(dir.path().to_path_buf()).await;
        put_base(addr).await;

        let response = request(addr, &["run", "-i", "-a", "base", "/bin/cat"], b"ping\n").await;
        assert_eq!(response, "ping\n");
    });
}

#[test]
fn attach_streams_output_until_exit() {
    let dir = TempDir::new().unwrap();
    tokio::runtime::Runtime::new().unwrap().block_on(async {
        let addr = start_daemon(dir.path().to_path_buf()).await;
        put_base(addr).await;

        let id = request(
            addr,
            &["run", "-d", "base", "/bin/sh", "-c", "sleep 1; echo done"],
            b"",
        )
        .await;
        let id = id.trim().to_string();

        let streamed = request(addr, &["attach", &id], b"").await;
        assert_eq!(streamed, "done\n");
    });
}

#[test]
fn diff_commit_inspect_rmi() {
    let dir = TempDir::new().unwrap();
    tokio::runtime::Runtime::new().unwrap().block_on(async {
        let addr = start_daemon(dir.path().to_path_buf()).await;
        let base_id = put_base(addr).await;

        let id = request(addr, &["run", "-d", "base", "/bin/true"], b"").await;
        let id = id.trim().to_string();
        request(addr, &["wait", &id], b"").await;

        // the union driver records container writes in the rw layer
        let rw = dir.path().join("containers").join(&id).join("rw");
        fs::write(rw.join("x"), b"data").unwrap();

        assert_eq!(request(addr, &["diff", &id], b"").await, "Add /x\n");

        let snap_id = request(addr, &["commit", &id, "snap"], b"").await;
        let snap_id = snap_id.trim().to_string();
        assert!(snap_id.starts_with("snap:"));

        let listing = request(addr, &["images", "-q"], b"").await;
        assert!(listing.contains(&base_id));
        assert!(listing.contains(&snap_id));

        let inspected = request(addr, &["inspect", "snap"], b"").await;
        let image: serde_json::Value = serde_json::from_str(&inspected).unwrap();
        assert_eq!(image["parent"], base_id.as_str());
        assert_eq!(image["layers"].as_array().unwrap().len(), 2);

        request(addr, &["rmi", "-r", "^snap.*"], b"").await;
        let listing = request(addr, &["images", "-q"], b"").await;
        assert!(listing.contains(&base_id));
        assert!(!listing.contains("snap:"));
    });
}

#[test]
fn ports_and_destroy_rules() {
    let dir = TempDir::new().unwrap();
    tokio::runtime::Runtime::new().unwrap().block_on(async {
        let addr = start_daemon(dir.path().to_path_buf()).await;
        put_base(addr).await;

        let id = request(
            addr,
            &["run", "-d", "-p", "80", "base", "/bin/sleep", "5"],
            b"",
        )
        .await;
        let id = id.trim().to_string();

        let public = request(addr, &["port", &id, "80"], b"").await;
        assert!(public.trim().parse::<u16>().unwrap() > 0);
        assert!(request(addr, &["port", &id, "81"], b"")
            .await
            .starts_with("Error:"));

        // a running container cannot be destroyed
        assert!(request(addr, &["rm", &id], b"").await.starts_with("Error:"));
        assert_eq!(request(addr, &["kill", &id], b"").await, format!("{}\n", id));
        assert_eq!(request(addr, &["rm", &id], b"").await, "");
        assert!(request(addr, &["ps", "-a", "-q"], b"").await.is_empty());
    });
}

#[test]
fn ps_lists_running_containers_by_default() {
    let dir = TempDir::new().unwrap();
    tokio::runtime::Runtime::new().unwrap().block_on(async {
        let addr = start_daemon(dir.path().to_path_buf()).await;
        put_base(addr).await;

        let stopped = request(addr, &["run", "-d", "base", "/bin/true"], b"").await;
        let stopped = stopped.trim().to_string();
        request(addr, &["wait", &stopped], b"").await;
        let running = request(addr, &["run", "-d", "base", "/bin/sleep", "5"], b"").await;
        let running = running.trim().to_string();

        let default_listing = request(addr, &["ps", "-q"], b"").await;
        assert!(default_listing.contains(&running));
        assert!(!default_listing.contains(&stopped));

        let full = request(addr, &["ps", "-a"], b"").await;
        assert!(full.starts_with("ID\tIMAGE\tCOMMAND\tCREATED\tSTATUS\tCOMMENT\n"));
        assert!(full.contains(&stopped));
        assert!(full.contains("Exit 0"));

        request(addr, &["kill", &running], b"").await;
    });
}

#[test]
fn file_verbs_operate_inside_the_container() {
    let dir = TempDir::new().unwrap();
    tokio::runtime::Runtime::new().unwrap().block_on(async {
        let addr = start_daemon(dir.path().to_path_buf()).await;
        put_base(addr).await;

        let id = request(addr, &["run", "-d", "base", "/bin/true"], b"").await;
        let id = id.trim().to_string();
        request(addr, &["wait", &id], b"").await;

        assert_eq!(
            request(addr, &["cat", &id, "/greeting"], b"").await,
            "hello from base"
        );
        let names = request(addr, &["ls", &id, "/"], b"").await;
        assert!(names.lines().any(|line| line == "greeting"));

        request(addr, &["write", &id, "/note"], b"written").await;
        assert_eq!(request(addr, &["cat", &id, "/note"], b"").await, "written");

        assert!(request(addr, &["cat", &id, "../escape"], b"")
            .await
            .starts_with("Error:"));
    });
}

#[test]
fn info_layers_and_errors() {
    let dir = TempDir::new().unwrap();
    tokio::runtime::Runtime::new().unwrap().block_on(async {
        let addr = start_daemon(dir.path().to_path_buf()).await;
        put_base(addr).await;

        let info = request(addr, &["info"], b"").await;
        assert!(info.contains("containers: 0"));
        assert!(info.contains("images: 1"));

        let layers = request(addr, &["layers"], b"").await;
        assert_eq!(layers.trim().len(), 64);

        assert_eq!(
            request(addr, &["bogus"], b"").await,
            "Error: unknown command: bogus\n"
        );
        assert!(request(addr, &["run", "missing", "/bin/true"], b"")
            .await
            .starts_with("Error: no such image"));
        assert!(request(addr, &["tar", "-s", "x"], b"")
            .await
            .starts_with("Error: sparse tar is not implemented"));
        assert_eq!(request(addr, &["mirror"], b"echo\n").await, "echo\n");
    });
}

#[test]
fn reset_restart_and_debug_verbs() {
    let dir = TempDir::new().unwrap();
    tokio::runtime::Runtime::new().unwrap().block_on(async {
        let addr = start_daemon(dir.path().to_path_buf()).await;
        put_base(addr).await;

        let id = request(addr, &["run", "-d", "base", "/bin/sleep", "5"], b"").await;
        let id = id.trim().to_string();

        // reset needs the container stopped
        assert!(request(addr, &["reset", &id], b"").await.starts_with("Error:"));

        assert_eq!(
            request(addr, &["restart", &id], b"").await,
            format!("{}\n", id)
        );
        assert_eq!(request(addr, &["stop", &id], b"").await, format!("{}\n", id));

        let rw = dir.path().join("containers").join(&id).join("rw");
        fs::write(rw.join("scratch"), b"x").unwrap();
        assert_eq!(request(addr, &["diff", &id], b"").await, "Add /scratch\n");
        assert_eq!(request(addr, &["reset", &id], b"").await, "");
        assert_eq!(request(addr, &["diff", &id], b"").await, "");

        assert_eq!(
            request(addr, &["mount", &id], b"").await,
            format!("{}\n", id)
        );
        assert_eq!(
            request(addr, &["umount", &id], b"").await,
            format!("{}\n", id)
        );
    });
}

#[test]
fn cp_copies_an_image() {
    let dir = TempDir::new().unwrap();
    tokio::runtime::Runtime::new().unwrap().block_on(async {
        let addr = start_daemon(dir.path().to_path_buf()).await;
        let base_id = put_base(addr).await;

        let copy_id = request(addr, &["cp", "base", "clone"], b"").await;
        assert!(copy_id.trim().starts_with("clone:"));

        let inspected = request(addr, &["inspect", "clone"], b"").await;
        let image: serde_json::Value = serde_json::from_str(&inspected).unwrap();
        assert_eq!(image["parent"], base_id.as_str());
    });
}
