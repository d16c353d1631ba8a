//! The server facade: one image store, one container runtime, all verbs
//!
//! Each verb is a thin orchestration over the store and the runtime. The
//! dispatcher hands every verb the client's remaining inbound bytes as stdin
//! and a shared handle on the connection as stdout.

use crate::{
    config::DaemonConfig,
    container::{Config, Container},
    dispatch::{write_all, write_line, ClientIn, ClientOut},
    errors::{ImageError, RuntimeError, ServerError},
    filesystem::archive,
    image::{Image, Store},
    runtime::Runtime,
};
use chrono::Utc;
use clap::{App, AppSettings, Arg, ArgMatches};
use std::{fmt::Write as _, sync::Arc};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    task,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The daemon state behind the command socket
pub struct Server {
    config: DaemonConfig,
    images: Store,
    containers: Runtime,
}

impl Server {
    /// Open the store and the runtime under the configured root
    pub fn new(config: DaemonConfig) -> Result<Server, ServerError> {
        let images = Store::new(config.images_root())?;
        let containers = Runtime::new(config.containers_root())?;
        Ok(Server {
            config,
            images,
            containers,
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn images(&self) -> &Store {
        &self.images
    }

    pub fn containers(&self) -> &Runtime {
        &self.containers
    }

    /// Route one parsed request to its verb
    pub async fn dispatch(
        &self,
        verb: &str,
        args: Vec<String>,
        stdin: ClientIn,
        stdout: ClientOut,
    ) -> Result<(), ServerError> {
        match verb {
            "run" => self.cmd_run(stdin, stdout, args).await,
            "ps" => self.cmd_ps(stdout, args).await,
            "pull" => self.cmd_pull(stdout, args).await,
            "put" => self.cmd_put(stdin, stdout, args).await,
            "rm" => self.cmd_rm(stdout, args).await,
            "rmi" => self.cmd_rmi(stdout, args).await,
            "kill" => self.cmd_kill(stdout, args).await,
            "stop" => self.cmd_stop(stdout, args).await,
            "start" => self.cmd_start(stdout, args).await,
            "restart" => self.cmd_restart(stdout, args).await,
            "wait" => self.cmd_wait(stdout, args).await,
            "logs" => self.cmd_logs(stdout, args).await,
            "attach" => self.cmd_attach(stdin, stdout, args).await,
            "commit" => self.cmd_commit(stdout, args).await,
            "tar" => self.cmd_tar(stdout, args).await,
            "diff" => self.cmd_diff(stdout, args).await,
            "cat" => self.cmd_cat(stdout, args).await,
            "write" => self.cmd_write(stdin, args).await,
            "ls" => self.cmd_ls(stdout, args).await,
            "inspect" => self.cmd_inspect(stdout, args).await,
            "images" => self.cmd_images(stdout, args).await,
            "port" => self.cmd_port(stdout, args).await,
            "info" => self.cmd_info(stdout).await,
            "mount" => self.cmd_mount(stdout, args).await,
            "umount" => self.cmd_umount(stdout, args).await,
            "reset" => self.cmd_reset(args).await,
            "layers" => self.cmd_layers(stdout).await,
            "cp" => self.cmd_cp(stdout, args).await,
            "mirror" => self.cmd_mirror(stdin, stdout).await,
            _ => Err(ServerError::UnknownCommand(verb.to_string())),
        }
    }

    /// Create a container from an image, rolling back if metadata fails
    pub async fn create_container(
        &self,
        image: &Image,
        ports: Vec<u16>,
        user: &str,
        tty: bool,
        open_stdin: bool,
        comment: &str,
        path: &str,
        args: Vec<String>,
    ) -> Result<Arc<Container>, ServerError> {
        let id = Runtime::generate_id();
        let layers = image
            .layers
            .iter()
            .map(|digest| self.images.layers().path(digest))
            .collect();
        let config = Config {
            hostname: id.clone(),
            ports,
            user: user.to_string(),
            tty,
            open_stdin,
        };
        let container = self
            .containers
            .create(&id, path, args, layers, config)
            .await?;
        if let Err(err) = container.set_user_data("image", &image.id).await {
            self.containers.destroy(&container).await.ok();
            return Err(err.into());
        }
        if let Err(err) = container.set_user_data("comment", comment).await {
            self.containers.destroy(&container).await.ok();
            return Err(err.into());
        }
        Ok(container)
    }

    async fn cmd_run(
        &self,
        mut stdin: ClientIn,
        stdout: ClientOut,
        args: Vec<String>,
    ) -> Result<(), ServerError> {
        let matches = subcmd("run")
            .setting(AppSettings::TrailingVarArg)
            .arg(Arg::with_name("user").short("u").takes_value(true))
            .arg(Arg::with_name("attach").short("a"))
            .arg(Arg::with_name("interactive").short("i"))
            .arg(Arg::with_name("tty").short("t"))
            .arg(Arg::with_name("detach").short("d"))
            .arg(Arg::with_name("comment").short("c").takes_value(true))
            .arg(
                Arg::with_name("port")
                    .short("p")
                    .takes_value(true)
                    .multiple(true)
                    .number_of_values(1),
            )
            .arg(Arg::with_name("image").index(1))
            .arg(Arg::with_name("command").index(2).multiple(true))
            .get_matches_from_safe(args)
            .map_err(usage_error)?;

        let image_name = matches.value_of("image").unwrap_or("base").to_string();
        let mut cmdline: Vec<String> = matches
            .values_of("command")
            .map(|values| values.map(str::to_string).collect())
            .unwrap_or_default();
        let mut attach = matches.is_present("attach");
        let mut open_stdin = matches.is_present("interactive");
        let mut tty = matches.is_present("tty");
        let detach = matches.is_present("detach");
        if detach && attach {
            return Err(ServerError::Usage(
                "conflicting options: -a and -d".to_string(),
            ));
        }
        // no command means an interactive shell
        if cmdline.is_empty() {
            open_stdin = true;
            tty = true;
            attach = true;
            cmdline = vec!["/bin/bash".to_string(), "-i".to_string()];
        }
        if detach {
            attach = false;
        }
        let mut ports = Vec::new();
        if let Some(values) = matches.values_of("port") {
            for value in values {
                let port: u16 = value
                    .parse()
                    .map_err(|_| RuntimeError::InvalidPort(value.to_string()))?;
                ports.push(port);
            }
        }
        let user = matches.value_of("user").unwrap_or("").to_string();
        let comment = matches.value_of("comment").unwrap_or("").to_string();

        let image = self
            .images
            .find(&image_name)
            .await
            .ok_or_else(|| ImageError::NoSuchImage(image_name.clone()))?;
        let container = self
            .create_container(
                &image,
                ports,
                &user,
                tty,
                open_stdin,
                &comment,
                &cmdline[0],
                cmdline[1..].to_vec(),
            )
            .await?;

        if attach {
            let out_pipe = container.stdout_pipe();
            let err_pipe = container.stderr_pipe();
            container.clone().start().await?;
            if open_stdin {
                let sink = container.clone();
                task::spawn(async move {
                    let mut buf = [0u8; 8192];
                    loop {
                        match stdin.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(len) => {
                                if sink.write_stdin(&buf[..len]).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    sink.close_stdin().await;
                });
            }
            let (out_done, err_done) = tokio::join!(
                pump_to_client(out_pipe, stdout.clone()),
                pump_to_client(err_pipe, stdout.clone()),
            );
            out_done?;
            err_done?;
            container.wait().await;
        } else {
            container.clone().start().await?;
            write_line(&stdout, container.id()).await?;
        }
        Ok(())
    }

    async fn cmd_attach(
        &self,
        mut stdin: ClientIn,
        stdout: ClientOut,
        args: Vec<String>,
    ) -> Result<(), ServerError> {
        let matches = subcmd("attach")
            .arg(Arg::with_name("stdin").short("i"))
            .arg(Arg::with_name("stdout").short("o"))
            .arg(Arg::with_name("stderr").short("e"))
            .arg(Arg::with_name("container").index(1).required(true))
            .get_matches_from_safe(args)
            .map_err(usage_error)?;
        let name = required(&matches, "container")?;
        let container = self.containers.get(&name).await?;
        let with_stdin = matches.is_present("stdin");
        if with_stdin && !container.record().await.config.open_stdin {
            return Err(RuntimeError::StdinNotOpen(container.id().to_string()).into());
        }

        // stdout and stderr are attached unless stdin-only was asked for;
        // the flags exist to state that explicitly
        let out_pipe = container.stdout_pipe();
        let err_pipe = container.stderr_pipe();
        let in_sink = container.clone();
        let in_task = async move {
            if with_stdin {
                let mut buf = [0u8; 8192];
                loop {
                    match stdin.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(len) => {
                            if in_sink.write_stdin(&buf[..len]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                in_sink.close_stdin().await;
            }
        };
        let (_, out_done, err_done) = tokio::join!(
            in_task,
            pump_to_client(out_pipe, stdout.clone()),
            pump_to_client(err_pipe, stdout.clone()),
        );
        out_done?;
        err_done?;
        Ok(())
    }

    async fn cmd_ps(&self, stdout: ClientOut, args: Vec<String>) -> Result<(), ServerError> {
        let matches = subcmd("ps")
            .arg(Arg::with_name("quiet").short("q"))
            .arg(Arg::with_name("all").short("a"))
            .arg(Arg::with_name("notrunc").long("notrunc"))
            .get_matches_from_safe(args)
            .map_err(usage_error)?;
        let quiet = matches.is_present("quiet");
        let all = matches.is_present("all");
        let notrunc = matches.is_present("notrunc");

        let mut table = String::new();
        if !quiet {
            table.push_str("ID\tIMAGE\tCOMMAND\tCREATED\tSTATUS\tCOMMENT\n");
        }
        let now = Utc::now();
        for container in self.containers.list().await {
            let record = container.record().await;
            if !record.state.running && !all {
                continue;
            }
            if quiet {
                table.push_str(record.id.as_str());
                table.push('\n');
                continue;
            }
            let mut command = record.path.clone();
            for arg in &record.args {
                command.push(' ');
                command.push_str(arg);
            }
            if !notrunc {
                command = trunc(&command, 20);
            }
            writeln!(
                table,
                "{}\t{}\t{}\t{} ago\t{}\t{}",
                record.id,
                record.userdata.get("image").map(String::as_str).unwrap_or(""),
                command,
                human_duration(now - record.created),
                record.state.status_line(now),
                record.userdata.get("comment").map(String::as_str).unwrap_or(""),
            )
            .expect("writing to a string cannot fail");
        }
        write_all(&stdout, table.as_bytes()).await?;
        Ok(())
    }

    async fn cmd_images(&self, stdout: ClientOut, args: Vec<String>) -> Result<(), ServerError> {
        let matches = subcmd("images")
            .arg(Arg::with_name("limit").short("l").takes_value(true))
            .arg(Arg::with_name("quiet").short("q"))
            .arg(Arg::with_name("name").index(1))
            .get_matches_from_safe(args)
            .map_err(usage_error)?;
        let quiet = matches.is_present("quiet");
        let limit: usize = match matches.value_of("limit") {
            Some(value) => value
                .parse()
                .map_err(|_| ServerError::Usage(format!("bad limit: {:?}", value)))?,
            None => 0,
        };
        let filter = matches.value_of("name");

        let mut table = String::new();
        if !quiet {
            table.push_str("NAME\tID\tCREATED\tPARENT\n");
        }
        let now = Utc::now();
        for (name, history) in self.images.all().await {
            if let Some(filter) = filter {
                if filter != name {
                    continue;
                }
            }
            for (position, image) in history.iter().enumerate() {
                if limit > 0 && position >= limit {
                    break;
                }
                if quiet {
                    table.push_str(image.id.as_str());
                    table.push('\n');
                    continue;
                }
                writeln!(
                    table,
                    "{}\t{}\t{} ago\t{}",
                    name,
                    image.display_id(),
                    human_duration(now - image.created),
                    image.parent,
                )
                .expect("writing to a string cannot fail");
            }
        }
        write_all(&stdout, table.as_bytes()).await?;
        Ok(())
    }

    async fn cmd_pull(&self, stdout: ClientOut, args: Vec<String>) -> Result<(), ServerError> {
        let matches = subcmd("pull")
            .arg(Arg::with_name("name").index(1).required(true))
            .get_matches_from_safe(args)
            .map_err(usage_error)?;
        let name = required(&matches, "name")?;
        let mut url = if name.contains("://") {
            name.clone()
        } else {
            let mirror = self.config.mirror.as_deref().ok_or(ServerError::NoMirror)?;
            format!("{}/{}", mirror.trim_end_matches('/'), name)
        };
        if !url.contains("://") {
            url = format!("http://{}", url);
        }
        write_line(&stdout, format!("Downloading from {}", url)).await?;
        let response = reqwest::get(&url).await?.error_for_status()?;
        let data = response.bytes().await?;
        write_line(&stdout, format!("Unpacking to {}", name)).await?;
        let image = self.images.import(&name, &data[..], None).await?;
        write_line(&stdout, &image.id).await?;
        Ok(())
    }

    async fn cmd_put(
        &self,
        mut stdin: ClientIn,
        stdout: ClientOut,
        args: Vec<String>,
    ) -> Result<(), ServerError> {
        let matches = subcmd("put")
            .arg(Arg::with_name("name").index(1).required(true))
            .get_matches_from_safe(args)
            .map_err(usage_error)?;
        let name = required(&matches, "name")?;
        let image = self.images.import(&name, &mut stdin, None).await?;
        write_line(&stdout, &image.id).await?;
        Ok(())
    }

    async fn cmd_commit(&self, stdout: ClientOut, args: Vec<String>) -> Result<(), ServerError> {
        let matches = subcmd("commit")
            .arg(Arg::with_name("container").index(1).required(true))
            .arg(Arg::with_name("dest").index(2))
            .get_matches_from_safe(args)
            .map_err(usage_error)?;
        let name = required(&matches, "container")?;
        let container = self.containers.get(&name).await?;
        let source = container.get_user_data("image").await;
        let parent = if source.is_empty() {
            None
        } else {
            self.images.find(&source).await
        };
        let dest = match matches.value_of("dest") {
            Some(dest) => dest.to_string(),
            // with no destination, commit a new version of the source image
            None => parent
                .as_ref()
                .map(|image| image.name().to_string())
                .ok_or(ServerError::NotEnoughArguments)?,
        };
        // the container is not paused; the archive is a volatile snapshot
        let rw = container.filesystem().rw_path().to_path_buf();
        let data = task::spawn_blocking(move || archive::tar_dir(&rw))
            .await
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))??;
        let image = self.images.import(&dest, &data[..], parent.as_ref()).await?;
        write_line(&stdout, &image.id).await?;
        Ok(())
    }

    async fn cmd_tar(&self, stdout: ClientOut, args: Vec<String>) -> Result<(), ServerError> {
        let matches = subcmd("tar")
            .arg(Arg::with_name("sparse").short("s"))
            .arg(Arg::with_name("container").index(1).required(true))
            .get_matches_from_safe(args)
            .map_err(usage_error)?;
        if matches.is_present("sparse") {
            return Err(ServerError::Unsupported("sparse tar"));
        }
        let name = required(&matches, "container")?;
        let container = self.containers.get(&name).await?;
        let data = task::spawn_blocking(move || container.filesystem().tar())
            .await
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?
            .map_err(RuntimeError::from)?;
        write_all(&stdout, &data).await?;
        Ok(())
    }

    async fn cmd_diff(&self, stdout: ClientOut, args: Vec<String>) -> Result<(), ServerError> {
        let container = self.containers.get(&single_arg("diff", args)?).await?;
        let changes = task::spawn_blocking(move || container.filesystem().changes())
            .await
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?
            .map_err(RuntimeError::from)?;
        let mut listing = String::new();
        for change in changes {
            writeln!(listing, "{}", change).expect("writing to a string cannot fail");
        }
        write_all(&stdout, listing.as_bytes()).await?;
        Ok(())
    }

    async fn cmd_cat(&self, stdout: ClientOut, args: Vec<String>) -> Result<(), ServerError> {
        let (name, path) = two_args("cat", args)?;
        let container = self.containers.get(&name).await?;
        let mut file = container
            .filesystem()
            .open_file(&path, tokio::fs::OpenOptions::new().read(true))
            .await
            .map_err(RuntimeError::from)?;
        let mut guard = stdout.lock().await;
        tokio::io::copy(&mut file, &mut **guard).await?;
        Ok(())
    }

    async fn cmd_write(&self, mut stdin: ClientIn, args: Vec<String>) -> Result<(), ServerError> {
        let (name, path) = two_args("write", args)?;
        let container = self.containers.get(&name).await?;
        let mut file = container
            .filesystem()
            .open_file(&path, tokio::fs::OpenOptions::new().write(true).create(true))
            .await
            .map_err(RuntimeError::from)?;
        tokio::io::copy(&mut stdin, &mut file).await?;
        file.flush().await?;
        Ok(())
    }

    async fn cmd_ls(&self, stdout: ClientOut, args: Vec<String>) -> Result<(), ServerError> {
        let (name, path) = two_args("ls", args)?;
        let container = self.containers.get(&name).await?;
        let names = container
            .filesystem()
            .read_dir(&path)
            .await
            .map_err(RuntimeError::from)?;
        let mut listing = String::new();
        for name in names {
            listing.push_str(&name);
            listing.push('\n');
        }
        write_all(&stdout, listing.as_bytes()).await?;
        Ok(())
    }

    async fn cmd_inspect(&self, stdout: ClientOut, args: Vec<String>) -> Result<(), ServerError> {
        let name = single_arg("inspect", args)?;
        let rendered = if let Ok(container) = self.containers.get(&name).await {
            serde_json::to_string_pretty(&container.record().await)
        } else if let Some(image) = self.images.find(&name).await {
            serde_json::to_string_pretty(&image)
        } else {
            return Err(ServerError::NoSuchObject(name));
        }
        .map_err(|err| ServerError::BadRequest(err.to_string()))?;
        write_line(&stdout, rendered).await?;
        Ok(())
    }

    async fn cmd_port(&self, stdout: ClientOut, args: Vec<String>) -> Result<(), ServerError> {
        let (name, private) = two_args("port", args)?;
        let container = self.containers.get(&name).await?;
        let public = container.public_port(&private).await?;
        write_line(&stdout, public).await?;
        Ok(())
    }

    async fn cmd_info(&self, stdout: ClientOut) -> Result<(), ServerError> {
        let text = format!(
            "containers: {}\nversion: {}\nimages: {}\n",
            self.containers.count().await,
            VERSION,
            self.images.image_count().await,
        );
        write_all(&stdout, text.as_bytes()).await?;
        Ok(())
    }

    async fn cmd_rm(&self, _stdout: ClientOut, args: Vec<String>) -> Result<(), ServerError> {
        for name in name_args("rm", args)? {
            let container = self.containers.get(&name).await?;
            self.containers.destroy(&container).await?;
        }
        Ok(())
    }

    async fn cmd_rmi(&self, _stdout: ClientOut, args: Vec<String>) -> Result<(), ServerError> {
        let matches = subcmd("rmi")
            .arg(Arg::with_name("regexp").short("r"))
            .arg(Arg::with_name("images").index(1).multiple(true).required(true))
            .get_matches_from_safe(args)
            .map_err(usage_error)?;
        let regexp = matches.is_present("regexp");
        let names: Vec<String> = matches
            .values_of("images")
            .map(|values| values.map(str::to_string).collect())
            .unwrap_or_default();
        for name in names {
            if regexp {
                self.images.delete_match(&name).await?;
            } else {
                let image = self
                    .images
                    .find(&name)
                    .await
                    .ok_or_else(|| ImageError::NoSuchImage(name.clone()))?;
                self.images.delete(image.name()).await?;
            }
        }
        Ok(())
    }

    async fn cmd_kill(&self, stdout: ClientOut, args: Vec<String>) -> Result<(), ServerError> {
        for name in name_args("kill", args)? {
            let container = self.containers.get(&name).await?;
            container.kill().await?;
            write_line(&stdout, container.id()).await?;
        }
        Ok(())
    }

    async fn cmd_stop(&self, stdout: ClientOut, args: Vec<String>) -> Result<(), ServerError> {
        for name in name_args("stop", args)? {
            let container = self.containers.get(&name).await?;
            container.stop().await?;
            write_line(&stdout, container.id()).await?;
        }
        Ok(())
    }

    async fn cmd_start(&self, stdout: ClientOut, args: Vec<String>) -> Result<(), ServerError> {
        for name in name_args("start", args)? {
            let container = self.containers.get(&name).await?;
            container.clone().start().await?;
            write_line(&stdout, container.id()).await?;
        }
        Ok(())
    }

    async fn cmd_restart(&self, stdout: ClientOut, args: Vec<String>) -> Result<(), ServerError> {
        for name in name_args("restart", args)? {
            let container = self.containers.get(&name).await?;
            container.clone().restart().await?;
            write_line(&stdout, container.id()).await?;
        }
        Ok(())
    }

    async fn cmd_wait(&self, stdout: ClientOut, args: Vec<String>) -> Result<(), ServerError> {
        for name in name_args("wait", args)? {
            let container = self.containers.get(&name).await?;
            let code = container.wait().await;
            write_line(&stdout, code.to_string()).await?;
        }
        Ok(())
    }

    async fn cmd_logs(&self, stdout: ClientOut, args: Vec<String>) -> Result<(), ServerError> {
        let container = self.containers.get(&single_arg("logs", args)?).await?;
        let mut guard = stdout.lock().await;
        let mut stdout_log = container.stdout_log().await.map_err(RuntimeError::from)?;
        tokio::io::copy(&mut stdout_log, &mut **guard).await?;
        let mut stderr_log = container.stderr_log().await.map_err(RuntimeError::from)?;
        tokio::io::copy(&mut stderr_log, &mut **guard).await?;
        Ok(())
    }

    async fn cmd_mount(&self, stdout: ClientOut, args: Vec<String>) -> Result<(), ServerError> {
        for name in name_args("mount", args)? {
            let container = self.containers.get(&name).await?;
            container.filesystem().mount().map_err(RuntimeError::from)?;
            write_line(&stdout, container.id()).await?;
        }
        Ok(())
    }

    async fn cmd_umount(&self, stdout: ClientOut, args: Vec<String>) -> Result<(), ServerError> {
        for name in name_args("umount", args)? {
            let container = self.containers.get(&name).await?;
            container.filesystem().umount().map_err(RuntimeError::from)?;
            write_line(&stdout, container.id()).await?;
        }
        Ok(())
    }

    async fn cmd_reset(&self, args: Vec<String>) -> Result<(), ServerError> {
        for name in name_args("reset", args)? {
            let container = self.containers.get(&name).await?;
            if container.is_running().await {
                return Err(RuntimeError::Busy(container.id().to_string()).into());
            }
            container.filesystem().reset().map_err(RuntimeError::from)?;
        }
        Ok(())
    }

    async fn cmd_layers(&self, stdout: ClientOut) -> Result<(), ServerError> {
        let mut listing = String::new();
        for digest in self.images.layers().list()? {
            listing.push_str(&digest);
            listing.push('\n');
        }
        write_all(&stdout, listing.as_bytes()).await?;
        Ok(())
    }

    async fn cmd_cp(&self, stdout: ClientOut, args: Vec<String>) -> Result<(), ServerError> {
        let (src, dst) = two_args("cp", args)?;
        let image = self.images.copy(&src, &dst).await?;
        write_line(&stdout, &image.id).await?;
        Ok(())
    }

    async fn cmd_mirror(&self, mut stdin: ClientIn, stdout: ClientOut) -> Result<(), ServerError> {
        let mut guard = stdout.lock().await;
        tokio::io::copy(&mut stdin, &mut **guard).await?;
        Ok(())
    }
}

/// Copy one followed stream to the client until it completes
async fn pump_to_client(
    mut pipe: crate::container::LogFollower,
    out: ClientOut,
) -> Result<(), ServerError> {
    while let Some(chunk) = pipe.read_chunk().await? {
        write_all(&out, &chunk).await?;
    }
    Ok(())
}

fn subcmd(name: &'static str) -> App<'static, 'static> {
    App::new(name)
        .setting(AppSettings::NoBinaryName)
        .setting(AppSettings::DisableVersion)
}

fn usage_error(err: clap::Error) -> ServerError {
    ServerError::Usage(err.message)
}

fn required(matches: &ArgMatches<'_>, name: &str) -> Result<String, ServerError> {
    matches
        .value_of(name)
        .map(str::to_string)
        .ok_or(ServerError::NotEnoughArguments)
}

/// Parse a verb that takes exactly one positional argument and no flags
fn single_arg(verb: &'static str, args: Vec<String>) -> Result<String, ServerError> {
    let matches = subcmd(verb)
        .arg(Arg::with_name("name").index(1).required(true))
        .get_matches_from_safe(args)
        .map_err(usage_error)?;
    required(&matches, "name")
}

/// Parse a verb that takes a container plus one more positional argument
fn two_args(verb: &'static str, args: Vec<String>) -> Result<(String, String), ServerError> {
    let matches = subcmd(verb)
        .arg(Arg::with_name("first").index(1).required(true))
        .arg(Arg::with_name("second").index(2).required(true))
        .get_matches_from_safe(args)
        .map_err(usage_error)?;
    Ok((required(&matches, "first")?, required(&matches, "second")?))
}

/// Parse a verb that takes one or more names and no flags
fn name_args(verb: &'static str, args: Vec<String>) -> Result<Vec<String>, ServerError> {
    let matches = subcmd(verb)
        .arg(Arg::with_name("names").index(1).multiple(true).required(true))
        .get_matches_from_safe(args)
        .map_err(usage_error)?;
    Ok(matches
        .values_of("names")
        .map(|values| values.map(str::to_string).collect())
        .unwrap_or_default())
}

/// Render an elapsed time the way a human would say it
pub fn human_duration(elapsed: chrono::Duration) -> String {
    let seconds = elapsed.num_seconds();
    if seconds < 1 {
        return "Less than a second".to_string();
    }
    if seconds == 1 {
        return "1 second".to_string();
    }
    if seconds < 60 {
        return format!("{} seconds", seconds);
    }
    let minutes = seconds / 60;
    if minutes == 1 {
        return "About a minute".to_string();
    }
    if minutes < 60 {
        return format!("{} minutes", minutes);
    }
    let hours = minutes / 60;
    if hours == 1 {
        return "About an hour".to_string();
    }
    if hours < 48 {
        return format!("{} hours", hours);
    }
    let days = hours / 24;
    if days < 14 {
        return format!("{} days", days);
    }
    if days < 60 {
        return format!("{} weeks", days / 7);
    }
    if days < 730 {
        return format!("{} months", days / 30);
    }
    format!("{} years", days / 365)
}

fn trunc(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(
            human_duration(chrono::Duration::milliseconds(300)),
            "Less than a second"
        );
        assert_eq!(human_duration(chrono::Duration::seconds(1)), "1 second");
        assert_eq!(human_duration(chrono::Duration::seconds(45)), "45 seconds");
        assert_eq!(
            human_duration(chrono::Duration::seconds(90)),
            "About a minute"
        );
        assert_eq!(human_duration(chrono::Duration::minutes(30)), "30 minutes");
        assert_eq!(
            human_duration(chrono::Duration::minutes(90)),
            "About an hour"
        );
        assert_eq!(human_duration(chrono::Duration::hours(30)), "30 hours");
        assert_eq!(human_duration(chrono::Duration::days(3)), "3 days");
        assert_eq!(human_duration(chrono::Duration::days(21)), "3 weeks");
        assert_eq!(human_duration(chrono::Duration::days(90)), "3 months");
        assert_eq!(human_duration(chrono::Duration::days(1000)), "2 years");
    }

    #[test]
    fn truncation() {
        assert_eq!(trunc("short", 20), "short");
        assert_eq!(trunc("exactly-twenty-chars", 20), "exactly-twenty-chars");
        assert_eq!(trunc("/bin/sh -c echo hello world", 10), "/bin/sh -c");
    }
}
