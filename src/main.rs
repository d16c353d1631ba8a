use boxd::{dispatch, DaemonConfig, Server};
use env_logger::Env;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = DaemonConfig::from_env();
    log::info!("boxd {} starting under {:?}", boxd::server::VERSION, config.root);

    let server = match Server::new(config) {
        Ok(server) => Arc::new(server),
        Err(err) => {
            log::error!("failed to initialize: {}", err);
            std::process::exit(1);
        }
    };
    if let Err(err) = dispatch::listen_and_serve(server).await {
        log::error!("{}", err);
        std::process::exit(1);
    }
}
