use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use switchyard::catalog::ManifestCatalog;
use switchyard::config::{load_config, load_config_from};
use switchyard::connect_params::ConnectParams;
use switchyard::interfaces::ConnectCallback;
use switchyard::runner::OutOfProcessNativeRunnerFactory;
use switchyard::{ControlServer, Shell, ShellOptions, SHELL_IDENTITY};
use switchyard_protocol::{
    is_valid_name, Identity, InstanceInfo, JsonRpcRequest, SocketClient, ROOT_USER_ID,
};

#[derive(Parser, Debug)]
#[command(name = "switchyard", version, about = "Service broker")]
struct Args {
    /// Control socket to serve or talk to
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the broker until Ctrl-C
    Serve {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Directory of service manifests
        #[arg(long)]
        manifests: Option<PathBuf>,
        /// Services to connect at startup
        #[arg(long = "start", value_name = "NAME")]
        start: Vec<String>,
    },
    /// List running instances
    Ps,
    /// Ask the broker to connect to a service
    Connect {
        name: String,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        instance: Option<String>,
    },
    /// Broker status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match args.command {
        Command::Serve {
            config,
            manifests,
            start,
        } => serve(config, manifests, args.socket, start).await,
        Command::Ps => ps(args.socket).await,
        Command::Connect {
            name,
            user,
            instance,
        } => {
            let mut params = json!({ "name": name });
            if let Some(user) = user {
                params["user_id"] = json!(user);
            }
            if let Some(instance) = instance {
                params["instance"] = json!(instance);
            }
            let result = call(args.socket, "shell.connect", params).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Command::Status => {
            let result = call(args.socket, "shell.status", Value::Null).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}

async fn serve(
    config_path: Option<PathBuf>,
    manifests: Option<PathBuf>,
    socket: Option<PathBuf>,
    start: Vec<String>,
) -> anyhow::Result<()> {
    let mut config = match &config_path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if manifests.is_some() {
        config.manifest_dir = manifests;
    }
    if socket.is_some() {
        config.socket_path = socket;
    }

    let catalog = Arc::new(ManifestCatalog::new(config.manifest_dir()?));
    let loaded = catalog
        .load_from_disk()
        .await
        .context("loading manifests")?;
    info!("Loaded {} manifests from {:?}", loaded, catalog.manifest_dir());
    if config.watch_manifests {
        Arc::clone(&catalog).start_watcher().await?;
    }

    let shell = Shell::spawn(
        catalog,
        Box::new(OutOfProcessNativeRunnerFactory::new(config.runner.options())),
        ShellOptions::from_config(&config),
    );
    shell.set_instance_quit_callback(|identity: &Identity| {
        info!("Instance {} quit", identity);
    });

    for name in config.startup.iter().chain(start.iter()) {
        if !is_valid_name(name) {
            warn!("Skipping invalid startup name {}", name);
            continue;
        }
        let (callback, response) = ConnectCallback::channel();
        shell.connect(
            ConnectParams::new(SHELL_IDENTITY.clone(), Identity::new(name.as_str(), ROOT_USER_ID))
                .with_connect_callback(callback),
        );
        match response.await {
            Ok(response) if response.is_success() => {
                info!("Started {} as instance {}", name, response.instance_id)
            }
            Ok(response) => warn!("Startup connect to {} failed: {}", name, response.result.as_str()),
            Err(_) => warn!("Startup connect to {} was dropped", name),
        }
    }

    let server = Arc::new(ControlServer::new(config.socket_path()?, shell.clone()));
    let running = Arc::clone(&server);
    let mut server_task = tokio::spawn(async move { running.start().await });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for Ctrl-C")?;
            info!("Interrupted, shutting down");
            server.shutdown();
            server_task.await??;
        }
        result = &mut server_task => {
            result??;
        }
    }

    shell.shutdown().await;
    Ok(())
}

async fn ps(socket: Option<PathBuf>) -> anyhow::Result<()> {
    let result = call(socket, "instances.list", Value::Null).await?;
    let instances: Vec<InstanceInfo> = serde_json::from_value(result)?;

    println!("{:>5}  {:>7}  {:<32}  {:<20}  {}", "ID", "PID", "NAME", "INSTANCE", "USER");
    for info in instances {
        let pid = info.pid.map(|pid| pid.to_string()).unwrap_or_else(|| "-".into());
        println!(
            "{:>5}  {:>7}  {:<32}  {:<20}  {}",
            info.id,
            pid,
            info.identity.name(),
            info.identity.instance(),
            info.identity.user_id()
        );
    }
    Ok(())
}

async fn call(socket: Option<PathBuf>, method: &str, params: Value) -> anyhow::Result<Value> {
    let mut client = match socket {
        Some(path) => SocketClient::connect_to(path).await?,
        None => SocketClient::connect().await?,
    };
    let response = client.call(JsonRpcRequest::new(method, params)).await?;
    if let Some(error) = response.error {
        anyhow::bail!("{} failed ({}): {}", method, error.code, error.message);
    }
    Ok(response.result.unwrap_or(Value::Null))
}
