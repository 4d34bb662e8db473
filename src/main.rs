use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use mirrorfs::config::{self, Config, OfflineIdentity};
use mirrorfs::dispatch::{Output, Session, ShellCommand, Volume};
use mirrorfs::identity::{Identity, Role};
use mirrorfs::remote::{Server, spawn_health_monitor};
use mirrorfs::replicate::{InProcessBus, Publisher, spawn_consumer};
use mirrorfs::restore::restore_into;

#[derive(Parser)]
#[command(name = "mirrorfs", version, about = "In-memory mirrored filesystem client")]
struct Cli {
    /// YAML config file; defaults apply when absent
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run command lines against a fresh volume using ./mirrorfs run "mkdir /a" "ls /"
    Run {
        #[arg(value_name = "COMMAND_LINE", required = true)]
        lines: Vec<String>,
    },
    /// Load a snapshot archive into the volume, then run command lines
    Restore {
        /// Archive path; defaults to the configured backup location
        #[arg(short, long)]
        archive: Option<PathBuf>,
        #[arg(value_name = "COMMAND_LINE")]
        lines: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => {
            config::load_config(path.to_str().context("config path is not valid unicode")?)?
        }
        None => Config::default(),
    };

    match cli.command {
        Commands::Run { lines } => run(cfg, None, lines).await,
        Commands::Restore { archive, lines } => {
            let archive = match archive {
                Some(path) => path,
                None => {
                    let backup = cfg
                        .backup
                        .as_ref()
                        .context("no archive given and no backup configured")?;
                    PathBuf::from(&backup.local_dir).join(&backup.archive)
                }
            };
            run(cfg, Some(archive), lines).await
        }
    }
}

async fn run(cfg: Config, archive: Option<PathBuf>, lines: Vec<String>) -> anyhow::Result<()> {
    let (identity, server) = connect(&cfg).await?;

    let volume = Arc::new(Mutex::new(Volume::new(cfg.cache_capacity)));
    if let Some(archive) = archive {
        restore_into(&volume, &archive, identity.uid, identity.gid).await?;
    }

    let bus = Arc::new(InProcessBus::new());
    let publisher = Arc::new(Publisher::new(bus.clone(), cfg.topic.clone()));
    let cancel = CancellationToken::new();
    let consumer = spawn_consumer(
        bus.as_ref(),
        &cfg.topic,
        Arc::clone(&volume),
        identity.client_id.clone(),
        cancel.clone(),
    );
    if let Some(server) = &server {
        spawn_health_monitor((**server).clone(), cancel.clone());
    }

    let mut session = Session::new(volume, Arc::clone(&publisher), identity)
        .with_upload_limit(cfg.max_upload_bytes())
        .with_migrate_clients(cfg.migrate_clients.clone());
    if let Some(server) = &server {
        session = session.with_origin(Arc::<Server>::clone(server)).with_server(Arc::clone(server));
    }

    for line in &lines {
        if line.trim().is_empty() {
            continue;
        }
        if let Err(err) = execute_line(&mut session, line).await {
            eprintln!("{err}");
        }
    }

    // Let queued replication commands flush before tearing down.
    publisher.drain().await;
    cancel.cancel();
    let _ = consumer.await;
    Ok(())
}

async fn execute_line(session: &mut Session, line: &str) -> mirrorfs::Result<()> {
    let cmd = ShellCommand::parse(line)?;
    match session.execute(cmd).await? {
        Output::None => {}
        Output::Text(text) => println!("{text}"),
        Output::Listing(entries) => {
            for (name, kind) in entries {
                println!("{kind}\t{name}");
            }
        }
        Output::Bytes(bytes) => {
            use std::io::Write;
            std::io::stdout().write_all(&bytes)?;
            if !bytes.ends_with(b"\n") {
                println!();
            }
        }
    }
    Ok(())
}

async fn connect(cfg: &Config) -> anyhow::Result<(Identity, Option<Arc<Server>>)> {
    if let Some(server_cfg) = &cfg.server {
        let (Some(username), Some(password)) = (&server_cfg.username, &server_cfg.password) else {
            anyhow::bail!("server.username and server.password are required to log in");
        };
        let server = Server::new(&server_cfg.addr);
        let identity = server.login(username, password).await.context("login failed")?;
        info!("logged in to {} as uid {}", server_cfg.addr, identity.uid);
        let server = Arc::new(server.authenticated(identity.token.clone()));
        Ok((identity, Some(server)))
    } else {
        let offline = cfg
            .offline_identity
            .unwrap_or(OfflineIdentity { uid: 0, gid: 0, role: Role::Admin });
        let identity = Identity::offline(offline.uid, offline.gid, offline.role);
        info!("running offline as uid {} ({:?})", identity.uid, identity.role);
        Ok((identity, None))
    }
}
