use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use std::io::Read;

use tagmail::config::{load_config, resolve_db_path};
use tagmail::daemon::{DaemonConfig, run_daemon};
use tagmail::remote;
use tagmail::secrets;
use tagmail::store::SqliteStore;
use tagmail::web;

#[derive(Parser)]
#[command(name = "tagmail")]
#[command(about = "Tag-centric webmail backend over an IMAP account", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the JSON API server
    Serve {
        /// Override the listen address from the config
        #[arg(long)]
        listen: Option<String>,
    },

    /// One-shot sync from the remote account
    Sync,

    /// Sync on an interval until Ctrl-C
    Daemon {
        #[arg(long, default_value_t = 60)]
        interval: u64,
    },

    /// Store the account password in the OS keyring
    SetPassword,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::SetPassword => {
            let cfg = load_config().map_err(|e| anyhow!("Configuration error: {e}"))?;
            eprintln!("Paste password for {} (end with Ctrl-D):", cfg.username);
            let mut password = String::new();
            std::io::stdin().read_to_string(&mut password)?;
            let password = password.trim();
            secrets::save_password(&cfg.username, password)?;
            println!("Saved password for {}", cfg.username);
            Ok(())
        }

        Command::Sync => {
            let cfg = load_config().map_err(|e| anyhow!("Configuration error: {e}"))?;
            let db_path = resolve_db_path(&cfg)?;
            let mut store = SqliteStore::open(&db_path)?;
            remote::sync::sync(&mut store, &cfg)
        }

        Command::Daemon { interval } => {
            let cfg = load_config().map_err(|e| anyhow!("Configuration error: {e}"))?;
            let db_path = resolve_db_path(&cfg)?;
            let mut store = SqliteStore::open(&db_path)?;
            run_daemon(
                &mut store,
                &cfg,
                DaemonConfig {
                    interval_secs: interval,
                },
            )
        }

        Command::Serve { listen } => {
            let mut cfg = load_config().map_err(|e| anyhow!("Configuration error: {e}"))?;
            if listen.is_some() {
                cfg.listen = listen;
            }
            let db_path = resolve_db_path(&cfg)?;
            let store = SqliteStore::open(&db_path)?;
            web::serve(cfg, store)
        }
    }
}
