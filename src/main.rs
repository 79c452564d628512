// src/main.rs

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dnfdaemon::config::DnfDaemonConfig;
use dnfdaemon::daemon::client::TransactionResult;
use dnfdaemon::daemon::{self, InstanceLock};
use dnfdaemon::{ClientConfig, DaemonClient, DaemonEvent};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "dnfdaemon")]
#[command(author, version, about = "Privileged package-management session service", long_about = None)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Configuration file (default: /etc/dnfdaemon/dnfdaemon.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Daemon socket, overriding the configuration
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Seconds to wait for each reply
    #[arg(long, global = true, default_value_t = 60)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Serve {
        /// Never exit on idle
        #[arg(long)]
        notimeout: bool,

        /// Package catalogue (JSON), overriding the configuration
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Show whether the daemon is running
    Status,
    /// Print the daemon API version
    Version,
    /// List packages by filter (installed, available, updates, obsoletes, recent, extras)
    List {
        #[arg(default_value = "installed")]
        filter: String,
    },
    /// Search package names and summaries
    Search {
        keys: Vec<String>,
        /// Require every key to match
        #[arg(long)]
        all: bool,
    },
    /// Show package attributes
    Info {
        /// Package id (name,epoch,version,release,arch,origin)
        id: String,
    },
    /// List repositories
    Repolist {
        #[arg(default_value = "enabled")]
        filter: String,
    },
    /// Install packages
    Install {
        packages: Vec<String>,
        /// Trust signing keys the transaction asks about
        #[arg(long)]
        import_keys: bool,
    },
    /// Remove packages
    Remove { packages: Vec<String> },
    /// Update packages, or everything when none are named
    Update {
        packages: Vec<String>,
        #[arg(long)]
        import_keys: bool,
    },
    /// Show transaction history
    History {
        /// Days back to look
        #[arg(default_value_t = 30)]
        days: u32,
    },
    /// Ask the daemon to exit
    Exit,
}

/// `-d` gives debug, `-v` info; otherwise the daemon logs info and client
/// commands only warnings
fn log_level(cli: &Cli) -> &'static str {
    let serving = matches!(cli.command, Commands::Serve { .. });
    if cli.debug {
        "debug"
    } else if cli.verbose || serving {
        "info"
    } else {
        "warn"
    }
}

fn init_logging(cli: &Cli) {
    let level = log_level(cli);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let file_config = DnfDaemonConfig::load_or_default(cli.config.as_deref())?;
    let mut config = file_config.to_daemon_config();
    if let Some(socket) = &cli.socket {
        config.socket_path = socket.clone();
    }

    let client_config = ClientConfig {
        socket_path: config.socket_path.clone(),
        timeout: Duration::from_secs(cli.timeout),
    };

    match cli.command {
        Commands::Serve { notimeout, catalog } => {
            if notimeout {
                config = config.without_timeout();
            }
            if let Some(catalog) = catalog {
                config = config.with_catalog(catalog);
            }
            let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
            runtime.block_on(daemon::run_daemon(config))?;
            Ok(())
        }
        Commands::Status => {
            if daemon::is_daemon_running(&config.lock_path) {
                match InstanceLock::holder_pid(&config.lock_path) {
                    Some(pid) => println!("dnfdaemon is running (pid {})", pid),
                    None => println!("dnfdaemon is running"),
                }
            } else {
                println!("dnfdaemon is not running");
            }
            Ok(())
        }
        Commands::Version => {
            let client = DaemonClient::connect(client_config)?;
            println!("{}", client.get_version()?);
            Ok(())
        }
        Commands::List { filter } => {
            let client = DaemonClient::connect(client_config)?;
            for id in with_session(&client, |c| c.get_packages(&filter))? {
                println!("{}", id);
            }
            Ok(())
        }
        Commands::Search { keys, all } => {
            let client = DaemonClient::connect(client_config)?;
            let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
            let ids = with_session(&client, |c| {
                c.search(&["name", "summary"], &keys, all, true, false)
            })?;
            for id in ids {
                println!("{}", id);
            }
            Ok(())
        }
        Commands::Info { id } => {
            let client = DaemonClient::connect(client_config)?;
            with_session(&client, |c| {
                for attr in ["summary", "size", "action", "description"] {
                    let value = c.get_attribute(&id, attr)?;
                    println!(
                        "{:<12}: {}",
                        attr,
                        value.map(|v| v.to_string()).unwrap_or_default()
                    );
                }
                Ok(())
            })
        }
        Commands::Repolist { filter } => {
            let client = DaemonClient::connect(client_config)?;
            for id in with_session(&client, |c| c.get_repositories(&filter))? {
                println!("{}", id);
            }
            Ok(())
        }
        Commands::Install {
            packages,
            import_keys,
        } => {
            let client = DaemonClient::connect(client_config)?;
            let cmds = packages.join(" ");
            run_queued(&client, import_keys, |c| c.install(&cmds))
        }
        Commands::Remove { packages } => {
            let client = DaemonClient::connect(client_config)?;
            let cmds = packages.join(" ");
            run_queued(&client, false, |c| c.remove(&cmds))
        }
        Commands::Update {
            packages,
            import_keys,
        } => {
            let client = DaemonClient::connect(client_config)?;
            let cmds = if packages.is_empty() {
                "*".to_string()
            } else {
                packages.join(" ")
            };
            run_queued(&client, import_keys, |c| c.update(&cmds))
        }
        Commands::History { days } => {
            let client = DaemonClient::connect(client_config)?;
            for (tid, when) in with_session(&client, |c| c.get_history_by_days(0, days))? {
                println!("{:>5}  {}", tid, when);
            }
            Ok(())
        }
        Commands::Exit => {
            let client = DaemonClient::connect(client_config)?;
            if client.exit()? {
                println!("dnfdaemon is exiting");
            } else {
                println!("dnfdaemon is running a transaction, not exiting");
            }
            Ok(())
        }
    }
}

/// Run `f` while holding the session lock
fn with_session<T>(
    client: &DaemonClient,
    f: impl FnOnce(&DaemonClient) -> dnfdaemon::Result<T>,
) -> Result<T> {
    if !client.lock()? {
        bail!("dnfdaemon is locked by another application");
    }
    let result = f(client);
    if let Err(e) = client.unlock() {
        warn!("Failed to release the session lock: {}", e);
    }
    Ok(result?)
}

fn print_transaction((rc, output): &TransactionResult) {
    if *rc == 0 {
        println!("Nothing to do.");
        return;
    }
    for (action, members) in output {
        println!("{}:", action);
        for (id, size, replaces) in members {
            println!("  {:<60} {:>10}", id, size);
            for replaced in replaces {
                println!("    replacing {}", replaced);
            }
        }
    }
}

/// Queue packages with `queue`, then run the transaction
///
/// Signing keys the transaction asks about are confirmed and the run retried
/// once when `import_keys` is set.
fn run_queued(
    client: &DaemonClient,
    import_keys: bool,
    queue: impl FnOnce(&DaemonClient) -> dnfdaemon::Result<TransactionResult>,
) -> Result<()> {
    let keys = Rc::new(RefCell::new(Vec::new()));
    let seen = keys.clone();
    client.on_signal(move |event| match event {
        DaemonEvent::TransactionEvent { event, .. } => info!("transaction: {:?}", event),
        DaemonEvent::RpmProgress {
            package,
            action,
            te_current,
            te_total,
            ..
        } => info!("{:?} {} ({}/{})", action, package, te_current, te_total),
        DaemonEvent::GpgImport {
            hexkeyid, userid, ..
        } => {
            println!("Signing key {} ({}) needs confirmation", hexkeyid, userid);
            seen.borrow_mut().push(hexkeyid.clone());
        }
        _ => {}
    });
    client.subscribe()?;

    with_session(client, |c| {
        let resolved = queue(c)?;
        print_transaction(&resolved);
        if resolved.0 == 0 {
            return Ok(());
        }

        match c.run_transaction() {
            Err(e) if import_keys && !keys.borrow().is_empty() => {
                warn!("Transaction failed ({}), importing requested keys", e);
                let pending: Vec<String> = keys.borrow_mut().drain(..).collect();
                for key in pending {
                    c.confirm_gpg_import(&key, true)?;
                }
                c.run_transaction()?;
            }
            other => {
                other?;
            }
        }
        println!("Transaction complete.");
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_flags() {
        let level = |args: &[&str]| log_level(&Cli::parse_from(args));
        assert_eq!(level(&["dnfdaemon", "status"]), "warn");
        assert_eq!(level(&["dnfdaemon", "-v", "status"]), "info");
        assert_eq!(level(&["dnfdaemon", "status", "--debug"]), "debug");
        assert_eq!(level(&["dnfdaemon", "serve"]), "info");
        assert_eq!(level(&["dnfdaemon", "-d", "serve"]), "debug");
    }
}
