//! `fsadmin`: inspect and edit the virtual tree and settings from a shell.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use fsadmin::{Admin, AdminSettings, CliOverrides, ConfigMap};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fsadmin", version, about = "Admin tool for the virtual file tree and its config")]
struct Cli {
    /// Config file (default: $FSADMIN_CONFIG, then ./config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override a setting for this run
    #[arg(long = "set", value_name = "KEY[=VALUE]", global = true)]
    overrides: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the tree with filesystem stats
    Tree,
    /// List a real directory (drives when omitted on Windows)
    Ls { path: Option<String> },
    /// Print the working directory
    Cwd,
    /// Print the effective value of a setting
    Get { key: String },
    /// Print all settings
    Dump {
        #[arg(long)]
        only: Vec<String>,
        #[arg(long)]
        omit: Vec<String>,
    },
    /// Add a node at the top of a folder
    Add {
        #[arg(long)]
        under: Option<String>,
        #[arg(long)]
        name: Option<String>,
        source: Option<String>,
    },
    /// Remove nodes
    Rm {
        #[arg(required = true)]
        uris: Vec<String>,
    },
    /// Set node properties, e.g. `set /docs hidden=true`
    Set {
        uri: String,
        #[arg(required = true, value_name = "KEY=VALUE")]
        props: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let admin = Admin::open(AdminSettings {
        config_path: cli.config,
        overrides: CliOverrides::from_pairs(&cli.overrides),
        watch: false,
        ..AdminSettings::default()
    })
    .context("cannot open config")?;

    let result = run(&admin, cli.command).await;
    admin.shutdown().await;
    result
}

async fn run(admin: &Admin, command: Command) -> Result<()> {
    match command {
        Command::Tree => print_json(&admin.get_vfs().await)?,
        Command::Cwd => println!("{}", admin.get_cwd()?.display()),
        Command::Get { key } => print_json(&admin.config().get(&key))?,
        Command::Dump { only, omit } => {
            let only: Vec<&str> = only.iter().map(String::as_str).collect();
            let omit: Vec<&str> = omit.iter().map(String::as_str).collect();
            print_json(&admin.config().get_all(&omit, &only))?;
        }
        Command::Add {
            under,
            name,
            source,
        } => admin.add_vfs(under.as_deref(), source, name)?,
        Command::Rm { uris } => {
            let uris = Value::from(uris);
            print_json(&admin.del_vfs(&uris)?)?;
        }
        Command::Set { uri, props } => {
            let props = parse_props(&props)?;
            print_json(&admin.set_vfs(&uri, &props)?)?;
        }
        Command::Ls { path } => {
            let cancel = CancellationToken::new();
            let entries = admin.ls(path.as_deref(), cancel.clone());
            let printer = tokio::task::spawn_blocking(move || -> Result<()> {
                for entry in entries {
                    println!("{}", serde_json::to_string(&entry?)?);
                }
                Ok(())
            });
            tokio::select! {
                result = printer => result??,
                _ = tokio::signal::ctrl_c() => cancel.cancel(),
            }
        }
    }
    Ok(())
}

/// `key=value` pairs; values are parsed as JSON when they parse, else kept as strings.
fn parse_props(pairs: &[String]) -> Result<ConfigMap> {
    let mut props = ConfigMap::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("expected KEY=VALUE, got {pair}");
        };
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        props.insert(key.to_string(), value);
    }
    Ok(props)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
