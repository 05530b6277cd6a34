use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use lazyssh::fs::OsFs;
use lazyssh::registry::sort_hosts;
use lazyssh::{logging, App, Host, HostRepository, Settings, SortMode, CRATE_NAME};

#[derive(Debug, Parser)]
#[command(name = CRATE_NAME, about = "Pick, tag and connect to hosts from ~/.ssh/config")]
#[command(disable_version_flag = true)]
struct Cli {
    /// SSH config file to manage
    #[arg(long, global = true, value_name = "PATH")]
    ssh_config: Option<PathBuf>,

    /// Metadata file holding tags, pins and usage
    #[arg(long, global = true, value_name = "PATH")]
    metadata: Option<PathBuf>,

    /// Print the version and exit
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// Print all hosts as tab-separated values and exit
    #[arg(short = 'l', long = "list")]
    list: bool,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Open the interactive picker (default)
    Ui,
    /// Print the version
    Version,
    /// Print all hosts as tab-separated values
    List,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{CRATE_NAME}: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let command = match cli.command {
        _ if cli.version => Cmd::Version,
        _ if cli.list => Cmd::List,
        Some(command) => command,
        None => Cmd::Ui,
    };
    if let Cmd::Version = command {
        println!("{CRATE_NAME} {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let settings = Settings::resolve(cli.ssh_config, cli.metadata)?;
    logging::init(&settings.log_file);
    let repo = settings.repository();

    match command {
        Cmd::List => {
            let mut hosts = repo.list_hosts("").context("failed to load hosts")?;
            sort_hosts(&mut hosts, SortMode::default());
            let mut stdout = io::stdout().lock();
            stdout.write_all(list_table(&hosts).as_bytes())?;
            stdout.flush()?;
            Ok(())
        }
        Cmd::Ui => App::new(repo, Arc::new(OsFs), settings.home.clone())?.run(),
        Cmd::Version => Ok(()),
    }
}

fn list_table(hosts: &[Host]) -> String {
    let mut out = String::from("Alias\tHost\tUser\tPort\tTags\tLast\n");
    for host in hosts {
        let last = host
            .last_seen
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\t{}\n",
            host.alias,
            host.effective_hostname(),
            host.user,
            host.effective_port(),
            host.tags.join(","),
            last
        ));
    }
    out
}
