// SPDX-FileCopyrightText: 2024 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

use std::env;
use std::io;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log;
use simple_logger;

mod aws;
mod cluster;
mod config;
mod docker;
mod driver;
mod gce;
mod machine;
mod node;
mod runner;

use anyhow::Result;

use crate::cluster::Cluster;
use crate::config::{ClusterContext, Provider, Settings};
use crate::docker::Docker;
use crate::driver::NodeDriver;
use crate::machine::DockerMachine;
use crate::runner::CommandRunner;

/// Deploy and manage a cockroach cluster on top of docker-machine.
#[derive(Parser, Debug)]
#[command(name = "cockroach-deploy")]
#[command(version = option_env!("BUILD_GIT_VERSION").unwrap_or(env!("CARGO_PKG_VERSION")))]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    /// Config file, by default cockroach-deploy.yaml is searched for in the
    /// current directory and its parents.
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Increase verbosity, can be repeated.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize a cockroach cluster. This creates, initializes and starts
    /// the first node.
    Init,
    /// Add N new nodes to an existing cluster.
    AddNodes {
        #[arg(value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
        count: u32,
    },
    /// Start the given nodes, or all nodes.
    Start { nodes: Vec<String> },
    /// Stop the given nodes, or all nodes.
    Stop { nodes: Vec<String> },
    /// Show the status of the tools and cloud resources.
    Status,
    /// Show the effective parameters.
    ListParams,
}

fn log_level(verbose: u8) -> log::Level {
    match verbose {
        0 => log::Level::Info,
        1 => log::Level::Debug,
        _ => log::Level::Trace,
    }
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let cfg_path = match &cli.config {
        Some(path) => Some(path.clone()),
        None => {
            let cwd = env::current_dir().context("cannot determine current directory")?;
            config::locate(&cwd, config::CONFIG_FILE_NAME)
        }
    };

    let file_settings = match cfg_path {
        Some(path) => {
            log::debug!("loading config from {}", path.display());
            Settings::from_file(&path)?
        }
        None => Settings::default(),
    };
    Ok(cli.settings.clone().or(file_settings))
}

fn run<D: NodeDriver>(ctx: &ClusterContext, driver: D, command: Command) -> Result<()> {
    let mut cluster = Cluster::new(
        driver,
        DockerMachine::new(CommandRunner),
        Docker::new(CommandRunner),
        ctx.port,
    );

    match command {
        Command::Init => cluster.init().context("cannot initialize cluster"),
        Command::AddNodes { count } => cluster.add_nodes(count).context("cannot add nodes"),
        Command::Start { nodes } => cluster.start(&nodes).context("cannot start nodes"),
        Command::Stop { nodes } => cluster.stop(&nodes).context("cannot stop nodes"),
        Command::Status => cluster
            .print_status(&mut io::stdout())
            .context("cannot get driver status"),
        Command::ListParams => Ok(()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    simple_logger::init_with_level(log_level(cli.verbose)).context("cannot set up logging")?;

    let settings = load_settings(&cli)?;
    let ctx = ClusterContext::from_settings(settings);

    if let Command::ListParams = cli.command {
        for (name, value) in ctx.params() {
            println!("{}: {}", name, value);
        }
        return Ok(());
    }

    if let Command::Status = cli.command {
        cluster::check_tools(
            &mut DockerMachine::new(CommandRunner),
            &mut Docker::new(CommandRunner),
        )?;
    }

    let region = ctx.region()?;
    log::debug!("using {} region {}", region.provider, region.name);

    match region.provider {
        Provider::Aws => {
            let driver = aws::Amazon::init(&ctx, &region.name, CommandRunner)
                .context("failed to initialize AWS driver")?;
            run(&ctx, driver, cli.command)
        }
        Provider::Gce => {
            let driver = gce::Google::init(&ctx, &region.name, CommandRunner)
                .context("failed to initialize GCE driver")?;
            run(&ctx, driver, cli.command)
        }
    }
}
