use anyhow::{Context, Result};
use clap::Parser;
use futures::future::join_all;
use log::LevelFilter;
use std::{env, io::Write};

use wasmbuild::build::Orchestrator;
use wasmbuild::build::toolchain::SystemRunner;
use wasmbuild::output::TerminalReporter;
use wasmbuild::{cli, cmd, config, helpers};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    let log_level_filter = cli.verbose.log_level_filter();

    env_logger::Builder::new()
        .format(|buf, record| writeln!(buf, "{}:\n{}", record.level(), record.args()))
        .filter_level(log_level_filter)
        .target(env_logger::fmt::Target::Stdout)
        .init();

    // The 'normal run' mode will show the 'pretty' formatted progress. But if we turn off the log
    // level, we should never show that.
    let show_progress = log_level_filter == LevelFilter::Info;

    let root = helpers::get_abs_path(&env::current_dir().context("Could not read the current directory")?);

    match cli.command {
        cli::Command::Build(build_args) => {
            let config = config::load(&root, build_args.config.config.as_deref())?;
            let reporter = TerminalReporter::new(show_progress, build_args.no_timing);
            let orchestrator = Orchestrator::new(config, &root).adopt_existing(!build_args.force);

            let results = join_all(
                build_args
                    .paths
                    .iter()
                    .map(|path| orchestrator.resolve_and_build(path, &reporter)),
            )
            .await;

            if build_args.print_deps {
                for resolution in results.iter().flatten() {
                    for dependency in &resolution.dependencies {
                        println!("{}", dependency.display());
                    }
                }
            }

            // Every cycle has released by now; the after-build command only
            // runs when all of them succeeded.
            let outcomes = orchestrator.barrier().wait_all().await;
            if outcomes.iter().any(|(_, outcome)| !outcome.is_success()) {
                std::process::exit(1)
            }

            if let Some(command) = &build_args.after_build {
                if let Err(e) = cmd::run(&SystemRunner, command, &root, &reporter).await {
                    println!("{e}");
                    std::process::exit(1)
                }
            }
            Ok(())
        }
        cli::Command::Deps { path, config: config_arg } => {
            let config = config::load(&root, config_arg.config.as_deref())?;
            let orchestrator = Orchestrator::new(config, &root);
            let dependencies = orchestrator.dependencies(&path).await?;
            for file in dependencies.watch_files() {
                println!("{}", file.display());
            }
            Ok(())
        }
    }
}
