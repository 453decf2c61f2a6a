use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::InfoLevel;

/// Compile Rust crates to WebAssembly modules, reusing earlier results
/// while nothing they depend on has changed.
#[derive(Parser, Debug)]
#[command(version)]
pub struct Cli {
    /// Verbosity:
    /// -v -> Debug
    /// -vv -> Trace
    /// -q -> Warn
    /// -qq -> Error
    /// -qqq -> Off.
    /// Default (/ no argument given): 'info'
    #[command(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<InfoLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArg {
    /// Path to a JSON config file. Defaults to `wasmbuild.json` in the
    /// current directory when present.
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Crate directories or `Cargo.toml` files to build
    #[arg(default_value = ".")]
    pub paths: Vec<PathBuf>,

    #[command(flatten)]
    pub config: ConfigArg,

    /// Ignore artifacts left in the cache directory by earlier runs
    #[arg(long)]
    pub force: bool,

    /// Shell command to run once every build has finished successfully
    #[arg(long)]
    pub after_build: Option<String>,

    /// Print the files each build depends on
    #[arg(long)]
    pub print_deps: bool,

    /// Disable timing in the output
    #[arg(long)]
    pub no_timing: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Build crates into bound WebAssembly modules
    Build(BuildArgs),
    /// Print the files a crate's build depends on, without building
    Deps {
        /// Crate directory or `Cargo.toml`
        #[arg(default_value = ".")]
        path: PathBuf,

        #[command(flatten)]
        config: ConfigArg,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn build_defaults_to_current_dir() {
        let cli = Cli::try_parse_from(["wasmbuild", "build"]).unwrap();
        match cli.command {
            Command::Build(args) => {
                assert_eq!(args.paths, vec![PathBuf::from(".")]);
                assert!(!args.force);
                assert!(args.after_build.is_none());
            }
            other => panic!("expected build, got {other:?}"),
        }
    }

    #[test]
    fn build_accepts_many_paths_and_flags() {
        let cli = Cli::try_parse_from([
            "wasmbuild",
            "-v",
            "build",
            "crates/filters",
            "crates/codec/Cargo.toml",
            "--force",
            "--after-build",
            "npm run bundle",
            "--config",
            "ci.json",
        ])
        .unwrap();
        assert_eq!(cli.verbose.log_level_filter(), log::LevelFilter::Debug);
        let Command::Build(args) = cli.command else {
            panic!("expected build");
        };
        assert_eq!(args.paths.len(), 2);
        assert!(args.force);
        assert_eq!(args.after_build.as_deref(), Some("npm run bundle"));
        assert_eq!(args.config.config, Some(PathBuf::from("ci.json")));
    }
}
