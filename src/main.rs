// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, DatabaseCommands, QueryCommands, RepoCommands};
use quarry::UninstallOpts;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; -v raises the default to debug
    let default_filter = if cli.verbose { "quarry=debug" } else { "quarry=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_path();
    let rootfs = cli.rootfs;

    match cli.command {
        Commands::Install {
            packages,
            nodeps,
            args,
        } => commands::cmd_install(config, rootfs, &packages, nodeps, &args),

        Commands::Uninstall {
            packages,
            yes,
            force,
            nodeps,
            full,
            no_check_conflicts,
            skip_finalizers,
            no_preserve_essential,
        } => {
            let opts = UninstallOpts {
                force,
                no_deps: nodeps,
                ask: !yes,
                full,
                check_conflicts: !no_check_conflicts,
                skip_finalizers,
                preserve_system_essential_data: !no_preserve_essential,
            };
            commands::cmd_uninstall(config, rootfs, &packages, opts)
        }

        Commands::Upgrade { args } => commands::cmd_upgrade(config, rootfs, &args),

        Commands::Reinstall { packages, args } => {
            commands::cmd_reinstall(config, rootfs, &packages, &args)
        }

        Commands::Search {
            term,
            installed,
            file,
            label,
            category,
            hidden,
        } => {
            let opts = commands::SearchOptions {
                term,
                installed,
                file,
                label,
                category,
                hidden,
            };
            commands::cmd_search(config, rootfs, &opts)
        }

        Commands::Query(query) => match query {
            QueryCommands::Files { package } => commands::cmd_query_files(config, rootfs, &package),
            QueryCommands::Owner { path } => commands::cmd_query_owner(config, rootfs, &path),
            QueryCommands::Orphans => commands::cmd_query_orphans(config, rootfs),
        },

        Commands::Repo(repo) => match repo {
            RepoCommands::List { all } => commands::cmd_repo_list(config, rootfs, all),
            RepoCommands::Update { names, force } => {
                commands::cmd_repo_update(config, rootfs, &names, force)
            }
        },

        Commands::Database(database) => match database {
            DatabaseCommands::Create { metadata } => {
                commands::cmd_database_create(config, rootfs, &metadata)
            }
            DatabaseCommands::Remove { packages } => {
                commands::cmd_database_remove(config, rootfs, &packages)
            }
        },

        Commands::Doctor => commands::cmd_doctor(config, rootfs),
    }
}
