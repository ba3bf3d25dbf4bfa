mod app;
mod commands;
mod output;

use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })
    .expect("failed to set Ctrl+C handler");

    let cli = Cli::parse();

    // aspectweave info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("aspectweave", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    match &cli.command {
        Command::Weave {
            path,
            references,
            key_file,
            key_container,
            key_store,
            no_symbols,
        } => commands::weave::run(
            path,
            &commands::weave::WeaveOptions {
                references: &references.references,
                key_file: key_file.as_deref(),
                key_container: key_container.as_deref(),
                key_store: key_store.as_deref(),
                symbols: !*no_symbols,
                global: &cli.global,
            },
        ),
        Command::Inspect {
            path,
            references,
            member,
        } => commands::inspect::run(path, &references.references, member.as_deref(), &cli.global),
    }
}
