//! CLI for the VDL batch media fetcher.

mod commands;

use anyhow::Result;
use clap::builder::PossibleValuesParser;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use vdl_core::config;
use vdl_core::format::{FORMAT_LABELS, SHORT_FORMAT_LABELS};

use commands::{collect_targets, run_completions, run_formats, run_get, run_man, run_probe};

/// Top-level CLI for the VDL batch media fetcher.
#[derive(Debug, Parser)]
#[command(name = "vdl")]
#[command(about = "VDL: parallel batch media fetcher built on yt-dlp", long_about = None)]
pub struct Cli {
    /// More log detail (-v, -vv). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Fetch metadata for every target in parallel and print a summary line each.
    Probe {
        /// Media page URLs (share-tracking parameters are stripped).
        targets: Vec<String>,

        /// Read additional targets from a file, one per line.
        #[arg(long, short = 'i', value_name = "FILE")]
        input: Option<PathBuf>,
    },

    /// Download targets, running at most N jobs at once.
    Get {
        /// Media page URLs (share-tracking parameters are stripped).
        targets: Vec<String>,

        /// Format label (see `vdl formats`). Defaults to the configured format.
        #[arg(
            long,
            short = 'f',
            value_name = "LABEL",
            value_parser = PossibleValuesParser::new(FORMAT_LABELS.iter().chain(SHORT_FORMAT_LABELS).copied())
        )]
        format: Option<String>,

        /// Concurrent downloads (default from config).
        #[arg(long, short = 'j', value_name = "N")]
        jobs: Option<usize>,

        /// Output directory (default from config, else the current directory).
        #[arg(long, short = 'd', value_name = "DIR")]
        dir: Option<PathBuf>,

        /// Skip the metadata prefetch; titles and playlist folders are then unknown.
        #[arg(long)]
        no_probe: bool,

        /// Read additional targets from a file, one per line.
        #[arg(long, short = 'i', value_name = "FILE")]
        input: Option<PathBuf>,
    },

    /// List the selectable format labels.
    Formats,

    /// Print a shell completion script to stdout.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Print the man page (roff) to stdout.
    Man,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            CliCommand::Formats => run_formats(),
            CliCommand::Completions { shell } => run_completions(shell),
            CliCommand::Man => run_man()?,
            CliCommand::Probe { targets, input } => {
                let cfg = config::load_or_init()?;
                tracing::debug!("loaded config: {:?}", cfg);
                let targets = collect_targets(&targets, input.as_deref())?;
                run_probe(cfg, &targets).await?;
            }
            CliCommand::Get {
                targets,
                format,
                jobs,
                dir,
                no_probe,
                input,
            } => {
                let cfg = config::load_or_init()?;
                tracing::debug!("loaded config: {:?}", cfg);
                let targets = collect_targets(&targets, input.as_deref())?;
                run_get(cfg, &targets, format.as_deref(), jobs, dir, no_probe).await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
