use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport, GlobalOptions};
use crate::logging;

#[derive(Parser)]
#[command(name = "mlarchive")]
#[command(about = "Incremental web archive for mlmmj mailing lists, rendered with MHonArc")]
#[command(after_help = "\
EXAMPLES:
  mlarchive --list /var/spool/mlmmj/dev --target /srv/www/lists archive
  mlarchive --list /var/spool/mlmmj/dev --sorted-dir /var/lib/mlarchive watch --catch-up
  mlarchive --list /var/spool/mlmmj/dev --target /srv/www/lists search dev 'segfault'")]
struct Cli {
    /// TOML config file (default: ~/.config/mlarchive/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Web archive output root
    #[arg(long, global = true, value_name = "DIR")]
    target: Option<PathBuf>,
    /// mlmmj list directory; repeatable, added to the configured lists
    #[arg(long = "list", global = true, value_name = "DIR", action = ArgAction::Append)]
    lists: Vec<PathBuf>,
    /// Persistent sorted tree (default: a temporary one per run)
    #[arg(long, global = true, value_name = "DIR")]
    sorted_dir: Option<PathBuf>,
    /// Print the command report as JSON
    #[arg(long, global = true)]
    json: bool,
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show registered lists and resolved directories
    Status,
    /// Copy new messages into the year/month sorted tree
    Preprocess,
    /// Preprocess, then render every bucket with MHonArc
    Archive {
        /// Render the existing sorted tree as is
        #[arg(long)]
        skip_preprocess: bool,
    },
    /// Sort new messages as they arrive, until SIGINT/SIGTERM
    Watch {
        /// Run a batch preprocess before watching
        #[arg(long)]
        catch_up: bool,
    },
    /// Stop a running `watch`
    Stop,
    /// Find rendered message pages containing a string
    Search {
        /// List name (last component of the list directory)
        list: String,
        query: String,
        /// Treat the query as a regular expression
        #[arg(long)]
        regex: bool,
    },
    /// Print the generated MHonArc resource file
    Rcfile,
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    for line in &report.details {
        println!("{line}");
    }
    for issue in &report.issues {
        eprintln!("issue: {issue}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let global = GlobalOptions {
        config: cli.config,
        target: cli.target,
        lists: cli.lists,
        sorted_dir: cli.sorted_dir,
    };
    let cfg = commands::resolve_config(&global)?;

    let report = match cli.command {
        Command::Status => commands::status::run(&commands::open_session(&cfg)?)?,
        Command::Preprocess => commands::preprocess::run(&commands::open_session(&cfg)?)?,
        Command::Archive { skip_preprocess } => commands::archive::run(
            &commands::open_session(&cfg)?,
            &commands::archive::ArchiveOptions { skip_preprocess },
        )?,
        Command::Watch { catch_up } => commands::watch::run(
            &cfg,
            commands::open_session(&cfg)?,
            &commands::watch::WatchCommandOptions { catch_up },
        )?,
        Command::Stop => commands::stop::run(&cfg)?,
        Command::Search { list, query, regex } => commands::search::run(
            &commands::open_session(&cfg)?,
            &commands::search::SearchOptions { list, query, regex },
        )?,
        Command::Rcfile => commands::rcfile::run(&cfg)?,
    };

    print_report(&report, cli.json)?;
    if !report.ok {
        std::process::exit(1);
    }
    Ok(())
}
