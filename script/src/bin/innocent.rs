//! Innocent CLI - shielded pool notes and simulations
//!
//! Usage:
//! ```shell
//! # Generate a deposit note
//! cargo run --bin innocent -- note --denomination 100
//!
//! # Run deposits and relayed withdrawals against an in-memory pool
//! cargo run --bin innocent -- simulate --variant shares --deposits 5 --amount 20 --fee 1
//! ```

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use colored::*;
use console::Term;

use innocent_script::commands::{NoteCommand, SimulateCommand};
use innocent_script::{setup_logging, CONFIG_ENV};

#[derive(Parser)]
#[command(
    name = "innocent",
    about = "🛡️ Innocent - Shielded pool notes and simulations",
    long_about = "Innocent is a fixed-denomination shielded pool with an optional shares variant that accrues fees.\n\nFeatures:\n• Generate and inspect deposit notes\n• Simulate deposits and relayed withdrawals against an in-memory ledger\n• Save the resulting pool state as JSON",
    version = "0.1.0"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Pool config file (JSON)
    #[arg(long, short = 'c', env = CONFIG_ENV, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// 🗒️ Generate or inspect a deposit note
    Note(NoteCommand),
    /// 🌀 Simulate deposits and withdrawals
    Simulate(SimulateCommand),
}

fn print_banner() {
    if !Term::stdout().is_term() {
        return;
    }

    println!(
        "{}",
        r#"
    ╦╔╗╔╔╗╔╔═╗╔═╗╔═╗╔╗╔╔╦╗
    ║║║║║║║║ ║║  ║╣ ║║║ ║
    ╩╝╚╝╝╚╝╚═╝╚═╝╚═╝╝╚╝ ╩
    "#
        .bright_green()
        .bold()
    );
    println!("{}", "    Shielded Pool Toolkit".bright_cyan().italic());
    println!("{}", "    ═══════════════════════".bright_black());
    println!();
}

fn main() {
    // Load environment variables
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    setup_logging(cli.verbose);
    print_banner();

    let config = cli.config.as_deref();
    let result = match &cli.command {
        Commands::Note(note_cmd) => note_cmd.execute(config),
        Commands::Simulate(simulate_cmd) => simulate_cmd.execute(config),
    };

    match result {
        Ok(()) => {
            println!();
            println!(
                "{} {}",
                "✨".bright_green(),
                "Operation completed successfully!".bright_green().bold()
            );
        }
        Err(e) => {
            println!();
            eprintln!(
                "{} {}",
                "💥".bright_red(),
                "Operation failed!".bright_red().bold()
            );
            eprintln!("   {}", format!("{e:#}").bright_red());
            println!();
            eprintln!("{} {}", "💡".bright_blue(), "Tips:".bright_blue().bold());
            eprintln!("   • Check the config file passed via --config or {CONFIG_ENV}");
            eprintln!("   • Shares deposits must be positive and at most the denomination");
            eprintln!("   • Run with --verbose for detailed logs");

            process::exit(1);
        }
    }
}
