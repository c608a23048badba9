use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Args, ValueEnum};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use innocent_lib::PoolVariant;

use crate::load_config;
use crate::simulation::{run_simulation, SimulationParams, SimulationReport};

/// Pool variant selectable on the command line
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum VariantArg {
    /// Fixed denomination per deposit
    Base,
    /// Variable-amount deposits earning accrued fees
    Shares,
}

impl From<VariantArg> for PoolVariant {
    fn from(arg: VariantArg) -> Self {
        match arg {
            VariantArg::Base => PoolVariant::Base,
            VariantArg::Shares => PoolVariant::Shares,
        }
    }
}

/// Run deposits and relayed withdrawals against an in-memory pool
#[derive(Args, Debug)]
pub struct SimulateCommand {
    /// Pool variant (overrides the config file)
    #[arg(long, value_enum)]
    pub variant: Option<VariantArg>,

    /// Number of notes to deposit and withdraw
    #[arg(long, short = 'n', default_value_t = 3)]
    pub deposits: usize,

    /// Per-deposit amount for the shares variant
    #[arg(long, short = 'a')]
    pub amount: Option<u128>,

    /// Relayer fee per withdrawal
    #[arg(long, short = 'f', default_value_t = 0)]
    pub fee: u128,

    /// Accrued-fee index growth, scaled by 10^18 per share
    #[arg(long, default_value_t = 0)]
    pub fees_growth: u128,

    /// Tree depth (overrides the config file)
    #[arg(long)]
    pub levels: Option<usize>,

    /// Write the final pool snapshot to this JSON file
    #[arg(long)]
    pub save_state: Option<PathBuf>,
}

impl SimulateCommand {
    pub fn execute(&self, config_path: Option<&Path>) -> anyhow::Result<()> {
        println!("{}", "🌀 Innocent - Simulate Command".bright_cyan().bold());
        println!("{}", "═".repeat(50).bright_black());
        println!();

        let mut config = load_config(config_path)?;
        if let Some(variant) = self.variant {
            config.variant = variant.into();
        }
        if let Some(levels) = self.levels {
            config.levels = levels;
        }

        println!("{}", "⚙️  Pool Parameters".bright_green().bold());
        println!("{}", "─".repeat(30).bright_black());
        println!("{} {:?}", "Variant:".bright_white(), config.variant);
        println!("{} {}", "Levels:".bright_white(), config.levels);
        println!(
            "{} {}",
            "Root history:".bright_white(),
            config.root_history_size
        );
        println!(
            "{} {}",
            "Denomination:".bright_white(),
            config.denomination.to_string().bright_yellow()
        );
        println!();

        let params = SimulationParams {
            deposits: self.deposits,
            amount: self.amount,
            fee: self.fee,
            fees_growth: self.fees_growth,
        };

        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
                .template("{spinner:.cyan} {msg}")?,
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message("Running simulation...");

        let result = run_simulation(&config, &params, &mut |step: &str| {
            pb.set_message(step.to_string());
        });
        let report = match result {
            Ok(report) => {
                pb.finish_with_message("✅ Simulation complete");
                report
            }
            Err(e) => {
                pb.finish_with_message("❌ Simulation failed");
                return Err(e);
            }
        };

        print_report(&report);

        if let Some(path) = &self.save_state {
            let json = serde_json::to_string_pretty(&report.snapshot)?;
            fs::write(path, json)
                .with_context(|| format!("failed to write snapshot to {}", path.display()))?;
            println!();
            println!(
                "{} Pool snapshot saved to {}",
                "💾".bright_green(),
                path.display().to_string().bright_cyan()
            );
        }

        Ok(())
    }
}

fn print_report(report: &SimulationReport) {
    println!();
    println!("{}", "📊 Results".bright_green().bold());
    println!("{}", "─".repeat(30).bright_black());
    println!(
        "{} {} deposits, {} withdrawals",
        "Notes:".bright_white(),
        report.deposits,
        report.withdrawals
    );
    println!("{} {}", "Final root:".bright_white(), report.root.bright_cyan());
    println!(
        "{} {}",
        "Depositor balance:".bright_white(),
        report.depositor_balance
    );
    println!(
        "{} {}",
        "Recipient balance:".bright_white(),
        report.recipient_balance.to_string().bright_green()
    );
    println!(
        "{} {}",
        "Relayer balance:".bright_white(),
        report.relayer_balance.to_string().bright_yellow()
    );
    println!("{} {}", "Pool balance:".bright_white(), report.pool_balance);
    if report.variant == PoolVariant::Shares {
        println!(
            "{} {}",
            "Fee index:".bright_white(),
            report.fees_accrued
        );
        println!(
            "{} {}",
            "Outstanding shares:".bright_white(),
            report.total_shares
        );
    }
}
