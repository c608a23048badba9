use std::path::Path;

use clap::Args;
use colored::*;
use innocent_lib::crypto::field_to_hex;
use innocent_lib::{Note, ParsedNote, PoseidonHasher};

use crate::load_config;

/// Generate a deposit note, or inspect an existing one
#[derive(Args, Debug)]
pub struct NoteCommand {
    /// Denomination recorded in the note (defaults to the pool config)
    #[arg(long, short = 'd')]
    pub denomination: Option<u128>,

    /// Inspect this note string instead of generating a new one
    #[arg(long)]
    pub parse: Option<String>,
}

impl NoteCommand {
    pub fn execute(&self, config_path: Option<&Path>) -> anyhow::Result<()> {
        println!("{}", "🗒️  Innocent - Note Command".bright_magenta().bold());
        println!("{}", "═".repeat(50).bright_black());
        println!();

        let (denomination, note, fresh) = match &self.parse {
            Some(raw) => {
                let parsed: ParsedNote = raw.trim().parse()?;
                (parsed.denomination, parsed.note, false)
            }
            None => {
                let denomination = match self.denomination {
                    Some(denomination) => denomination,
                    None => load_config(config_path)?.denomination,
                };
                (denomination, Note::new(), true)
            }
        };

        let commitment = note.commitment(&PoseidonHasher)?;
        let nullifier_hash = note.nullifier_hash(&PoseidonHasher)?;

        println!("{}", "📋 Note Details".bright_green().bold());
        println!("{}", "─".repeat(30).bright_black());
        println!(
            "{} {}",
            "Denomination:".bright_white(),
            denomination.to_string().bright_yellow()
        );
        println!(
            "{} {}",
            "Commitment:".bright_white(),
            field_to_hex(&commitment).bright_cyan()
        );
        println!(
            "{} {}",
            "Nullifier hash:".bright_white(),
            field_to_hex(&nullifier_hash).bright_cyan()
        );

        if fresh {
            println!();
            println!(
                "{} {}",
                "🔐".bright_blue(),
                "Keep this note secret, it is the only way to withdraw:".bright_red()
            );
            println!("   {}", note.to_note_string(denomination).bright_yellow().bold());
        }

        Ok(())
    }
}
