//! CLI binary for offline maintenance of trained configuration tables.
//!
//! Campaigns themselves are driven by the test generator embedding the
//! library; this tool prepares and inspects the files they share.
//!
//! # Usage
//!
//! ```bash
//! # Seed a combo-weight file with every pair of MySQL parameters
//! paramfuzz-explore pairs --target mysql --prefix state/mysql
//!
//! # Same, with random initial weights in 1..=100
//! paramfuzz-explore pairs --target mysql --prefix state/mysql --random --seed 7
//!
//! # Distil the trained table into a top-20 production pool
//! paramfuzz-explore distill --target mysql --prefix state/mysql --top 20 --output pool.txt
//!
//! # Show the heaviest combos and whether the feature table still loads
//! paramfuzz-explore inspect --target mysql --prefix state/mysql
//!
//! # Write replay scripts for the bugs in a checkpoint
//! paramfuzz-explore repro --target mysql --checkpoint state/checkpoint.json --output bugs/
//! ```

use clap::{Parser, Subcommand};
use paramfuzz_explore::action::{Combo, ConfigAction};
use paramfuzz_explore::checkpoint::load_checkpoint;
use paramfuzz_explore::distill::{distill, ranked, WeightTable};
use paramfuzz_explore::persist::{self, CampaignFiles};
use paramfuzz_explore::report::{format_bug, reproduction_script};
use paramfuzz_explore::targets::{DbmsTarget, TargetRegistry};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "paramfuzz-explore")]
#[command(about = "Maintain trained DBMS configuration tables")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the pairwise combo universe of a target as a weight file.
    Pairs {
        /// Target identifier.
        #[arg(short, long, default_value = "mysql")]
        target: String,

        /// File prefix; writes `{prefix}_config_weights.txt`.
        #[arg(short, long)]
        prefix: String,

        /// Random initial weights in 1..=100 instead of uniform 1.0.
        #[arg(long)]
        random: bool,

        /// Seed for --random.
        #[arg(short, long, default_value = "42")]
        seed: u64,
    },

    /// Distil a trained weight file into a production pool file.
    Distill {
        #[arg(short, long, default_value = "mysql")]
        target: String,

        /// File prefix of the trained tables.
        #[arg(short, long)]
        prefix: String,

        /// Pool size.
        #[arg(short = 'k', long, default_value = "20")]
        top: usize,

        /// Output weight file.
        #[arg(short, long)]
        output: String,
    },

    /// Print the heaviest combos and the feature table status.
    Inspect {
        #[arg(short, long, default_value = "mysql")]
        target: String,

        #[arg(short, long)]
        prefix: String,

        /// Number of combos to list.
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Write a replay script per bug recorded in a checkpoint.
    Repro {
        #[arg(short, long, default_value = "mysql")]
        target: String,

        /// Checkpoint written by a training campaign.
        #[arg(short, long)]
        checkpoint: String,

        /// Output directory for `bug_{id}.sql` files.
        #[arg(short, long)]
        output: String,

        /// Database created by each script.
        #[arg(short, long, default_value = "repro")]
        database: String,
    },
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Pairs {
            target,
            prefix,
            random,
            seed,
        } => cmd_pairs(&target, &prefix, random, seed),
        Commands::Distill {
            target,
            prefix,
            top,
            output,
        } => cmd_distill(&target, &prefix, top, &output),
        Commands::Inspect {
            target,
            prefix,
            limit,
        } => cmd_inspect(&target, &prefix, limit),
        Commands::Repro {
            target,
            checkpoint,
            output,
            database,
        } => cmd_repro(&target, &checkpoint, &output, &database),
    }
}

fn resolve_target(name: &str) -> Arc<dyn DbmsTarget> {
    let registry = TargetRegistry::with_builtin();
    match registry.get(name) {
        Ok(target) => target,
        Err(e) => {
            eprintln!("Error: {}. Known targets: {}", e, registry.names().join(", "));
            std::process::exit(1);
        }
    }
}

fn load_weights(target: &dyn DbmsTarget, files: &CampaignFiles) -> WeightTable {
    let path = files.config_weights();
    match persist::load_combo_weights(&path, target.list_actions()) {
        Ok(table) => table,
        Err(e) => {
            eprintln!("Error: failed to load {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn cmd_pairs(target: &str, prefix: &str, random: bool, seed: u64) {
    let target = resolve_target(target);
    let files = CampaignFiles::new(prefix);

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let table: WeightTable = Combo::pairwise(target.list_actions().as_slice())
        .into_iter()
        .map(|combo| {
            let weight = if random {
                rng.gen_range(1..=100) as f64
            } else {
                1.0
            };
            (combo, weight)
        })
        .collect();

    let path = files.config_weights();
    if let Err(e) = persist::save_combo_weights(&path, &table) {
        eprintln!("Error: failed to write {}: {}", path.display(), e);
        std::process::exit(1);
    }
    eprintln!(
        "Wrote {} combos of {} parameters to {}",
        table.len(),
        target.list_actions().len(),
        path.display()
    );
}

fn cmd_distill(target: &str, prefix: &str, top: usize, output: &str) {
    let target = resolve_target(target);
    let full = load_weights(target.as_ref(), &CampaignFiles::new(prefix));
    if full.is_empty() {
        eprintln!("Error: no usable combos in the weight file");
        std::process::exit(1);
    }

    let pool = distill(&full, top, &WeightTable::new());
    if let Err(e) = persist::save_combo_weights(output, &pool) {
        eprintln!("Error: failed to write {}: {}", output, e);
        std::process::exit(1);
    }
    eprintln!("Distilled {} of {} combos into {}", pool.len(), full.len(), output);
}

fn cmd_inspect(target: &str, prefix: &str, limit: usize) {
    let target = resolve_target(target);
    let files = CampaignFiles::new(prefix);
    let full = load_weights(target.as_ref(), &files);

    println!("═══════════════════════════════════════════════════════════════════════");
    println!("  Trained tables: {}", prefix);
    println!("═══════════════════════════════════════════════════════════════════════");
    println!();
    println!("Target:                 {}", target.name());
    println!("Parameters:             {}", target.list_actions().len());
    println!("Combos with weights:    {}", full.len());
    println!(
        "Total weight:           {:.6}",
        full.values().sum::<f64>()
    );
    println!();

    println!("─── Heaviest Combos ───────────────────────────────────────────────────");
    for (i, (combo, weight)) in ranked(&full, limit).iter().enumerate() {
        println!("  {:>3}. {:<50} {:.6}", i + 1, combo.to_string(), weight);
    }
    println!();

    println!("─── Feature Probabilities ─────────────────────────────────────────────");
    match persist::load_feature_probabilities(files.feature_weights(), target.list_actions()) {
        Ok(table) => {
            println!("Actions:                {}", table.len());
            println!("Dimension:              {}", table.dimension());
        }
        Err(e) => println!("Not usable:             {}", e),
    }
}

fn cmd_repro(target: &str, checkpoint: &str, output: &str, database: &str) {
    let target = resolve_target(target);
    let checkpoint = match load_checkpoint(checkpoint) {
        Ok(cp) => cp,
        Err(e) => {
            eprintln!("Error: failed to load checkpoint: {}", e);
            std::process::exit(1);
        }
    };

    if checkpoint.bugs.is_empty() {
        eprintln!("No bugs recorded at step {}", checkpoint.step);
        return;
    }

    if let Err(e) = fs::create_dir_all(output) {
        eprintln!("Error: failed to create output directory: {}", e);
        std::process::exit(1);
    }

    let actions: BTreeMap<String, ConfigAction> = target
        .list_actions()
        .as_slice()
        .iter()
        .map(|a| (a.name().to_string(), a.clone()))
        .collect();

    for bug in &checkpoint.bugs {
        let report = bug.to_report(&actions);
        let path = Path::new(output).join(format!("bug_{}.sql", report.bug_id));
        let script = reproduction_script(&report, target.as_ref(), database);
        match fs::write(&path, script) {
            Ok(()) => {
                eprintln!("Bug #{}:", report.bug_id);
                eprint!("{}", format_bug(&report));
                eprintln!("   Saved to:     {}", path.display());
            }
            Err(e) => eprintln!("Warning: failed to save bug {}: {}", report.bug_id, e),
        }
    }
}
