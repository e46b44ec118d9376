use anyhow::Result;
use clap::{Parser, Subcommand};
use rollcall_core::{CommandEncoder, EncodingStore, RejectionLog, Roster};
use std::path::{Path, PathBuf};

mod config;
mod engine;
mod prompt;

use config::Config;

#[derive(Parser)]
#[command(name = "rollcall", about = "Classroom attendance from a single photo")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take attendance from a classroom photo
    Take {
        /// Roster CSV (Reg No, Name, File Paths)
        #[arg(short, long)]
        roster: PathBuf,
        /// Photo to take attendance from
        #[arg(short, long)]
        image: PathBuf,
        /// Directory for the presentees/absentees files
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
        /// Skip confirmation prompts; ambiguous detections stay unresolved
        #[arg(long)]
        yes: bool,
    },
    /// Rebuild the reference-encoding cache from the roster images
    Precompute {
        /// Roster CSV (Reg No, Name, File Paths)
        #[arg(short, long)]
        roster: PathBuf,
    },
    /// Show store and cache state for a roster
    Status {
        /// Roster CSV (Reg No, Name, File Paths)
        #[arg(short, long)]
        roster: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = Config::from_env();

    match cli.command {
        Commands::Take {
            roster,
            image,
            out_dir,
            yes,
        } => take(&cfg, &roster, &image, &out_dir, yes).await,
        Commands::Precompute { roster } => precompute(&cfg, &roster),
        Commands::Status { roster } => status(&cfg, &roster),
    }
}

async fn take(cfg: &Config, roster: &Path, image: &Path, out_dir: &Path, yes: bool) -> Result<()> {
    let handle = engine::spawn_engine(cfg, roster)?;

    let report = handle.submit(image.to_path_buf()).await?;
    if report.detections == 0 {
        println!("No faces detected; marking everyone absent.");
    }
    for (reg_no, name) in &report.confirmed {
        println!("Present: {name} ({reg_no})");
    }
    if report.unknown > 0 {
        println!("Unrecognized faces: {}", report.unknown);
    }
    if report.suppressed > 0 {
        println!(
            "Skipped {} candidate(s) previously rejected for the same student.",
            report.suppressed
        );
    }

    for pending in report.pending {
        if yes {
            continue;
        }
        let reg_no = pending.candidate.reg_no.clone();
        let question = format!(
            "Is this really {} ({reg_no})? distance {:.3}",
            pending.name, pending.candidate.distance
        );
        let accept = prompt::confirm(&question);
        if handle.resolve(pending.candidate, accept).await? {
            println!("Present: {} ({reg_no})", pending.name);
        }
    }

    let date = chrono::Local::now().date_naive();
    let finish = handle.finish(out_dir.to_path_buf(), date).await?;
    println!(
        "Total Present: {} | Total Absent: {}",
        finish.attendance.present.len(),
        finish.attendance.absent.len()
    );
    println!("Presentees saved to: {}", finish.present_path.display());
    println!("Absentees saved to: {}", finish.absent_path.display());
    Ok(())
}

fn precompute(cfg: &Config, roster_path: &Path) -> Result<()> {
    let roster = Roster::load(roster_path)?;
    let encoder = CommandEncoder::new(&cfg.encoder_cmd);
    let store = EncodingStore::precompute(&roster, &encoder, cfg.encode_workers);
    store.save(&cfg.cache_path)?;
    println!(
        "Encoding cache rebuilt: {} ({} students, {} encodings)",
        cfg.cache_path.display(),
        roster.len(),
        store.total_encodings()
    );
    Ok(())
}

fn status(cfg: &Config, roster_path: &Path) -> Result<()> {
    let roster = Roster::load(roster_path)?;
    let fresh = rollcall_core::store::cache_is_fresh(roster_path, &cfg.cache_path);

    println!(
        "Cache: {} ({})",
        cfg.cache_path.display(),
        if fresh { "fresh" } else { "absent or stale" }
    );

    if fresh {
        match EncodingStore::load(&cfg.cache_path, &roster) {
            Ok(store) => {
                for (reg_no, encodings) in store.iter() {
                    let name = roster.name_of(reg_no).unwrap_or("?");
                    println!("{reg_no}  {name}: {} encoding(s)", encodings.len());
                }
            }
            Err(e) => println!("Cache unreadable ({e}); run `rollcall precompute`."),
        }
    }

    let rejections = RejectionLog::load(&cfg.rejections_path);
    println!("Rejection log: {} vector(s)", rejections.total_rejections());
    Ok(())
}
