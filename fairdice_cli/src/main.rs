use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use fairdice_core::{
    derive_roll_with, sha256_hex, verify_commitment, CommitmentManager, Condition,
    DerivationScheme, DiceParams, JsonFileStore, ProvablyFairRng, Roll, SeedCommitment, Target,
    DEFAULT_HOUSE_EDGE,
};
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fairdice-cli", about = "Auditor and operator CLI for the fairdice server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Database URL, default sqlite://fairdice.db
    #[arg(long, value_parser, env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the SHA-256 commitment of a server seed
    Hash { seed: String },
    /// Derive the roll for a seed pair and nonce
    Roll {
        client_seed: String,
        server_seed: String,
        nonce: u64,
        #[arg(long, default_value = "sha256")]
        scheme: DerivationScheme,
    },
    /// Check a past bet against its revealed server seed
    Verify {
        #[arg(long)]
        client_seed: String,
        #[arg(long)]
        server_seed: String,
        /// Commitment published before the bet
        #[arg(long)]
        server_seed_hash: String,
        #[arg(long)]
        nonce: u64,
        #[arg(long)]
        roll: Roll,
        /// Also check the settlement; needs `--condition`
        #[arg(long, requires = "condition")]
        target: Option<f64>,
        #[arg(long, requires = "target")]
        condition: Option<Condition>,
        #[arg(long, default_value_t = DEFAULT_HOUSE_EDGE)]
        house_edge: f64,
        #[arg(long, default_value = "sha256")]
        scheme: DerivationScheme,
    },
    /// Local seed session kept in a JSON file
    Session {
        #[arg(long, default_value = "fairdice-session.json", env = "FAIRDICE_SESSION")]
        state: PathBuf,
        #[command(subcommand)]
        command: SessionCommand,
    },
    /// View last N bets
    ViewLogs {
        #[arg(default_value_t = 20)]
        n: i64,
    },
    /// Export bets to CSV path
    ExportCsv { path: String },
}

#[derive(Subcommand)]
enum SessionCommand {
    /// Create the first seed pair
    New {
        #[arg(long)]
        client_seed: Option<String>,
    },
    /// Show the active commitment
    Show,
    /// Roll one bet under the active pair
    Bet {
        wager: f64,
        target: f64,
        condition: Condition,
        #[arg(long, default_value_t = DEFAULT_HOUSE_EDGE)]
        house_edge: f64,
    },
    /// Replace the client seed
    ClientSeed { seed: String },
    /// Reveal the active server seed and start a new pair
    Rotate,
    /// List revealed seed pairs
    Revealed,
}

async fn get_pool(url: Option<String>) -> anyhow::Result<SqlitePool> {
    let url = url.unwrap_or_else(|| "sqlite://fairdice.db".into());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .with_context(|| format!("connect to {url}"))?;
    Ok(pool)
}

fn print_commitment(c: &SeedCommitment) {
    println!(
        "pair={} client_seed={} server_seed_hash={} nonce={}",
        c.pair_id, c.client_seed, c.server_seed_hash, c.nonce
    );
}

fn run_session(state: PathBuf, command: SessionCommand) -> anyhow::Result<()> {
    let manager = CommitmentManager::new(JsonFileStore::new(state))?;
    match command {
        SessionCommand::New { client_seed } => {
            print_commitment(&manager.create_initial_seed_pair(client_seed)?);
        }
        SessionCommand::Show => {
            print_commitment(&manager.commitment()?);
        }
        SessionCommand::Bet {
            wager,
            target,
            condition,
            house_edge,
        } => {
            let params = DiceParams::new(target, condition, house_edge)?;
            let (outcome, ()) = manager.place_bet(wager, &params, |_| Ok(()))?;
            println!(
                "nonce={} roll={} {} {} won={} multiplier={} payout={:.2}",
                outcome.nonce,
                outcome.roll,
                outcome.params.condition,
                outcome.params.target,
                outcome.won,
                outcome.multiplier,
                outcome.payout
            );
        }
        SessionCommand::ClientSeed { seed } => {
            let c = manager.set_client_seed(seed)?;
            println!("client_seed={} nonce={}", c.client_seed, c.nonce);
        }
        SessionCommand::Rotate => {
            let r = manager.rotate()?;
            println!(
                "previous_server_seed={} previous_hash={} outcomes={}",
                r.previous_server_seed(),
                r.revealed.server_seed_hash,
                r.revealed.final_nonce
            );
            println!(
                "new_server_seed_hash={} new_nonce={}",
                r.new_server_seed_hash(),
                r.new_nonce()
            );
        }
        SessionCommand::Revealed => {
            for pair in manager.revealed_pairs()? {
                println!(
                    "{} revealed={} client_seed={} server_seed={} nonces=0..{}",
                    pair.id,
                    pair.revealed_at.to_rfc3339(),
                    pair.client_seed,
                    pair.server_seed,
                    pair.final_nonce
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Hash { seed } => {
            println!("{}", sha256_hex(seed.as_bytes()));
        }
        Commands::Roll {
            client_seed,
            server_seed,
            nonce,
            scheme,
        } => {
            let rng = ProvablyFairRng::new(server_seed, client_seed, nonce).with_scheme(scheme);
            println!("digest={} roll={}", rng.digest_hex(), rng.roll());
        }
        Commands::Verify {
            client_seed,
            server_seed,
            server_seed_hash,
            nonce,
            roll,
            target,
            condition,
            house_edge,
            scheme,
        } => {
            if !verify_commitment(&server_seed, &server_seed_hash) {
                bail!("server seed does not hash to the published commitment {server_seed_hash}");
            }
            let recomputed = derive_roll_with(scheme, &client_seed, &server_seed, nonce);
            if recomputed != roll {
                bail!("verification mismatch: recorded roll {roll}, recomputed {recomputed}");
            }
            println!("commitment ok, roll {recomputed} reproduced");
            if let (Some(target), Some(condition)) = (target, condition) {
                let params = DiceParams::new(target, condition, house_edge)?;
                println!(
                    "{} {} -> won={} multiplier={}",
                    condition,
                    Target::try_from(target)?,
                    condition.wins(recomputed, params.target),
                    params.multiplier()?
                );
            }
        }
        Commands::Session { state, command } => run_session(state, command)?,
        Commands::ViewLogs { n } => {
            let pool = get_pool(cli.database_url).await?;
            let rows = sqlx::query(
                "SELECT id, ts, user_id, client_seed, nonce, server_seed_hash, roll, won, payout \
                 FROM bets ORDER BY id DESC LIMIT ?",
            )
            .bind(n)
            .fetch_all(&pool)
            .await?;
            for r in rows {
                let id: i64 = r.get("id");
                let ts: String = r.get("ts");
                let user_id: String = r.get("user_id");
                let client_seed: String = r.get("client_seed");
                let nonce: i64 = r.get("nonce");
                let server_seed_hash: String = r.get("server_seed_hash");
                let roll = Roll::from_hundredths(r.get::<i64, _>("roll") as u32)?;
                let won: bool = r.get("won");
                let payout: f64 = r.get("payout");
                println!(
                    "#{:>6} {} user={} seed={} nonce={} hash={} roll={} won={} payout={:.2}",
                    id, ts, user_id, client_seed, nonce, server_seed_hash, roll, won, payout
                );
            }
        }
        Commands::ExportCsv { path } => {
            let pool = get_pool(cli.database_url).await?;
            let mut wtr = csv::Writer::from_path(&path)?;
            wtr.write_record([
                "id", "ts", "user_id", "seed_pair_id", "client_seed", "server_seed_hash",
                "server_seed", "nonce", "scheme", "wager", "target", "condition", "house_edge",
                "roll", "multiplier", "won", "payout",
            ])?;
            let rows = sqlx::query(
                "SELECT id, ts, user_id, seed_pair_id, client_seed, server_seed_hash, \
                 server_seed, nonce, scheme, wager, target, condition, house_edge, roll, \
                 multiplier, won, payout FROM bets ORDER BY id ASC",
            )
            .fetch_all(&pool)
            .await?;
            let total = rows.len();
            for r in &rows {
                let target = Target::from_hundredths(r.get::<i64, _>("target") as u32)?;
                let roll = Roll::from_hundredths(r.get::<i64, _>("roll") as u32)?;
                wtr.write_record(&[
                    r.get::<i64, _>("id").to_string(),
                    r.get::<String, _>("ts"),
                    r.get::<String, _>("user_id"),
                    r.get::<String, _>("seed_pair_id"),
                    r.get::<String, _>("client_seed"),
                    r.get::<String, _>("server_seed_hash"),
                    r.get::<Option<String>, _>("server_seed").unwrap_or_default(),
                    r.get::<i64, _>("nonce").to_string(),
                    r.get::<String, _>("scheme"),
                    format!("{:.2}", r.get::<f64, _>("wager")),
                    target.to_string(),
                    r.get::<String, _>("condition"),
                    r.get::<f64, _>("house_edge").to_string(),
                    roll.to_string(),
                    r.get::<f64, _>("multiplier").to_string(),
                    r.get::<bool, _>("won").to_string(),
                    format!("{:.2}", r.get::<f64, _>("payout")),
                ])?;
            }
            wtr.flush()?;
            info!(rows = total, %path, "export finished");
            println!("Exported {} rows to {}", total, path);
        }
    }

    Ok(())
}
