use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};
use cfg_if::cfg_if;
use clap::{Parser, Subcommand};
use colored::Colorize;
use primitive_types::U256;
use tracing::*;

use miner::config::{load_config_file, MinerConfig};
use searcher::{hasher::verify_key, PoolEvent, SearchParams, SearchPool};
use shared::{store::FileStore, types::Address};

cfg_if! {
    if #[cfg(feature = "build-version")] {
        include!(concat!(env!("OUT_DIR"), "/version.rs"));
    } else {
        pub const VERSION: &str = "unknown";
    }
}

#[derive(Parser, Debug)]
#[command(about, version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Measure the local hash rate on a random round
    Bench {
        #[arg(long, default_value_t = 8, help = "Key length to search for, 8 to 64")]
        difficulty: u32,
        #[arg(long, help = "Worker threads, 0 for every core [default: 1]")]
        threads: Option<usize>,
        #[arg(long, default_value_t = 30, help = "Seconds to run")]
        seconds: u64,
    },
    /// Check a key against a round's random value
    Verify {
        #[arg(long, help = "Round random value, hex")]
        random: String,
        #[arg(long)]
        address: Address,
        #[arg(long)]
        key: String,
        #[arg(long, default_value = "")]
        salt: String,
    },
    /// Load and validate a config file
    CheckConfig {
        #[arg(long, default_value = "miner.json")]
        config: String,
        #[arg(long, help = "Signing account, when the config names no address")]
        signer: Option<Address>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shared::log::init_log("miner=debug");

    info!("VERSION:{}", VERSION);

    let args = Args::parse();
    match args.command {
        Command::Bench {
            difficulty,
            threads,
            seconds,
        } => bench(difficulty, threads, seconds).await,
        Command::Verify {
            random,
            address,
            key,
            salt,
        } => verify(&random, address, &key, &salt),
        Command::CheckConfig { config, signer } => check_config(&config, signer),
    }
}

async fn bench(difficulty: u32, threads: Option<usize>, seconds: u64) -> anyhow::Result<()> {
    let cpus = num_cpus::get();
    let config = MinerConfig {
        threads,
        difficulty,
        ..Default::default()
    };
    config.validate(cpus)?;
    let threads = config.thread_count(cpus);

    let random = U256::from_big_endian(&rand::random::<[u8; 32]>());
    let mut pool = SearchPool::start(SearchParams {
        address: Address(rand::random()),
        salt: String::new(),
        threads,
        resume: U256::zero(),
        difficulty,
        random,
    });
    info!("benchmarking {threads} threads at difficulty {difficulty} for {seconds}s");

    let started = Instant::now();
    let until = tokio::time::Instant::now() + Duration::from_secs(seconds);
    let mut hashes = 0u64;
    let mut solutions = 0u64;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(until) => break,
            event = pool.next_event() => match event {
                PoolEvent::Throughput(sample) => hashes += sample.count,
                PoolEvent::SolutionFound(solution) => {
                    solutions += 1;
                    debug!("found {}", solution.key);
                }
                PoolEvent::Started { .. } | PoolEvent::Checkpoint { .. } => {}
            },
        }
    }
    pool.terminate();

    let rate = hashes as f64 / started.elapsed().as_secs_f64();
    println!("{} {:.0} H/s", "hash rate".bold(), rate);
    println!("{} {}", "keys found".bold(), solutions.to_string().green());
    Ok(())
}

fn verify(random: &str, address: Address, key: &str, salt: &str) -> anyhow::Result<()> {
    let random = U256::from_str_radix(random.trim_start_matches("0x"), 16)
        .map_err(|err| anyhow!("random is not hex: {err:?}"))?;
    if verify_key(random, &address, key, salt) {
        println!("{} {key}", "valid".green());
    } else {
        println!("{} {key}", "invalid".red());
    }
    Ok(())
}

fn check_config(path: &str, signer: Option<Address>) -> anyhow::Result<()> {
    let config = load_config_file(path)?;
    let Some(signer) = signer.or(config.address) else {
        bail!("{path} names no address, pass --signer");
    };
    let settings = config.settings(signer, num_cpus::get())?;
    FileStore::open(&config.store_dir)
        .with_context(|| format!("store directory {}", config.store_dir.display()))?;
    println!(
        "{} mining for {}, difficulty {}, {} threads, store {}",
        "ok".green(),
        settings.address,
        settings.difficulty,
        settings.threads,
        config.store_dir.display()
    );
    Ok(())
}
