//! Raffle CLI
//!
//! Runs a simulated lottery against the local VRF coordinator and the
//! in-memory bank, printing each settled round as JSON.

use clap::Parser;
use raffle_engine::{
    config::generate_sample_config,
    oracle::BASE_FEE,
    raffle::{format_ether, RoundSummary},
    Address, ConfigLoader, InMemoryBank, LocalCoordinator, LotteryResult, OracleNode, Raffle,
    RaffleConfig, RaffleEvent, RaffleService, SystemClock, VrfEngine,
};
use serde::Serialize;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::broadcast::{self, error::RecvError};

const COORDINATOR_ADDRESS: u64 = 0xc0_0d1a;
const RAFFLE_ADDRESS: u64 = 0x0ff1_ce;
const FIRST_PLAYER: u64 = 0x1000;

/// Raffle Engine CLI
#[derive(Parser)]
#[command(name = "raffle")]
#[command(about = "Autonomous verifiably random lottery")]
#[command(version)]
struct Cli {
    /// Network preset (hardhat, sepolia)
    #[arg(short, long, default_value = "hardhat")]
    network: String,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Players entering each round
    #[arg(short, long, default_value = "5")]
    players: u64,

    /// Rounds to run before exiting
    #[arg(short, long, default_value = "3")]
    rounds: u32,

    /// Keeper poll interval in milliseconds
    #[arg(long)]
    poll_ms: Option<u64>,

    /// Round interval in seconds
    #[arg(short, long)]
    interval: Option<u64>,

    /// Write the network preset to this path and exit
    #[arg(long)]
    write_sample_config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> LotteryResult<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    if let Some(path) = &cli.write_sample_config {
        generate_sample_config(path, &cli.network)?;
        println!("Sample configuration written to {}", path.display());
        return Ok(());
    }

    let mut loader = ConfigLoader::new().with_network(&cli.network);
    if let Some(path) = &cli.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;
    if let Some(poll_ms) = cli.poll_ms {
        config.keeper.poll_interval_ms = poll_ms;
    }
    if let Some(interval) = cli.interval {
        config.raffle.interval_secs = interval;
    }
    config.validate()?;

    run_lottery(config, cli.players, cli.rounds).await
}

async fn run_lottery(config: RaffleConfig, players: u64, rounds: u32) -> LotteryResult<()> {
    let raffle_address = Address::from_low_u64(RAFFLE_ADDRESS);
    let fee = config.entrance_fee();
    let bank = InMemoryBank::new();

    let coordinator = LocalCoordinator::new(
        Address::from_low_u64(COORDINATOR_ADDRESS),
        VrfEngine::new_random(),
    );
    if let Some(configured) = config.vrf.subscription_id {
        tracing::info!(
            subscription_id = configured,
            "local coordinator uses its own subscription"
        );
    }
    let subscription_id = coordinator.create_subscription();
    let funding = match config.vrf.subscription_fund_wei {
        0 => BASE_FEE * u128::from(rounds.max(1)),
        wei => u128::from(wei),
    };
    coordinator.fund_subscription(subscription_id, funding)?;
    coordinator.add_consumer(subscription_id, raffle_address)?;

    let raffle = Raffle::new(
        config.raffle_params(raffle_address, subscription_id)?,
        Box::new(coordinator.clone()),
        Box::new(bank.payer(raffle_address)),
        Arc::new(SystemClock),
    )?;

    let service = RaffleService::start(raffle, &config.keeper);
    let node = OracleNode::spawn(
        coordinator.clone(),
        service.consumer(),
        config.confirmation_delay(),
        service.shutdown_signal(),
    );
    let mut events = service.subscribe().await;

    println!("🎟️  Raffle on {} (chain {})", config.network.name, config.network.chain_id);
    println!("   Entrance fee: {} ETH", format_ether(fee));
    println!("   Interval: {}s, players per round: {}", config.raffle.interval_secs, players);

    let player_addresses: Vec<Address> = (0..players)
        .map(|i| Address::from_low_u64(FIRST_PLAYER + i))
        .collect();
    for player in &player_addresses {
        bank.deposit(*player, fee * u128::from(rounds));
    }

    let round_timeout = Duration::from_secs(config.raffle.interval_secs)
        + config.confirmation_delay()
        + Duration::from_secs(30);

    for round in 1..=rounds {
        for player in &player_addresses {
            bank.transfer(*player, raffle_address, fee)?;
            if let Err(e) = service.enter(*player, fee).await {
                tracing::warn!(%player, error = %e, "entry refused, refunding");
                bank.transfer(raffle_address, *player, fee)?;
            }
        }

        match tokio::time::timeout(round_timeout, wait_for_winner(&mut events)).await {
            Ok(Some(winner)) => {
                let history = service.round_history().await;
                if let Some(summary) = history.iter().rev().find(|s| s.winner == winner) {
                    print_summary(summary);
                }
            }
            Ok(None) => break,
            Err(_) => {
                tracing::warn!(round, "round did not settle in time");
                break;
            }
        }
    }

    print_json("status", &service.status().await);
    print_json("metrics", &service.metrics().snapshot());
    println!("   Oracle fulfillments: {}", node.fulfilled());
    for player in &player_addresses {
        println!("   {} balance: {} ETH", player, format_ether(bank.balance_of(player)));
    }

    service.shutdown().await;
    node.join().await;
    Ok(())
}

async fn wait_for_winner(events: &mut broadcast::Receiver<RaffleEvent>) -> Option<Address> {
    loop {
        match events.recv().await {
            Ok(RaffleEvent::WinnerPicked { winner, .. }) => return Some(winner),
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event stream lagged");
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

fn print_summary(summary: &RoundSummary) {
    println!(
        "🏆 Round {} won by {} ({} ETH, {} entries)",
        summary.round_id,
        summary.winner,
        format_ether(summary.prize),
        summary.num_entries
    );
    print_json("round", summary);
}

fn print_json<T: Serialize>(label: &str, value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}: {}", label, json),
        Err(e) => tracing::warn!(label, error = %e, "failed to serialize"),
    }
}
