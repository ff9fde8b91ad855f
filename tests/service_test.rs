//! End-to-end runs through the keeper, the oracle node and the inbox

use raffle_engine::{
    bank::InMemoryBank,
    clock::ManualClock,
    config::{KeeperSettings, RaffleConfig},
    oracle::{LocalCoordinator, OracleNode, VrfEngine},
    raffle::{Address, RoundState},
    Raffle, RaffleEvent, RaffleService,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

struct Setup {
    service: RaffleService,
    node: OracleNode,
    clock: ManualClock,
    bank: InMemoryBank,
    treasury: Address,
    config: RaffleConfig,
}

fn setup() -> Setup {
    let config = RaffleConfig::hardhat();
    let clock = ManualClock::new(0);
    let bank = InMemoryBank::new();
    let treasury = Address::from_low_u64(0x0ff1ce);
    let coordinator = LocalCoordinator::new(
        Address::from_low_u64(0xc0),
        VrfEngine::new_random(),
    );
    let sub = coordinator.create_subscription();
    coordinator
        .fund_subscription(sub, u128::from(config.vrf.subscription_fund_wei))
        .unwrap();
    coordinator.add_consumer(sub, treasury).unwrap();

    let raffle = Raffle::new(
        config.raffle_params(treasury, sub).unwrap(),
        Box::new(coordinator.clone()),
        Box::new(bank.payer(treasury)),
        Arc::new(clock.clone()),
    )
    .unwrap();

    let service = RaffleService::start(
        raffle,
        &KeeperSettings {
            enabled: true,
            poll_interval_ms: 10,
        },
    );
    let node = OracleNode::spawn(
        coordinator,
        service.consumer(),
        Duration::ZERO,
        service.shutdown_signal(),
    );

    Setup {
        service,
        node,
        clock,
        bank,
        treasury,
        config,
    }
}

async fn next_winner(events: &mut broadcast::Receiver<RaffleEvent>) -> Address {
    loop {
        if let RaffleEvent::WinnerPicked { winner, .. } = events.recv().await.unwrap() {
            return winner;
        }
    }
}

#[tokio::test]
async fn test_keeper_and_oracle_settle_rounds() {
    let s = setup();
    let fee = s.config.entrance_fee();
    let mut events = s.service.subscribe().await;
    let players: Vec<Address> = (1..=3).map(Address::from_low_u64).collect();

    for round in 1..=2u64 {
        for player in &players {
            s.bank.deposit(s.treasury, fee);
            s.service.enter(*player, fee).await.unwrap();
        }
        assert!(!s.service.check_upkeep().await.needed);

        s.clock.advance(s.config.raffle.interval_secs);
        let winner = tokio::time::timeout(Duration::from_secs(5), next_winner(&mut events))
            .await
            .expect("round should settle");

        assert!(players.contains(&winner));
        let status = s.service.status().await;
        assert_eq!(status.state, RoundState::Open);
        assert_eq!(status.round_id, round + 1);
        assert_eq!(status.num_players, 0);
        assert_eq!(status.pool, 0);
        assert_eq!(status.recent_winner, Some(winner));
    }

    let paid: u128 = players.iter().map(|p| s.bank.balance_of(p)).sum();
    assert_eq!(paid, 6 * fee);
    assert_eq!(s.bank.balance_of(&s.treasury), 0);

    let metrics = s.service.metrics().snapshot();
    assert_eq!(metrics.entries, 6);
    assert_eq!(metrics.upkeeps, 2);
    assert_eq!(metrics.rounds_settled, 2);
    assert_eq!(metrics.total_paid, 6 * fee);
    for _ in 0..100 {
        if s.node.fulfilled() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(s.node.fulfilled(), 2);
    assert_eq!(s.service.round_history().await.len(), 2);

    s.service.shutdown().await;
    s.node.join().await;
}

#[tokio::test]
async fn test_keeper_retries_failed_payout() {
    let s = setup();
    let fee = s.config.entrance_fee();
    let mut events = s.service.subscribe().await;
    let player = Address::from_low_u64(7);

    s.bank.deposit(s.treasury, fee);
    s.service.enter(player, fee).await.unwrap();
    s.bank.freeze(player);
    s.clock.advance(s.config.raffle.interval_secs);

    let failed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let RaffleEvent::SettlementFailed { winner, .. } = events.recv().await.unwrap() {
                return winner;
            }
        }
    })
    .await
    .expect("payout should fail");
    assert_eq!(failed, player);
    assert_eq!(s.service.status().await.state, RoundState::Calculating);

    s.bank.unfreeze(&player);
    let winner = tokio::time::timeout(Duration::from_secs(5), next_winner(&mut events))
        .await
        .expect("keeper should retry settlement");
    assert_eq!(winner, player);
    assert_eq!(s.bank.balance_of(&player), fee);
    assert!(s.service.metrics().snapshot().failed_transfers >= 1);

    s.service.shutdown().await;
    s.node.join().await;
}

#[tokio::test]
async fn test_shutdown_stops_all_tasks() {
    let s = setup();
    let fee = s.config.entrance_fee();
    s.service.enter(Address::from_low_u64(1), fee).await.unwrap();

    let mut signal = s.service.shutdown_signal();
    s.service.shutdown().await;
    assert!(*signal.borrow_and_update());

    tokio::time::timeout(Duration::from_secs(5), s.node.join())
        .await
        .expect("oracle node should stop");
}
