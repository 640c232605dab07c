use anyhow::Result;
use riftdeck_agent::events::{AgentEvent, ConnectionState};
use riftdeck_agent::monitor::CONNECTION_NAME;
use riftdeck_agent::render::Lifecycle;
use riftdeck_devkit::{fixtures, TestHarness};
use std::time::Duration;

fn changed_to(event: &AgentEvent, target: ConnectionState) -> bool {
    matches!(event, AgentEvent::ConnectionChanged { state, .. } if *state == target)
}

fn script_client(h: &TestHarness) {
    h.api.set(fixtures::SUMMONER_PATH, fixtures::summoner("Faker", 512));
    h.api.set(fixtures::GAMEFLOW_PATH, fixtures::gameflow("Lobby"));
    h.api.set(fixtures::RANKED_PATH, fixtures::ranked(&[("RANKED_SOLO_5x5", "GOLD", "II", 40)]));
    h.api.set(fixtures::WALLET_PATH, fixtures::wallet(1350, 20400));
}

#[tokio::test(start_paused = true)]
async fn test_client_exit_renders_offline_once() -> Result<()> {
    let h = TestHarness::new();
    script_client(&h);
    let ids = h
        .register(
            "dev-1",
            &[
                ("a", "summoner"),
                ("b", "wallet"),
                ("c", "rank"),
                ("d", "game-phase"),
                ("e", "champ-select"),
            ],
        )
        .await?;

    h.discovery.set_running(Some(100));
    h.settle(Duration::from_secs(3)).await;

    assert_eq!(h.agent.monitor().state(), ConnectionState::Connected);
    for id in &ids {
        assert_eq!(h.agent.engine().lifecycle(id), Some(Lifecycle::Active));
    }
    let wallet = h.deck.last_for(&ids[1]).unwrap();
    assert_eq!(wallet.title, "Wallet");
    assert_eq!(wallet.lines, vec!["1350 RP".to_string(), "20400 BE".to_string()]);
    assert_eq!(h.deck.last_for(&ids[2]).unwrap().title, "Gold II");

    // checks while connected are silent
    assert_eq!(h.count_events(|e| changed_to(e, ConnectionState::Reconnecting)), 1);
    assert_eq!(h.count_events(|e| changed_to(e, ConnectionState::Connected)), 1);

    h.deck.clear();
    h.clear_events();
    h.discovery.set_running(None);
    h.settle(Duration::from_secs(3)).await;

    assert_eq!(h.count_events(|e| changed_to(e, ConnectionState::Disconnected)), 1);
    assert_eq!(h.deck.count_titled("Offline"), 5);
    for id in &ids {
        assert_eq!(h.deck.last_for(id).unwrap().title, "Offline");
    }
    assert!(!h.agent.poller().is_running());

    let record = h.agent.store().connection(CONNECTION_NAME).unwrap();
    assert_eq!(record.state, ConnectionState::Disconnected);

    h.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_backoff_then_next_check() -> Result<()> {
    let h = TestHarness::new();
    script_client(&h);
    h.discovery.fail_next(5);
    h.discovery.set_running(Some(7));

    // three attempts at 0, 100ms and 300ms, then give up
    h.settle(Duration::from_millis(500)).await;
    assert_eq!(h.discovery.attempts(), 3);
    assert_eq!(h.agent.monitor().state(), ConnectionState::Disconnected);

    // next liveness check starts a fresh round
    h.settle(Duration::from_secs(1)).await;
    assert_eq!(h.agent.monitor().state(), ConnectionState::Connected);
    assert_eq!(h.discovery.attempts(), 6);
    assert_eq!(h.count_events(|e| changed_to(e, ConnectionState::Reconnecting)), 2);
    assert_eq!(h.count_events(|e| changed_to(e, ConnectionState::Connected)), 1);

    h.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_client_restart_gets_new_session() -> Result<()> {
    let h = TestHarness::new();
    script_client(&h);
    h.discovery.set_running(Some(1));
    h.settle(Duration::from_millis(1500)).await;
    let first = h.agent.monitor().generation();
    assert_eq!(h.agent.monitor().handle().and_then(|api| api.pid()), Some(1));

    h.discovery.set_running(Some(2));
    h.settle(Duration::from_secs(1)).await;

    assert_eq!(h.agent.monitor().state(), ConnectionState::Connected);
    assert!(h.agent.monitor().generation() > first);
    assert_eq!(h.agent.monitor().handle().and_then(|api| api.pid()), Some(2));
    assert_eq!(h.count_events(|e| changed_to(e, ConnectionState::Disconnected)), 1);

    h.shutdown().await;
    Ok(())
}
