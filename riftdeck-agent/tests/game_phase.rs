use anyhow::Result;
use riftdeck_agent::events::AgentEvent;
use riftdeck_agent::live::LIVE_TYPE;
use riftdeck_devkit::{fixtures, TestHarness};
use std::time::Duration;

fn phase_changes(h: &TestHarness) -> Vec<(String, String)> {
    h.events()
        .into_iter()
        .filter_map(|e| match e {
            AgentEvent::GameStateChanged { phase, previous_phase } => Some((previous_phase, phase)),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_match_start_and_end() -> Result<()> {
    let h = TestHarness::new();
    h.api.script(
        fixtures::GAMEFLOW_PATH,
        vec![
            fixtures::gameflow("ChampSelect"),
            fixtures::gameflow("ChampSelect"),
            fixtures::gameflow("InProgress"),
        ],
    );
    h.live_api.set(fixtures::LIVE_PATH, fixtures::live_game("Me#EUW", 2, 1, 3, 45, 800.0));
    let ids = h
        .register("dev-1", &[("kda", "live-kda"), ("gold", "live-gold"), ("phase", "game-phase")])
        .await?;

    h.discovery.set_running(Some(1));
    h.settle(Duration::from_secs(5)).await;

    // baseline observation is silent, the repeat is ignored
    assert_eq!(
        phase_changes(&h),
        vec![("ChampSelect".to_string(), "InProgress".to_string())]
    );
    assert!(h.agent.router().is_in_game());

    let kda = h.deck.last_for(&ids[0]).unwrap();
    assert_eq!(kda.title, "KDA");
    assert_eq!(kda.lines, vec!["2/1/3".to_string()]);
    assert_eq!(h.deck.last_for(&ids[1]).unwrap().lines, vec!["800".to_string()]);
    assert_eq!(h.deck.last_for(&ids[2]).unwrap().title, "Phase");

    h.api.set(fixtures::GAMEFLOW_PATH, fixtures::gameflow("EndOfGame"));
    h.settle(Duration::from_secs(2)).await;

    assert!(!h.agent.router().is_in_game());
    assert!(h.agent.cache().get(LIVE_TYPE).is_none());
    assert_eq!(h.deck.last_for(&ids[0]).unwrap().title, "Not in game");
    assert_eq!(phase_changes(&h).len(), 2);

    // live polling stopped with the match
    let calls = h.live_api.calls(fixtures::LIVE_PATH);
    h.settle(Duration::from_secs(3)).await;
    assert_eq!(h.live_api.calls(fixtures::LIVE_PATH), calls);

    h.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_live_widgets_idle_outside_match() -> Result<()> {
    let h = TestHarness::new();
    h.api.set(fixtures::GAMEFLOW_PATH, fixtures::gameflow("Lobby"));
    let ids = h.register("dev-1", &[("cs", "live-cs")]).await?;

    h.discovery.set_running(Some(1));
    h.settle(Duration::from_secs(3)).await;

    assert_eq!(h.deck.last_for(&ids[0]).unwrap().title, "Not in game");
    assert_eq!(h.live_api.calls(fixtures::LIVE_PATH), 0);
    assert!(phase_changes(&h).is_empty());

    h.shutdown().await;
    Ok(())
}
