use anyhow::Result;
use riftdeck_agent::events::AgentEvent;
use riftdeck_agent::render::Lifecycle;
use riftdeck_devkit::TestHarness;
use std::time::Duration;

fn disconnected(event: &AgentEvent, device: &str) -> bool {
    matches!(event, AgentEvent::DeviceDisconnected { device_id } if device_id == device)
}

#[tokio::test(start_paused = true)]
async fn test_widgets_follow_their_device() -> Result<()> {
    let h = TestHarness::new();
    h.device_status(&["dev-1"]).await?;
    let ids = h
        .register("dev-1", &[("a", "wallet"), ("b", "summoner"), ("c", "rank")])
        .await?;
    h.settle(Duration::from_millis(500)).await;

    for id in &ids {
        assert_eq!(h.agent.engine().lifecycle(id), Some(Lifecycle::Active));
        // client is not running yet
        assert_eq!(h.deck.last_for(id).unwrap().title, "Offline");
    }

    h.device_status(&[]).await?;
    h.settle(Duration::from_millis(100)).await;

    for id in &ids {
        assert!(h.agent.engine().record(id).is_none());
    }
    assert_eq!(h.agent.engine().widget_count(), 0);
    assert_eq!(h.count_events(|e| disconnected(e, "dev-1")), 1);

    // repeated status without the device is not a second disconnect
    h.device_status(&[]).await?;
    h.settle(Duration::from_millis(100)).await;
    assert_eq!(h.count_events(|e| disconnected(e, "dev-1")), 1);

    h.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_removed_widget_stops_rendering() -> Result<()> {
    let h = TestHarness::new();
    let ids = h.register("dev-1", &[("a", "wallet"), ("b", "game-phase")]).await?;
    h.settle(Duration::from_millis(300)).await;
    assert!(h.agent.store().widget_state(&ids[0]).is_some());

    h.remove("dev-1", &["a"]).await?;
    h.settle(Duration::from_millis(100)).await;
    assert!(h.agent.engine().record(&ids[0]).is_none());
    assert!(h.agent.store().widget_state(&ids[0]).is_none());
    h.deck.clear();

    // a connection change redraws the survivor only
    h.discovery.set_running(Some(42));
    h.settle(Duration::from_secs(2)).await;
    assert!(h.deck.draws_for(&ids[0]).is_empty());
    assert!(!h.deck.draws_for(&ids[1]).is_empty());

    h.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unknown_widget_type_still_renders() -> Result<()> {
    let h = TestHarness::new();
    let ids = h.register("dev-1", &[("x", "com.example.clock")]).await?;
    h.settle(Duration::from_millis(300)).await;

    let last = h.deck.last_for(&ids[0]).unwrap();
    assert_eq!(last.title, "com.example.clock");
    assert_eq!(last.lines, vec!["Unsupported".to_string()]);

    h.shutdown().await;
    Ok(())
}
