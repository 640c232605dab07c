use anyhow::Result;
use riftdeck_agent::events::AgentEvent;
use riftdeck_agent::render::{Lifecycle, WidgetId};
use riftdeck_devkit::TestHarness;
use std::time::Duration;

fn failures(h: &TestHarness, id: &WidgetId) -> Vec<u32> {
    h.events()
        .into_iter()
        .filter_map(|e| match e {
            AgentEvent::RenderFailed { widget, attempt, .. } if &widget == id => Some(attempt),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_recover() -> Result<()> {
    let h = TestHarness::new();
    h.deck.fail_next(2, "device busy");
    let ids = h.register("dev-1", &[("w", "wallet")]).await?;
    h.settle(Duration::from_secs(1)).await;

    assert_eq!(failures(&h, &ids[0]), vec![1, 2]);
    assert_eq!(h.agent.engine().lifecycle(&ids[0]), Some(Lifecycle::Active));
    assert_eq!(h.agent.engine().record(&ids[0]).unwrap().consecutive_errors, 0);
    assert_eq!(h.deck.last_for(&ids[0]).unwrap().title, "Offline");

    h.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_then_sweeps() -> Result<()> {
    let h = TestHarness::new();
    let id = WidgetId::new("dev-1", "w");
    h.deck.break_widget(&id, "transient timeout");
    h.register("dev-1", &[("w", "wallet")]).await?;
    h.settle(Duration::from_secs(2)).await;

    // first draw plus three retries
    assert_eq!(failures(&h, &id), vec![1, 2, 3, 4]);
    assert_eq!(h.agent.engine().lifecycle(&id), Some(Lifecycle::Failed));

    let attempts: Vec<_> = h.deck.draws_for(&id).into_iter().filter(|d| !d.ok).collect();
    assert_eq!(attempts.len(), 4);
    let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1].at - w[0].at).collect();
    assert!(gaps.windows(2).all(|g| g[1] > g[0]), "backoff must grow: {:?}", gaps);

    // one labelled placeholder, nothing after
    assert_eq!(h.deck.last_for(&id).unwrap().title, "Unavailable");
    assert_eq!(h.deck.count_titled("Unavailable"), 1);

    h.settle(Duration::from_secs(5)).await;
    assert!(h.agent.engine().record(&id).is_none());
    assert!(h.agent.store().widget_state(&id).is_none());

    h.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_gone_key_is_not_retried() -> Result<()> {
    let h = TestHarness::new();
    h.deck.fail_next(1, "Key not found");
    let ids = h.register("dev-1", &[("w", "wallet")]).await?;
    h.settle(Duration::from_secs(1)).await;

    assert_eq!(failures(&h, &ids[0]), vec![1]);
    assert_eq!(h.agent.engine().lifecycle(&ids[0]), Some(Lifecycle::Dead));
    assert_eq!(h.deck.draws_for(&ids[0]).len(), 1);

    // later renders are ignored
    h.discovery.set_running(Some(3));
    h.settle(Duration::from_secs(2)).await;
    assert_eq!(h.deck.draws_for(&ids[0]).len(), 1);

    h.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_burst_is_coalesced() -> Result<()> {
    let h = TestHarness::new();
    let ids = h.register("dev-1", &[("w", "wallet")]).await?;
    h.settle(Duration::from_millis(10)).await;

    // several refreshes inside one throttle window
    for _ in 0..3 {
        h.agent.router().refresh_all();
    }
    h.settle(Duration::from_millis(500)).await;

    // registration draw plus a single coalesced redraw
    assert_eq!(h.deck.draws_for(&ids[0]).len(), 2);

    h.shutdown().await;
    Ok(())
}
