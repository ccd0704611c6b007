mod common;

use std::time::Duration;

use breachdrill::session::{
    ConclusionTrigger, LifecycleState, LogCategory, Outcome, Role, Scenario, SessionPolicy,
    SessionUpdate,
};
use common::{Harness, game_result, peer_text, solo, texts};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn countdown_runs_out_after_full_budget() {
    let harness = Harness::new();
    let (runtime, dialer) = harness.spawn(solo(Role::Victim, Scenario::Phishing));
    let handle = runtime.handle();

    handle.start().unwrap();
    let active = handle.wait_for_state(LifecycleState::Active).await.unwrap();
    assert_eq!(active.remaining_seconds, 1530);
    let activated_at = Instant::now();

    handle
        .wait_for_state(LifecycleState::ResultPending)
        .await
        .unwrap();
    assert_eq!(activated_at.elapsed(), Duration::from_secs(1530));
    assert_eq!(handle.snapshot().remaining_seconds, 0);

    let report = runtime.finished().await.unwrap();
    let verdict = report.verdict.unwrap();
    assert_eq!(verdict.outcome, Outcome::Timeout);
    assert_eq!(verdict.trigger, ConclusionTrigger::Countdown);

    let states: Vec<_> = report.transitions.iter().map(|t| t.to).collect();
    assert_eq!(
        states,
        vec![
            LifecycleState::Connecting,
            LifecycleState::Active,
            LifecycleState::ResultPending,
            LifecycleState::Ended,
        ]
    );

    assert_eq!(dialer.sent_actions(0, "finish").len(), 1);
    let updates = harness.gateway.leaderboard_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].outcome, Outcome::Timeout);
}

#[tokio::test(start_paused = true)]
async fn connection_url_carries_session_and_role() {
    let harness = Harness::new();
    let (runtime, dialer) = harness.spawn(solo(Role::Attacker, Scenario::Phishing));
    let handle = runtime.handle();

    handle.start().unwrap();
    let active = handle.wait_for_state(LifecycleState::Active).await.unwrap();
    let session_id = active.session_id.unwrap();

    assert_eq!(
        dialer.url(0),
        format!("ws://drill.test/ws/session/{session_id}/attacker")
    );
    assert_eq!(harness.gateway.sessions_created(), 1);
    runtime.dispose().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn result_message_wins_and_is_not_echoed() {
    let harness = Harness::new();
    let (runtime, dialer) = harness.spawn(solo(Role::Victim, Scenario::Phishing));
    let handle = runtime.handle();

    handle.start().unwrap();
    handle.wait_for_state(LifecycleState::Active).await.unwrap();
    dialer.push(0, &game_result("win", "Reported the phishing email"));

    let report = runtime.finished().await.unwrap();
    let verdict = report.verdict.unwrap();
    assert_eq!(verdict.outcome, Outcome::Win);
    assert_eq!(verdict.reason, "Reported the phishing email");
    assert_eq!(verdict.trigger, ConclusionTrigger::ResultMessage);
    assert!(dialer.sent_actions(0, "finish").is_empty());
    assert_eq!(harness.gateway.leaderboard_updates().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_keep_session_active() {
    let harness = Harness::new();
    let (runtime, dialer) = harness.spawn(solo(Role::Victim, Scenario::Phishing));
    let handle = runtime.handle();

    handle.start().unwrap();
    let active = handle.wait_for_state(LifecycleState::Active).await.unwrap();

    dialer.push(0, "this is not json");
    dialer.push(0, r#"{"type":"spectator_joined","payload":{}}"#);
    handle
        .wait_for(|s| s.log_len == active.log_len + 2)
        .await
        .unwrap();
    assert_eq!(handle.snapshot().lifecycle, LifecycleState::Active);

    handle.surrender().unwrap();
    let report = runtime.finished().await.unwrap();
    assert_eq!(report.summary.malformed_messages, 1);
    assert_eq!(report.verdict.unwrap().trigger, ConclusionTrigger::LocalAction);

    let errors: Vec<_> = report
        .log
        .iter()
        .filter(|e| e.category == LogCategory::LocalError)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].text.starts_with("Dropped malformed message"));
    assert!(
        texts(&report.log)
            .iter()
            .any(|t| t.contains("spectator_joined"))
    );
    assert_eq!(dialer.sent_actions(0, "finish").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn lost_connection_reopens_after_backoff() {
    let harness = Harness::new();
    let (runtime, dialer) = harness.spawn(solo(Role::Victim, Scenario::Phishing));
    let handle = runtime.handle();

    handle.start().unwrap();
    handle.wait_for_state(LifecycleState::Active).await.unwrap();
    assert_eq!(dialer.dialed(), 1);

    dialer.hang_up(0);
    handle.wait_for(|s| !s.connected).await.unwrap();
    let lost_at = Instant::now();

    handle.wait_for(|s| s.connected).await.unwrap();
    assert_eq!(lost_at.elapsed(), Duration::from_secs(3));
    assert_eq!(dialer.dialed(), 2);
    assert_eq!(handle.snapshot().lifecycle, LifecycleState::Active);

    dialer.push(1, &game_result("loss", "Clicked the link"));
    let report = runtime.finished().await.unwrap();
    assert_eq!(report.summary.reconnects, 1);
    assert!(texts(&report.log).contains(&"Reconnected"));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(dialer.dialed(), 2);
}

#[tokio::test(start_paused = true)]
async fn every_peer_message_is_logged_once_in_order() {
    let harness = Harness::new();
    let (runtime, dialer) = harness.spawn(solo(Role::Victim, Scenario::Phishing));
    let handle = runtime.handle();

    handle.start().unwrap();
    let active = handle.wait_for_state(LifecycleState::Active).await.unwrap();

    for i in 0..5 {
        dialer.push(0, &peer_text("attacker", &format!("message {i}")));
    }
    handle
        .wait_for(|s| s.log_len == active.log_len + 5)
        .await
        .unwrap();
    handle.say("who is this?").unwrap();
    handle.surrender().unwrap();

    let report = runtime.finished().await.unwrap();
    let peer: Vec<_> = report
        .log
        .iter()
        .filter(|e| e.category == LogCategory::InboundPeer)
        .map(|e| e.text.clone())
        .collect();
    assert_eq!(peer.len(), 5);
    for (i, text) in peer.iter().enumerate() {
        assert!(text.ends_with(&format!("message {i}")), "{text}");
    }
    assert_eq!(report.summary.messages_received, 5);

    let timestamps: Vec<_> = report.log.iter().map(|e| e.timestamp).collect();
    assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(dialer.sent_actions(0, "user_input").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn ransomware_click_locks_screen_then_relays() {
    let harness = Harness::new();
    let (runtime, dialer) = harness.spawn(solo(Role::Victim, Scenario::Ransomware));
    let handle = runtime.handle();
    let mut updates = handle.subscribe();

    handle.start().unwrap();
    let active = handle.wait_for_state(LifecycleState::Active).await.unwrap();
    dialer.push(0, &peer_text("attacker", "Your invoice: https://evil.example/pay"));
    handle
        .wait_for(|s| s.log_len > active.log_len)
        .await
        .unwrap();

    handle.click(None).unwrap();
    let locked = handle.wait_for(|s| s.locked_out).await.unwrap();
    assert!(locked.locked_out);
    let locked_at = Instant::now();

    handle.wait_for(|s| !s.locked_out).await.unwrap();
    assert_eq!(locked_at.elapsed(), Duration::from_secs(5));

    let clicks = dialer.wait_for_actions(0, "clicked_link", 1).await;
    assert_eq!(clicks.len(), 1);
    assert_eq!(clicks[0]["payload"]["link"], "https://evil.example/pay");

    let mut saw_lock = false;
    let mut saw_unlock = false;
    while let Ok(update) = updates.try_recv() {
        match update {
            SessionUpdate::Lockout { active: true } => saw_lock = true,
            SessionUpdate::Lockout { active: false } => saw_unlock = saw_lock,
            _ => {}
        }
    }
    assert!(saw_lock && saw_unlock);
    runtime.dispose().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn shorter_policy_budget_is_respected() {
    let harness = Harness::with_policy(SessionPolicy {
        exercise_duration_secs: 90,
        coach_enabled: false,
        ..SessionPolicy::default()
    });
    let (runtime, _dialer) = harness.spawn(solo(Role::Attacker, Scenario::Phishing));
    let handle = runtime.handle();

    handle.start().unwrap();
    handle.wait_for_state(LifecycleState::Active).await.unwrap();
    let activated_at = Instant::now();

    let report = runtime.finished().await.unwrap();
    assert_eq!(report.verdict.unwrap().outcome, Outcome::Timeout);
    // Countdown plus the result display delay.
    assert_eq!(activated_at.elapsed(), Duration::from_secs(93));
}
