mod common;

use brewdash::channel::{Backoff, ChannelEvent, ChannelState, ReconnectPolicy};
use brewdash::command::CommandChannel;
use brewdash::domain::{CommandMessage, ControlField, ControllerKind, RetentionWindow, SystemCommand};
use brewdash::error::DashError;
use brewdash::history::HistoryLoader;
use brewdash::live::{LiveChannel, LiveEvent};
use common::FakeController;
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test]
async fn test_history_backfill_over_http() {
    let fake = FakeController::spawn().await;
    let loader = HistoryLoader::new(reqwest::Client::new(), "/datahistory");

    let window = RetentionWindow::try_from(60).unwrap();
    let snapshot = loader.load_history(&fake.rig_url(), window).await.unwrap();

    // the two-hour-old point falls outside a 60 minute window
    assert_eq!(snapshot.len(), 2);
    assert_eq!(
        snapshot.column("gravity").unwrap(),
        &[Some(1.030), Some(1.012)]
    );
    assert_eq!(snapshot.original_gravity, Some(1.060));
}

#[tokio::test]
async fn test_history_unreachable() {
    let loader = HistoryLoader::new(reqwest::Client::new(), "/datahistory");
    let err = loader
        .load_history("http://127.0.0.1:1/rigs/Fermenter", RetentionWindow::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DashError::HistoryUnavailable(_)));
}

#[tokio::test]
async fn test_reconnects_keep_a_single_connection() {
    let fake = FakeController::spawn().await;
    let policy = ReconnectPolicy {
        backoff: Backoff::Immediate,
        max_attempts: Some(3),
        stable_after: Duration::from_secs(5),
    };
    let (_live, events) = LiveChannel::open(fake.flaky_ws_url(), policy);

    let events: Vec<LiveEvent> = timeout(Duration::from_secs(10), events.collect())
        .await
        .expect("channel should give up after three attempts");

    let opened = events.iter().filter(|e| matches!(e, LiveEvent::Opened)).count();
    let patches = events.iter().filter(|e| matches!(e, LiveEvent::Patch(_))).count();
    assert_eq!(opened, 3);
    assert_eq!(patches, 3);
    assert_eq!(fake.flaky_connections(), 3);
    assert_eq!(fake.flaky_max_active(), 1);

    let attempts: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            LiveEvent::Connecting { attempt } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![0, 1, 2]);

    // every Opened is followed by a terminal event before the next one
    let mut open = false;
    for event in &events {
        match event {
            LiveEvent::Opened => {
                assert!(!open, "two connections open at once");
                open = true;
            }
            LiveEvent::Closed { .. } | LiveEvent::Errored(_) => open = false,
            _ => {}
        }
    }

    match events.last() {
        Some(LiveEvent::Errored(cause)) => assert!(cause.contains("max reconnect attempts")),
        other => panic!("unexpected final event: {:?}", other),
    }
}

#[tokio::test]
async fn test_rejected_send_is_not_replayed() {
    let mut fake = FakeController::spawn().await;
    let (live, events) = LiveChannel::open(fake.live_ws_url(), ReconnectPolicy::default());

    let early = CommandMessage::new(ControllerKind::Fridge, ControlField::Setpoint, 61.0);
    assert!(matches!(
        live.send(&early),
        Err(DashError::ChannelSendRejected { .. })
    ));

    let mut events = Box::pin(events);
    timeout(Duration::from_secs(5), async {
        while let Some(event) = events.next().await {
            if event == LiveEvent::Opened {
                return;
            }
        }
        panic!("stream ended before opening");
    })
    .await
    .expect("channel did not open");

    // keep driving the connection so queued frames get written
    tokio::spawn(async move { while events.next().await.is_some() {} });

    let late = CommandMessage::new(ControllerKind::Fridge, ControlField::Setpoint, 62.0);
    live.send(&late).unwrap();

    let received = timeout(Duration::from_secs(5), fake.commands.recv())
        .await
        .unwrap()
        .unwrap();
    let received: Value = serde_json::from_str(&received).unwrap();
    assert_eq!(received, json!({"controller": "Fridge", "setpoint": 62.0}));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(fake.commands.try_recv().is_err());
}

#[tokio::test]
async fn test_patches_arrive_in_order() {
    let fake = FakeController::spawn().await;
    let (live, events) = LiveChannel::open(fake.live_ws_url(), ReconnectPolicy::default());
    let mut events = Box::pin(events);

    let mut patches = Vec::new();
    let collected = timeout(Duration::from_secs(5), async {
        while let Some(event) = events.next().await {
            match event {
                LiveEvent::Opened => {
                    live.send(&CommandMessage::new(ControllerKind::Heater, ControlField::Enabled, true))
                        .unwrap();
                }
                LiveEvent::Patch(patch) => {
                    patches.push(patch);
                    if patches.len() == 2 {
                        return;
                    }
                }
                _ => {}
            }
        }
    })
    .await;
    assert!(collected.is_ok());

    assert_eq!(patches[0].get("temperature"), Some(&json!(66.2)));
    assert_eq!(patches[1].get("heater_enabled"), Some(&json!(true)));
}

#[tokio::test]
async fn test_system_command_while_connecting_is_dropped() {
    let mut fake = FakeController::spawn().await;
    let (system, events) = CommandChannel::open(fake.system_ws_url(), ReconnectPolicy::default());

    assert_eq!(system.state(), ChannelState::Connecting);
    assert!(matches!(
        system.send(SystemCommand::Reboot),
        Err(DashError::ChannelSendRejected { .. })
    ));

    let mut events = Box::pin(events);
    timeout(Duration::from_secs(5), async {
        while let Some(event) = events.next().await {
            if event == ChannelEvent::Opened {
                return;
            }
        }
        panic!("stream ended before opening");
    })
    .await
    .expect("system channel did not open");
    tokio::spawn(async move { while events.next().await.is_some() {} });

    // nothing from before the open reaches the controller
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(fake.system.try_recv().is_err());

    system.send(SystemCommand::CloseKeyboard).unwrap();
    let frame = timeout(Duration::from_secs(5), fake.system.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame, "close_keyboard");
    assert!(fake.system.try_recv().is_err());
}
