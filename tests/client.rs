use std::time::Duration;

use chrono::{Datelike, Local};
use tokio::sync::mpsc;

use miscale_rs::parse::RawPacket;
use miscale_rs::prelude::*;
use miscale_rs::protocol::{Target, STOP_MARKER};

fn client(mock: &MockTransport) -> ScaleClient<MockTransport> {
    ScaleClient::new(mock.clone(), ScaleClientConfig::default())
}

/// Receive events until `stop` matches one, returning everything seen.
async fn collect_until(
    rx: &mut mpsc::Receiver<ScaleEvent>,
    stop: impl Fn(&ScaleEvent) -> bool,
) -> Vec<ScaleEvent> {
    let mut seen = Vec::new();
    while let Some(event) = rx.recv().await {
        let done = stop(&event);
        seen.push(event);
        if done {
            break;
        }
    }
    seen
}

fn is_status(event: &ScaleEvent, text: &str) -> bool {
    matches!(event, ScaleEvent::Status(s) if s.contains(text))
}

fn measurements(events: &[ScaleEvent]) -> Vec<&ScaleMeasurement> {
    events
        .iter()
        .filter_map(|e| match e {
            ScaleEvent::Measurement(m) => Some(m),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_handshake_writes_in_order() {
    let mock = MockTransport::with_sample_data();
    let mut client = client(&mock);
    let (mut rx, _handle) = client.connect(UserProfile::default()).await.unwrap();

    collect_until(&mut rx, |e| is_status(e, "History transfer complete")).await;

    let writes = mock.writes();
    let targets: Vec<Target> = writes.iter().map(|(t, _)| *t).collect();
    assert_eq!(
        targets,
        vec![
            Target::Config,
            Target::History,
            Target::History,
            Target::History,
            Target::History,
            Target::History,
        ]
    );
    assert_eq!(writes[0].1, vec![0x06, 0x04, 0x00, 0x00]);
    assert_eq!(writes[1].1, vec![0x01, 0x96, 0x8a, 0xbd, 0x62]);
    assert_eq!(writes[2].1[..3], [0x01, 0xFF, 0xFF]);
    assert_eq!(writes[3].1, vec![0x02]);
    assert_eq!(writes[4].1, vec![STOP_MARKER]);
    assert_eq!(writes[5].1[..3], [0x04, 0xFF, 0xFF]);
    // Both identifier writes carry the same user id.
    assert_eq!(writes[2].1[3..], writes[5].1[3..]);

    assert_eq!(mock.subscriptions(), vec![Target::History, Target::Weight]);
}

#[tokio::test(start_paused = true)]
async fn test_history_measurements_delivered() {
    let mock = MockTransport::with_sample_data();
    let mut client = client(&mock);
    let (mut rx, _handle) = client.connect(UserProfile::default()).await.unwrap();

    let events = collect_until(&mut rx, |e| is_status(e, "History transfer complete")).await;
    assert!(matches!(&events[0], ScaleEvent::Connected(name) if name == "MIBFS"));

    let got = measurements(&events);
    assert_eq!(got.len(), 2);
    assert!((got[0].weight_kg - 70.6).abs() < 1e-9);
    assert_eq!(got[0].impedance, Some(482));
    assert!(got[0].has_composition());
    assert!((got[1].weight_kg - 70.0).abs() < 1e-9);
    assert!(!got[1].has_composition());
}

#[tokio::test(start_paused = true)]
async fn test_live_measurement_after_history() {
    let mock = MockTransport::with_sample_data();
    let mut client = client(&mock);
    let (mut rx, _handle) = client.connect(UserProfile::default()).await.unwrap();
    collect_until(&mut rx, |e| is_status(e, "History transfer complete")).await;

    let now = Local::now().naive_local();
    // Unstabilized readings while stepping on are ignored.
    assert!(mock.push_notification(
        Target::Weight,
        RawPacket::stabilized(now, 10000).unstabilized().to_bytes().to_vec(),
    ));
    assert!(mock.push_notification(
        Target::Weight,
        RawPacket::stabilized(now, 15000).with_impedance(500).to_bytes().to_vec(),
    ));

    let events = collect_until(&mut rx, |e| matches!(e, ScaleEvent::Measurement(_))).await;
    let got = measurements(&events);
    assert_eq!(got.len(), 1);
    assert!((got[0].weight_kg - 75.0).abs() < 1e-9);
    assert_eq!(got[0].impedance, Some(500));
}

#[tokio::test(start_paused = true)]
async fn test_inactivity_timeout_disconnects_once() {
    let mock = MockTransport::with_sample_data();
    let mut client = client(&mock);
    let (mut rx, handle) = client.connect(UserProfile::default()).await.unwrap();

    let events = collect_until(&mut rx, |e| matches!(e, ScaleEvent::Disconnected)).await;
    assert!(events.iter().any(|e| is_status(e, "Inactivity timeout")));
    assert_eq!(mock.disconnect_count(), 1);
    assert!(!handle.is_running());
    assert!(rx.recv().await.is_none());

    client.teardown().await;
    assert_eq!(mock.disconnect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_link_drop_reports_disconnect() {
    let mock = MockTransport::with_sample_data();
    let mut client = client(&mock);
    let (mut rx, _handle) = client.connect(UserProfile::default()).await.unwrap();
    collect_until(&mut rx, |e| is_status(e, "History transfer complete")).await;

    mock.drop_link();

    let events = collect_until(&mut rx, |e| matches!(e, ScaleEvent::Disconnected)).await;
    assert!(events.iter().any(|e| is_status(e, "Scale disconnected")));
    assert!(!events.iter().any(|e| is_status(e, "Inactivity timeout")));
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_is_reported_and_handshake_continues() {
    let mock = MockTransport::with_sample_data().failing_writes_to(Target::Config);
    let mut client = client(&mock);
    let (mut rx, _handle) = client.connect(UserProfile::default()).await.unwrap();

    let events = collect_until(&mut rx, |e| is_status(e, "History transfer complete")).await;
    assert!(events.iter().any(|e| is_status(e, "Write to Config failed")));
    assert_eq!(measurements(&events).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rediscover_resumes_parked_handshake() {
    let mock = MockTransport::with_sample_data().failing_notifications_on(Target::Weight);
    let mut client = client(&mock);
    let (mut rx, handle) = client.connect(UserProfile::default()).await.unwrap();

    collect_until(&mut rx, |e| is_status(e, "Enabling notifications on Weight failed")).await;
    assert_eq!(mock.subscriptions(), vec![Target::History]);
    assert!(!mock.writes().iter().any(|(_, bytes)| bytes == &[0x02]));

    mock.clear_failures();
    handle.rediscover().await.unwrap();

    let events = collect_until(&mut rx, |e| is_status(e, "History transfer complete")).await;
    assert_eq!(measurements(&events).len(), 2);
    assert_eq!(mock.subscriptions(), vec![Target::History, Target::Weight]);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_tears_down_previous_session() {
    let mock = MockTransport::with_sample_data();
    let mut client = client(&mock);
    let (mut first_rx, first) = client.connect(UserProfile::default()).await.unwrap();
    let (_second_rx, second) = client.connect(UserProfile::default()).await.unwrap();

    let events = collect_until(&mut first_rx, |e| matches!(e, ScaleEvent::Disconnected)).await;
    assert!(matches!(events.last(), Some(ScaleEvent::Disconnected)));
    assert!(!first.is_running());
    assert!(second.is_running());
    assert_eq!(mock.connect_count(), 2);
    assert_eq!(mock.disconnect_count(), 1);

    client.teardown().await;
    assert!(!second.is_running());
    assert_eq!(mock.disconnect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_read_clock_after_sync() {
    let mock = MockTransport::with_sample_data();
    let config = ScaleClientConfig {
        sync_clock: true,
        ..ScaleClientConfig::default()
    };
    let mut client = ScaleClient::new(mock.clone(), config);
    let (mut rx, handle) = client.connect(UserProfile::default()).await.unwrap();
    collect_until(&mut rx, |e| is_status(e, "Waiting for measurements")).await;

    assert_eq!(mock.writes()[0].0, Target::CurrentTime);
    let clock = handle.read_clock().await.unwrap();
    assert_eq!(clock.year(), Local::now().year());
}

#[tokio::test(start_paused = true)]
async fn test_no_scale_in_range() {
    let mock = MockTransport::new().with_device("Other", "AA:BB:CC:DD:EE:FF");
    let mut client = client(&mock);
    let err = client.connect(UserProfile::default()).await.unwrap_err();
    assert!(err.to_string().contains("no scale found"));
    assert_eq!(mock.connect_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_scan_all_lists_matching_scales() {
    let mock = MockTransport::new()
        .with_device("MIBFS", "C8:47:8C:00:00:01")
        .with_device("MIBCS", "C8:47:8C:00:00:02")
        .with_device("Headphones", "00:11:22:33:44:55");
    let mut client = client(&mock);
    let found = client.scan_all().await.unwrap();
    let ids: Vec<&str> = found.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["C8:47:8C:00:00:01", "C8:47:8C:00:00:02"]);
    assert_eq!(client.config().inactivity_timeout, Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_with_undrained_receiver() {
    let now = Local::now().naive_local();
    let history = (0..100u16)
        .map(|i| RawPacket::stabilized(now, 14000 + i).to_bytes().to_vec())
        .collect();
    let mock = MockTransport::new()
        .with_device("MIBFS", "C8:47:8C:00:00:01")
        .with_history(history);
    let mut client = client(&mock);

    let (mut stale_rx, first) = client.connect(UserProfile::default()).await.unwrap();
    tokio::task::yield_now().await;

    let reconnect = tokio::time::timeout(
        Duration::from_secs(600),
        client.connect(UserProfile::default()),
    )
    .await;
    let (_rx, second) = reconnect.expect("reconnect finished").unwrap();

    assert!(!first.is_running());
    assert!(second.is_running());
    assert_eq!(mock.connect_count(), 2);
    assert_eq!(mock.disconnect_count(), 1);

    // The stale receiver still yields what was buffered, then ends.
    let mut buffered = 0;
    while stale_rx.recv().await.is_some() {
        buffered += 1;
    }
    assert!(buffered > 0);
}

#[tokio::test(start_paused = true)]
async fn test_is_connected_follows_link() {
    let mock = MockTransport::with_sample_data();
    let mut client = client(&mock);
    assert!(!client.is_connected().await);

    let (mut rx, _handle) = client.connect(UserProfile::default()).await.unwrap();
    collect_until(&mut rx, |e| is_status(e, "History transfer complete")).await;
    assert!(client.is_connected().await);

    mock.drop_link();
    collect_until(&mut rx, |e| matches!(e, ScaleEvent::Disconnected)).await;
    assert!(!client.is_connected().await);
}
