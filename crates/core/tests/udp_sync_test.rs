//! End-to-end tests over loopback: datagrams go through the real listener,
//! the inbox and the controller before reaching an animation target.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use dancesync_core::{
    bpm_inbox, AnimationTarget, BpmFileConfig, BpmFileWatcher, BpmListener, BpmSource,
    ClipReference, ClipReferenceTable, DanceSyncController, ListenerConfig, ListenerState,
    RateCalculator,
};
use parking_lot::Mutex;
use tokio::net::UdpSocket;

struct TestAvatar {
    rate: Mutex<f32>,
    calls: Mutex<Vec<f32>>,
}

impl TestAvatar {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            rate: Mutex::new(1.0),
            calls: Mutex::new(Vec::new()),
        })
    }
}

impl AnimationTarget for TestAvatar {
    fn name(&self) -> &str {
        "test-avatar"
    }

    fn set_playback_rate(&self, rate: f32) {
        *self.rate.lock() = rate;
        self.calls.lock().push(rate);
    }

    fn playback_rate(&self) -> f32 {
        *self.rate.lock()
    }
}

fn loopback_listener_config() -> ListenerConfig {
    ListenerConfig {
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        ..ListenerConfig::default()
    }
}

/// Tick until a rate is applied or the deadline passes.
async fn tick_until_applied(controller: &mut DanceSyncController) -> Option<f32> {
    for _ in 0..400 {
        if let Ok(Some(rate)) = controller.tick() {
            return Some(rate);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    None
}

async fn send(addr: SocketAddr, payload: &[u8]) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(payload, addr).await.unwrap();
}

#[tokio::test]
async fn test_udp_bpm_drives_dance_rate() {
    let (publisher, inbox) = bpm_inbox();
    let mut listener = BpmListener::new(loopback_listener_config(), publisher);
    let addr = listener.start().await.unwrap();

    let mut controller = DanceSyncController::new(
        ClipReferenceTable::from_references(vec![ClipReference::new(0, 137.0)]),
        inbox,
        RateCalculator::default(),
        120.0,
    );
    let avatar = TestAvatar::new();
    controller.set_animator_target(Some(avatar.clone()));
    controller.set_dance_state(true, 0);

    send(addr, b"133.5").await;
    let rate = tick_until_applied(&mut controller).await.unwrap();

    assert!((rate - 0.9744).abs() < 0.0001);
    assert!((avatar.playback_rate() - 0.9744).abs() < 0.0001);

    listener.stop().await;
}

#[tokio::test]
async fn test_malformed_datagram_does_not_stop_listener() {
    let (publisher, inbox) = bpm_inbox();
    let mut listener = BpmListener::new(loopback_listener_config(), publisher);
    let addr = listener.start().await.unwrap();

    let mut controller = DanceSyncController::new(
        ClipReferenceTable::from_references(vec![ClipReference::new(7, 128.0)]),
        inbox,
        RateCalculator::default(),
        100.0,
    );
    let avatar = TestAvatar::new();
    controller.set_animator_target(Some(avatar.clone()));
    controller.set_dance_state(true, 7);
    let calls_after_start = avatar.calls.lock().len();

    send(addr, b"abc").await;
    send(addr, b"0").await;
    send(addr, b" 64\n").await;

    let rate = tick_until_applied(&mut controller).await.unwrap();
    assert!((rate - 0.5).abs() < 1e-6);
    assert_eq!(controller.current_bpm(), 64.0);
    assert_eq!(avatar.calls.lock().len(), calls_after_start + 1);

    assert_eq!(listener.rejected_count(), 2);
    assert_eq!(listener.accepted_count(), 1);
    assert_eq!(listener.state(), ListenerState::Listening);

    listener.stop().await;
    assert_eq!(listener.state(), ListenerState::Stopped);
}

#[tokio::test]
async fn test_heavily_padded_datagram_is_accepted() {
    let (publisher, inbox) = bpm_inbox();
    let mut listener = BpmListener::new(loopback_listener_config(), publisher);
    let addr = listener.start().await.unwrap();

    let mut payload = vec![b' '; 80];
    payload.extend_from_slice(b"128");
    payload.extend(std::iter::repeat(b'\n').take(40));
    send(addr, &payload).await;

    let mut received = None;
    for _ in 0..400 {
        if let Some(sample) = inbox.drain() {
            received = Some(sample.bpm());
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(received, Some(128.0));
    assert_eq!(listener.accepted_count(), 1);
    assert_eq!(listener.rejected_count(), 0);

    listener.stop().await;
}

#[tokio::test]
async fn test_listener_restarts_after_stop() {
    let (publisher, inbox) = bpm_inbox();
    let mut listener = BpmListener::new(loopback_listener_config(), publisher);

    listener.start().await.unwrap();
    listener.stop().await;

    let addr = listener.start().await.unwrap();
    send(addr, b"99").await;

    let mut received = None;
    for _ in 0..400 {
        if let Some(sample) = inbox.drain() {
            received = Some(sample.bpm());
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(received, Some(99.0));

    listener.stop().await;
}

#[tokio::test]
async fn test_json_file_source_feeds_controller() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let path = temp_dir.path().join("bpm_config.json");
    std::fs::write(&path, r#"{"currentBPM": 150}"#).unwrap();

    let (publisher, inbox) = bpm_inbox();
    let mut watcher = BpmFileWatcher::new(
        BpmFileConfig {
            poll_interval: Duration::from_millis(10),
            ..BpmFileConfig::new(&path)
        },
        publisher,
    );

    let mut controller = DanceSyncController::new(
        ClipReferenceTable::from_references(vec![ClipReference::new(2, 100.0)]),
        inbox,
        RateCalculator::default(),
        120.0,
    );
    let avatar = TestAvatar::new();
    controller.set_animator_target(Some(avatar.clone()));
    controller.set_dance_state(true, 2);

    let source: &mut dyn BpmSource = &mut watcher;
    source.start().await.unwrap();

    let rate = tick_until_applied(&mut controller).await.unwrap();
    assert!((rate - 1.5).abs() < 1e-6);

    std::fs::write(&path, r#"{"currentBPM": 75}"#).unwrap();
    let rate = tick_until_applied(&mut controller).await.unwrap();
    assert!((rate - 0.75).abs() < 1e-6);

    source.stop().await;
    assert_eq!(source.status().get("state").unwrap(), "idle");
}
