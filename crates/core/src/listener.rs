//! UDP receiver for plaintext BPM datagrams.
//!
//! Each datagram carries one decimal number, e.g. `"128"` or `" 133.5\n"`.
//! Valid values are published into the inbox; everything else is logged and
//! dropped. The receive task keeps running through malformed payloads and
//! socket errors and only ends when [`BpmListener::stop`] is called.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Result, SyncError};
use crate::inbox::{BpmPublisher, BpmSample};
use crate::source::BpmSource;

pub const DEFAULT_BPM_PORT: u16 = 9955;

/// Largest payload a UDP datagram over IPv4 can carry.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

// Pause after a failed receive so a broken socket cannot spin the task.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
pub struct ListenerConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    /// Receive buffer size. Longer datagrams are truncated and fail to parse,
    /// so anything below [`MAX_UDP_PAYLOAD`] can reject padded values.
    pub max_datagram: usize,
    /// How long `stop()` waits for the receive task before aborting it.
    pub stop_grace: Duration,
}

impl ListenerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_BPM_PORT,
            max_datagram: MAX_UDP_PAYLOAD,
            stop_grace: Duration::from_millis(500),
        }
    }
}

/// Lifecycle of a listener. `Stopped` is only entered through `stop()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Listening,
    Stopped,
}

impl ListenerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Default)]
struct ListenerStats {
    received: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    socket_errors: AtomicU64,
}

/// Decode one datagram into a sample.
pub fn parse_bpm_payload(bytes: &[u8]) -> Result<BpmSample> {
    let text = std::str::from_utf8(bytes).map_err(|_| SyncError::InvalidUtf8)?;
    let text = text.trim();
    let bpm: f32 = text
        .parse()
        .map_err(|_| SyncError::InvalidPayload(text.to_string()))?;
    BpmSample::new(bpm).ok_or(SyncError::NonPositiveBpm(bpm))
}

pub struct BpmListener {
    config: ListenerConfig,
    publisher: BpmPublisher,
    state: ListenerState,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
    stats: Arc<ListenerStats>,
}

impl BpmListener {
    pub fn new(config: ListenerConfig, publisher: BpmPublisher) -> Self {
        Self {
            config,
            publisher,
            state: ListenerState::Idle,
            local_addr: None,
            shutdown_tx: None,
            handle: None,
            stats: Arc::new(ListenerStats::default()),
        }
    }

    /// Bind the socket and spawn the receive task. Returns the bound address,
    /// which differs from the configured one when port 0 is used.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.state == ListenerState::Listening {
            return Err(SyncError::AlreadyRunning);
        }

        let addr = self.config.socket_addr();
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| SyncError::Bind { addr, source })?;
        let local_addr = socket.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(receive_loop(
            socket,
            self.publisher.clone(),
            self.stats.clone(),
            shutdown_rx,
            self.config.max_datagram,
        ));

        self.shutdown_tx = Some(shutdown_tx);
        self.handle = Some(handle);
        self.local_addr = Some(local_addr);
        self.state = ListenerState::Listening;

        log::info!("Waiting for BPM over UDP on {}", local_addr);
        Ok(local_addr)
    }

    /// Signal the receive task, wait up to the grace period, then abort it.
    /// The socket is owned by the task and is released when it ends.
    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }

        if let Some(mut handle) = self.handle.take() {
            match tokio::time::timeout(self.config.stop_grace, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!("BPM listener task ended abnormally: {}", e),
                Err(_) => {
                    log::warn!(
                        "BPM listener did not stop within {:?}, aborting",
                        self.config.stop_grace
                    );
                    handle.abort();
                }
            }
        }

        if self.state == ListenerState::Idle {
            return;
        }
        if self.state == ListenerState::Listening {
            log::info!("BPM listener closed");
        }
        self.local_addr = None;
        self.state = ListenerState::Stopped;
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    pub fn received_count(&self) -> u64 {
        self.stats.received.load(Ordering::Relaxed)
    }

    pub fn accepted_count(&self) -> u64 {
        self.stats.accepted.load(Ordering::Relaxed)
    }

    pub fn rejected_count(&self) -> u64 {
        self.stats.rejected.load(Ordering::Relaxed)
    }

    pub fn socket_error_count(&self) -> u64 {
        self.stats.socket_errors.load(Ordering::Relaxed)
    }
}

impl Drop for BpmListener {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

fn handle_datagram(
    payload: &[u8],
    peer: SocketAddr,
    publisher: &BpmPublisher,
    stats: &ListenerStats,
) {
    stats.received.fetch_add(1, Ordering::Relaxed);
    match parse_bpm_payload(payload) {
        Ok(sample) => {
            stats.accepted.fetch_add(1, Ordering::Relaxed);
            log::debug!("BPM received via UDP from {}: {}", peer, sample);
            publisher.publish(sample);
        }
        Err(e) => {
            stats.rejected.fetch_add(1, Ordering::Relaxed);
            log::warn!("Discarding UDP datagram from {}: {}", peer, e);
        }
    }
}

/// Handle one receive result. Errors are counted and followed by a short
/// back-off; the caller keeps receiving either way.
async fn handle_receive(
    received: io::Result<(usize, SocketAddr)>,
    buf: &[u8],
    publisher: &BpmPublisher,
    stats: &ListenerStats,
) {
    match received {
        Ok((len, peer)) => handle_datagram(&buf[..len], peer, publisher, stats),
        Err(e) => {
            stats.socket_errors.fetch_add(1, Ordering::Relaxed);
            log::error!("UDP receive error: {}", e);
            tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
        }
    }
}

async fn receive_loop(
    socket: UdpSocket,
    publisher: BpmPublisher,
    stats: Arc<ListenerStats>,
    mut shutdown_rx: watch::Receiver<bool>,
    max_datagram: usize,
) {
    let mut buf = vec![0u8; max_datagram.max(1)];

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                // A dropped sender means the listener itself went away.
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            received = socket.recv_from(&mut buf) => {
                handle_receive(received, &buf, &publisher, &stats).await;
            }
        }
    }

    log::debug!("BPM receive loop exited");
}

#[async_trait]
impl BpmSource for BpmListener {
    fn name(&self) -> &'static str {
        "udp"
    }

    async fn start(&mut self) -> Result<()> {
        BpmListener::start(self).await.map(|_| ())
    }

    async fn stop(&mut self) {
        BpmListener::stop(self).await
    }

    fn status(&self) -> HashMap<String, String> {
        let mut status = HashMap::new();
        status.insert("state".to_string(), self.state.as_str().to_string());
        status.insert(
            "address".to_string(),
            self.local_addr
                .unwrap_or_else(|| self.config.socket_addr())
                .to_string(),
        );
        status.insert("received".to_string(), self.received_count().to_string());
        status.insert("accepted".to_string(), self.accepted_count().to_string());
        status.insert("rejected".to_string(), self.rejected_count().to_string());
        status.insert(
            "socket_errors".to_string(),
            self.socket_error_count().to_string(),
        );
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbox::bpm_inbox;

    fn loopback_config() -> ListenerConfig {
        ListenerConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            ..ListenerConfig::default()
        }
    }

    #[test]
    fn test_parse_valid_payloads() {
        assert_eq!(parse_bpm_payload(b"128").unwrap().bpm(), 128.0);
        assert_eq!(parse_bpm_payload(b"  133.5\r\n").unwrap().bpm(), 133.5);
        assert_eq!(parse_bpm_payload(b"\t90.25 ").unwrap().bpm(), 90.25);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_bpm_payload(b"abc"),
            Err(SyncError::InvalidPayload(text)) if text == "abc"
        ));
        assert!(matches!(
            parse_bpm_payload(b""),
            Err(SyncError::InvalidPayload(_))
        ));
        assert!(matches!(
            parse_bpm_payload(&[0xff, 0xfe, 0x31]),
            Err(SyncError::InvalidUtf8)
        ));
    }

    #[test]
    fn test_parse_rejects_non_positive() {
        assert!(matches!(
            parse_bpm_payload(b"0"),
            Err(SyncError::NonPositiveBpm(v)) if v == 0.0
        ));
        assert!(matches!(
            parse_bpm_payload(b"-120"),
            Err(SyncError::NonPositiveBpm(_))
        ));
        assert!(matches!(
            parse_bpm_payload(b"NaN"),
            Err(SyncError::NonPositiveBpm(_))
        ));
    }

    #[test]
    fn test_default_config() {
        let config = ListenerConfig::default();
        assert_eq!(config.port, DEFAULT_BPM_PORT);
        assert_eq!(config.socket_addr().to_string(), "0.0.0.0:9955");
        assert_eq!(config.max_datagram, MAX_UDP_PAYLOAD);
    }

    #[tokio::test]
    async fn test_socket_error_does_not_end_receiving() {
        let (publisher, inbox) = bpm_inbox();
        let stats = ListenerStats::default();
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let mut buf = vec![0u8; 16];

        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "connection reset");
        handle_receive(Err(reset), &buf, &publisher, &stats).await;
        assert_eq!(stats.socket_errors.load(Ordering::Relaxed), 1);
        assert_eq!(stats.received.load(Ordering::Relaxed), 0);
        assert!(!inbox.has_pending());

        buf[..3].copy_from_slice(b"128");
        handle_receive(Ok((3, peer)), &buf, &publisher, &stats).await;
        assert_eq!(stats.socket_errors.load(Ordering::Relaxed), 1);
        assert_eq!(stats.accepted.load(Ordering::Relaxed), 1);
        assert_eq!(inbox.drain().map(|s| s.bpm()), Some(128.0));
    }

    #[tokio::test]
    async fn test_stop_before_start_stays_idle() {
        let (publisher, _inbox) = bpm_inbox();
        let mut listener = BpmListener::new(loopback_config(), publisher);
        listener.stop().await;
        assert_eq!(listener.state(), ListenerState::Idle);

        listener.start().await.unwrap();
        listener.stop().await;
        assert_eq!(listener.state(), ListenerState::Stopped);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (publisher, _inbox) = bpm_inbox();
        let mut listener = BpmListener::new(loopback_config(), publisher);
        assert_eq!(listener.state(), ListenerState::Idle);

        let addr = listener.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(listener.state(), ListenerState::Listening);
        assert_eq!(listener.local_addr(), Some(addr));

        listener.stop().await;
        assert_eq!(listener.state(), ListenerState::Stopped);
        assert_eq!(listener.local_addr(), None);

        // Stopping twice is harmless
        listener.stop().await;
        assert_eq!(listener.state(), ListenerState::Stopped);
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        let (publisher, _inbox) = bpm_inbox();
        let mut listener = BpmListener::new(loopback_config(), publisher);
        listener.start().await.unwrap();
        assert!(matches!(
            listener.start().await,
            Err(SyncError::AlreadyRunning)
        ));
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_stop_releases_port() {
        let (publisher, _inbox) = bpm_inbox();
        let mut listener = BpmListener::new(loopback_config(), publisher);
        let addr = listener.start().await.unwrap();
        listener.stop().await;

        // The same port can be bound again once the task has released it
        let rebound = UdpSocket::bind(addr).await;
        assert!(rebound.is_ok());
    }

    #[tokio::test]
    async fn test_bind_conflict_reports_address() {
        let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let (publisher, _inbox) = bpm_inbox();
        let mut listener = BpmListener::new(
            ListenerConfig {
                port,
                ..loopback_config()
            },
            publisher,
        );
        match listener.start().await {
            Err(SyncError::Bind { addr, .. }) => assert_eq!(addr.port(), port),
            other => panic!("expected bind error, got {:?}", other),
        }
        assert_eq!(listener.state(), ListenerState::Idle);
    }

    #[tokio::test]
    async fn test_status_reports_state() {
        let (publisher, _inbox) = bpm_inbox();
        let mut listener = BpmListener::new(loopback_config(), publisher);
        let source: &mut dyn BpmSource = &mut listener;
        assert_eq!(source.name(), "udp");
        assert_eq!(source.status().get("state").unwrap(), "idle");

        source.start().await.unwrap();
        assert_eq!(source.status().get("state").unwrap(), "listening");
        assert_eq!(source.status().get("received").unwrap(), "0");

        source.stop().await;
        assert_eq!(source.status().get("state").unwrap(), "stopped");
    }
}
