// Demo mode: a simulated streaming platform
//
// Lets the monitor run end-to-end without a real platform client. Every
// identity alternates between an offline window and a live window (staggered
// per identity so streams don't all start together). While connected, a
// background task emits realistic chat/gift/like/share/member traffic and
// finishes with a stream-end event when the live window closes.
//
// Timings come from the `[demo]` config section.

use super::{PlatformConnector, PlatformError, PlatformHandle, RoomInfo, RoomState};
use crate::config::DemoConfig;
use crate::events::{RawEvent, RawUser};
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

/// Viewer nicknames used for generated traffic
const DEMO_VIEWERS: &[&str] = &[
    "pixelpanda",
    "craftqueen",
    "nightowl42",
    "glitterbug",
    "woodworker_jo",
    "sunnyside",
    "velvetfox",
];

const DEMO_COMMENTS: &[&str] = &[
    "love this colour!",
    "how long did that take?",
    "hello from Perth 👋",
    "can you show the back?",
    "   so   pretty   ",
    "first time here, hi!",
];

/// Connector producing simulated platform handles
pub struct DemoConnector {
    config: DemoConfig,
}

impl DemoConnector {
    pub fn new(config: DemoConfig) -> Self {
        Self { config }
    }
}

impl PlatformConnector for DemoConnector {
    fn name(&self) -> &'static str {
        "demo"
    }

    fn open(&self, identity: &str, events: mpsc::Sender<RawEvent>) -> Arc<dyn PlatformHandle> {
        // Stagger identities across the cycle using a cheap name hash
        let cycle_ms = self.config.cycle().as_millis().max(1) as u64;
        let hash = identity
            .bytes()
            .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
        let offset = Duration::from_millis(hash % cycle_ms);

        Arc::new(DemoPlatform::new(
            identity,
            self.config.clone(),
            offset,
            events,
        ))
    }
}

/// One simulated identity
struct DemoPlatform {
    identity: String,
    config: DemoConfig,
    epoch: Instant,
    offset: Duration,
    events: mpsc::Sender<RawEvent>,
    connected: Arc<AtomicBool>,
    emitter: Mutex<Option<JoinHandle<()>>>,
    rooms: AtomicU64,
}

impl DemoPlatform {
    fn new(
        identity: &str,
        config: DemoConfig,
        offset: Duration,
        events: mpsc::Sender<RawEvent>,
    ) -> Self {
        Self {
            identity: identity.to_string(),
            config,
            epoch: Instant::now(),
            offset,
            events,
            connected: Arc::new(AtomicBool::new(false)),
            emitter: Mutex::new(None),
            rooms: AtomicU64::new(0),
        }
    }

    /// Position inside the offline+live cycle
    fn position(&self) -> Duration {
        let cycle_ms = self.config.cycle().as_millis().max(1);
        let elapsed_ms = (self.epoch.elapsed() + self.offset).as_millis();
        Duration::from_millis((elapsed_ms % cycle_ms) as u64)
    }

    fn is_live_now(&self) -> bool {
        self.position() >= self.config.offline()
    }

    fn until_live(&self) -> Duration {
        self.config.offline().saturating_sub(self.position())
    }

    fn live_remaining(&self) -> Duration {
        self.config.cycle().saturating_sub(self.position())
    }

    fn stop_emitter(&self) {
        if let Ok(mut emitter) = self.emitter.lock() {
            if let Some(handle) = emitter.take() {
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl PlatformHandle for DemoPlatform {
    async fn fetch_is_live(&self) -> Result<bool, PlatformError> {
        Ok(self.is_live_now())
    }

    async fn wait_until_live(&self) -> Result<(), PlatformError> {
        while !self.is_live_now() {
            sleep(self.until_live().max(Duration::from_millis(10))).await;
        }
        Ok(())
    }

    async fn connect(&self) -> Result<RoomState, PlatformError> {
        if !self.is_live_now() {
            return Err(PlatformError::Connect(format!(
                "@{} is not live",
                self.identity
            )));
        }

        self.stop_emitter();
        self.connected.store(true, Ordering::SeqCst);

        let room = self.rooms.fetch_add(1, Ordering::Relaxed) + 1;
        let room_id = format!("demo-{}-{}", self.identity, room);

        let handle = tokio::spawn(emit_traffic(
            self.events.clone(),
            self.connected.clone(),
            self.config.event_interval(),
            self.live_remaining(),
        ));
        if let Ok(mut emitter) = self.emitter.lock() {
            *emitter = Some(handle);
        }

        Ok(RoomState { room_id })
    }

    async fn fetch_room_info(&self) -> Result<RoomInfo, PlatformError> {
        if !self.is_connected() {
            return Err(PlatformError::NotConnected);
        }
        let room = self.rooms.load(Ordering::Relaxed);
        Ok(RoomInfo {
            media_url: Some(format!(
                "https://demo.invalid/live/{}/{}.m3u8",
                self.identity, room
            )),
            created_at: Some(chrono::Utc::now().timestamp().to_string()),
            bio: Some(format!("Handmade things by @{}", self.identity)),
        })
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.stop_emitter();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for DemoPlatform {
    fn drop(&mut self) {
        self.stop_emitter();
    }
}

/// Emit random traffic until the live window closes, then end the stream
async fn emit_traffic(
    tx: mpsc::Sender<RawEvent>,
    connected: Arc<AtomicBool>,
    interval: Duration,
    window: Duration,
) {
    let deadline = Instant::now() + window;

    loop {
        sleep(interval).await;

        if Instant::now() >= deadline {
            break;
        }

        let event = random_event(&mut rand::thread_rng());
        if tx.send(event).await.is_err() {
            connected.store(false, Ordering::SeqCst);
            return;
        }
    }

    connected.store(false, Ordering::SeqCst);
    let _ = tx.send(RawEvent::StreamEnd).await;
}

fn random_event(rng: &mut impl Rng) -> RawEvent {
    let viewer = DEMO_VIEWERS[rng.gen_range(0..DEMO_VIEWERS.len())];
    // Occasionally drop the user block, as the real platform sometimes does
    let user = if rng.gen_bool(0.05) {
        None
    } else {
        Some(RawUser {
            nickname: Some(viewer.to_string()),
        })
    };

    match rng.gen_range(0..100) {
        0..=39 => RawEvent::Chat {
            user,
            comment: Some(DEMO_COMMENTS[rng.gen_range(0..DEMO_COMMENTS.len())].to_string()),
        },
        40..=69 => {
            let like_count = rng.gen_range(1..=15);
            RawEvent::Like {
                user,
                like_count: Some(like_count),
                total_like_count: Some(rng.gen_range(like_count..=5_000)),
            }
        }
        70..=79 => RawEvent::Gift {
            user,
            gift_id: Some(serde_json::json!(rng.gen_range(5_000..6_000))),
            repeat_count: Some(rng.gen_range(1..=10)),
        },
        80..=89 => RawEvent::Member { user },
        _ => RawEvent::Share { user },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DemoConfig {
        DemoConfig {
            offline_secs: 10,
            live_secs: 30,
            event_interval_ms: 1_000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_then_live_window() {
        let (tx, _rx) = mpsc::channel(64);
        let platform = DemoPlatform::new("alice", config(), Duration::ZERO, tx);

        assert!(!platform.fetch_is_live().await.unwrap());
        assert!(platform.connect().await.is_err());

        platform.wait_until_live().await.unwrap();
        assert!(platform.fetch_is_live().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_stream_emits_traffic_then_ends() {
        let (tx, mut rx) = mpsc::channel(256);
        let platform = DemoPlatform::new("alice", config(), Duration::from_secs(10), tx);

        let room = platform.connect().await.unwrap();
        assert_eq!(room.room_id, "demo-alice-1");
        assert!(platform.is_connected());
        assert!(platform.fetch_room_info().await.unwrap().media_url.is_some());

        let mut interactions = 0;
        loop {
            match rx.recv().await {
                Some(RawEvent::StreamEnd) => break,
                Some(_) => interactions += 1,
                None => panic!("event channel closed before stream end"),
            }
        }

        assert!(interactions > 0);
        assert!(!platform.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_stops_traffic() {
        let (tx, mut rx) = mpsc::channel(256);
        let platform = DemoPlatform::new("alice", config(), Duration::from_secs(10), tx);

        platform.connect().await.unwrap();
        platform.disconnect().await;
        assert!(!platform.is_connected());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());
    }
}
