//! # Poll Loop
//!
//! The single periodic driver: input → mapping → serial.
//!
//! ## Per Tick
//!
//! 1. Tick the held arrow keys when the virtual source is selected
//! 2. Snapshot the selected source
//! 3. Evaluate every mapping
//! 4. Send each servo command, if the link is connected and not busy
//! 5. Drain pending responses
//! 6. Publish a [`PollSnapshot`]
//!
//! The link is only ever `try_lock`ed here. A connect running on the console
//! task holds the lock for seconds; the loop keeps ticking input and mapping
//! but skips the serial steps until it is released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

use crate::controller::aggregator::{InputAggregator, InputSource};
use crate::controller::input::InputSnapshot;
use crate::mapping::{evaluate_all, MappingSet, ServoOutput};
use crate::serial::{DeviceLink, LinkState, LinkStats};

/// Default poll period (20 Hz)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Everything the UI side needs from one tick. Never mutated after publish.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSnapshot {
    pub tick: u64,
    pub source: InputSource,
    /// `None` when the selected external controller has gone away
    pub input: Option<InputSnapshot>,
    pub outputs: Vec<ServoOutput>,
    pub wheel_angle: f64,
    pub throttle_angle: f64,
    pub link: LinkStats,
}

/// Handles shared between the poll loop and the console.
#[derive(Clone)]
pub struct PollShared {
    pub aggregator: Arc<Mutex<InputAggregator>>,
    pub link: Arc<tokio::sync::Mutex<DeviceLink>>,
    pub mappings: watch::Receiver<Arc<MappingSet>>,
    pub selected: watch::Receiver<InputSource>,
    pub running: Arc<AtomicBool>,
}

/// Periodic input → servo driver
pub struct PollLoop {
    period: Duration,
    shared: PollShared,
    snapshots: mpsc::Sender<PollSnapshot>,
    tick: u64,
    last_link: LinkStats,
}

impl PollLoop {
    pub fn new(period: Duration, shared: PollShared, snapshots: mpsc::Sender<PollSnapshot>) -> Self {
        Self {
            period,
            shared,
            snapshots,
            tick: 0,
            last_link: LinkStats::default(),
        }
    }

    /// Ticks until the running flag clears, then disconnects the link.
    ///
    /// Returns the number of ticks run.
    pub async fn run(mut self) -> u64 {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Poll loop started ({:?} period)", self.period);

        loop {
            ticker.tick().await;
            if !self.shared.running.load(Ordering::SeqCst) {
                break;
            }

            let snapshot = self.poll_once().await;
            match self.snapshots.try_send(snapshot) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("Snapshot consumer is behind, dropping tick {}", self.tick);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Snapshot consumer is gone");
                }
            }
        }

        self.shared.link.lock().await.disconnect();
        info!("Poll loop stopped after {} ticks", self.tick);
        self.tick
    }

    /// Runs one tick and returns what it produced.
    pub async fn poll_once(&mut self) -> PollSnapshot {
        self.tick += 1;

        let source = *self.shared.selected.borrow();
        let mappings = Arc::clone(&self.shared.mappings.borrow());

        let (input, outputs, wheel_angle, throttle_angle) = {
            let mut aggregator = self
                .shared
                .aggregator
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            if source == InputSource::Virtual {
                aggregator.virtual_controller_mut().tick_held_keys();
            }

            let input = aggregator.state(source);
            let outputs = evaluate_all(&mappings, |mapped| {
                if mapped == source {
                    input.clone()
                } else {
                    aggregator.state(mapped)
                }
            });

            let virtual_controller = aggregator.virtual_controller();
            (
                input,
                outputs,
                virtual_controller.wheel().angle(),
                virtual_controller.throttle().angle(),
            )
        };

        self.drive_link(&outputs).await;

        PollSnapshot {
            tick: self.tick,
            source,
            input,
            outputs,
            wheel_angle,
            throttle_angle,
            link: self.last_link.clone(),
        }
    }

    async fn drive_link(&mut self, outputs: &[ServoOutput]) {
        let Ok(mut link) = self.shared.link.try_lock() else {
            // Busy connecting
            self.last_link.state = LinkState::Connecting;
            return;
        };

        if link.is_connected() {
            for output in outputs {
                if let Err(e) = link.send_command(output.servo_id, i32::from(output.angle)).await {
                    debug!("Failed to send S{}:{}: {}", output.servo_id, output.angle, e);
                }
            }
            if let Err(e) = link.drain_responses().await {
                debug!("{}", e);
            }
        }

        self.last_link = link.stats();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::aggregator::NoDiscovery;
    use crate::controller::virtual_wheel::{ArrowKey, VirtualController};
    use crate::mapping::{InputKind, Mapping};
    use crate::serial::port_trait::mocks::MockPortOpener;
    use crate::serial::LinkTimings;

    const PORT: &str = "/dev/ttyACM0";

    struct Harness {
        shared: PollShared,
        mappings_tx: watch::Sender<Arc<MappingSet>>,
        selected_tx: watch::Sender<InputSource>,
        opener: MockPortOpener,
    }

    fn harness() -> Harness {
        let opener = MockPortOpener::new(&[PORT]);
        let link = DeviceLink::new(Arc::new(opener.clone()), LinkTimings::default());
        let aggregator = InputAggregator::new(VirtualController::new(), Box::new(NoDiscovery));

        let (mappings_tx, mappings) = watch::channel(Arc::new(MappingSet::new()));
        let (selected_tx, selected) = watch::channel(InputSource::Virtual);

        Harness {
            shared: PollShared {
                aggregator: Arc::new(Mutex::new(aggregator)),
                link: Arc::new(tokio::sync::Mutex::new(link)),
                mappings,
                selected,
                running: Arc::new(AtomicBool::new(true)),
            },
            mappings_tx,
            selected_tx,
            opener,
        }
    }

    fn publish(harness: &Harness, mappings: &[(u8, InputSource, InputKind, usize)]) {
        let mut set = MappingSet::new();
        for &(servo, source, kind, index) in mappings {
            set.insert(Mapping::new(servo, source, kind, index).unwrap());
        }
        harness.mappings_tx.send_replace(Arc::new(set));
    }

    fn poll_loop(harness: &Harness, capacity: usize) -> (PollLoop, mpsc::Receiver<PollSnapshot>) {
        let (tx, rx) = mpsc::channel(capacity);
        (PollLoop::new(DEFAULT_POLL_INTERVAL, harness.shared.clone(), tx), rx)
    }

    #[tokio::test]
    async fn test_outputs_without_link() {
        let harness = harness();
        publish(&harness, &[(0, InputSource::Virtual, InputKind::Axis, 0)]);
        let (mut poll, _rx) = poll_loop(&harness, 4);

        let snapshot = poll.poll_once().await;

        assert_eq!(snapshot.tick, 1);
        assert_eq!(snapshot.source, InputSource::Virtual);
        assert_eq!(snapshot.outputs.len(), 1);
        assert_eq!(snapshot.outputs[0].servo_id, 0);
        assert_eq!(snapshot.outputs[0].angle, 90);
        assert!(!snapshot.link.is_connected());
        assert!(harness.opener.opened_bauds().is_empty());
    }

    #[tokio::test]
    async fn test_held_key_ticks_virtual_wheel() {
        let harness = harness();
        harness
            .shared
            .aggregator
            .lock()
            .unwrap()
            .virtual_controller_mut()
            .set_key(ArrowKey::Right, true);
        let (mut poll, _rx) = poll_loop(&harness, 4);

        let first = poll.poll_once().await;
        let second = poll.poll_once().await;

        assert!((first.wheel_angle - 3.6).abs() < 1e-9);
        assert!((second.wheel_angle - 7.2).abs() < 1e-9);
        assert_eq!(second.throttle_angle, 0.0);
    }

    #[tokio::test]
    async fn test_external_selection_does_not_tick_virtual() {
        let harness = harness();
        harness
            .shared
            .aggregator
            .lock()
            .unwrap()
            .virtual_controller_mut()
            .set_key(ArrowKey::Right, true);
        harness.selected_tx.send_replace(InputSource::External(0));
        let (mut poll, _rx) = poll_loop(&harness, 4);

        let snapshot = poll.poll_once().await;

        assert_eq!(snapshot.wheel_angle, 0.0);
        // No external controllers attached
        assert_eq!(snapshot.input, None);
    }

    #[tokio::test]
    async fn test_stale_source_centers_axis_mapping() {
        let harness = harness();
        publish(
            &harness,
            &[
                (1, InputSource::External(3), InputKind::Axis, 0),
                (2, InputSource::External(3), InputKind::Button, 0),
            ],
        );
        let (mut poll, _rx) = poll_loop(&harness, 4);

        let snapshot = poll.poll_once().await;

        let angles: Vec<(u8, u8)> = snapshot
            .outputs
            .iter()
            .map(|o| (o.servo_id, o.angle))
            .collect();
        assert_eq!(angles, vec![(1, 90), (2, 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sends_commands_when_connected() {
        let harness = harness();
        harness
            .opener
            .script(PORT, 115_200, vec![(Duration::from_millis(100), b"READY\n".to_vec())]);
        harness.shared.link.lock().await.connect(PORT, 9_600).await.unwrap();

        publish(
            &harness,
            &[
                (0, InputSource::Virtual, InputKind::Axis, 0),
                (5, InputSource::Virtual, InputKind::Button, 3),
            ],
        );
        let (mut poll, _rx) = poll_loop(&harness, 4);

        let snapshot = poll.poll_once().await;

        let port = harness.opener.last_port().unwrap();
        assert_eq!(port.written_text(), "S0:90\nS5:0\n");
        assert_eq!(snapshot.link.commands_sent, 2);
        assert!(snapshot.link.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_link_skips_serial_steps() {
        let harness = harness();
        publish(&harness, &[(0, InputSource::Virtual, InputKind::Axis, 0)]);
        let (mut poll, _rx) = poll_loop(&harness, 4);

        let guard = harness.shared.link.lock().await;
        let snapshot = poll.poll_once().await;
        drop(guard);

        assert_eq!(snapshot.outputs.len(), 1);
        assert_eq!(snapshot.link.state, LinkState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mapping_changes_seen_next_tick() {
        let harness = harness();
        let (mut poll, _rx) = poll_loop(&harness, 4);

        assert!(poll.poll_once().await.outputs.is_empty());

        publish(&harness, &[(7, InputSource::Virtual, InputKind::Hat, 0)]);
        let snapshot = poll.poll_once().await;
        assert_eq!(snapshot.outputs[0].servo_id, 7);
        assert_eq!(snapshot.outputs[0].angle, 90);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_and_disconnects() {
        let harness = harness();
        harness.shared.link.lock().await.connect(PORT, 9_600).await.unwrap();
        let (poll, mut rx) = poll_loop(&harness, 16);

        let running = Arc::clone(&harness.shared.running);
        let handle = tokio::spawn(poll.run());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.tick, 1);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.tick, 2);

        running.store(false, Ordering::SeqCst);
        let ticks = handle.await.unwrap();

        assert!(ticks >= 2);
        assert!(!harness.shared.link.lock().await.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_consumer_does_not_block() {
        let harness = harness();
        let (poll, mut rx) = poll_loop(&harness, 1);

        let running = Arc::clone(&harness.shared.running);
        let handle = tokio::spawn(poll.run());

        // Let several periods pass without reading
        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 5).await;
        running.store(false, Ordering::SeqCst);
        let ticks = handle.await.unwrap();

        assert!(ticks >= 5);
        // Only the first snapshot fit
        assert_eq!(rx.recv().await.unwrap().tick, 1);
        assert!(rx.recv().await.is_none());
    }
}
