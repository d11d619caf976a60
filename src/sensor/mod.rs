//! Motion event source
//!
//! An [`EdgeDriver`] turns physical PIR transitions into [`MotionEvent`]s on an
//! unbounded channel. [`MotionEventSource`] owns the driver, fans each event out
//! to the listeners registered for its kind, and runs until shutdown.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};

pub mod gpio;

pub use gpio::PirMotionDriver;

/// Direction of a sensor transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotionKind {
    /// Rising edge: motion detected
    Started,
    /// Falling edge: the sensor output dropped back
    Stopped,
}

/// One edge reported by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionEvent {
    pub kind: MotionKind,
    pub detected_at: DateTime<Utc>,
}

impl MotionEvent {
    pub fn now(kind: MotionKind) -> Self {
        Self {
            kind,
            detected_at: Utc::now(),
        }
    }
}

/// Motion source errors
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("GPIO support not compiled in; rebuild with `--features gpio` to read pin {pin}")]
    Unsupported { pin: u8 },

    #[error("Failed to access GPIO pin {pin}: {reason}")]
    Gpio { pin: u8, reason: String },

    #[error("Motion source already armed")]
    AlreadyArmed,
}

/// Hardware (or simulated) edge notifications
pub trait EdgeDriver: Send {
    /// Start delivering one event per physical transition into `edges`
    fn arm(&mut self, edges: mpsc::UnboundedSender<MotionEvent>) -> Result<(), SensorError>;

    /// Stop delivering events; dropping the sender closes the channel
    fn disarm(&mut self);
}

/// Receives motion events of the kinds it was registered for
#[async_trait]
pub trait MotionListener: Send + Sync {
    async fn on_motion(&self, event: MotionEvent);
}

/// A listener and the edge kinds it was registered for
struct Registration {
    listener: Arc<dyn MotionListener>,
    kinds: HashSet<MotionKind>,
}

/// Dispatches driver events to listeners until shutdown.
///
/// Each listener is served by one worker task, so it sees events in the
/// order the driver reported them; distinct listeners run concurrently.
pub struct MotionEventSource<D: EdgeDriver> {
    driver: D,
    registrations: Vec<Registration>,
}

impl<D: EdgeDriver> MotionEventSource<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            registrations: Vec::new(),
        }
    }

    /// Register a listener for one kind of edge; call before [`Self::run`].
    ///
    /// Registering the same listener for several kinds gives it a single queue.
    pub fn on(&mut self, kind: MotionKind, listener: Arc<dyn MotionListener>) {
        let existing = self
            .registrations
            .iter_mut()
            .find(|registration| same_listener(&registration.listener, &listener));

        match existing {
            Some(registration) => {
                registration.kinds.insert(kind);
            }
            None => self.registrations.push(Registration {
                listener,
                kinds: HashSet::from([kind]),
            }),
        }
    }

    pub fn listener_count(&self, kind: MotionKind) -> usize {
        self.registrations
            .iter()
            .filter(|registration| registration.kinds.contains(&kind))
            .count()
    }

    /// Arm the driver and dispatch events until shutdown or until the driver
    /// closes its channel. Events already queued to a listener are delivered
    /// before returning.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SensorError> {
        let (edges_tx, mut edges_rx) = mpsc::unbounded_channel();
        self.driver.arm(edges_tx)?;

        info!(
            started_listeners = self.listener_count(MotionKind::Started),
            stopped_listeners = self.listener_count(MotionKind::Stopped),
            "Motion source armed"
        );

        let mut workers = JoinSet::new();
        let queues = self.spawn_workers(&mut workers);

        while !*shutdown.borrow_and_update() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Shutdown requested, leaving motion loop");
                        break;
                    }
                }

                event = edges_rx.recv() => {
                    match event {
                        Some(event) => self.dispatch(event, &queues),
                        None => {
                            warn!("Motion driver closed its channel");
                            break;
                        }
                    }
                }

                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    Self::reap(joined);
                }
            }
        }

        self.driver.disarm();

        // Closing the queues lets each worker finish its backlog and exit
        drop(queues);
        while let Some(joined) = workers.join_next().await {
            Self::reap(joined);
        }

        info!("Motion source disarmed");
        Ok(())
    }

    /// One worker per registration, draining its queue in order
    fn spawn_workers(
        &self,
        workers: &mut JoinSet<()>,
    ) -> Vec<mpsc::UnboundedSender<MotionEvent>> {
        self.registrations
            .iter()
            .map(|registration| {
                let (tx, mut rx) = mpsc::unbounded_channel::<MotionEvent>();
                let listener = registration.listener.clone();

                workers.spawn(async move {
                    while let Some(event) = rx.recv().await {
                        let span = crate::sensor_span!(kind = ?event.kind);
                        listener.on_motion(event).instrument(span).await;
                    }
                });
                tx
            })
            .collect()
    }

    fn dispatch(&self, event: MotionEvent, queues: &[mpsc::UnboundedSender<MotionEvent>]) {
        let mut delivered = false;

        for (registration, queue) in self.registrations.iter().zip(queues) {
            if !registration.kinds.contains(&event.kind) {
                continue;
            }
            if queue.send(event).is_err() {
                warn!(kind = ?event.kind, "Motion listener is gone, dropping event");
            }
            delivered = true;
        }

        if !delivered {
            debug!(kind = ?event.kind, "No listener for motion event");
        }
    }

    fn reap(joined: Result<(), tokio::task::JoinError>) {
        if let Err(e) = joined {
            if !e.is_cancelled() {
                error!("Motion listener task failed: {}", e);
            }
        }
    }
}

fn same_listener(a: &Arc<dyn MotionListener>, b: &Arc<dyn MotionListener>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::ScriptedDriver;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<MotionKind>>,
    }

    #[async_trait]
    impl MotionListener for Recorder {
        async fn on_motion(&self, event: MotionEvent) {
            self.seen.lock().unwrap().push(event.kind);
        }
    }

    #[tokio::test]
    async fn test_events_reach_listeners_of_their_kind() {
        let driver = ScriptedDriver::new(vec![
            (Duration::ZERO, MotionKind::Started),
            (Duration::from_millis(5), MotionKind::Stopped),
            (Duration::from_millis(5), MotionKind::Started),
        ]);
        let started = Arc::new(Recorder::default());
        let stopped = Arc::new(Recorder::default());

        let mut source = MotionEventSource::new(driver);
        source.on(MotionKind::Started, started.clone());
        source.on(MotionKind::Stopped, stopped.clone());

        let (_tx, rx) = watch::channel(false);
        source.run(rx).await.unwrap();

        assert_eq!(*started.seen.lock().unwrap(), vec![MotionKind::Started; 2]);
        assert_eq!(*stopped.seen.lock().unwrap(), vec![MotionKind::Stopped]);
    }

    /// Slower on detections than on stops, so unordered delivery would show
    #[derive(Default)]
    struct UnevenRecorder {
        seen: Mutex<Vec<MotionKind>>,
    }

    #[async_trait]
    impl MotionListener for UnevenRecorder {
        async fn on_motion(&self, event: MotionEvent) {
            if event.kind == MotionKind::Started {
                tokio::time::sleep(Duration::from_millis(3)).await;
            }
            self.seen.lock().unwrap().push(event.kind);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_listener_sees_edges_in_driver_order() {
        let script: Vec<_> = (0..20)
            .map(|i| {
                let kind = if i % 2 == 0 {
                    MotionKind::Started
                } else {
                    MotionKind::Stopped
                };
                (Duration::ZERO, kind)
            })
            .collect();
        let expected: Vec<_> = script.iter().map(|(_, kind)| *kind).collect();

        let recorder = Arc::new(UnevenRecorder::default());
        let mut source = MotionEventSource::new(ScriptedDriver::new(script));
        source.on(MotionKind::Started, recorder.clone());
        source.on(MotionKind::Stopped, recorder.clone());
        assert_eq!(source.listener_count(MotionKind::Started), 1);
        assert_eq!(source.listener_count(MotionKind::Stopped), 1);

        let (_tx, rx) = watch::channel(false);
        source.run(rx).await.unwrap();

        assert_eq!(*recorder.seen.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_unregistered_kind_is_dropped() {
        let driver = ScriptedDriver::new(vec![(Duration::ZERO, MotionKind::Stopped)]);
        let started = Arc::new(Recorder::default());

        let mut source = MotionEventSource::new(driver);
        source.on(MotionKind::Started, started.clone());
        assert_eq!(source.listener_count(MotionKind::Stopped), 0);

        let (_tx, rx) = watch::channel(false);
        source.run(rx).await.unwrap();

        assert!(started.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_an_idle_source() {
        let driver = ScriptedDriver::new(vec![]).held_open();
        let disarmed = driver.disarmed_flag();
        let mut source = MotionEventSource::new(driver);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { source.run(rx).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();

        handle.await.unwrap().unwrap();
        assert!(disarmed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_shutdown_before_run_returns_immediately() {
        let driver = ScriptedDriver::new(vec![]).held_open();
        let disarmed = driver.disarmed_flag();
        let mut source = MotionEventSource::new(driver);

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), source.run(rx))
            .await
            .expect("source should not wait for another change")
            .unwrap();
        assert!(disarmed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_arm_failure_propagates() {
        let driver = ScriptedDriver::failing(SensorError::Unsupported { pin: 12 });
        let mut source = MotionEventSource::new(driver);

        let (_tx, rx) = watch::channel(false);
        let result = source.run(rx).await;

        assert!(matches!(result, Err(SensorError::Unsupported { pin: 12 })));
    }
}
