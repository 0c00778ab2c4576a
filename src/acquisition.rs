//! Periodic acquisition: session read, then buffer and store.

use crate::buffer::ReadingBuffer;
use crate::reading::ReadingSource;
use crate::session::SensorSession;
use crate::store::DurableStore;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

/// Result of a single acquisition tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A reading was buffered. `persisted` is false when the store append
    /// failed; the reading then lives only in memory.
    Stored { synthetic: bool, persisted: bool },
    /// Connected, but no tag in the field.
    NoTag,
    /// The bridge reported a failure; nothing was recorded.
    Failed,
}

pub struct Acquisition {
    session: Arc<SensorSession>,
    buffer: Arc<ReadingBuffer>,
    store: Arc<DurableStore>,
}

impl Acquisition {
    pub fn new(
        session: Arc<SensorSession>,
        buffer: Arc<ReadingBuffer>,
        store: Arc<DurableStore>,
    ) -> Self {
        Self {
            session,
            buffer,
            store,
        }
    }

    pub fn session(&self) -> &Arc<SensorSession> {
        &self.session
    }

    pub fn buffer(&self) -> &Arc<ReadingBuffer> {
        &self.buffer
    }

    pub fn store(&self) -> &Arc<DurableStore> {
        &self.store
    }

    /// Run one acquisition step. Blocks for as long as the bridge does.
    pub fn tick(&self) -> TickOutcome {
        let reading = match self.session.read() {
            Ok(Some(reading)) => reading,
            Ok(None) => return TickOutcome::NoTag,
            Err(e) => {
                debug!("[Acquire] Tick failed: {}", e);
                return TickOutcome::Failed;
            }
        };

        let synthetic = self.session.last_source() == Some(ReadingSource::Synthetic);
        self.buffer.add(reading);
        let persisted = self.store.append(&reading);
        if !persisted {
            warn!("[Acquire] Reading kept in memory only: {}", reading);
        }

        debug!("[Acquire] {}", reading);
        TickOutcome::Stored {
            synthetic,
            persisted,
        }
    }

    /// Spawn the acquisition loop, ticking every `period` until `shutdown`
    /// is cancelled.
    ///
    /// Ticks run on the blocking pool. A slow tick delays the next one
    /// rather than queueing a burst.
    pub fn run(self: Arc<Self>, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("[Acquire] Starting, interval {:?}", period);
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let this = self.clone();
                match tokio::task::spawn_blocking(move || this.tick()).await {
                    Ok(TickOutcome::Stored { .. }) | Ok(TickOutcome::NoTag) => {}
                    Ok(TickOutcome::Failed) => {
                        debug!("[Acquire] Retrying on next tick");
                    }
                    Err(e) => error!("[Acquire] Tick task panicked: {}", e),
                }
            }
            info!("[Acquire] Stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeKind, Deadline, MockBridge, SensorBridge, SyntheticSource};
    use crate::clock::ManualClock;
    use crate::config::SessionConfig;
    use crate::error::BridgeError;
    use crate::reading::Reading;
    use chrono::{TimeZone, Utc};
    use std::collections::VecDeque;

    /// Connects fine, then replays scripted read results.
    struct Replay(VecDeque<Result<Option<Reading>, BridgeError>>);

    impl SensorBridge for Replay {
        fn kind(&self) -> BridgeKind {
            BridgeKind::Hardware
        }
        fn connect(&mut self, _config: &SessionConfig, _deadline: Deadline) -> bool {
            true
        }
        fn disconnect(&mut self) -> bool {
            true
        }
        fn read_once(&mut self, _deadline: Deadline) -> Result<Option<Reading>, BridgeError> {
            self.0.pop_front().unwrap_or(Ok(None))
        }
        fn calibrate(&mut self, _config: &SessionConfig, _deadline: Deadline) -> bool {
            true
        }
        fn test_connectivity(&mut self, _deadline: Deadline) -> bool {
            true
        }
        fn firmware_status(&self) -> String {
            "replay".to_string()
        }
        fn push_config(&mut self, _config: &SessionConfig) -> bool {
            true
        }
    }

    fn pipeline(
        bridge: Option<Box<dyn SensorBridge>>,
        dir: &std::path::Path,
    ) -> Acquisition {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap(),
        ));
        let session = SensorSession::new(bridge, SessionConfig::default())
            .with_fallback(SyntheticSource::with_seed(1));
        Acquisition::new(
            Arc::new(session),
            Arc::new(ReadingBuffer::with_capacity(16)),
            Arc::new(DurableStore::with_clock(dir, clock).unwrap()),
        )
    }

    #[test]
    fn test_tick_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let reading = Reading::now(36.6, 7.2, 101.0);
        let replay = Replay(VecDeque::from(vec![
            Ok(Some(reading)),
            Ok(None),
            Err(BridgeError::Timeout(3000)),
        ]));
        let acq = pipeline(Some(Box::new(replay)), dir.path());

        assert_eq!(
            acq.tick(),
            TickOutcome::Stored {
                synthetic: false,
                persisted: true
            }
        );
        assert_eq!(acq.tick(), TickOutcome::NoTag);
        assert_eq!(acq.tick(), TickOutcome::Failed);

        assert_eq!(acq.buffer().all(), vec![reading]);
        assert_eq!(acq.store().load_all(), vec![reading]);
    }

    #[test]
    fn test_bridgeless_ticks_are_synthetic() {
        let dir = tempfile::tempdir().unwrap();
        let acq = pipeline(None, dir.path());

        for _ in 0..3 {
            assert_eq!(
                acq.tick(),
                TickOutcome::Stored {
                    synthetic: true,
                    persisted: true
                }
            );
        }
        assert_eq!(acq.buffer().len(), 3);
        assert_eq!(acq.store().load_all(), acq.buffer().all());
        assert_eq!(acq.store().list_partitions().len(), 1);
    }

    #[test]
    fn test_store_failure_keeps_reading_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let acq = pipeline(Some(Box::new(MockBridge::with_seed(4))), dir.path());
        let root = acq.store().storage_path().to_path_buf();
        std::fs::remove_dir_all(&root).unwrap();
        // A plain file where the directory was makes every append fail.
        std::fs::write(&root, b"").unwrap();

        assert_eq!(
            acq.tick(),
            TickOutcome::Stored {
                synthetic: false,
                persisted: false
            }
        );
        assert_eq!(acq.buffer().len(), 1);
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let acq = Arc::new(pipeline(
            Some(Box::new(MockBridge::with_seed(2))),
            dir.path(),
        ));
        let shutdown = CancellationToken::new();
        let handle = acq.clone().run(Duration::from_millis(10), shutdown.clone());

        while acq.buffer().len() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        handle.await.unwrap();

        let stored = acq.buffer().len();
        assert!(stored >= 3);
        assert_eq!(acq.store().load_all().len(), stored);
    }

    #[test]
    fn test_cancelled_loop_never_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let acq = Arc::new(pipeline(None, dir.path()));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        tokio_test::block_on(async {
            acq.clone()
                .run(Duration::from_secs(1), shutdown)
                .await
                .unwrap();
        });
        assert!(acq.buffer().is_empty());
    }
}
