//! Sensor session: connection state machine and read orchestration.
//!
//! The session owns the bridge, the connection state and the runtime
//! [`SessionConfig`]. Callers get a uniform [`SensorSession::read`] no matter
//! which bridge backs the session. When no link can be established the
//! session hands out synthetic readings instead of stalling the caller, and
//! records that it did so.
//!
//! ## Locking
//!
//! The bridge sits behind its own mutex and may be held across blocking
//! bridge calls. Connection state and config sit behind a second mutex that
//! is only ever held briefly and never while waiting for the bridge, so
//! [`SensorSession::status`] answers while a read is in flight.

use crate::bridge::{
    BridgeKind, Deadline, FIRMWARE_UNAVAILABLE, SensorBridge, SyntheticSource,
};
use crate::config::{SessionConfig, SessionConfigPatch};
use crate::error::BridgeError;
use crate::reading::{Reading, ReadingSource};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// Link state as seen by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Snapshot returned by [`SensorSession::status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub connected: bool,
    pub link_enabled: bool,
    pub firmware: String,
    pub config: SessionConfig,
    /// Kind of the configured bridge, `None` when running bridgeless.
    pub bridge: Option<BridgeKind>,
    /// Source of the most recent reading handed out.
    pub last_source: Option<ReadingSource>,
}

struct SessionState {
    connection: ConnectionState,
    link_enabled: bool,
    config: SessionConfig,
    last_source: Option<ReadingSource>,
}

type BridgeSlot = Option<Box<dyn SensorBridge>>;

pub struct SensorSession {
    bridge: Mutex<BridgeSlot>,
    bridge_kind: Option<BridgeKind>,
    state: Mutex<SessionState>,
    fallback: Mutex<SyntheticSource>,
    /// Last firmware string seen, served while the bridge is busy.
    firmware: RwLock<String>,
}

impl SensorSession {
    /// Create a session. `bridge` is `None` when no sensor hardware or mock is
    /// configured; every read then yields a synthetic reading.
    pub fn new(bridge: Option<Box<dyn SensorBridge>>, config: SessionConfig) -> Self {
        let bridge_kind = bridge.as_ref().map(|b| b.kind());
        let firmware = bridge
            .as_ref()
            .map(|b| b.firmware_status())
            .unwrap_or_else(|| FIRMWARE_UNAVAILABLE.to_string());

        match bridge_kind {
            Some(kind) => info!("[Session] Created with {} bridge", kind),
            None => warn!("[Session] No sensor bridge configured, readings will be synthetic"),
        }

        Self {
            bridge: Mutex::new(bridge),
            bridge_kind,
            state: Mutex::new(SessionState {
                connection: ConnectionState::Disconnected,
                link_enabled: false,
                config,
                last_source: None,
            }),
            fallback: Mutex::new(SyntheticSource::new()),
            firmware: RwLock::new(firmware),
        }
    }

    /// Use `source` for fallback readings (e.g. a seeded one in tests).
    pub fn with_fallback(self, source: SyntheticSource) -> Self {
        *self.fallback.lock() = source;
        self
    }

    pub fn bridge_kind(&self) -> Option<BridgeKind> {
        self.bridge_kind
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.lock().connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn is_link_enabled(&self) -> bool {
        self.state.lock().link_enabled
    }

    pub fn config(&self) -> SessionConfig {
        self.state.lock().config.clone()
    }

    pub fn last_source(&self) -> Option<ReadingSource> {
        self.state.lock().last_source
    }

    /// Establish the link through the bridge.
    ///
    /// Returns `false` (staying disconnected) when there is no bridge, the
    /// link is disabled in config, or the bridge fails to connect.
    pub fn connect(&self) -> bool {
        let mut slot = self.bridge.lock();
        self.connect_locked(&mut slot)
    }

    fn connect_locked(&self, slot: &mut BridgeSlot) -> bool {
        let Some(bridge) = slot.as_mut() else {
            debug!("[Session] Connect requested without a bridge");
            return false;
        };

        let config = self.state.lock().config.clone();
        if !config.link_mode {
            debug!("[Session] Link disabled, not connecting");
            return false;
        }

        let connected = bridge.connect(&config, Deadline::from_config(&config));
        self.cache_firmware(&**bridge);

        let mut state = self.state.lock();
        state.link_enabled = connected;
        if connected {
            if state.connection != ConnectionState::Connected {
                info!("[Session] Connected via {} bridge", bridge.kind());
            }
            state.connection = ConnectionState::Connected;
        } else {
            warn!("[Session] Failed to connect to sensor");
            state.connection = ConnectionState::Disconnected;
        }
        connected
    }

    /// Drop the link. The session is disconnected afterwards regardless;
    /// `false` means the bridge reported a fault while tearing down.
    pub fn disconnect(&self) -> bool {
        let mut slot = self.bridge.lock();
        let ok = match slot.as_mut() {
            Some(bridge) => {
                let ok = bridge.disconnect();
                self.cache_firmware(&**bridge);
                ok
            }
            None => true,
        };
        if !ok {
            warn!("[Session] Bridge reported an error while disconnecting");
        }

        let mut state = self.state.lock();
        if state.connection == ConnectionState::Connected {
            info!("[Session] Disconnected");
        }
        state.connection = ConnectionState::Disconnected;
        ok
    }

    /// Acquire the next reading.
    ///
    /// - not connected: tries to connect; if that fails a synthetic reading is
    ///   returned and [`last_source`](Self::last_source) says so
    /// - connected but no tag in the field: `Ok(None)`, retry next tick
    /// - bridge failure: `Err`; terminal failures also drop the connection
    pub fn read(&self) -> Result<Option<Reading>, BridgeError> {
        let mut slot = self.bridge.lock();

        let connected = self.is_connected();
        if !connected && !self.connect_locked(&mut slot) {
            return Ok(Some(self.synthetic_reading()));
        }
        let Some(bridge) = slot.as_mut() else {
            return Ok(Some(self.synthetic_reading()));
        };

        let deadline = Deadline::from_config(&self.state.lock().config);
        match bridge.read_once(deadline) {
            Ok(Some(reading)) => {
                self.state.lock().last_source = Some(ReadingSource::Bridge);
                Ok(Some(reading))
            }
            Ok(None) => {
                debug!("[Session] No tag detected, waiting for tag");
                Ok(None)
            }
            Err(e) => {
                if e.is_terminal() {
                    warn!("[Session] Link lost during read: {}", e);
                    self.state.lock().connection = ConnectionState::Disconnected;
                } else {
                    warn!("[Session] Error reading sensor data: {}", e);
                }
                Err(e)
            }
        }
    }

    fn synthetic_reading(&self) -> Reading {
        let reading = self.fallback.lock().next_reading();
        let mut state = self.state.lock();
        if state.last_source != Some(ReadingSource::Synthetic) {
            warn!("[Session] Sensor unreachable, falling back to synthetic readings");
        }
        state.last_source = Some(ReadingSource::Synthetic);
        reading
    }

    /// Merge `patch` into the session config and, when connected, push the
    /// result to the device.
    ///
    /// A rejected patch changes nothing. A failed push returns `false` but
    /// keeps the local change; the session's config stays authoritative.
    /// Turning `link_mode` off behaves like
    /// [`set_link_enabled(false)`](Self::set_link_enabled): the link is
    /// dropped instead of reconfigured.
    pub fn update_config(&self, patch: &SessionConfigPatch) -> bool {
        if patch.is_empty() {
            return true;
        }
        let link_disabled = patch.link_mode == Some(false);
        let (connected, config) = {
            let mut state = self.state.lock();
            if let Err(e) = state.config.merge(patch) {
                warn!("[Session] Rejected configuration update: {}", e);
                return false;
            }
            if link_disabled {
                state.link_enabled = false;
            }
            (
                state.connection == ConnectionState::Connected,
                state.config.clone(),
            )
        };

        if patch.touches_calibration() {
            info!("[Session] Calibration parameters updated, recalibrate to apply on the tag");
        }
        if !connected {
            return true;
        }
        if link_disabled {
            info!("[Session] Link disabled by configuration update");
            return self.disconnect();
        }

        let mut slot = self.bridge.lock();
        match slot.as_mut() {
            Some(bridge) => {
                let pushed = bridge.push_config(&config);
                if !pushed {
                    warn!("[Session] Configuration stored locally but device push failed");
                }
                pushed
            }
            None => true,
        }
    }

    /// Run a calibration exchange. Requires an established connection; never
    /// connects on its own.
    pub fn calibrate(&self) -> bool {
        if !self.is_connected() {
            warn!("[Session] Calibration requires a connected sensor");
            return false;
        }

        let mut slot = self.bridge.lock();
        let Some(bridge) = slot.as_mut() else {
            return false;
        };
        let config = self.config();
        let ok = bridge.calibrate(&config, Deadline::from_config(&config));
        if ok {
            info!("[Session] Sensor calibrated");
        } else {
            warn!("[Session] Calibration failed");
        }
        ok
    }

    /// Check reader and tag connectivity, connecting first if necessary.
    pub fn test_connectivity(&self) -> bool {
        let mut slot = self.bridge.lock();
        if !self.is_connected() && !self.connect_locked(&mut slot) {
            return false;
        }
        let Some(bridge) = slot.as_mut() else {
            return false;
        };
        let deadline = Deadline::from_config(&self.state.lock().config);
        bridge.test_connectivity(deadline)
    }

    /// Enable or disable the link (reader mode).
    ///
    /// Enabling connects and returns whether that worked. Disabling
    /// disconnects; later reads fall back to synthetic data until re-enabled.
    pub fn set_link_enabled(&self, enabled: bool) -> bool {
        {
            let mut state = self.state.lock();
            state.config.link_mode = enabled;
            if !enabled {
                state.link_enabled = false;
            }
        }
        if enabled {
            self.connect()
        } else {
            info!("[Session] Link disabled");
            self.disconnect()
        }
    }

    /// Whether a reader backs this session and reports itself healthy.
    pub fn is_link_available(&self) -> bool {
        if self.bridge_kind.is_none() {
            return false;
        }
        let firmware = self.firmware_status().to_lowercase();
        firmware != FIRMWARE_UNAVAILABLE
            && !firmware.contains("not connected")
            && !firmware.contains("error")
    }

    /// Firmware/status string of the bridge, `"unavailable"` without one.
    ///
    /// Served from cache while a bridge call is in flight.
    pub fn firmware_status(&self) -> String {
        match self.bridge.try_lock() {
            Some(slot) => match slot.as_ref() {
                Some(bridge) => self.cache_firmware(&**bridge),
                None => FIRMWARE_UNAVAILABLE.to_string(),
            },
            None => self.firmware.read().clone(),
        }
    }

    fn cache_firmware(&self, bridge: &dyn SensorBridge) -> String {
        let firmware = bridge.firmware_status();
        *self.firmware.write() = firmware.clone();
        firmware
    }

    pub fn status(&self) -> SessionStatus {
        let firmware = self.firmware_status();
        let state = self.state.lock();
        SessionStatus {
            connected: state.connection == ConnectionState::Connected,
            link_enabled: state.link_enabled,
            firmware,
            config: state.config.clone(),
            bridge: self.bridge_kind,
            last_source: state.last_source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::MockBridge;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::mpsc;

    #[derive(Default, Debug, Clone)]
    struct Calls {
        connect: u32,
        disconnect: u32,
        read: u32,
        calibrate: u32,
        push: u32,
    }

    struct ScriptedBridge {
        calls: Arc<parking_lot::Mutex<Calls>>,
        connect_ok: bool,
        disconnect_ok: bool,
        calibrate_ok: bool,
        push_ok: bool,
        reads: VecDeque<Result<Option<Reading>, BridgeError>>,
        /// When set, `read_once` announces itself and blocks until released.
        gate: Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>,
    }

    impl ScriptedBridge {
        fn new() -> (Self, Arc<parking_lot::Mutex<Calls>>) {
            let calls = Arc::new(parking_lot::Mutex::new(Calls::default()));
            let bridge = Self {
                calls: calls.clone(),
                connect_ok: true,
                disconnect_ok: true,
                calibrate_ok: true,
                push_ok: true,
                reads: VecDeque::new(),
                gate: None,
            };
            (bridge, calls)
        }
    }

    impl SensorBridge for ScriptedBridge {
        fn kind(&self) -> BridgeKind {
            BridgeKind::Hardware
        }

        fn connect(&mut self, _config: &SessionConfig, _deadline: Deadline) -> bool {
            self.calls.lock().connect += 1;
            self.connect_ok
        }

        fn disconnect(&mut self) -> bool {
            self.calls.lock().disconnect += 1;
            self.disconnect_ok
        }

        fn read_once(&mut self, _deadline: Deadline) -> Result<Option<Reading>, BridgeError> {
            self.calls.lock().read += 1;
            if let Some((entered, release)) = &self.gate {
                entered.send(()).unwrap();
                release.recv().unwrap();
            }
            self.reads.pop_front().unwrap_or(Ok(None))
        }

        fn calibrate(&mut self, _config: &SessionConfig, _deadline: Deadline) -> bool {
            self.calls.lock().calibrate += 1;
            self.calibrate_ok
        }

        fn test_connectivity(&mut self, _deadline: Deadline) -> bool {
            true
        }

        fn firmware_status(&self) -> String {
            "NHS3152 fw 2.1".to_string()
        }

        fn push_config(&mut self, _config: &SessionConfig) -> bool {
            self.calls.lock().push += 1;
            self.push_ok
        }
    }

    fn session_with(bridge: ScriptedBridge) -> SensorSession {
        SensorSession::new(Some(Box::new(bridge)), SessionConfig::default())
            .with_fallback(SyntheticSource::with_seed(3))
    }

    #[test]
    fn test_bridgeless_read_is_synthetic() {
        let session = SensorSession::new(None, SessionConfig::default());
        for _ in 0..3 {
            let reading = session.read().unwrap();
            assert!(reading.is_some());
        }
        assert_eq!(session.last_source(), Some(ReadingSource::Synthetic));

        let status = session.status();
        assert!(!status.connected);
        assert_eq!(status.firmware, FIRMWARE_UNAVAILABLE);
        assert_eq!(status.bridge, None);
        assert!(!session.is_link_available());
    }

    #[test]
    fn test_failed_connect_stays_disconnected() {
        let (mut bridge, calls) = ScriptedBridge::new();
        bridge.connect_ok = false;
        let session = session_with(bridge);

        assert!(!session.connect());
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert!(!session.status().connected);
        assert_eq!(calls.lock().connect, 1);
    }

    #[test]
    fn test_failed_connect_falls_back_on_read() {
        let (mut bridge, calls) = ScriptedBridge::new();
        bridge.connect_ok = false;
        let session = session_with(bridge);

        assert!(session.read().unwrap().is_some());
        assert_eq!(session.last_source(), Some(ReadingSource::Synthetic));
        assert_eq!(calls.lock().read, 0);
    }

    #[test]
    fn test_calibrate_requires_connection() {
        let (bridge, calls) = ScriptedBridge::new();
        let session = session_with(bridge);

        assert!(!session.calibrate());
        assert_eq!(calls.lock().calibrate, 0);
        assert_eq!(calls.lock().connect, 0);

        assert!(session.connect());
        assert!(session.calibrate());
        assert_eq!(calls.lock().calibrate, 1);
    }

    #[test]
    fn test_read_connects_and_returns_bridge_reading() {
        let (mut bridge, calls) = ScriptedBridge::new();
        let expected = Reading::now(36.8, 7.1, 95.0);
        bridge.reads.push_back(Ok(Some(expected)));
        let session = session_with(bridge);

        assert_eq!(session.read().unwrap(), Some(expected));
        assert!(session.is_connected());
        assert!(session.is_link_enabled());
        assert_eq!(session.last_source(), Some(ReadingSource::Bridge));
        assert_eq!(calls.lock().connect, 1);

        // Already connected: no reconnect, and no tag yields None.
        assert_eq!(session.read().unwrap(), None);
        assert_eq!(calls.lock().connect, 1);
    }

    #[test]
    fn test_terminal_failure_drops_connection() {
        let (mut bridge, calls) = ScriptedBridge::new();
        bridge.reads.push_back(Err(BridgeError::Timeout(3000)));
        bridge
            .reads
            .push_back(Err(BridgeError::LinkLost("reader detached".into())));
        let session = session_with(bridge);

        assert_eq!(session.read(), Err(BridgeError::Timeout(3000)));
        assert!(session.is_connected());

        assert!(session.read().unwrap_err().is_terminal());
        assert!(!session.is_connected());

        // Next read reconnects.
        assert_eq!(session.read().unwrap(), None);
        assert_eq!(calls.lock().connect, 2);
    }

    #[test]
    fn test_disconnect_always_disconnects() {
        let (mut bridge, calls) = ScriptedBridge::new();
        bridge.disconnect_ok = false;
        let session = session_with(bridge);
        session.connect();

        assert!(!session.disconnect());
        assert!(!session.is_connected());
        assert_eq!(calls.lock().disconnect, 1);
    }

    #[test]
    fn test_update_config_while_disconnected_does_not_push() {
        let (bridge, calls) = ScriptedBridge::new();
        let session = session_with(bridge);
        let patch = SessionConfigPatch {
            temperature_offset: Some(0.3),
            ..Default::default()
        };

        assert!(session.update_config(&patch));
        assert_eq!(session.config().temperature_offset, 0.3);
        assert_eq!(calls.lock().push, 0);
    }

    #[test]
    fn test_push_failure_keeps_local_merge() {
        let (mut bridge, calls) = ScriptedBridge::new();
        bridge.push_ok = false;
        let session = session_with(bridge);
        session.connect();

        let patch = SessionConfigPatch {
            link_timeout_ms: Some(500),
            ..Default::default()
        };
        assert!(!session.update_config(&patch));
        assert_eq!(session.config().link_timeout_ms, 500);
        assert_eq!(session.status().config.link_timeout_ms, 500);
        assert_eq!(calls.lock().push, 1);
    }

    #[test]
    fn test_link_mode_patch_drops_connection() {
        let (bridge, calls) = ScriptedBridge::new();
        let session = session_with(bridge);
        assert!(session.connect());

        let patch = SessionConfigPatch {
            link_mode: Some(false),
            ..Default::default()
        };
        assert!(session.update_config(&patch));
        assert!(!session.is_connected());
        assert!(!session.is_link_enabled());
        assert!(!session.status().link_enabled);
        assert_eq!(calls.lock().disconnect, 1);
        assert_eq!(calls.lock().push, 0);

        // Stays down: reads fall back instead of reconnecting.
        assert!(session.read().unwrap().is_some());
        assert_eq!(session.last_source(), Some(ReadingSource::Synthetic));
        assert_eq!(calls.lock().connect, 1);
    }

    #[test]
    fn test_invalid_patch_rejected() {
        let (bridge, _calls) = ScriptedBridge::new();
        let session = session_with(bridge);
        let patch = SessionConfigPatch {
            temperature_offset: Some(f64::NAN),
            ..Default::default()
        };
        assert!(!session.update_config(&patch));
        assert_eq!(session.config(), SessionConfig::default());
    }

    #[test]
    fn test_disabling_link_forces_synthetic() {
        let (bridge, calls) = ScriptedBridge::new();
        let session = session_with(bridge);
        assert!(session.connect());

        assert!(session.set_link_enabled(false));
        assert!(!session.is_connected());
        assert!(!session.is_link_enabled());

        assert!(session.read().unwrap().is_some());
        assert_eq!(session.last_source(), Some(ReadingSource::Synthetic));
        assert_eq!(calls.lock().connect, 1);

        assert!(session.set_link_enabled(true));
        assert!(session.is_connected());
    }

    #[test]
    fn test_status_reports_mock_bridge() {
        let session = SensorSession::new(
            Some(Box::new(MockBridge::with_seed(9))),
            SessionConfig::default(),
        );
        assert!(session.read().unwrap().is_some());

        let status = session.status();
        assert!(status.connected);
        assert_eq!(status.bridge, Some(BridgeKind::Mock));
        assert_eq!(status.last_source, Some(ReadingSource::Bridge));
        assert!(status.firmware.contains("synthetic"));
        assert!(session.is_link_available());
        assert!(session.test_connectivity());

        session.disconnect();
        assert!(!session.is_link_available());
    }

    #[test]
    fn test_status_answers_during_blocked_read() {
        let (mut bridge, _calls) = ScriptedBridge::new();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        bridge.gate = Some((entered_tx, release_rx));
        let session = Arc::new(session_with(bridge));

        let reader = {
            let session = session.clone();
            std::thread::spawn(move || session.read())
        };

        entered_rx.recv().unwrap();
        let status = session.status();
        assert!(status.connected);
        assert_eq!(status.firmware, "NHS3152 fw 2.1");

        release_tx.send(()).unwrap();
        assert_eq!(reader.join().unwrap(), Ok(None));
    }
}
