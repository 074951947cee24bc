//! Process-wide table of live advertisements, one per artifact.
//!
//! The [`Registry`] is the only entry point for starting and stopping
//! broadcasts. It owns one controller per artifact id, checks the capability
//! gate before every radio operation, and applies radio completions as they
//! arrive from the event pump.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use operas_core::gate::Permission;
//! use operas_core::radio::MockRadio;
//! use operas_core::registry::{Registry, RegistrySettings, StartOutcome};
//!
//! # tokio_test::block_on(async {
//! let registry = Registry::new(
//!     Arc::new(MockRadio::new()),
//!     Arc::new(Permission::new(true)),
//!     RegistrySettings::default(),
//! );
//!
//! let outcome = registry
//!     .start("00112233445566778899aabbccddeeff00112233", "0001")
//!     .unwrap();
//! assert_eq!(outcome, StartOutcome::Started);
//! # });
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::codec::{compose_uuid, ArtifactId, PayloadFraming};
use crate::controller::{
    release, release_orphan, AdvertisementController, ControllerEvent, RadioLink, Transition,
};
use crate::error::{OperasError, Result};
use crate::gate::CapabilityGate;
use crate::radio::{BroadcastParameters, Radio};
use crate::types::{AdvertiseFailure, AdvertisementRecordView, AdvertisementState};

const NOTIFICATION_CAPACITY: usize = 64;

/// Deployment-wide settings of a [`Registry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySettings {
    /// On-air layout of artifact beacons.
    pub framing: PayloadFraming,
    /// Broadcast parameters shared by every beacon.
    pub params: BroadcastParameters,
    /// Deadline for a radio start.
    pub start_timeout: Duration,
    /// Deadline for a radio stop.
    pub stop_timeout: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            framing: PayloadFraming::default(),
            params: BroadcastParameters::default(),
            start_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// Result of [`Registry::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    /// A new broadcast was requested.
    Started,
    /// A broadcast for this id is already starting or active.
    AlreadyLive,
    /// The previous broadcast is still being released; start again once the
    /// record is gone.
    PendingStop,
}

/// Result of [`Registry::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// No record exists for this id.
    NotFound,
    /// The record had failed with nothing on air and was discarded without
    /// touching the radio.
    Removed,
    /// The radio stop was issued.
    Issued,
    /// The start is still pending; the stop follows once it resolves.
    Queued,
    /// A stop is already in flight.
    AlreadyStopping,
    /// Nothing was broadcasting.
    Ignored,
}

/// Outcome of [`Registry::stop_all`].
#[derive(Debug, Default)]
pub struct StopAllReport {
    /// Ids whose stop went through, with what happened.
    pub stopped: Vec<(ArtifactId, StopOutcome)>,
    /// Ids whose stop was refused.
    pub failures: Vec<(ArtifactId, OperasError)>,
}

impl StopAllReport {
    /// Number of ids the stop was attempted for.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.stopped.len() + self.failures.len()
    }

    /// `true` when no stop was refused.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Change notification for external collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RegistryEvent {
    /// A record entered a new state.
    StateChanged {
        /// Artifact whose record changed.
        id: ArtifactId,
        /// New state.
        state: AdvertisementState,
    },
    /// A record left the table.
    Removed {
        /// Artifact whose record was removed.
        id: ArtifactId,
    },
}

struct Entry {
    uuid: Uuid,
    payload: Vec<u8>,
    last_error: Option<AdvertiseFailure>,
    updated_at: DateTime<Utc>,
    controller: AdvertisementController,
}

impl Entry {
    fn view(&self, id: &ArtifactId) -> AdvertisementRecordView {
        AdvertisementRecordView {
            id: id.clone(),
            uuid: self.uuid,
            payload_hex: hex::encode(&self.payload),
            state: self.controller.state(),
            last_error: self.last_error,
            updated_at_utc: self.updated_at,
        }
    }
}

struct Shared {
    table: Mutex<HashMap<ArtifactId, Entry>>,
    gate: Arc<dyn CapabilityGate>,
    framing: PayloadFraming,
    link: RadioLink,
    next_generation: AtomicU64,
    notifications: broadcast::Sender<RegistryEvent>,
}

impl Shared {
    fn guard(&self, operation: &'static str, id: &ArtifactId) -> Result<()> {
        if self.gate.check() {
            Ok(())
        } else {
            warn!(artifact_id = %id, operation, gate = self.gate.name(), "Radio operation denied");
            Err(OperasError::PermissionDenied)
        }
    }

    fn notify(&self, event: RegistryEvent) {
        // No subscribers is fine.
        let _ = self.notifications.send(event);
    }

    fn apply(&self, event: ControllerEvent) {
        let mut table = self.table.lock();
        let entry = match table.get_mut(&event.id) {
            Some(entry) if entry.controller.generation() == event.generation => entry,
            _ => {
                debug!(
                    artifact_id = %event.id,
                    generation = event.generation,
                    completion = ?event.completion,
                    "Stale completion"
                );
                if let Some(handle) = event.completion.live_handle() {
                    release_orphan(&self.link, handle);
                }
                return;
            }
        };

        match entry.controller.on_completion(event.completion, &self.link) {
            Transition::Unchanged => {}
            Transition::Changed => {
                let state = entry.controller.state();
                entry.updated_at = Utc::now();
                if let Some(reason) = state.failure() {
                    entry.last_error = Some(reason);
                    warn!(artifact_id = %event.id, %reason, "Advertising failed");
                } else {
                    info!(artifact_id = %event.id, %state, "Advertising state changed");
                }
                self.notify(RegistryEvent::StateChanged {
                    id: event.id,
                    state,
                });
            }
            Transition::Terminated => {
                table.remove(&event.id);
                info!(artifact_id = %event.id, "Advertising stopped");
                self.notify(RegistryEvent::Removed { id: event.id });
            }
        }
    }
}

/// Owner of every artifact broadcast.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone)]
pub struct Registry {
    shared: Arc<Shared>,
}

impl Registry {
    /// Creates an empty registry driving `radio`, gated by `gate`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn new(
        radio: Arc<dyn Radio>,
        gate: Arc<dyn CapabilityGate>,
        settings: RegistrySettings,
    ) -> Self {
        let runtime = Handle::current();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        let shared = Arc::new(Shared {
            table: Mutex::new(HashMap::new()),
            gate,
            framing: settings.framing,
            link: RadioLink {
                radio: radio.clone(),
                params: settings.params,
                events: events_tx,
                start_timeout: settings.start_timeout,
                stop_timeout: settings.stop_timeout,
                runtime: runtime.clone(),
            },
            next_generation: AtomicU64::new(1),
            notifications,
        });

        runtime.spawn(pump(
            Arc::downgrade(&shared),
            events_rx,
            radio,
            settings.stop_timeout,
        ));

        info!(
            radio = shared.link.radio.name(),
            framing = settings.framing.name(),
            "Advertising registry ready"
        );
        Self { shared }
    }

    /// Starts broadcasting `id` under the service UUID built from `fragment`.
    ///
    /// Returns immediately; the radio answer arrives later and moves the
    /// record to `Active` or `Failed`. A start for an id that is already
    /// starting or active does nothing. While an earlier broadcast of the id
    /// may still be on air (a stop in flight, or a stop that failed) no new
    /// broadcast is created: the release is retried and
    /// [`StartOutcome::PendingStop`] is returned.
    ///
    /// # Errors
    ///
    /// Returns [`OperasError::Encoding`] for a malformed id or fragment and
    /// [`OperasError::PermissionDenied`] when the gate is closed. Neither
    /// creates a record.
    pub fn start(&self, id: &str, fragment: &str) -> Result<StartOutcome> {
        let id = ArtifactId::parse(id)?;
        let mut table = self.shared.table.lock();

        let previous_error = match table.get_mut(&id) {
            Some(entry) if entry.controller.state().is_live() => {
                debug!(artifact_id = %id, "Already advertising");
                return Ok(StartOutcome::AlreadyLive);
            }
            Some(entry) if entry.controller.holds_broadcast() => {
                if entry.controller.state() != AdvertisementState::Stopping {
                    self.shared.guard("start", &id)?;
                    entry.controller.stop(&self.shared.link);
                    entry.updated_at = Utc::now();
                    drop(table);
                    info!(artifact_id = %id, "Retrying release of previous broadcast");
                    self.shared.notify(RegistryEvent::StateChanged {
                        id,
                        state: AdvertisementState::Stopping,
                    });
                } else {
                    debug!(artifact_id = %id, "Previous broadcast still stopping");
                }
                return Ok(StartOutcome::PendingStop);
            }
            Some(entry) => entry.last_error,
            None => None,
        };

        self.shared.guard("start", &id)?;

        let uuid = compose_uuid(fragment)?;
        let frame = self.shared.framing.frame(&id, uuid)?;
        let payload = frame.payload().to_vec();

        let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut controller = AdvertisementController::new(id.clone(), generation);
        controller.start(frame, &self.shared.link);

        table.insert(
            id.clone(),
            Entry {
                uuid,
                payload,
                last_error: previous_error,
                updated_at: Utc::now(),
                controller,
            },
        );
        drop(table);

        info!(artifact_id = %id, %uuid, generation, "Advertising start requested");
        self.shared.notify(RegistryEvent::StateChanged {
            id,
            state: AdvertisementState::Starting,
        });
        Ok(StartOutcome::Started)
    }

    /// Stops broadcasting `id`.
    ///
    /// Unknown or malformed ids are a no-op. A failed record with nothing on
    /// air is discarded without touching the radio. A record whose last stop
    /// failed gets the stop retried. Otherwise the record stays until the
    /// radio acknowledges the stop.
    ///
    /// # Errors
    ///
    /// Returns [`OperasError::PermissionDenied`] when the gate is closed and a
    /// radio stop would be needed.
    pub fn stop(&self, id: &str) -> Result<StopOutcome> {
        let Ok(id) = ArtifactId::parse(id) else {
            return Ok(StopOutcome::NotFound);
        };
        let mut table = self.shared.table.lock();

        let Some(entry) = table.get_mut(&id) else {
            return Ok(StopOutcome::NotFound);
        };

        match entry.controller.state() {
            AdvertisementState::Failed { .. } | AdvertisementState::Idle
                if !entry.controller.holds_broadcast() =>
            {
                table.remove(&id);
                drop(table);
                info!(artifact_id = %id, "Discarded inactive record");
                self.shared.notify(RegistryEvent::Removed { id });
                return Ok(StopOutcome::Removed);
            }
            AdvertisementState::Stopping => return Ok(StopOutcome::AlreadyStopping),
            _ => {}
        }

        self.shared.guard("stop", &id)?;

        let outcome = entry.controller.stop(&self.shared.link);
        if outcome == StopOutcome::Issued {
            entry.updated_at = Utc::now();
            drop(table);
            info!(artifact_id = %id, "Advertising stop requested");
            self.shared.notify(RegistryEvent::StateChanged {
                id,
                state: AdvertisementState::Stopping,
            });
        }
        Ok(outcome)
    }

    /// Stops every record, continuing past individual failures.
    pub fn stop_all(&self) -> StopAllReport {
        let ids: Vec<ArtifactId> = self.shared.table.lock().keys().cloned().collect();
        let mut report = StopAllReport::default();

        for id in ids {
            match self.stop(id.as_str()) {
                Ok(outcome) => report.stopped.push((id, outcome)),
                Err(e) => {
                    warn!(artifact_id = %id, error = %e, "Stop failed");
                    report.failures.push((id, e));
                }
            }
        }

        info!(
            attempted = report.attempted(),
            failed = report.failures.len(),
            "Stop-all finished"
        );
        report
    }

    /// Current state of `id`; `Idle` when there is no record.
    #[must_use]
    pub fn state_of(&self, id: &str) -> AdvertisementState {
        ArtifactId::parse(id)
            .ok()
            .and_then(|id| {
                self.shared
                    .table
                    .lock()
                    .get(&id)
                    .map(|entry| entry.controller.state())
            })
            .unwrap_or_default()
    }

    /// Read-only view of the record for `id`.
    #[must_use]
    pub fn record(&self, id: &str) -> Option<AdvertisementRecordView> {
        let id = ArtifactId::parse(id).ok()?;
        let table = self.shared.table.lock();
        table.get(&id).map(|entry| entry.view(&id))
    }

    /// Every record, ordered by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AdvertisementRecordView> {
        let mut views: Vec<_> = self
            .shared
            .table
            .lock()
            .iter()
            .map(|(id, entry)| entry.view(id))
            .collect();
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.table.lock().len()
    }

    /// `true` when no record exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.table.lock().is_empty()
    }

    /// Subscribes to state-change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.shared.notifications.subscribe()
    }

    /// Framing applied to artifact ids.
    #[must_use]
    pub fn framing(&self) -> PayloadFraming {
        self.shared.framing
    }

    /// Name of the radio backend.
    #[must_use]
    pub fn radio_name(&self) -> &'static str {
        self.shared.link.radio.name()
    }

    /// Stops everything and waits until no start or stop is pending.
    ///
    /// The wait is bounded by one start plus one stop deadline.
    pub async fn shutdown(&self) -> StopAllReport {
        let mut events = self.subscribe();
        let report = self.stop_all();
        let limit = self.shared.link.start_timeout + self.shared.link.stop_timeout;

        let drained = tokio::time::timeout(limit, async {
            while self.has_pending() {
                match events.recv().await {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
        .await;

        match drained {
            Ok(()) => info!(remaining = self.len(), "Advertising registry shut down"),
            Err(_) => warn!(remaining = self.len(), "Shutdown deadline passed with pending radio calls"),
        }
        report
    }

    fn has_pending(&self) -> bool {
        self.shared
            .table
            .lock()
            .values()
            .any(|entry| entry.controller.state().is_pending())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("radio", &self.radio_name())
            .field("framing", &self.shared.framing)
            .field("records", &self.len())
            .finish()
    }
}

async fn pump(
    shared: Weak<Shared>,
    mut events: mpsc::UnboundedReceiver<ControllerEvent>,
    radio: Arc<dyn Radio>,
    stop_timeout: Duration,
) {
    while let Some(event) = events.recv().await {
        if let Some(shared) = shared.upgrade() {
            shared.apply(event);
        } else if let Some(handle) = event.completion.live_handle() {
            warn!(artifact_id = %event.id, %handle, "Registry dropped, releasing broadcast");
            release(&radio, handle, stop_timeout).await;
        }
    }
    debug!("Registry event pump finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BLUETOOTH_BASE_UUID;
    use crate::gate::Permission;
    use crate::radio::{MockRadio, MockReply, RadioStatus};
    use tokio::time::timeout;

    const A: &str = "00112233445566778899aabbccddeeff00112233";
    const B: &str = "ffeeddccbbaa99887766554433221100ffeeddcc";
    const C: &str = "0123456789abcdef0123456789abcdef01234567";
    const MUSEUM: &str = "bbee7b2f3f4649209f54043b4d979a74";

    struct Fixture {
        radio: Arc<MockRadio>,
        permission: Arc<Permission>,
        registry: Registry,
    }

    fn fixture_with(settings: RegistrySettings) -> Fixture {
        let radio = Arc::new(MockRadio::new());
        let permission = Arc::new(Permission::new(true));
        let registry = Registry::new(radio.clone(), permission.clone(), settings);
        Fixture {
            radio,
            permission,
            registry,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(RegistrySettings::default())
    }

    async fn wait_for_state(registry: &Registry, id: &str, expected: AdvertisementState) {
        timeout(Duration::from_secs(2), async {
            while registry.state_of(id) != expected {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "{id} never reached {expected}, stuck in {}",
                registry.state_of(id)
            )
        });
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn test_start_reaches_active() {
        let f = fixture();

        assert_eq!(f.registry.start(A, "0001").unwrap(), StartOutcome::Started);
        assert_eq!(f.registry.state_of(A), AdvertisementState::Starting);

        wait_for_state(&f.registry, A, AdvertisementState::Active).await;
        assert_eq!(f.radio.active_count(), 1);

        let record = f.registry.record(A).unwrap();
        assert_eq!(record.payload_hex, A);
        assert_eq!(record.uuid.to_string(), "00000001-0000-1000-8000-00805f9b34fb");
        assert_eq!(record.last_error, None);
    }

    #[tokio::test]
    async fn test_duplicate_start_is_idempotent() {
        let f = fixture();

        assert_eq!(f.registry.start(A, "0001").unwrap(), StartOutcome::Started);
        assert_eq!(f.registry.start(A, "0001").unwrap(), StartOutcome::AlreadyLive);
        wait_for_state(&f.registry, A, AdvertisementState::Active).await;
        assert_eq!(f.registry.start(A, "0002").unwrap(), StartOutcome::AlreadyLive);

        assert_eq!(f.registry.len(), 1);
        assert_eq!(f.radio.start_calls(), 1);
    }

    #[tokio::test]
    async fn test_case_variants_share_a_record() {
        let f = fixture();

        f.registry.start(&A.to_uppercase(), "0001").unwrap();
        assert_eq!(f.registry.start(A, "0001").unwrap(), StartOutcome::AlreadyLive);
        assert_eq!(f.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_is_isolated() {
        let f = fixture();
        f.registry.start(A, "0001").unwrap();
        f.registry.start(B, "0002").unwrap();
        wait_for_state(&f.registry, A, AdvertisementState::Active).await;
        wait_for_state(&f.registry, B, AdvertisementState::Active).await;

        assert_eq!(f.registry.stop(A).unwrap(), StopOutcome::Issued);
        wait_for_state(&f.registry, A, AdvertisementState::Idle).await;

        assert_eq!(f.registry.state_of(B), AdvertisementState::Active);
        assert!(f.registry.record(A).is_none());
        assert_eq!(f.radio.active_count(), 1);
        assert_eq!(f.radio.stop_calls(), 1);
    }

    #[tokio::test]
    async fn test_stop_unknown_id_is_noop() {
        let f = fixture();
        f.permission.revoke();

        assert_eq!(f.registry.stop(A).unwrap(), StopOutcome::NotFound);
        assert_eq!(f.registry.stop("not hex").unwrap(), StopOutcome::NotFound);
        assert!(f.radio.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stop_all_stops_everything() {
        let f = fixture();
        for (id, fragment) in [(A, "1"), (B, "2"), (C, "3")] {
            f.registry.start(id, fragment).unwrap();
        }
        for id in [A, B, C] {
            wait_for_state(&f.registry, id, AdvertisementState::Active).await;
        }

        let report = f.registry.stop_all();
        assert_eq!(report.attempted(), 3);
        assert!(report.is_clean());
        assert!(report
            .stopped
            .iter()
            .all(|(_, outcome)| *outcome == StopOutcome::Issued));

        let registry = f.registry.clone();
        wait_until(|| registry.is_empty()).await;
        assert_eq!(f.radio.stop_calls(), 3);
        assert_eq!(f.radio.active_count(), 0);
    }

    #[tokio::test]
    async fn test_museum_scenario() {
        let f = fixture_with(RegistrySettings {
            framing: PayloadFraming::MuseumServiceData { major: 0, minor: 1 },
            ..RegistrySettings::default()
        });
        let mut events = f.registry.subscribe();

        assert_eq!(f.registry.state_of(MUSEUM), AdvertisementState::Idle);
        f.registry.start(MUSEUM, "0000").unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            RegistryEvent::StateChanged {
                id: ArtifactId::parse(MUSEUM).unwrap(),
                state: AdvertisementState::Starting,
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            RegistryEvent::StateChanged {
                id: ArtifactId::parse(MUSEUM).unwrap(),
                state: AdvertisementState::Active,
            }
        );

        let record = f.registry.record(MUSEUM).unwrap();
        assert_eq!(record.uuid, BLUETOOTH_BASE_UUID);
        assert_eq!(record.payload_hex, format!("{MUSEUM}00000001"));

        let frames = f.radio.active_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].service_uuid, Some(BLUETOOTH_BASE_UUID));
        assert_eq!(frames[0].payload().len(), 20);
    }

    #[tokio::test]
    async fn test_denied_start_creates_nothing() {
        let f = fixture();
        f.permission.revoke();

        assert!(matches!(
            f.registry.start(A, "0001"),
            Err(OperasError::PermissionDenied)
        ));
        assert!(f.registry.is_empty());
        assert_eq!(f.registry.state_of(A), AdvertisementState::Idle);

        tokio::task::yield_now().await;
        assert!(f.radio.calls().is_empty());
    }

    #[tokio::test]
    async fn test_encoding_errors_create_nothing() {
        let f = fixture();

        assert!(f.registry.start(&A[..39], "0001").unwrap_err().is_encoding_error());
        assert!(f.registry.start(&A.replace('a', "z"), "0001").unwrap_err().is_encoding_error());
        assert!(f.registry.start(A, "12345").unwrap_err().is_encoding_error());
        assert!(f.registry.start(A, "").unwrap_err().is_encoding_error());

        assert!(f.registry.is_empty());
        tokio::task::yield_now().await;
        assert_eq!(f.radio.start_calls(), 0);
    }

    #[tokio::test]
    async fn test_denied_stop_leaves_broadcast_running() {
        let f = fixture();
        f.registry.start(A, "0001").unwrap();
        wait_for_state(&f.registry, A, AdvertisementState::Active).await;

        f.permission.revoke();
        assert!(matches!(f.registry.stop(A), Err(OperasError::PermissionDenied)));
        assert_eq!(f.registry.state_of(A), AdvertisementState::Active);
        assert_eq!(f.radio.stop_calls(), 0);
    }

    #[tokio::test]
    async fn test_stop_all_collects_refusals() {
        let f = fixture();
        f.registry.start(A, "0001").unwrap();
        f.registry.start(B, "0002").unwrap();
        wait_for_state(&f.registry, A, AdvertisementState::Active).await;
        wait_for_state(&f.registry, B, AdvertisementState::Active).await;

        f.permission.revoke();
        let report = f.registry.stop_all();

        assert_eq!(report.attempted(), 2);
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().all(|(_, e)| e.is_permission_error()));
        assert_eq!(f.registry.len(), 2);
    }

    #[tokio::test]
    async fn test_stop_during_start_is_queued() {
        let f = fixture();
        f.radio.set_start_reply(MockReply::Deferred);

        f.registry.start(A, "0001").unwrap();
        assert_eq!(f.registry.stop(A).unwrap(), StopOutcome::Queued);
        assert_eq!(f.registry.state_of(A), AdvertisementState::Starting);

        let radio = f.radio.clone();
        wait_until(|| radio.held_starts() == 1).await;
        assert!(f.radio.release_start(Ok(())));

        let registry = f.registry.clone();
        wait_until(|| registry.is_empty()).await;
        assert_eq!(f.radio.stop_calls(), 1);
        assert_eq!(f.radio.active_count(), 0);
    }

    #[tokio::test]
    async fn test_start_timeout_marks_failed() {
        let f = fixture_with(RegistrySettings {
            start_timeout: Duration::from_millis(20),
            ..RegistrySettings::default()
        });
        f.radio.set_start_reply(MockReply::Hang);

        f.registry.start(A, "0001").unwrap();
        let failed = AdvertisementState::Failed {
            reason: AdvertiseFailure::Timeout,
        };
        wait_for_state(&f.registry, A, failed).await;

        let record = f.registry.record(A).unwrap();
        assert_eq!(record.last_error, Some(AdvertiseFailure::Timeout));
    }

    #[tokio::test]
    async fn test_unknown_status_is_preserved() {
        let f = fixture();
        f.radio.push_start_reply(MockReply::Fail(RadioStatus(42)));

        f.registry.start(A, "0001").unwrap();
        wait_for_state(
            &f.registry,
            A,
            AdvertisementState::Failed {
                reason: AdvertiseFailure::UnknownError { code: 42 },
            },
        )
        .await;
    }

    #[tokio::test]
    async fn test_failed_record_can_be_retried() {
        let f = fixture();
        f.radio
            .push_start_reply(MockReply::Fail(RadioStatus::TOO_MANY_ADVERTISERS));

        f.registry.start(A, "0001").unwrap();
        let failed = AdvertisementState::Failed {
            reason: AdvertiseFailure::TooManyAdvertisers,
        };
        wait_for_state(&f.registry, A, failed).await;
        assert!(f.registry.record(A).is_some());

        assert_eq!(f.registry.start(A, "0001").unwrap(), StartOutcome::Started);
        wait_for_state(&f.registry, A, AdvertisementState::Active).await;

        let record = f.registry.record(A).unwrap();
        assert_eq!(record.last_error, Some(AdvertiseFailure::TooManyAdvertisers));
        assert_eq!(f.radio.start_calls(), 2);
    }

    #[tokio::test]
    async fn test_stop_discards_failed_record() {
        let f = fixture();
        f.radio.push_start_reply(MockReply::Fail(RadioStatus::INTERNAL_ERROR));

        f.registry.start(A, "0001").unwrap();
        wait_for_state(
            &f.registry,
            A,
            AdvertisementState::Failed {
                reason: AdvertiseFailure::InternalError,
            },
        )
        .await;

        f.permission.revoke();
        assert_eq!(f.registry.stop(A).unwrap(), StopOutcome::Removed);
        assert!(f.registry.is_empty());
        assert_eq!(f.radio.stop_calls(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_is_sorted() {
        let f = fixture();
        f.registry.start(C, "3").unwrap();
        f.registry.start(B, "2").unwrap();
        f.registry.start(A, "1").unwrap();

        let ids: Vec<String> = f
            .registry
            .snapshot()
            .into_iter()
            .map(|view| view.id.to_string())
            .collect();
        assert_eq!(ids, vec![A, C, B]);
    }

    #[tokio::test]
    async fn test_shutdown_drains_pending_records() {
        let f = fixture();
        f.radio.set_start_reply(MockReply::Deferred);
        f.registry.start(A, "0001").unwrap();
        f.registry.start(B, "0002").unwrap();

        let radio = f.radio.clone();
        wait_until(|| radio.held_starts() == 2).await;

        let registry = f.registry.clone();
        let shutdown = tokio::spawn(async move { registry.shutdown().await });
        tokio::task::yield_now().await;

        assert!(f.radio.release_start(Ok(())));
        assert!(f.radio.release_start(Ok(())));

        let report = shutdown.await.unwrap();
        assert_eq!(report.attempted(), 2);
        assert!(f.registry.is_empty());
        assert_eq!(f.radio.active_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_registry_releases_late_broadcast() {
        let f = fixture();
        f.radio.set_start_reply(MockReply::Deferred);
        f.registry.start(A, "0001").unwrap();

        let radio = f.radio.clone();
        wait_until(|| radio.held_starts() == 1).await;
        drop(f.registry);
        assert!(f.radio.release_start(Ok(())));

        let radio = f.radio.clone();
        wait_until(|| radio.stop_calls() == 1).await;
        assert_eq!(f.radio.active_count(), 0);
    }

    async fn active_then_failed_stop(f: &Fixture, reply: MockReply, reason: AdvertiseFailure) {
        f.registry.start(A, "0001").unwrap();
        wait_for_state(&f.registry, A, AdvertisementState::Active).await;

        f.radio.set_stop_reply(reply);
        assert_eq!(f.registry.stop(A).unwrap(), StopOutcome::Issued);
        wait_for_state(&f.registry, A, AdvertisementState::Failed { reason }).await;
    }

    #[tokio::test]
    async fn test_stop_failure_marks_failed_and_keeps_broadcast() {
        let f = fixture();
        active_then_failed_stop(
            &f,
            MockReply::Fail(RadioStatus::INTERNAL_ERROR),
            AdvertiseFailure::InternalError,
        )
        .await;

        let record = f.registry.record(A).unwrap();
        assert_eq!(record.last_error, Some(AdvertiseFailure::InternalError));
        assert_eq!(f.radio.active_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_timeout_marks_failed() {
        let f = fixture_with(RegistrySettings {
            stop_timeout: Duration::from_millis(20),
            ..RegistrySettings::default()
        });
        active_then_failed_stop(&f, MockReply::Hang, AdvertiseFailure::Timeout).await;

        let record = f.registry.record(A).unwrap();
        assert_eq!(record.last_error, Some(AdvertiseFailure::Timeout));
        assert_eq!(f.radio.active_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_after_failed_stop_retries_release() {
        let f = fixture();
        active_then_failed_stop(
            &f,
            MockReply::Fail(RadioStatus::INTERNAL_ERROR),
            AdvertiseFailure::InternalError,
        )
        .await;

        f.radio.set_stop_reply(MockReply::Succeed);
        assert_eq!(f.registry.stop(A).unwrap(), StopOutcome::Issued);

        let registry = f.registry.clone();
        wait_until(|| registry.is_empty()).await;
        assert_eq!(f.radio.stop_calls(), 2);
        assert_eq!(f.radio.active_count(), 0);
    }

    #[tokio::test]
    async fn test_retry_after_failed_stop_is_gated() {
        let f = fixture();
        active_then_failed_stop(
            &f,
            MockReply::Fail(RadioStatus::INTERNAL_ERROR),
            AdvertiseFailure::InternalError,
        )
        .await;

        f.permission.revoke();
        assert!(f.registry.stop(A).unwrap_err().is_permission_error());
        assert!(f.registry.start(A, "0001").unwrap_err().is_permission_error());
        assert_eq!(f.registry.len(), 1);
        assert_eq!(f.radio.stop_calls(), 1);
        assert_eq!(f.radio.active_count(), 1);
    }

    #[tokio::test]
    async fn test_start_after_failed_stop_never_doubles_broadcast() {
        let f = fixture();
        active_then_failed_stop(
            &f,
            MockReply::Fail(RadioStatus::INTERNAL_ERROR),
            AdvertiseFailure::InternalError,
        )
        .await;

        f.radio.set_stop_reply(MockReply::Succeed);
        assert_eq!(f.registry.start(A, "0001").unwrap(), StartOutcome::PendingStop);
        assert_eq!(f.radio.start_calls(), 1);
        assert!(f.radio.active_count() <= 1);

        let registry = f.registry.clone();
        wait_until(|| registry.is_empty()).await;
        assert_eq!(f.radio.active_count(), 0);

        assert_eq!(f.registry.start(A, "0001").unwrap(), StartOutcome::Started);
        wait_for_state(&f.registry, A, AdvertisementState::Active).await;
        assert_eq!(f.radio.active_count(), 1);
    }

    #[tokio::test]
    async fn test_start_while_stopping_waits_for_release() {
        let f = fixture();
        f.registry.start(A, "0001").unwrap();
        wait_for_state(&f.registry, A, AdvertisementState::Active).await;

        f.radio.set_stop_reply(MockReply::Deferred);
        assert_eq!(f.registry.stop(A).unwrap(), StopOutcome::Issued);
        assert_eq!(f.registry.start(A, "0001").unwrap(), StartOutcome::PendingStop);
        assert_eq!(f.registry.state_of(A), AdvertisementState::Stopping);
        assert_eq!(f.radio.start_calls(), 1);

        let radio = f.radio.clone();
        wait_until(|| radio.held_stops() == 1).await;
        assert!(f.radio.release_stop(Ok(())));

        let registry = f.registry.clone();
        wait_until(|| registry.is_empty()).await;
        assert_eq!(f.radio.active_count(), 0);
        assert_eq!(f.registry.start(A, "0001").unwrap(), StartOutcome::Started);
    }

    #[tokio::test]
    async fn test_deferred_stop_failure_keeps_single_broadcast() {
        let f = fixture();
        f.registry.start(A, "0001").unwrap();
        wait_for_state(&f.registry, A, AdvertisementState::Active).await;

        f.radio.set_stop_reply(MockReply::Deferred);
        f.registry.stop(A).unwrap();
        assert_eq!(f.registry.start(A, "0001").unwrap(), StartOutcome::PendingStop);

        let radio = f.radio.clone();
        wait_until(|| radio.held_stops() == 1).await;
        assert!(f.radio.release_stop(Err(RadioStatus::INTERNAL_ERROR)));
        wait_for_state(
            &f.registry,
            A,
            AdvertisementState::Failed {
                reason: AdvertiseFailure::InternalError,
            },
        )
        .await;

        assert_eq!(f.radio.start_calls(), 1);
        assert_eq!(f.radio.active_count(), 1);
        assert_eq!(f.registry.len(), 1);
    }
}
