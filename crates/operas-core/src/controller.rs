//! One artifact's broadcast and its start/stop protocol.
//!
//! A controller never blocks and never touches the registry table itself.
//! Radio calls run in spawned tasks and report back with a single
//! [`ControllerEvent`] each, which the registry applies through
//! [`AdvertisementController::on_completion`].
//!
//! ```text
//!  Idle --start--> Starting --ok--> Active --stop--> Stopping --ok--> (removed)
//!                     |                                  |
//!                     +--error/timeout--> Failed <--error/timeout
//! ```
//!
//! A stop that arrives while `Starting` is queued and issued as soon as the
//! start resolves. A failed stop keeps its broadcast handle, and the next stop
//! retries the release.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::codec::{AdvertisementFrame, ArtifactId};
use crate::radio::{BroadcastHandle, BroadcastParameters, Radio};
use crate::registry::StopOutcome;
use crate::types::{AdvertiseFailure, AdvertisementState};

/// Everything a controller needs to reach the radio and report back.
pub(crate) struct RadioLink {
    pub(crate) radio: Arc<dyn Radio>,
    pub(crate) params: BroadcastParameters,
    pub(crate) events: mpsc::UnboundedSender<ControllerEvent>,
    pub(crate) start_timeout: Duration,
    pub(crate) stop_timeout: Duration,
    pub(crate) runtime: Handle,
}

/// Result of one radio call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    Started(BroadcastHandle),
    StartFailed(AdvertiseFailure),
    Stopped,
    StopFailed {
        handle: BroadcastHandle,
        reason: AdvertiseFailure,
    },
}

impl Completion {
    /// Broadcast still on air after this completion, if any.
    pub(crate) const fn live_handle(self) -> Option<BroadcastHandle> {
        match self {
            Self::Started(handle) | Self::StopFailed { handle, .. } => Some(handle),
            Self::StartFailed(_) | Self::Stopped => None,
        }
    }
}

/// Completion of a radio call, addressed to one controller generation.
#[derive(Debug)]
pub(crate) struct ControllerEvent {
    pub(crate) id: ArtifactId,
    pub(crate) generation: u64,
    pub(crate) completion: Completion,
}

/// What applying a completion did to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Unchanged,
    Changed,
    /// The controller is done and its record must be removed.
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Starting { stop_queued: bool },
    Active(BroadcastHandle),
    Stopping,
    /// `handle` is set when a stop failed and the broadcast may still be on air.
    Failed {
        reason: AdvertiseFailure,
        handle: Option<BroadcastHandle>,
    },
}

#[derive(Debug)]
pub(crate) struct AdvertisementController {
    id: ArtifactId,
    generation: u64,
    phase: Phase,
}

impl AdvertisementController {
    pub(crate) const fn new(id: ArtifactId, generation: u64) -> Self {
        Self {
            id,
            generation,
            phase: Phase::Idle,
        }
    }

    pub(crate) const fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) const fn state(&self) -> AdvertisementState {
        match self.phase {
            Phase::Idle => AdvertisementState::Idle,
            Phase::Starting { .. } => AdvertisementState::Starting,
            Phase::Active(_) => AdvertisementState::Active,
            Phase::Stopping => AdvertisementState::Stopping,
            Phase::Failed { reason, .. } => AdvertisementState::Failed { reason },
        }
    }

    /// `true` while the radio may still hold a broadcast for this controller.
    pub(crate) const fn holds_broadcast(&self) -> bool {
        matches!(
            self.phase,
            Phase::Starting { .. }
                | Phase::Active(_)
                | Phase::Stopping
                | Phase::Failed {
                    handle: Some(_),
                    ..
                }
        )
    }

    /// Issues the radio start. Only valid from `Idle`; returns `false` otherwise.
    pub(crate) fn start(&mut self, frame: AdvertisementFrame, link: &RadioLink) -> bool {
        if self.phase != Phase::Idle {
            debug!(artifact_id = %self.id, state = %self.state(), "Start ignored");
            return false;
        }
        self.phase = Phase::Starting { stop_queued: false };

        let radio = link.radio.clone();
        let params = link.params;
        let events = link.events.clone();
        let deadline = link.start_timeout;
        let id = self.id.clone();
        let generation = self.generation;

        link.runtime.spawn(async move {
            let completion = match timeout(deadline, radio.start_advertising(&frame, &params)).await {
                Ok(Ok(handle)) => Completion::Started(handle),
                Ok(Err(status)) => Completion::StartFailed(status.into()),
                Err(_) => Completion::StartFailed(AdvertiseFailure::Timeout),
            };
            deliver(
                &events,
                &radio,
                deadline,
                ControllerEvent {
                    id,
                    generation,
                    completion,
                },
            )
            .await;
        });
        true
    }

    /// Requests the broadcast to end.
    pub(crate) fn stop(&mut self, link: &RadioLink) -> StopOutcome {
        match self.phase {
            Phase::Starting { .. } => {
                self.phase = Phase::Starting { stop_queued: true };
                debug!(artifact_id = %self.id, "Stop queued until start resolves");
                StopOutcome::Queued
            }
            Phase::Active(handle)
            | Phase::Failed {
                handle: Some(handle),
                ..
            } => {
                self.phase = Phase::Stopping;
                self.issue_stop(handle, link);
                StopOutcome::Issued
            }
            Phase::Stopping => StopOutcome::AlreadyStopping,
            Phase::Idle | Phase::Failed { handle: None, .. } => StopOutcome::Ignored,
        }
    }

    /// Applies a radio completion for this generation.
    pub(crate) fn on_completion(&mut self, completion: Completion, link: &RadioLink) -> Transition {
        match (self.phase, completion) {
            (Phase::Starting { stop_queued: false }, Completion::Started(handle)) => {
                self.phase = Phase::Active(handle);
                Transition::Changed
            }
            (Phase::Starting { stop_queued: true }, Completion::Started(handle)) => {
                info!(artifact_id = %self.id, "Start resolved, issuing queued stop");
                self.phase = Phase::Stopping;
                self.issue_stop(handle, link);
                Transition::Changed
            }
            (Phase::Starting { stop_queued: false }, Completion::StartFailed(reason)) => {
                self.phase = Phase::Failed {
                    reason,
                    handle: None,
                };
                Transition::Changed
            }
            (Phase::Starting { stop_queued: true }, Completion::StartFailed(reason)) => {
                info!(artifact_id = %self.id, %reason, "Start failed while a stop was queued");
                self.phase = Phase::Idle;
                Transition::Terminated
            }
            (Phase::Stopping, Completion::Stopped) => {
                self.phase = Phase::Idle;
                Transition::Terminated
            }
            (Phase::Stopping, Completion::StopFailed { handle, reason }) => {
                warn!(artifact_id = %self.id, %handle, %reason, "Stop failed, broadcast kept for retry");
                self.phase = Phase::Failed {
                    reason,
                    handle: Some(handle),
                };
                Transition::Changed
            }
            (phase, completion @ (Completion::Started(_) | Completion::StopFailed { .. })) => {
                warn!(artifact_id = %self.id, ?phase, ?completion, "Unexpected completion");
                if let Some(handle) = completion.live_handle() {
                    release_orphan(link, handle);
                }
                Transition::Unchanged
            }
            (phase, completion) => {
                debug!(artifact_id = %self.id, ?phase, ?completion, "Completion ignored");
                Transition::Unchanged
            }
        }
    }

    fn issue_stop(&self, handle: BroadcastHandle, link: &RadioLink) {
        let radio = link.radio.clone();
        let events = link.events.clone();
        let deadline = link.stop_timeout;
        let id = self.id.clone();
        let generation = self.generation;

        link.runtime.spawn(async move {
            let completion = match timeout(deadline, radio.stop_advertising(handle)).await {
                Ok(Ok(())) => Completion::Stopped,
                Ok(Err(status)) => Completion::StopFailed {
                    handle,
                    reason: status.into(),
                },
                Err(_) => Completion::StopFailed {
                    handle,
                    reason: AdvertiseFailure::Timeout,
                },
            };
            deliver(
                &events,
                &radio,
                deadline,
                ControllerEvent {
                    id,
                    generation,
                    completion,
                },
            )
            .await;
        });
    }
}

/// Stops a broadcast nobody owns any more.
pub(crate) fn release_orphan(link: &RadioLink, handle: BroadcastHandle) {
    let radio = link.radio.clone();
    let deadline = link.stop_timeout;
    link.runtime.spawn(async move {
        release(&radio, handle, deadline).await;
    });
}

/// Stops `handle` and logs how it went.
pub(crate) async fn release(radio: &Arc<dyn Radio>, handle: BroadcastHandle, deadline: Duration) {
    match timeout(deadline, radio.stop_advertising(handle)).await {
        Ok(Ok(())) => info!(%handle, "Released orphaned broadcast"),
        Ok(Err(status)) => warn!(%handle, %status, "Failed to release orphaned broadcast"),
        Err(_) => warn!(%handle, "Timed out releasing orphaned broadcast"),
    }
}

async fn deliver(
    events: &mpsc::UnboundedSender<ControllerEvent>,
    radio: &Arc<dyn Radio>,
    deadline: Duration,
    event: ControllerEvent,
) {
    if let Err(mpsc::error::SendError(event)) = events.send(event) {
        // Registry is gone; a broadcast still on air now has no owner.
        if let Some(handle) = event.completion.live_handle() {
            warn!(artifact_id = %event.id, %handle, "Registry closed, releasing broadcast");
            release(radio, handle, deadline).await;
        }
    }
}
