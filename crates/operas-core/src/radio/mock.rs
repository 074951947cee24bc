//! In-memory radio with scripted replies.
//!
//! By default every start and stop succeeds immediately. Tests can queue
//! failures, make the radio never answer, or hold an answer back until they
//! release it explicitly.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use super::{BroadcastHandle, BroadcastParameters, Radio, RadioStatus};
use crate::codec::AdvertisementFrame;

/// How the mock answers one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockReply {
    /// Succeed immediately.
    Succeed,
    /// Fail immediately with the given status.
    Fail(RadioStatus),
    /// Never answer.
    Hang,
    /// Answer when the test calls [`MockRadio::release_start`] or
    /// [`MockRadio::release_stop`].
    Deferred,
}

/// A request the mock received, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `start_advertising` with the requested frame.
    Start(AdvertisementFrame),
    /// `stop_advertising` for a handle.
    Stop(BroadcastHandle),
}

type Release = oneshot::Sender<Result<(), RadioStatus>>;

#[derive(Debug)]
struct MockState {
    start_script: VecDeque<MockReply>,
    start_default: MockReply,
    stop_default: MockReply,
    next_handle: u64,
    active: BTreeMap<BroadcastHandle, AdvertisementFrame>,
    calls: Vec<MockCall>,
    held_starts: VecDeque<Release>,
    held_stops: VecDeque<Release>,
}

/// Scriptable [`Radio`] that keeps its broadcasts in memory.
#[derive(Debug)]
pub struct MockRadio {
    state: Mutex<MockState>,
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRadio {
    /// Creates a radio on which every operation succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                start_script: VecDeque::new(),
                start_default: MockReply::Succeed,
                stop_default: MockReply::Succeed,
                next_handle: 0,
                active: BTreeMap::new(),
                calls: Vec::new(),
                held_starts: VecDeque::new(),
                held_stops: VecDeque::new(),
            }),
        }
    }

    /// Queues the reply for the next start request. Queued replies are used
    /// before the default one.
    pub fn push_start_reply(&self, reply: MockReply) {
        self.state.lock().start_script.push_back(reply);
    }

    /// Sets the reply used for start requests once the queue is empty.
    pub fn set_start_reply(&self, reply: MockReply) {
        self.state.lock().start_default = reply;
    }

    /// Sets the reply used for every stop request.
    pub fn set_stop_reply(&self, reply: MockReply) {
        self.state.lock().stop_default = reply;
    }

    /// Resolves the oldest deferred start. Returns `false` if none is waiting.
    pub fn release_start(&self, result: Result<(), RadioStatus>) -> bool {
        let waiter = self.state.lock().held_starts.pop_front();
        waiter.is_some_and(|tx| tx.send(result).is_ok())
    }

    /// Resolves the oldest deferred stop. Returns `false` if none is waiting.
    pub fn release_stop(&self, result: Result<(), RadioStatus>) -> bool {
        let waiter = self.state.lock().held_stops.pop_front();
        waiter.is_some_and(|tx| tx.send(result).is_ok())
    }

    /// Number of deferred starts waiting for release.
    #[must_use]
    pub fn held_starts(&self) -> usize {
        self.state.lock().held_starts.len()
    }

    /// Number of deferred stops waiting for release.
    #[must_use]
    pub fn held_stops(&self) -> usize {
        self.state.lock().held_stops.len()
    }

    /// Every request received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    /// Number of start requests received.
    #[must_use]
    pub fn start_calls(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Start(_)))
    }

    /// Number of stop requests received.
    #[must_use]
    pub fn stop_calls(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Stop(_)))
    }

    /// Frames currently on air.
    #[must_use]
    pub fn active_frames(&self) -> Vec<AdvertisementFrame> {
        self.state.lock().active.values().cloned().collect()
    }

    /// Number of broadcasts currently on air.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    fn count(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|call| pred(call)).count()
    }

    fn go_live(&self, frame: &AdvertisementFrame) -> BroadcastHandle {
        let mut state = self.state.lock();
        state.next_handle += 1;
        let handle = BroadcastHandle(state.next_handle);
        state.active.insert(handle, frame.clone());
        debug!(%handle, "mock broadcast started");
        handle
    }

    fn go_dark(&self, handle: BroadcastHandle) {
        if self.state.lock().active.remove(&handle).is_some() {
            debug!(%handle, "mock broadcast stopped");
        }
    }
}

#[async_trait]
impl Radio for MockRadio {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn start_advertising(
        &self,
        frame: &AdvertisementFrame,
        _params: &BroadcastParameters,
    ) -> Result<BroadcastHandle, RadioStatus> {
        let (reply, held) = {
            let mut state = self.state.lock();
            state.calls.push(MockCall::Start(frame.clone()));
            let reply = state.start_script.pop_front().unwrap_or(state.start_default);
            let held = if reply == MockReply::Deferred {
                let (tx, rx) = oneshot::channel();
                state.held_starts.push_back(tx);
                Some(rx)
            } else {
                None
            };
            (reply, held)
        };

        match (reply, held) {
            (MockReply::Succeed, _) => Ok(self.go_live(frame)),
            (MockReply::Fail(status), _) => Err(status),
            (MockReply::Deferred, Some(rx)) => match rx.await {
                Ok(Ok(())) => Ok(self.go_live(frame)),
                Ok(Err(status)) => Err(status),
                Err(_) => std::future::pending().await,
            },
            (MockReply::Hang | MockReply::Deferred, _) => std::future::pending().await,
        }
    }

    async fn stop_advertising(&self, handle: BroadcastHandle) -> Result<(), RadioStatus> {
        let (reply, held) = {
            let mut state = self.state.lock();
            state.calls.push(MockCall::Stop(handle));
            let reply = state.stop_default;
            let held = if reply == MockReply::Deferred {
                let (tx, rx) = oneshot::channel();
                state.held_stops.push_back(tx);
                Some(rx)
            } else {
                None
            };
            (reply, held)
        };

        match (reply, held) {
            (MockReply::Succeed, _) => {
                self.go_dark(handle);
                Ok(())
            }
            (MockReply::Fail(status), _) => Err(status),
            (MockReply::Deferred, Some(rx)) => match rx.await {
                Ok(Ok(())) => {
                    self.go_dark(handle);
                    Ok(())
                }
                Ok(Err(status)) => Err(status),
                Err(_) => std::future::pending().await,
            },
            (MockReply::Hang | MockReply::Deferred, _) => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{compose_uuid, ArtifactId, PayloadFraming};

    fn frame() -> AdvertisementFrame {
        let id = ArtifactId::parse(&"ab".repeat(20)).unwrap();
        PayloadFraming::ServiceData
            .frame(&id, compose_uuid("0001").unwrap())
            .unwrap()
    }

    #[tokio::test]
    async fn test_start_and_stop_succeed_by_default() {
        let radio = MockRadio::new();
        let params = BroadcastParameters::default();

        let handle = radio.start_advertising(&frame(), &params).await.unwrap();
        assert_eq!(radio.active_count(), 1);

        radio.stop_advertising(handle).await.unwrap();
        assert_eq!(radio.active_count(), 0);
        assert_eq!(radio.calls(), vec![MockCall::Start(frame()), MockCall::Stop(handle)]);
    }

    #[tokio::test]
    async fn test_scripted_failure_is_used_once() {
        let radio = MockRadio::new();
        let params = BroadcastParameters::default();
        radio.push_start_reply(MockReply::Fail(RadioStatus::TOO_MANY_ADVERTISERS));

        assert_eq!(
            radio.start_advertising(&frame(), &params).await,
            Err(RadioStatus::TOO_MANY_ADVERTISERS)
        );
        assert!(radio.start_advertising(&frame(), &params).await.is_ok());
        assert_eq!(radio.start_calls(), 2);
    }

    #[tokio::test]
    async fn test_deferred_start_waits_for_release() {
        let radio = std::sync::Arc::new(MockRadio::new());
        radio.set_start_reply(MockReply::Deferred);

        let task = {
            let radio = radio.clone();
            tokio::spawn(async move {
                radio
                    .start_advertising(&frame(), &BroadcastParameters::default())
                    .await
            })
        };

        while radio.held_starts() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(radio.active_count(), 0);
        assert!(radio.release_start(Ok(())));

        let handle = task.await.unwrap().unwrap();
        assert_eq!(handle, BroadcastHandle(1));
        assert_eq!(radio.active_count(), 1);
        assert!(!radio.release_start(Ok(())));
    }
}
