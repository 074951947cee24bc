//! BlueZ radio backend.
//!
//! Each broadcast is one `bluer` advertisement registered with the adapter.
//! BlueZ keeps the advertisement alive for as long as its handle exists, so
//! stopping a broadcast means dropping the handle.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bluer::adv::{Advertisement, AdvertisementHandle, Type};
use bluer::{AdapterEvent, AdapterProperty, ErrorKind};
use futures::{pin_mut, StreamExt};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{BroadcastHandle, BroadcastParameters, Radio, RadioError, RadioResult, RadioStatus};
use crate::codec::AdvertisementFrame;
use crate::gate::CapabilityGate;

/// [`Radio`] backed by a BlueZ adapter.
pub struct BluezRadio {
    _session: bluer::Session,
    adapter: bluer::Adapter,
    broadcasts: Mutex<HashMap<BroadcastHandle, AdvertisementHandle>>,
    next_handle: AtomicU64,
}

impl BluezRadio {
    /// Opens a BlueZ session and selects an adapter.
    ///
    /// Uses the default adapter unless `adapter_name` (e.g. `hci0`) is given.
    /// A powered-off adapter is switched on first.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be opened, the adapter does not
    /// exist, or it cannot be powered on.
    pub async fn new(adapter_name: Option<&str>) -> RadioResult<Self> {
        let session = bluer::Session::new()
            .await
            .map_err(|e| RadioError::SessionInitFailed {
                message: e.to_string(),
            })?;

        let adapter = match adapter_name {
            Some(name) => session
                .adapter(name)
                .map_err(|_| RadioError::NamedAdapterNotFound {
                    name: name.to_string(),
                })?,
            None => session.default_adapter().await.map_err(|e| match e.kind {
                ErrorKind::NotFound => RadioError::AdapterNotFound,
                _ => RadioError::SessionInitFailed {
                    message: e.to_string(),
                },
            })?,
        };

        if !adapter.is_powered().await.unwrap_or(false) {
            if let Err(e) = adapter.set_powered(true).await {
                warn!(adapter = adapter.name(), error = %e, "Could not power on adapter");
                return Err(RadioError::AdapterPoweredOff);
            }
        }

        info!(adapter = adapter.name(), "BlueZ radio ready");

        Ok(Self {
            _session: session,
            adapter,
            broadcasts: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        })
    }

    /// The adapter this radio advertises on.
    #[must_use]
    pub const fn adapter(&self) -> &bluer::Adapter {
        &self.adapter
    }
}

fn to_advertisement(frame: &AdvertisementFrame, params: &BroadcastParameters) -> Advertisement {
    let mut service_uuids = BTreeSet::new();
    let mut service_data = BTreeMap::new();
    let mut manufacturer_data = BTreeMap::new();

    if let Some(uuid) = frame.service_uuid {
        service_uuids.insert(uuid);
        if let Some(data) = &frame.service_data {
            service_data.insert(uuid, data.clone());
        }
    }
    if let Some((company, data)) = &frame.manufacturer_data {
        manufacturer_data.insert(*company, data.clone());
    }

    let interval = params.mode.interval();
    Advertisement {
        advertisement_type: Type::Broadcast,
        service_uuids,
        service_data,
        manufacturer_data,
        discoverable: Some(false),
        min_interval: Some(interval),
        max_interval: Some(interval),
        tx_power: Some(params.tx_power.dbm()),
        ..Default::default()
    }
}

/// Translates a BlueZ error into the radio status code space.
fn status_from_bluer(err: &bluer::Error) -> RadioStatus {
    match &err.kind {
        ErrorKind::AlreadyExists => RadioStatus::ALREADY_STARTED,
        ErrorKind::InvalidLength => RadioStatus::DATA_TOO_LARGE,
        ErrorKind::NotSupported => RadioStatus::FEATURE_UNSUPPORTED,
        // BlueZ reports an exhausted advertising instance pool as a generic failure.
        ErrorKind::Failed if err.message.contains("Maximum advertisements") => {
            RadioStatus::TOO_MANY_ADVERTISERS
        }
        ErrorKind::Failed | ErrorKind::Internal(_) => RadioStatus::INTERNAL_ERROR,
        _ => RadioStatus::UNRECOGNIZED,
    }
}

#[async_trait]
impl Radio for BluezRadio {
    fn name(&self) -> &'static str {
        "bluez"
    }

    async fn start_advertising(
        &self,
        frame: &AdvertisementFrame,
        params: &BroadcastParameters,
    ) -> Result<BroadcastHandle, RadioStatus> {
        let advertisement = to_advertisement(frame, params);
        debug!(?advertisement, "Registering advertisement");

        let registered = self.adapter.advertise(advertisement).await.map_err(|e| {
            warn!(adapter = self.adapter.name(), error = %e, "BlueZ refused advertisement");
            status_from_bluer(&e)
        })?;

        let handle = BroadcastHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.broadcasts.lock().insert(handle, registered);
        Ok(handle)
    }

    async fn stop_advertising(&self, handle: BroadcastHandle) -> Result<(), RadioStatus> {
        match self.broadcasts.lock().remove(&handle) {
            Some(registered) => {
                drop(registered);
                debug!(%handle, "Advertisement unregistered");
            }
            None => debug!(%handle, "Advertisement already gone"),
        }
        Ok(())
    }
}

/// Capability gate that is open while the adapter is powered.
///
/// The powered flag is seeded once and then kept current from the adapter's
/// property-change stream, so [`CapabilityGate::check`] stays synchronous.
#[derive(Debug)]
pub struct AdapterPoweredGate {
    powered: Arc<AtomicBool>,
}

impl AdapterPoweredGate {
    /// Starts watching `adapter`. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter's event stream cannot be opened.
    pub async fn watch(adapter: bluer::Adapter) -> RadioResult<Self> {
        let powered = Arc::new(AtomicBool::new(adapter.is_powered().await.unwrap_or(false)));

        let events = adapter
            .events()
            .await
            .map_err(|e| RadioError::SessionInitFailed {
                message: e.to_string(),
            })?;

        let flag = powered.clone();
        let name = adapter.name().to_string();
        tokio::spawn(async move {
            pin_mut!(events);
            while let Some(event) = events.next().await {
                if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(on)) = event {
                    flag.store(on, Ordering::Release);
                    info!(adapter = %name, powered = on, "Adapter power changed");
                }
            }
            debug!(adapter = %name, "Adapter event stream ended");
        });

        Ok(Self { powered })
    }
}

impl CapabilityGate for AdapterPoweredGate {
    fn check(&self) -> bool {
        self.powered.load(Ordering::Acquire)
    }

    fn name(&self) -> &'static str {
        "adapter_powered"
    }
}
