//! Application state shared across handlers.

use std::sync::Arc;

use operas_core::radio::MockRadio;
use operas_core::{AllOf, CapabilityGate, Config, Permission, Radio, RadioBackend, Registry};

/// Shared application state, as handed to every handler.
pub type SharedState = Arc<AppState>;

/// Everything the HTTP layer needs.
///
/// The registry and the permission flag synchronize internally, so the state
/// itself needs no lock.
pub struct AppState {
    /// Configuration the server was started with.
    pub config: Config,
    /// Owner of every artifact broadcast.
    pub registry: Registry,
    /// Advertising permission held on behalf of the host.
    pub permission: Arc<Permission>,
    /// Every gate the registry consults, permission included.
    pub gate: Arc<AllOf>,
}

impl AppState {
    /// Builds state for `config`, bringing up the configured radio backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the radio backend cannot be opened.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let (radio, extra_gates) = open_radio(&config).await?;
        Ok(Self::with_radio(config, radio, extra_gates))
    }

    /// Builds state around an already opened radio.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn with_radio(
        config: Config,
        radio: Arc<dyn Radio>,
        extra_gates: Vec<Arc<dyn CapabilityGate>>,
    ) -> Self {
        let permission = Arc::new(Permission::new(config.permission.initially_granted));

        let mut gate = AllOf::new().with(permission.clone());
        for extra in extra_gates {
            gate = gate.with(extra);
        }
        let gate = Arc::new(gate);

        let registry = Registry::new(
            radio,
            gate.clone(),
            config.advertising.registry_settings(),
        );

        Self {
            config,
            registry,
            permission,
            gate,
        }
    }
}

#[cfg(feature = "bluetooth")]
async fn open_radio(
    config: &Config,
) -> anyhow::Result<(Arc<dyn Radio>, Vec<Arc<dyn CapabilityGate>>)> {
    use operas_core::{AdapterPoweredGate, BluezRadio, OperasError};

    match config.radio.backend {
        RadioBackend::Mock => Ok(mock_radio()),
        RadioBackend::Bluez => {
            let radio = BluezRadio::new(config.radio.adapter.as_deref())
                .await
                .map_err(OperasError::from)?;

            let mut gates: Vec<Arc<dyn CapabilityGate>> = Vec::new();
            if config.permission.require_powered_adapter {
                let powered = AdapterPoweredGate::watch(radio.adapter().clone())
                    .await
                    .map_err(OperasError::from)?;
                gates.push(Arc::new(powered));
            }
            let radio: Arc<dyn Radio> = Arc::new(radio);
            Ok((radio, gates))
        }
    }
}

#[cfg(not(feature = "bluetooth"))]
async fn open_radio(
    config: &Config,
) -> anyhow::Result<(Arc<dyn Radio>, Vec<Arc<dyn CapabilityGate>>)> {
    use operas_core::{OperasError, RadioError};

    match config.radio.backend {
        RadioBackend::Mock => Ok(mock_radio()),
        RadioBackend::Bluez => Err(OperasError::from(RadioError::BackendUnavailable {
            backend: "bluez".into(),
        })
        .into()),
    }
}

fn mock_radio() -> (Arc<dyn Radio>, Vec<Arc<dyn CapabilityGate>>) {
    tracing::warn!("Using mock radio, nothing will be broadcast");
    let radio: Arc<dyn Radio> = Arc::new(MockRadio::new());
    (radio, Vec::new())
}
