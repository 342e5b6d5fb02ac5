//! Web Relay Switch
//!
//! Alpaca-style REST server for a bank of relay, PWM and DAC switch
//! channels. The switch configuration and, optionally, the channel states
//! are kept in a fixed-layout byte store so they survive a restart.

pub mod config;
pub mod device;
pub mod eeprom;
pub mod error;
pub mod hardware;
pub mod persistence;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod switches;

pub use config::{load_config, Config, DeviceConfig, ServerConfig, StorageConfig};
pub use device::{DeviceStatus, SwitchDevice};
pub use eeprom::{Eeprom, FileEeprom, MemoryEeprom};
pub use error::{Result, SwitchError};
pub use hardware::{SimulatedDriver, SwitchDriver};
pub use persistence::{BootSource, PersistedState, STORE_SIZE};
pub use request::{AlpacaRequest, Method};
pub use response::{AlpacaErrorCode, AlpacaResponse};
pub use router::{Outcome, RequestRouter};
pub use server::BoundServer;
pub use switches::{SwitchEntry, SwitchRegistry, SwitchType, MAX_NAME_LEN, MAX_SWITCHES};

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

/// Builder for the switch server.
///
/// Supplies the hardware driver and the byte store, boots the device from
/// the store and binds the listen address.
pub struct ServerBuilder {
    config: Config,
    driver: Arc<dyn SwitchDriver>,
    store: Option<Box<dyn Eeprom>>,
}

impl ServerBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            driver: Arc::new(SimulatedDriver::new()),
            store: None,
        }
    }

    pub fn with_driver(mut self, driver: Arc<dyn SwitchDriver>) -> Self {
        self.driver = driver;
        self
    }

    /// Use `store` instead of the one named by `storage.path`
    pub fn with_store(mut self, store: Box<dyn Eeprom>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn build(self) -> Result<BoundServer> {
        let store = match self.store {
            Some(store) => store,
            None => open_store(&self.config.storage)?,
        };

        let device = SwitchDevice::boot(self.config.clone(), store, self.driver);
        device.restore_outputs().await;
        info!(
            "Registered Switch device: {} (device number {})",
            self.config.device.name, self.config.device.device_number
        );

        let listener =
            TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], self.config.server.port))).await?;
        let bound = BoundServer::new(listener, device)?;
        info!("Bound switch server bound_addr={}", bound.listen_addr());
        Ok(bound)
    }
}

fn open_store(storage: &StorageConfig) -> Result<Box<dyn Eeprom>> {
    match &storage.path {
        Some(path) => {
            info!("Using store image {:?}", path);
            Ok(Box::new(FileEeprom::open(path, STORE_SIZE)?))
        }
        None => {
            warn!("No storage path configured, switch state will not survive a restart");
            Ok(Box::new(MemoryEeprom::new(STORE_SIZE)))
        }
    }
}
