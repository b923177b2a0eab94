#![cfg_attr(not(test), no_std)]

pub mod device;
pub mod transport;
pub mod sd;
pub mod fat;

pub use device::{Block, BlockDevice, BLOCK_SIZE};
pub use sd::{CapacityClass, CardIdentity, CardVersion, InitError, SdCard, SdConfig, SdError};
pub use transport::{SpiTransport, Transport};
