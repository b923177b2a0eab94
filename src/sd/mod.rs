mod cmd;
mod csd;
mod init;
mod io;

pub use cmd::crc7;

use crate::transport::Transport;

/// The one-byte status reply the card returns after almost every command.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct R1(pub u8);

impl R1 {
    pub const READY: R1 = R1(0x00);
    pub const IDLE: R1 = R1(0x01);

    pub fn is_ready(self) -> bool {
        self.0 == 0
    }

    pub fn in_idle_state(self) -> bool {
        self.0 & 0x01 != 0
    }

    pub fn erase_reset(self) -> bool {
        self.0 & 0x02 != 0
    }

    pub fn illegal_command(self) -> bool {
        self.0 & 0x04 != 0
    }

    pub fn com_crc_error(self) -> bool {
        self.0 & 0x08 != 0
    }

    pub fn erase_sequence_error(self) -> bool {
        self.0 & 0x10 != 0
    }

    pub fn address_error(self) -> bool {
        self.0 & 0x20 != 0
    }

    pub fn parameter_error(self) -> bool {
        self.0 & 0x40 != 0
    }
}

impl core::fmt::Debug for R1 {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "R1({:#04x})", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CardVersion {
    V1,
    V2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapacityClass {
    /// Byte-addressed (legacy SDSC).
    StandardCapacity,
    /// Block-addressed (SDHC/SDXC).
    HighCapacity,
}

/// Set exactly once during initialization; immutable afterwards. The
/// capacity class decides address scaling for every block operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CardIdentity {
    pub version: CardVersion,
    pub capacity: CapacityClass,
}

/// Every poll bound in one place. The defaults are the counts the driver
/// was brought up with; a slow card wants larger busy bounds, not a retry
/// loop around the whole operation.
#[derive(Clone, Copy, Debug)]
pub struct SdConfig {
    /// Fill bytes clocked out before CMD0; 10 bytes gives the 74+ clocks
    /// the power-up sequence requires.
    pub power_up_clock_bytes: usize,
    pub max_r1_attempts: usize,
    pub max_acmd41_attempts: usize,
    pub max_token_polls: usize,
    pub max_busy_polls: usize,
    pub acmd41_retry_delay_us: u32,
}

impl Default for SdConfig {
    fn default() -> Self {
        Self {
            power_up_clock_bytes: 10,
            max_r1_attempts: 16,
            max_acmd41_attempts: 200,
            max_token_polls: 50_000,
            max_busy_polls: 200_000,
            acmd41_retry_delay_us: 1_000,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SdError<E> {
    Transport(E),
    /// No byte with bit 7 clear arrived within the R1 attempt bound.
    R1Timeout { cmd: u8 },
    /// The card answered, but with a flag other than the one expected for
    /// this step. The raw R1 lets the caller inspect individual bits.
    CommandRejected { cmd: u8, r1: R1 },
    StartTokenTimeout { cmd: u8 },
    UnexpectedToken { cmd: u8, token: u8 },
    DataResponseTimeout,
    CrcErrorTokenReceived { blocks_written: Option<u32> },
    WriteErrorTokenReceived { blocks_written: Option<u32> },
    CardBusyTimeout,
    NotInitialized,
    CapacityDecodeFailed,
}

#[derive(Debug, PartialEq, Eq)]
pub enum InitError<E> {
    Sd(SdError<E>),
    FailedGoIdle(R1),
    FailedSendIfCond(R1),
    UnsupportedCardType,
    OutOfIdleTimeout(R1),
}

impl<E> From<SdError<E>> for InitError<E> {
    fn from(value: SdError<E>) -> Self {
        Self::Sd(value)
    }
}

pub struct SdCard<T: Transport> {
    bus: T,
    config: SdConfig,
    identity: Option<CardIdentity>,
}

impl<T: Transport> SdCard<T> {
    pub fn new(bus: T, config: SdConfig) -> Self {
        Self {
            bus,
            config,
            identity: None,
        }
    }

    pub fn identity(&self) -> Option<CardIdentity> {
        self.identity
    }

    pub fn is_initialized(&self) -> bool {
        self.identity.is_some()
    }

    /// Forget the card state, e.g. after a power cycle or card swap.
    /// The next operation must go through `initialize` again.
    pub fn invalidate(&mut self) {
        self.identity = None;
    }

    pub fn release(self) -> T {
        self.bus
    }
}
