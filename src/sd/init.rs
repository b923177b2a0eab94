use log::{debug, warn};

use super::cmd::{
    require_ready, ACMD41_SD_SEND_OP_COND, CMD0_GO_IDLE_STATE, CMD16_SET_BLOCKLEN,
    CMD58_READ_OCR, CMD59_CRC_ON_OFF, CMD8_SEND_IF_COND,
};
use super::{CapacityClass, CardIdentity, CardVersion, InitError, R1, SdCard, SdError};
use crate::device::BLOCK_SIZE;
use crate::transport::Transport;

// CMD8 argument: 2.7-3.6V voltage range (0x1) plus the check pattern the
// card must echo back.
const CMD8_VOLTAGE_RANGE: u8 = 0x01;
const CMD8_CHECK_PATTERN: u8 = 0xAA;
const CMD8_ARG: u32 = ((CMD8_VOLTAGE_RANGE as u32) << 8) | CMD8_CHECK_PATTERN as u32;

// ACMD41 host-capacity-support bit, set only for version 2 cards.
const ACMD41_HCS: u32 = 0x4000_0000;

// OCR bits, as seen in the big-endian response: byte 0 carries the power-up
// status (bit 31) and CCS (bit 30), byte 1 the 3.2-3.4V window (bits 20-21).
const OCR_POWER_UP: u8 = 0x80;
const OCR_CCS: u8 = 0x40;
const OCR_VOLTAGE_32_34: u8 = 0x30;

impl<T: Transport> SdCard<T> {
    /// Runs the card power-up state machine. All-or-nothing: any failure
    /// leaves the card uninitialized and the caller retries from scratch.
    pub fn initialize(&mut self) -> Result<CardIdentity, InitError<T::Error>> {
        self.identity = None;
        self.bus
            .init_master_mode()
            .map_err(|e| InitError::Sd(SdError::Transport(e)))?;

        // 74+ clocks with chip-select high wake the card into SPI mode.
        self.bus.deassert_select();
        self.send_fill_bytes(self.config.power_up_clock_bytes)?;

        let r1 = self.command(CMD0_GO_IDLE_STATE, 0, &mut [])?;
        if r1 != R1::IDLE {
            warn!("sd: cmd0 rejected r1={:#04x}", r1.0);
            return Err(InitError::FailedGoIdle(r1));
        }

        let mut r7 = [0u8; 4];
        let r1 = self.command(CMD8_SEND_IF_COND, CMD8_ARG, &mut r7)?;
        let version = if r1 == R1::IDLE {
            // R7 echoes the voltage range and check pattern.
            if r7[2] & 0x0F != CMD8_VOLTAGE_RANGE || r7[3] != CMD8_CHECK_PATTERN {
                warn!("sd: cmd8 echo mismatch {:02x?}", r7);
                return Err(InitError::UnsupportedCardType);
            }
            CardVersion::V2
        } else if r1.0 == R1::IDLE.0 | 0x04 {
            // IllegalCommand|InIdleState, exactly. Treated as a version 1
            // card; a compatibility assumption, not a verified requirement.
            CardVersion::V1
        } else {
            return Err(InitError::FailedSendIfCond(r1));
        };

        // CRC stays disabled for the whole session; the reply is still in
        // idle state, so only gross failures matter here.
        let _ = self.command(CMD59_CRC_ON_OFF, 0, &mut [])?;

        let acmd41_arg = match version {
            CardVersion::V2 => ACMD41_HCS,
            CardVersion::V1 => 0,
        };
        let mut r1 = R1::IDLE;
        let mut left_idle = false;
        for _ in 0..self.config.max_acmd41_attempts {
            r1 = self.app_command(ACMD41_SD_SEND_OP_COND, acmd41_arg)?;
            if !r1.in_idle_state() {
                left_idle = true;
                break;
            }
            self.bus.delay_us(self.config.acmd41_retry_delay_us);
        }
        if !left_idle {
            warn!("sd: acmd41 never left idle r1={:#04x}", r1.0);
            return Err(InitError::OutOfIdleTimeout(r1));
        }
        require_ready(ACMD41_SD_SEND_OP_COND, r1)?;

        let mut ocr = [0u8; 4];
        let r1 = self.command(CMD58_READ_OCR, 0, &mut ocr)?;
        require_ready(CMD58_READ_OCR, r1)?;
        if ocr[0] & OCR_POWER_UP == 0 {
            warn!("sd: ocr power-up bit clear {:02x?}", ocr);
            return Err(InitError::UnsupportedCardType);
        }
        if ocr[1] & OCR_VOLTAGE_32_34 != OCR_VOLTAGE_32_34 {
            warn!("sd: ocr voltage window unsupported {:02x?}", ocr);
            return Err(InitError::UnsupportedCardType);
        }
        let capacity = if ocr[0] & OCR_CCS != 0 {
            CapacityClass::HighCapacity
        } else {
            CapacityClass::StandardCapacity
        };

        if version == CardVersion::V1 {
            let r1 = self.command(CMD16_SET_BLOCKLEN, BLOCK_SIZE as u32, &mut [])?;
            require_ready(CMD16_SET_BLOCKLEN, r1)?;
        }

        let identity = CardIdentity { version, capacity };
        self.identity = Some(identity);
        debug!(
            "sd: init ok version={:?} capacity={:?}",
            identity.version, identity.capacity
        );
        Ok(identity)
    }
}
