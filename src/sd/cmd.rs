use super::{R1, SdCard, SdError};
use crate::transport::Transport;

pub(crate) const CMD0_GO_IDLE_STATE: u8 = 0;
pub(crate) const CMD8_SEND_IF_COND: u8 = 8;
pub(crate) const CMD9_SEND_CSD: u8 = 9;
pub(crate) const CMD12_STOP_TRANSMISSION: u8 = 12;
pub(crate) const CMD16_SET_BLOCKLEN: u8 = 16;
pub(crate) const CMD17_READ_SINGLE_BLOCK: u8 = 17;
pub(crate) const CMD18_READ_MULTIPLE_BLOCK: u8 = 18;
pub(crate) const CMD24_WRITE_BLOCK: u8 = 24;
pub(crate) const CMD25_WRITE_MULTIPLE_BLOCK: u8 = 25;
pub(crate) const CMD32_ERASE_WR_BLK_START: u8 = 32;
pub(crate) const CMD33_ERASE_WR_BLK_END: u8 = 33;
pub(crate) const CMD38_ERASE: u8 = 38;
pub(crate) const CMD55_APP_CMD: u8 = 55;
pub(crate) const CMD58_READ_OCR: u8 = 58;
pub(crate) const CMD59_CRC_ON_OFF: u8 = 59;
pub(crate) const ACMD22_SEND_NUM_WR_BLOCKS: u8 = 22;
pub(crate) const ACMD41_SD_SEND_OP_COND: u8 = 41;

pub(crate) const FILL: u8 = 0xFF;
pub(crate) const TOKEN_START_BLOCK: u8 = 0xFE;
pub(crate) const TOKEN_STOP_TRAN: u8 = 0xFD;
pub(crate) const TOKEN_WRITE_MULTIPLE: u8 = 0xFC;
pub(crate) const DATA_RESPONSE_MASK: u8 = 0x1F;
pub(crate) const DATA_RESPONSE_ACCEPTED: u8 = 0x05;
pub(crate) const DATA_RESPONSE_CRC_ERROR: u8 = 0x0B;
pub(crate) const DATA_RESPONSE_WRITE_ERROR: u8 = 0x0D;

/// CRC7 over the transmit/command/argument bytes, polynomial 0x89.
/// CMD0 with argument 0 yields 0x4A, frame byte 0x95.
pub fn crc7(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for mut byte in data.iter().copied() {
        for _ in 0..8 {
            crc <<= 1;
            if ((byte ^ crc) & 0x80) != 0 {
                crc ^= 0x09;
            }
            byte <<= 1;
        }
    }
    crc & 0x7F
}

impl<T: Transport> SdCard<T> {
    pub(crate) fn transfer(&mut self, byte: u8) -> Result<u8, SdError<T::Error>> {
        self.bus.transfer_byte(byte).map_err(SdError::Transport)
    }

    pub(crate) fn send_fill_bytes(&mut self, count: usize) -> Result<(), SdError<T::Error>> {
        for _ in 0..count {
            self.transfer(FILL)?;
        }
        Ok(())
    }

    /// Writes the 48-bit frame. Assumes chip-select is already asserted; a
    /// leading fill byte lets the card settle between back-to-back commands.
    pub(crate) fn send_frame(&mut self, cmd: u8, arg: u32) -> Result<(), SdError<T::Error>> {
        let frame = [
            0x40 | cmd,
            (arg >> 24) as u8,
            (arg >> 16) as u8,
            (arg >> 8) as u8,
            arg as u8,
        ];
        self.transfer(FILL)?;
        for byte in frame {
            self.transfer(byte)?;
        }
        self.transfer((crc7(&frame) << 1) | 1)?;
        Ok(())
    }

    /// Polls for a byte whose high bit is clear; everything else is the
    /// idle/fill pattern. Bounded by `max_r1_attempts`.
    pub(crate) fn poll_r1(&mut self, cmd: u8) -> Result<R1, SdError<T::Error>> {
        for _ in 0..self.config.max_r1_attempts {
            let byte = self.transfer(FILL)?;
            if byte & 0x80 == 0 {
                return Ok(R1(byte));
            }
        }
        Err(SdError::R1Timeout { cmd })
    }

    /// One command exchange with chip-select held afterwards, so the caller
    /// can move data tokens before releasing the bus. The caller owns the
    /// matching `end_transaction`, success or not.
    pub(crate) fn command_hold_cs(
        &mut self,
        cmd: u8,
        arg: u32,
        extra_response: &mut [u8],
    ) -> Result<R1, SdError<T::Error>> {
        self.bus.assert_select();
        self.send_frame(cmd, arg)?;
        let r1 = self.poll_r1(cmd)?;
        for slot in extra_response {
            *slot = self.transfer(FILL)?;
        }
        Ok(r1)
    }

    /// One complete command exchange; chip-select is released before return.
    pub(crate) fn command(
        &mut self,
        cmd: u8,
        arg: u32,
        extra_response: &mut [u8],
    ) -> Result<R1, SdError<T::Error>> {
        let result = self.command_hold_cs(cmd, arg, extra_response);
        self.end_transaction();
        result
    }

    /// CMD55 escape followed by the application command. The CMD55 reply is
    /// only checked for gross failure; idle state during init is expected.
    pub(crate) fn app_command(&mut self, cmd: u8, arg: u32) -> Result<R1, SdError<T::Error>> {
        let _ = self.command(CMD55_APP_CMD, 0, &mut [])?;
        self.command(cmd, arg, &mut [])
    }

    pub(crate) fn app_command_hold_cs(
        &mut self,
        cmd: u8,
        arg: u32,
    ) -> Result<R1, SdError<T::Error>> {
        let _ = self.command(CMD55_APP_CMD, 0, &mut [])?;
        self.command_hold_cs(cmd, arg, &mut [])
    }

    /// Deasserts chip-select and clocks one trailing fill byte so the card
    /// releases the data line.
    pub(crate) fn end_transaction(&mut self) {
        self.bus.deassert_select();
        let _ = self.bus.transfer_byte(FILL);
    }

}

pub(crate) fn require_ready<E>(cmd: u8, r1: R1) -> Result<(), SdError<E>> {
    if r1.is_ready() {
        Ok(())
    } else {
        Err(SdError::CommandRejected { cmd, r1 })
    }
}
