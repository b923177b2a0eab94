use log::warn;

use super::cmd::{
    require_ready, ACMD22_SEND_NUM_WR_BLOCKS, CMD12_STOP_TRANSMISSION, CMD17_READ_SINGLE_BLOCK,
    CMD18_READ_MULTIPLE_BLOCK, CMD24_WRITE_BLOCK, CMD25_WRITE_MULTIPLE_BLOCK,
    CMD32_ERASE_WR_BLK_START, CMD33_ERASE_WR_BLK_END, CMD38_ERASE, DATA_RESPONSE_ACCEPTED,
    DATA_RESPONSE_CRC_ERROR, DATA_RESPONSE_MASK, DATA_RESPONSE_WRITE_ERROR, FILL,
    TOKEN_START_BLOCK, TOKEN_STOP_TRAN, TOKEN_WRITE_MULTIPLE,
};
use super::{CapacityClass, SdCard, SdError};
use crate::device::{Block, BlockDevice, BLOCK_SIZE};
use crate::transport::Transport;

const DATA_RESPONSE_POLLS: usize = 8;

impl<T: Transport> SdCard<T> {
    /// Standard-capacity cards take byte offsets, high-capacity cards take
    /// block numbers. Decided once at init, applied everywhere.
    fn block_argument(&self, address: u32) -> Result<u32, SdError<T::Error>> {
        let identity = self.identity.ok_or(SdError::NotInitialized)?;
        Ok(match identity.capacity {
            CapacityClass::HighCapacity => address,
            CapacityClass::StandardCapacity => address.saturating_mul(BLOCK_SIZE as u32),
        })
    }

    pub fn read_block(&mut self, address: u32, out: &mut Block) -> Result<(), SdError<T::Error>> {
        let arg = self.block_argument(address)?;
        let result = (|| {
            let r1 = self.command_hold_cs(CMD17_READ_SINGLE_BLOCK, arg, &mut [])?;
            require_ready(CMD17_READ_SINGLE_BLOCK, r1)?;
            self.receive_data(CMD17_READ_SINGLE_BLOCK, out)
        })();
        self.end_transaction();
        result
    }

    pub fn write_block(&mut self, address: u32, data: &Block) -> Result<(), SdError<T::Error>> {
        let arg = self.block_argument(address)?;
        let result = (|| {
            let r1 = self.command_hold_cs(CMD24_WRITE_BLOCK, arg, &mut [])?;
            require_ready(CMD24_WRITE_BLOCK, r1)?;
            self.send_data(TOKEN_START_BLOCK, data)?;
            self.check_data_response()?;
            self.wait_not_busy()
        })();
        self.end_transaction();
        result
    }

    pub fn erase_blocks(&mut self, start: u32, end: u32) -> Result<(), SdError<T::Error>> {
        let start_arg = self.block_argument(start)?;
        let end_arg = self.block_argument(end)?;

        let r1 = self.command(CMD32_ERASE_WR_BLK_START, start_arg, &mut [])?;
        require_ready(CMD32_ERASE_WR_BLK_START, r1)?;
        let r1 = self.command(CMD33_ERASE_WR_BLK_END, end_arg, &mut [])?;
        require_ready(CMD33_ERASE_WR_BLK_END, r1)?;

        let result = (|| {
            let r1 = self.command_hold_cs(CMD38_ERASE, 0, &mut [])?;
            require_ready(CMD38_ERASE, r1)?;
            self.wait_not_busy()
        })();
        self.end_transaction();
        result
    }

    pub fn read_blocks(&mut self, address: u32, out: &mut [Block]) -> Result<(), SdError<T::Error>> {
        if out.is_empty() {
            return Ok(());
        }
        let arg = self.block_argument(address)?;
        let result = (|| {
            let r1 = self.command_hold_cs(CMD18_READ_MULTIPLE_BLOCK, arg, &mut [])?;
            require_ready(CMD18_READ_MULTIPLE_BLOCK, r1)?;
            for block in out.iter_mut() {
                self.receive_data(CMD18_READ_MULTIPLE_BLOCK, block)?;
            }
            // Stop the transfer; the byte right after the CMD12 frame is a
            // stuff byte and carries no response.
            self.send_frame(CMD12_STOP_TRANSMISSION, 0)?;
            self.transfer(FILL)?;
            let r1 = self.poll_r1(CMD12_STOP_TRANSMISSION)?;
            require_ready(CMD12_STOP_TRANSMISSION, r1)?;
            self.wait_not_busy()
        })();
        self.end_transaction();
        result
    }

    pub fn write_blocks(&mut self, address: u32, blocks: &[Block]) -> Result<(), SdError<T::Error>> {
        if blocks.is_empty() {
            return Ok(());
        }
        let arg = self.block_argument(address)?;
        let result = (|| {
            let r1 = self.command_hold_cs(CMD25_WRITE_MULTIPLE_BLOCK, arg, &mut [])?;
            require_ready(CMD25_WRITE_MULTIPLE_BLOCK, r1)?;
            for block in blocks {
                self.send_data(TOKEN_WRITE_MULTIPLE, block)?;
                self.check_data_response()?;
                self.wait_not_busy()?;
            }
            self.transfer(FILL)?;
            self.transfer(TOKEN_STOP_TRAN)?;
            self.transfer(FILL)?;
            self.wait_not_busy()
        })();
        self.end_transaction();
        match result {
            Err(SdError::CrcErrorTokenReceived { .. }) => {
                let blocks_written = self.query_written_blocks().ok();
                Err(SdError::CrcErrorTokenReceived { blocks_written })
            }
            Err(SdError::WriteErrorTokenReceived { .. }) => {
                let blocks_written = self.query_written_blocks().ok();
                Err(SdError::WriteErrorTokenReceived { blocks_written })
            }
            other => other,
        }
    }

    /// ACMD22: how many blocks of the aborted multi-block write the card
    /// committed, so a caller can resume or report partial progress.
    fn query_written_blocks(&mut self) -> Result<u32, SdError<T::Error>> {
        let result = (|| {
            let r1 = self.app_command_hold_cs(ACMD22_SEND_NUM_WR_BLOCKS, 0)?;
            require_ready(ACMD22_SEND_NUM_WR_BLOCKS, r1)?;
            let mut count = [0u8; 4];
            self.receive_data(ACMD22_SEND_NUM_WR_BLOCKS, &mut count)?;
            Ok(u32::from_be_bytes(count))
        })();
        self.end_transaction();
        result
    }

    /// Waits for the start-block token, then moves the payload plus the two
    /// CRC bytes (discarded; CRC is disabled for this protocol profile).
    pub(crate) fn receive_data(
        &mut self,
        cmd: u8,
        out: &mut [u8],
    ) -> Result<(), SdError<T::Error>> {
        let mut token = FILL;
        let mut got_token = false;
        for _ in 0..self.config.max_token_polls {
            token = self.transfer(FILL)?;
            if token != FILL {
                got_token = true;
                break;
            }
        }
        if !got_token {
            return Err(SdError::StartTokenTimeout { cmd });
        }
        if token != TOKEN_START_BLOCK {
            warn!("sd: cmd{} unexpected data token {:#04x}", cmd, token);
            return Err(SdError::UnexpectedToken { cmd, token });
        }

        for slot in out.iter_mut() {
            *slot = self.transfer(FILL)?;
        }
        self.transfer(FILL)?;
        self.transfer(FILL)?;
        Ok(())
    }

    fn send_data(&mut self, token: u8, data: &Block) -> Result<(), SdError<T::Error>> {
        self.transfer(FILL)?;
        self.transfer(token)?;
        for &byte in data {
            self.transfer(byte)?;
        }
        // Two filler CRC bytes; the card ignores them with CRC disabled.
        self.transfer(FILL)?;
        self.transfer(FILL)?;
        Ok(())
    }

    fn check_data_response(&mut self) -> Result<(), SdError<T::Error>> {
        let blocks_written = None;
        let mut response = FILL;
        for _ in 0..DATA_RESPONSE_POLLS {
            response = self.transfer(FILL)?;
            if response != FILL {
                break;
            }
        }
        if response == FILL {
            return Err(SdError::DataResponseTimeout);
        }
        match response & DATA_RESPONSE_MASK {
            DATA_RESPONSE_ACCEPTED => Ok(()),
            DATA_RESPONSE_CRC_ERROR => Err(SdError::CrcErrorTokenReceived { blocks_written }),
            DATA_RESPONSE_WRITE_ERROR => Err(SdError::WriteErrorTokenReceived { blocks_written }),
            token => Err(SdError::UnexpectedToken {
                cmd: CMD24_WRITE_BLOCK,
                token,
            }),
        }
    }

    /// The card holds the line low while programming; bounded by
    /// `max_busy_polls`.
    pub(crate) fn wait_not_busy(&mut self) -> Result<(), SdError<T::Error>> {
        for _ in 0..self.config.max_busy_polls {
            if self.transfer(FILL)? == FILL {
                return Ok(());
            }
        }
        Err(SdError::CardBusyTimeout)
    }
}

impl<T: Transport> BlockDevice for SdCard<T> {
    type Error = SdError<T::Error>;

    fn read_block(&mut self, address: u32, out: &mut Block) -> Result<(), Self::Error> {
        SdCard::read_block(self, address, out)
    }

    fn write_block(&mut self, address: u32, data: &Block) -> Result<(), Self::Error> {
        SdCard::write_block(self, address, data)
    }

    fn erase_blocks(&mut self, start: u32, end: u32) -> Result<(), Self::Error> {
        SdCard::erase_blocks(self, start, end)
    }
}
