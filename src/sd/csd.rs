use super::cmd::{require_ready, CMD9_SEND_CSD};
use super::{SdCard, SdError};
use crate::transport::Transport;

impl<T: Transport> SdCard<T> {
    pub fn read_csd(&mut self) -> Result<[u8; 16], SdError<T::Error>> {
        let result = (|| {
            let r1 = self.command_hold_cs(CMD9_SEND_CSD, 0, &mut [])?;
            require_ready(CMD9_SEND_CSD, r1)?;
            let mut csd = [0u8; 16];
            self.receive_data(CMD9_SEND_CSD, &mut csd)?;
            Ok(csd)
        })();
        self.end_transaction();
        result
    }

    pub fn capacity_bytes(&mut self) -> Result<u64, SdError<T::Error>> {
        let csd = self.read_csd()?;
        decode_capacity_bytes(&csd).ok_or(SdError::CapacityDecodeFailed)
    }
}

fn decode_capacity_bytes(csd: &[u8; 16]) -> Option<u64> {
    match csd_get_bits(csd, 127, 126) {
        0 => {
            // CSD v1.0 (SDSC)
            let c_size = csd_get_bits(csd, 73, 62) as u64;
            let c_size_mult = csd_get_bits(csd, 49, 47) as u64;
            let read_bl_len = csd_get_bits(csd, 83, 80) as u64;

            let block_len = 1u64.checked_shl(read_bl_len as u32)?;
            let mult = 1u64.checked_shl((c_size_mult + 2) as u32)?;
            (c_size + 1).checked_mul(mult)?.checked_mul(block_len)
        }
        1 => {
            // CSD v2.0 (SDHC/SDXC)
            let c_size = csd_get_bits(csd, 69, 48) as u64;
            (c_size + 1).checked_mul(512 * 1024)
        }
        _ => None,
    }
}

fn csd_get_bits(csd: &[u8; 16], msb: u8, lsb: u8) -> u32 {
    let mut value = 0u32;
    for bit in (lsb..=msb).rev() {
        let byte_idx = (127 - bit) / 8;
        let bit_in_byte = bit % 8;
        let b = (csd[byte_idx as usize] >> bit_in_byte) & 1;
        value = (value << 1) | (b as u32);
    }
    value
}
