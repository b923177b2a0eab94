use super::volume::{ChainWalker, VolumeLayout};
use super::{FatError, ATTR_ARCHIVE, ATTR_DIRECTORY, ATTR_HIDDEN, ATTR_LONG_NAME, ATTR_READ_ONLY,
    ATTR_SYSTEM, ATTR_VOLUME_ID, DIR_ENTRY_SIZE};
use crate::device::{BlockDevice, BLOCK_SIZE};

const ENTRIES_PER_SECTOR: usize = BLOCK_SIZE / DIR_ENTRY_SIZE;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Attributes(pub u8);

impl Attributes {
    pub fn read_only(self) -> bool {
        self.0 & ATTR_READ_ONLY != 0
    }

    pub fn hidden(self) -> bool {
        self.0 & ATTR_HIDDEN != 0
    }

    pub fn system(self) -> bool {
        self.0 & ATTR_SYSTEM != 0
    }

    pub fn volume_id(self) -> bool {
        self.0 & ATTR_VOLUME_ID != 0
    }

    pub fn directory(self) -> bool {
        self.0 & ATTR_DIRECTORY != 0
    }

    pub fn archive(self) -> bool {
        self.0 & ATTR_ARCHIVE != 0
    }
}

/// FAT packs a calendar date into one u16 and a 2-second-granular time
/// into another.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl Timestamp {
    pub(crate) fn decode(date: u16, time: u16) -> Self {
        Self {
            year: 1980 + (date >> 9),
            month: ((date >> 5) & 0x0F) as u8,
            day: (date & 0x1F) as u8,
            hour: (time >> 11) as u8,
            minute: ((time >> 5) & 0x3F) as u8,
            second: ((time & 0x1F) * 2) as u8,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ShortEntry {
    /// 8.3 name as stored: 8 name bytes then 3 extension bytes, space padded.
    pub raw_name: [u8; 11],
    pub attributes: Attributes,
    pub first_cluster: u32,
    pub size: u32,
    pub created: Timestamp,
    pub modified: Timestamp,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct LfnFragment {
    /// 1-based position of this fragment within the name.
    pub ordinal: u8,
    /// Set on the fragment stored first, which carries the highest ordinal.
    pub is_last: bool,
    pub checksum: u8,
    pub units: [u16; 13],
}

/// One 32-byte slot, decoded exactly once.
pub(crate) enum DirEntry {
    Free,
    EndOfDirectory,
    Lfn(LfnFragment),
    Short(ShortEntry),
}

impl DirEntry {
    pub(crate) fn decode(raw: &[u8; DIR_ENTRY_SIZE]) -> Self {
        match raw[0] {
            0x00 => return DirEntry::EndOfDirectory,
            0xE5 => return DirEntry::Free,
            _ => {}
        }

        let attr = raw[11];
        if attr & 0x0F == ATTR_LONG_NAME {
            let mut units = [0u16; 13];
            let mut idx = 0usize;
            for offset in [1usize, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30] {
                units[idx] = u16::from_le_bytes([raw[offset], raw[offset + 1]]);
                idx += 1;
            }
            return DirEntry::Lfn(LfnFragment {
                ordinal: raw[0] & 0x1F,
                is_last: raw[0] & 0x40 != 0,
                checksum: raw[13],
                units,
            });
        }

        let cluster_hi = u16::from_le_bytes([raw[20], raw[21]]);
        let cluster_lo = u16::from_le_bytes([raw[26], raw[27]]);
        let mut raw_name = [0u8; 11];
        raw_name.copy_from_slice(&raw[0..11]);
        DirEntry::Short(ShortEntry {
            raw_name,
            attributes: Attributes(attr),
            first_cluster: ((cluster_hi as u32) << 16) | cluster_lo as u32,
            size: u32::from_le_bytes([raw[28], raw[29], raw[30], raw[31]]),
            created: Timestamp::decode(
                u16::from_le_bytes([raw[16], raw[17]]),
                u16::from_le_bytes([raw[14], raw[15]]),
            ),
            modified: Timestamp::decode(
                u16::from_le_bytes([raw[24], raw[25]]),
                u16::from_le_bytes([raw[22], raw[23]]),
            ),
        })
    }
}

/// Yields successive 32-byte entries of a cluster-chained directory stream.
/// Sector and cluster boundaries are crossed here and nowhere else; callers
/// see one flat sequence of entries.
pub(crate) struct DirCursor {
    chain: ChainWalker,
    sector_in_cluster: u32,
    entry_in_sector: usize,
    sector: [u8; BLOCK_SIZE],
    loaded: bool,
    exhausted: bool,
}

impl DirCursor {
    pub(crate) fn new(first_cluster: u32) -> Self {
        Self {
            chain: ChainWalker::new(first_cluster),
            sector_in_cluster: 0,
            entry_in_sector: 0,
            sector: [0u8; BLOCK_SIZE],
            loaded: false,
            exhausted: false,
        }
    }

    pub(crate) fn next_entry<B: BlockDevice>(
        &mut self,
        dev: &mut B,
        volume: &VolumeLayout,
    ) -> Result<Option<[u8; DIR_ENTRY_SIZE]>, FatError<B::Error>> {
        if self.exhausted {
            return Ok(None);
        }

        if self.entry_in_sector == ENTRIES_PER_SECTOR {
            self.entry_in_sector = 0;
            self.loaded = false;
            self.sector_in_cluster += 1;
            if self.sector_in_cluster == volume.sectors_per_cluster as u32 {
                self.sector_in_cluster = 0;
                if self.chain.advance(dev, volume)?.is_none() {
                    self.exhausted = true;
                    return Ok(None);
                }
            }
        }

        if !self.loaded {
            let lba = volume.sector_for_cluster(self.chain.current(), self.sector_in_cluster)?;
            dev.read_block(lba, &mut self.sector).map_err(FatError::Device)?;
            self.loaded = true;
        }

        let base = self.entry_in_sector * DIR_ENTRY_SIZE;
        self.entry_in_sector += 1;
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        raw.copy_from_slice(&self.sector[base..base + DIR_ENTRY_SIZE]);
        Ok(Some(raw))
    }
}
