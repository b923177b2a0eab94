use log::debug;

use super::{FatError, FAT32_EOC};
use crate::device::{Block, BlockDevice, BLOCK_SIZE};

/// Volume geometry, immutable after mount. All sector numbers are absolute
/// LBAs; a partition offset is already folded in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VolumeLayout {
    pub fat_start: u32,
    pub fat_size_sectors: u32,
    pub fat_count: u8,
    /// First sector of the data region:
    /// partition start + reserved + fat_count * fat_size.
    pub data_start: u32,
    pub sectors_per_cluster: u8,
    pub root_cluster: u32,
    pub total_clusters: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterLink {
    Next(u32),
    EndOfChain,
}

impl VolumeLayout {
    /// Cluster 2 is the first valid cluster; 0 and 1 are reserved.
    pub fn sector_for_cluster<E>(&self, cluster: u32, relative: u32) -> Result<u32, FatError<E>> {
        if cluster < 2 || cluster > self.max_valid_cluster() {
            return Err(FatError::CorruptFatEntry);
        }
        Ok(self
            .data_start
            .saturating_add((cluster - 2).saturating_mul(self.sectors_per_cluster as u32))
            .saturating_add(relative))
    }

    pub fn max_valid_cluster(&self) -> u32 {
        self.total_clusters.saturating_add(1)
    }

    pub fn cluster_size_bytes(&self) -> usize {
        BLOCK_SIZE * self.sectors_per_cluster as usize
    }
}

/// Looks up the FAT slot holding `cluster`'s successor. One sector read per
/// call; the 4 high bits of the 32-bit slot are reserved and masked off.
pub fn next_cluster<B: BlockDevice>(
    dev: &mut B,
    volume: &VolumeLayout,
    cluster: u32,
) -> Result<ClusterLink, FatError<B::Error>> {
    let byte_offset = cluster as u64 * 4;
    let sector_offset = (byte_offset / BLOCK_SIZE as u64) as u32;
    let index = (byte_offset % BLOCK_SIZE as u64) as usize;
    if sector_offset >= volume.fat_size_sectors {
        return Err(FatError::CorruptFatEntry);
    }

    let mut sector = [0u8; BLOCK_SIZE];
    dev.read_block(volume.fat_start.saturating_add(sector_offset), &mut sector)
        .map_err(FatError::Device)?;
    let raw = u32::from_le_bytes([
        sector[index],
        sector[index + 1],
        sector[index + 2],
        sector[index + 3],
    ]) & 0x0FFF_FFFF;

    if raw >= FAT32_EOC {
        return Ok(ClusterLink::EndOfChain);
    }
    if raw < 2 || raw > volume.max_valid_cluster() {
        return Err(FatError::CorruptFatEntry);
    }
    Ok(ClusterLink::Next(raw))
}

/// Bounded walk along one cluster chain. A chain visiting more clusters
/// than the volume holds cannot be acyclic, so the walker reports it as
/// corruption instead of looping.
pub struct ChainWalker {
    cluster: u32,
    visited: u32,
}

impl ChainWalker {
    pub fn new(first_cluster: u32) -> Self {
        Self {
            cluster: first_cluster,
            visited: 0,
        }
    }

    pub fn current(&self) -> u32 {
        self.cluster
    }

    pub fn advance<B: BlockDevice>(
        &mut self,
        dev: &mut B,
        volume: &VolumeLayout,
    ) -> Result<Option<u32>, FatError<B::Error>> {
        if self.visited > volume.total_clusters.saturating_add(2) {
            return Err(FatError::CorruptFatEntry);
        }
        self.visited = self.visited.saturating_add(1);

        match next_cluster(dev, volume, self.cluster)? {
            ClusterLink::Next(next) => {
                self.cluster = next;
                Ok(Some(next))
            }
            ClusterLink::EndOfChain => Ok(None),
        }
    }
}

/// Reads sector 0 and mounts either the first FAT-type MBR partition or,
/// failing that, the sector itself as a boot sector.
pub fn mount<B: BlockDevice>(dev: &mut B) -> Result<VolumeLayout, FatError<B::Error>> {
    let mut sector0 = [0u8; BLOCK_SIZE];
    dev.read_block(0, &mut sector0).map_err(FatError::Device)?;

    if let Some(start) = first_fat_partition_lba(&sector0) {
        let mut boot = [0u8; BLOCK_SIZE];
        dev.read_block(start, &mut boot).map_err(FatError::Device)?;
        if let Ok(volume) = parse_boot_sector::<B::Error>(start, &boot) {
            debug!("fat: mounted partition at lba={}", start);
            return Ok(volume);
        }
    }

    parse_boot_sector(0, &sector0)
}

/// BPB field extraction. Byte offsets per the FAT32 layout; little-endian
/// multi-byte fields.
pub(crate) fn parse_boot_sector<E>(
    partition_start: u32,
    boot: &Block,
) -> Result<VolumeLayout, FatError<E>> {
    if boot[510] != 0x55 || boot[511] != 0xAA {
        return Err(FatError::CorruptBootSector);
    }

    let bytes_per_sector = u16::from_le_bytes([boot[11], boot[12]]);
    if bytes_per_sector as usize != BLOCK_SIZE {
        return Err(FatError::CorruptBootSector);
    }

    let sectors_per_cluster = boot[13];
    if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
        return Err(FatError::CorruptBootSector);
    }

    let reserved_sectors = u16::from_le_bytes([boot[14], boot[15]]) as u32;
    let fat_count = boot[16];
    if fat_count == 0 {
        return Err(FatError::CorruptBootSector);
    }

    let fat_size = u32::from_le_bytes([boot[36], boot[37], boot[38], boot[39]]);
    if fat_size == 0 {
        return Err(FatError::CorruptBootSector);
    }

    let total_16 = u16::from_le_bytes([boot[19], boot[20]]) as u32;
    let total_32 = u32::from_le_bytes([boot[32], boot[33], boot[34], boot[35]]);
    let total_sectors = if total_16 != 0 { total_16 } else { total_32 };
    if total_sectors == 0 {
        return Err(FatError::CorruptBootSector);
    }

    let root_cluster = u32::from_le_bytes([boot[44], boot[45], boot[46], boot[47]]);
    if root_cluster < 2 {
        return Err(FatError::CorruptBootSector);
    }

    let fat_start = partition_start.saturating_add(reserved_sectors);
    let fat_total = fat_size.saturating_mul(fat_count as u32);
    let data_start = fat_start.saturating_add(fat_total);
    let used_sectors = reserved_sectors.saturating_add(fat_total);
    if total_sectors <= used_sectors {
        return Err(FatError::CorruptBootSector);
    }
    let total_clusters = (total_sectors - used_sectors) / sectors_per_cluster as u32;
    // Fewer clusters than this and the volume would be FAT12/FAT16.
    if total_clusters < 65_525 {
        return Err(FatError::CorruptBootSector);
    }

    Ok(VolumeLayout {
        fat_start,
        fat_size_sectors: fat_size,
        fat_count,
        data_start,
        sectors_per_cluster,
        root_cluster,
        total_clusters,
    })
}

fn first_fat_partition_lba(sector0: &Block) -> Option<u32> {
    if sector0[510] != 0x55 || sector0[511] != 0xAA {
        return None;
    }
    for i in 0..4 {
        let base = 446 + i * 16;
        let part_type = sector0[base + 4];
        if !matches!(part_type, 0x04 | 0x06 | 0x0B | 0x0C | 0x0E) {
            continue;
        }
        let start = u32::from_le_bytes([
            sector0[base + 8],
            sector0[base + 9],
            sector0[base + 10],
            sector0[base + 11],
        ]);
        if start != 0 {
            return Some(start);
        }
    }
    None
}
