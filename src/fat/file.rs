use log::trace;

use super::dir::{self, ResolvedDirectory};
use super::volume::{ChainWalker, VolumeLayout};
use super::FatError;
use crate::device::{Block, BlockDevice, BLOCK_SIZE};

/// Streams a file one block at a time, following its cluster chain. Holds
/// no sector data between calls; the caller owns the output buffer.
pub struct FileReader {
    chain: ChainWalker,
    sector_in_cluster: u32,
    delivered: u32,
    size: u32,
}

impl FileReader {
    /// Looks `name` up in `dir` and positions a reader at its first byte.
    pub fn open<B: BlockDevice>(
        dev: &mut B,
        volume: &VolumeLayout,
        dir: &ResolvedDirectory,
        name: &str,
    ) -> Result<Self, FatError<B::Error>> {
        let found = dir::find_entry(dev, volume, dir, name)?.ok_or(FatError::FileNotFound)?;
        if found.entry.attributes.directory() {
            return Err(FatError::NotFile);
        }
        // A zero-length file legitimately has no cluster; a non-empty one
        // must point into the data region.
        if found.entry.first_cluster < 2 && found.entry.size > 0 {
            return Err(FatError::CorruptFatEntry);
        }
        trace!(
            "fat: open {} size={} cluster={}",
            name,
            found.entry.size,
            found.entry.first_cluster
        );
        Ok(Self {
            chain: ChainWalker::new(found.entry.first_cluster),
            sector_in_cluster: 0,
            delivered: 0,
            size: found.entry.size,
        })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Reads the next block of the file into `out`. Returns the number of
    /// valid bytes, or `None` once the file is exhausted. The final block
    /// of a file whose size is not a multiple of the block size reports a
    /// short length; the bytes past it are whatever the device returned.
    pub fn next_block<B: BlockDevice>(
        &mut self,
        dev: &mut B,
        volume: &VolumeLayout,
        out: &mut Block,
    ) -> Result<Option<usize>, FatError<B::Error>> {
        let remaining = self.size - self.delivered;
        if remaining == 0 {
            return Ok(None);
        }

        if self.sector_in_cluster == volume.sectors_per_cluster as u32 {
            self.sector_in_cluster = 0;
            if self.chain.advance(dev, volume)?.is_none() {
                // The chain ended before the directory entry's size did.
                return Err(FatError::CorruptFatEntry);
            }
        }

        let lba = volume.sector_for_cluster(self.chain.current(), self.sector_in_cluster)?;
        dev.read_block(lba, out).map_err(FatError::Device)?;
        self.sector_in_cluster += 1;

        let valid = remaining.min(BLOCK_SIZE as u32);
        self.delivered += valid;
        Ok(Some(valid as usize))
    }
}
