mod cursor;
mod dir;
mod file;
mod names;
mod volume;
#[cfg(test)]
mod tests;

pub use cursor::{Attributes, ShortEntry, Timestamp};
pub use dir::{
    list_dir, resolve, resolve_path, DirEntryInfo, DirLister, ListFields, ResolvedDirectory,
};
pub use file::FileReader;
pub use volume::{mount, next_cluster, ChainWalker, ClusterLink, VolumeLayout};

/// Longest reconstructed long name kept, in UTF-8 bytes.
pub const NAME_MAX: usize = 96;
/// Longest parent path tracked by a directory cursor.
pub const PATH_MAX: usize = 192;

pub(crate) const DIR_ENTRY_SIZE: usize = 32;
pub(crate) const FAT32_EOC: u32 = 0x0FFF_FFF8;
pub(crate) const MAX_LFN_SLOTS: usize = 20;

pub(crate) const ATTR_READ_ONLY: u8 = 0x01;
pub(crate) const ATTR_HIDDEN: u8 = 0x02;
pub(crate) const ATTR_SYSTEM: u8 = 0x04;
pub(crate) const ATTR_VOLUME_ID: u8 = 0x08;
pub(crate) const ATTR_DIRECTORY: u8 = 0x10;
pub(crate) const ATTR_ARCHIVE: u8 = 0x20;
pub(crate) const ATTR_LONG_NAME: u8 = 0x0F;

#[derive(Debug, PartialEq, Eq)]
pub enum FatError<E> {
    Device(E),
    /// Boot signature missing, bytes-per-sector not 512, or geometry that
    /// does not describe a FAT32 volume.
    CorruptBootSector,
    /// A FAT link or directory structure violates the format invariants:
    /// reserved cluster index, a chain longer than the volume, or long-name
    /// fragments that do not agree with their short entry.
    CorruptFatEntry,
    InvalidName,
    NameTooLong,
    /// A joined parent path no longer fits the path buffer.
    PathTooDeep,
    FileNotFound,
    DirNotFound,
    /// The scan ran out of entries before examining a single record.
    EndOfDirectory,
    NotDirectory,
    NotFile,
}
