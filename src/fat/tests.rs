use std::collections::HashMap;
use std::vec::Vec;

use super::cursor::Timestamp;
use super::dir::{list_dir, resolve, DirEntryInfo, DirLister, ListFields, ResolvedDirectory};
use super::file::FileReader;
use super::names::short_name_checksum;
use super::volume::{mount, next_cluster, ChainWalker, ClusterLink};
use super::FatError;
use crate::device::{Block, BlockDevice, BLOCK_SIZE};

/// Sparse in-memory disk; unwritten sectors read back as zeros. The image
/// claims far more sectors than it stores so the cluster count clears the
/// FAT32 threshold.
struct RamDisk {
    sectors: HashMap<u32, Block>,
}

impl RamDisk {
    fn new() -> Self {
        Self {
            sectors: HashMap::new(),
        }
    }

    fn sector_mut(&mut self, lba: u32) -> &mut Block {
        self.sectors.entry(lba).or_insert([0u8; BLOCK_SIZE])
    }
}

impl BlockDevice for RamDisk {
    type Error = ();

    fn read_block(&mut self, address: u32, out: &mut Block) -> Result<(), ()> {
        *out = self.sectors.get(&address).copied().unwrap_or([0u8; BLOCK_SIZE]);
        Ok(())
    }

    fn write_block(&mut self, address: u32, data: &Block) -> Result<(), ()> {
        self.sectors.insert(address, *data);
        Ok(())
    }

    fn erase_blocks(&mut self, start: u32, end: u32) -> Result<(), ()> {
        for address in start..=end {
            self.sectors.remove(&address);
        }
        Ok(())
    }
}

// Fixed geometry for every image: one sector per cluster keeps cluster
// arithmetic visible, and 77824 total sectors puts the cluster count well
// past the 65525 FAT32 floor.
const RESERVED: u32 = 32;
const FAT_SIZE: u32 = 600;
const FAT_START: u32 = RESERVED;
const DATA_START: u32 = RESERVED + 2 * FAT_SIZE;
const TOTAL_SECTORS: u32 = 77_824;
const EOC: u32 = 0x0FFF_FFFF;

fn boot_sector() -> Block {
    let mut b = [0u8; BLOCK_SIZE];
    b[11..13].copy_from_slice(&(BLOCK_SIZE as u16).to_le_bytes());
    b[13] = 1; // sectors per cluster
    b[14..16].copy_from_slice(&(RESERVED as u16).to_le_bytes());
    b[16] = 2; // FAT copies
    b[32..36].copy_from_slice(&TOTAL_SECTORS.to_le_bytes());
    b[36..40].copy_from_slice(&FAT_SIZE.to_le_bytes());
    b[44..48].copy_from_slice(&2u32.to_le_bytes());
    b[510] = 0x55;
    b[511] = 0xAA;
    b
}

fn set_fat(disk: &mut RamDisk, cluster: u32, value: u32) {
    let lba = FAT_START + cluster / (BLOCK_SIZE as u32 / 4);
    let index = (cluster as usize % (BLOCK_SIZE / 4)) * 4;
    let sector = disk.sector_mut(lba);
    sector[index..index + 4].copy_from_slice(&value.to_le_bytes());
}

fn link_chain(disk: &mut RamDisk, clusters: &[u32]) {
    for pair in clusters.windows(2) {
        set_fat(disk, pair[0], pair[1]);
    }
    if let Some(&last) = clusters.last() {
        set_fat(disk, last, EOC);
    }
}

fn cluster_lba(cluster: u32) -> u32 {
    DATA_START + (cluster - 2)
}

fn blank_image() -> RamDisk {
    let mut disk = RamDisk::new();
    *disk.sector_mut(0) = boot_sector();
    set_fat(&mut disk, 0, 0x0FFF_FFF8);
    set_fat(&mut disk, 1, EOC);
    set_fat(&mut disk, 2, EOC); // root directory
    disk
}

fn short(name: &str, ext: &str) -> [u8; 11] {
    let mut raw = [b' '; 11];
    raw[..name.len()].copy_from_slice(name.as_bytes());
    raw[8..8 + ext.len()].copy_from_slice(ext.as_bytes());
    raw
}

fn short_entry(raw_name: [u8; 11], attr: u8, cluster: u32, size: u32) -> [u8; 32] {
    let mut e = [0u8; 32];
    e[..11].copy_from_slice(&raw_name);
    e[11] = attr;
    e[20..22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
    e[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
    e[28..32].copy_from_slice(&size.to_le_bytes());
    e
}

fn with_modified(mut entry: [u8; 32], date: u16, time: u16) -> [u8; 32] {
    entry[22..24].copy_from_slice(&time.to_le_bytes());
    entry[24..26].copy_from_slice(&date.to_le_bytes());
    entry
}

/// Long-name fragments in on-disk order: highest ordinal first, marked
/// last, each carrying 13 UTF-16 units of the name.
fn lfn_entries(long: &str, raw_short: &[u8; 11]) -> Vec<[u8; 32]> {
    const UNIT_OFFSETS: [usize; 13] = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];
    let checksum = short_name_checksum(raw_short);
    let units: Vec<u16> = long.encode_utf16().collect();
    let fragments = units.len().div_ceil(13);

    let mut out = Vec::new();
    for ordinal in (1..=fragments).rev() {
        let mut e = [0u8; 32];
        e[0] = ordinal as u8 | if ordinal == fragments { 0x40 } else { 0 };
        e[11] = 0x0F;
        e[13] = checksum;
        let base = (ordinal - 1) * 13;
        for (slot, &offset) in UNIT_OFFSETS.iter().enumerate() {
            let unit = match base + slot {
                i if i < units.len() => units[i],
                i if i == units.len() => 0x0000,
                _ => 0xFFFF,
            };
            e[offset..offset + 2].copy_from_slice(&unit.to_le_bytes());
        }
        out.push(e);
    }
    out
}

/// Lays entries into the data sectors of `clusters`, 16 per sector, and
/// links the clusters into a chain.
fn write_dir(disk: &mut RamDisk, clusters: &[u32], entries: &[[u8; 32]]) {
    link_chain(disk, clusters);
    for (chunk_idx, chunk) in entries.chunks(16).enumerate() {
        let sector = disk.sector_mut(cluster_lba(clusters[chunk_idx]));
        for (i, entry) in chunk.iter().enumerate() {
            sector[i * 32..i * 32 + 32].copy_from_slice(entry);
        }
    }
}

fn write_file_content(disk: &mut RamDisk, clusters: &[u32], content: &[u8]) {
    link_chain(disk, clusters);
    for (idx, chunk) in content.chunks(BLOCK_SIZE).enumerate() {
        let sector = disk.sector_mut(cluster_lba(clusters[idx]));
        sector[..chunk.len()].copy_from_slice(chunk);
    }
}

const README_DATE: u16 = ((2024 - 1980) << 9) | (7 << 5) | 15;
const README_TIME: u16 = (12 << 11) | (34 << 5) | (56 / 2);
const DATA_LEN: usize = 1300;

fn data_content() -> Vec<u8> {
    (0..DATA_LEN).map(|i| (i % 251) as u8).collect()
}

/// Root (cluster 2):
///   volume label, README.TXT, Documents/ (LFN), SECRET.DAT (hidden),
///   LongDirectoryName/ (LFN), DATA.BIN spanning clusters 8-10.
/// Documents (cluster 4) holds Reports (cluster 7), which holds Q3.TXT.
fn sample_image() -> RamDisk {
    let mut disk = blank_image();

    let docs_short = short("DOCUME~1", "");
    let ldn_short = short("LONGDI~1", "");

    let mut root = Vec::new();
    root.push(short_entry(short("SDFATVOL", ""), 0x08, 0, 0));
    root.push(with_modified(
        short_entry(short("README", "TXT"), 0x20, 5, 20),
        README_DATE,
        README_TIME,
    ));
    root.extend(lfn_entries("Documents", &docs_short));
    root.push(short_entry(docs_short, 0x10, 4, 0));
    root.push(short_entry(short("SECRET", "DAT"), 0x22, 0, 0));
    root.extend(lfn_entries("LongDirectoryName", &ldn_short));
    root.push(short_entry(ldn_short, 0x10, 6, 0));
    root.push(short_entry(short("DATA", "BIN"), 0x20, 8, DATA_LEN as u32));
    write_dir(&mut disk, &[2], &root);

    let docs = [
        short_entry(short(".", ""), 0x10, 4, 0),
        short_entry(short("..", ""), 0x10, 0, 0),
        short_entry(short("REPORTS", ""), 0x10, 7, 0),
    ];
    write_dir(&mut disk, &[4], &docs);

    let reports = [
        short_entry(short(".", ""), 0x10, 7, 0),
        short_entry(short("..", ""), 0x10, 4, 0),
        short_entry(short("Q3", "TXT"), 0x20, 11, 2),
    ];
    write_dir(&mut disk, &[7], &reports);

    write_file_content(&mut disk, &[5], b"hello from the card\n");
    write_file_content(&mut disk, &[8, 9, 10], &data_content());
    write_file_content(&mut disk, &[11], b"ok");
    set_fat(&mut disk, 6, EOC); // empty LongDirectoryName

    disk
}

#[test]
fn mount_reads_geometry() {
    let mut disk = blank_image();
    let volume = mount(&mut disk).unwrap();
    assert_eq!(volume.fat_start, FAT_START);
    assert_eq!(volume.fat_size_sectors, FAT_SIZE);
    assert_eq!(volume.data_start, DATA_START);
    assert_eq!(volume.sectors_per_cluster, 1);
    assert_eq!(volume.root_cluster, 2);
    assert!(volume.total_clusters >= 65_525);
}

#[test]
fn mount_rejects_missing_signature() {
    let mut disk = blank_image();
    disk.sector_mut(0)[510] = 0;
    assert_eq!(mount(&mut disk), Err(FatError::CorruptBootSector));
}

#[test]
fn mount_rejects_unsupported_sector_size() {
    let mut disk = blank_image();
    disk.sector_mut(0)[11..13].copy_from_slice(&1024u16.to_le_bytes());
    assert_eq!(mount(&mut disk), Err(FatError::CorruptBootSector));
}

#[test]
fn mount_follows_mbr_partition() {
    const PART_START: u32 = 2048;
    let mut disk = RamDisk::new();
    {
        let mbr = disk.sector_mut(0);
        mbr[446 + 4] = 0x0C;
        mbr[446 + 8..446 + 12].copy_from_slice(&PART_START.to_le_bytes());
        mbr[510] = 0x55;
        mbr[511] = 0xAA;
    }
    *disk.sector_mut(PART_START) = boot_sector();

    let volume = mount(&mut disk).unwrap();
    assert_eq!(volume.fat_start, PART_START + RESERVED);
    assert_eq!(volume.data_start, PART_START + RESERVED + 2 * FAT_SIZE);
}

#[test]
fn next_cluster_follows_links() {
    let mut disk = blank_image();
    link_chain(&mut disk, &[8, 9, 10]);
    let volume = mount(&mut disk).unwrap();

    assert_eq!(next_cluster(&mut disk, &volume, 8), Ok(ClusterLink::Next(9)));
    assert_eq!(next_cluster(&mut disk, &volume, 9), Ok(ClusterLink::Next(10)));
    assert_eq!(
        next_cluster(&mut disk, &volume, 10),
        Ok(ClusterLink::EndOfChain)
    );
}

#[test]
fn next_cluster_rejects_reserved_link() {
    let mut disk = blank_image();
    set_fat(&mut disk, 8, 1);
    let volume = mount(&mut disk).unwrap();
    assert_eq!(
        next_cluster(&mut disk, &volume, 8),
        Err(FatError::CorruptFatEntry)
    );
}

#[test]
fn chain_walker_stops_on_self_loop() {
    let mut disk = blank_image();
    set_fat(&mut disk, 5, 5);
    let volume = mount(&mut disk).unwrap();

    let mut walker = ChainWalker::new(5);
    let result = loop {
        match walker.advance(&mut disk, &volume) {
            Ok(Some(_)) => continue,
            other => break other,
        }
    };
    assert_eq!(result, Err(FatError::CorruptFatEntry));
}

#[test]
fn resolve_reconstructs_long_name_within_sector() {
    let mut disk = sample_image();
    let volume = mount(&mut disk).unwrap();
    let root = ResolvedDirectory::root(&volume);

    let dir = resolve(&mut disk, &volume, &root, "LongDirectoryName").unwrap();
    assert_eq!(dir.long_name.as_str(), "LongDirectoryName");
    assert_eq!(dir.short_name.as_str(), "LONGDI~1");
    assert_eq!(dir.short_parent_path.as_str(), "/");
    assert_eq!(dir.long_parent_path.as_str(), "/");
    assert_eq!(dir.first_cluster, 6);
}

#[test]
fn resolve_reconstructs_long_name_across_cluster_boundary() {
    // 13 filler entries place a three-fragment name so its final fragment
    // lands at offset 480 and the short entry opens the next cluster.
    let name = "Boundary Crossing Long Name.txt";
    let raw_short = short("BOUNDA~1", "TXT");

    let mut disk = blank_image();
    let mut root = Vec::new();
    for i in 0..13u8 {
        let mut raw = short("FILL", "TXT");
        raw[4] = b'0' + i / 10;
        raw[5] = b'0' + i % 10;
        root.push(short_entry(raw, 0x20, 0, 0));
    }
    root.extend(lfn_entries(name, &raw_short));
    assert_eq!(root.len(), 16, "last fragment must sit at offset 480");
    root.push(short_entry(raw_short, 0x20, 12, 4));
    write_dir(&mut disk, &[2, 3], &root);
    write_file_content(&mut disk, &[12], b"spun");

    let volume = mount(&mut disk).unwrap();
    let root_dir = ResolvedDirectory::root(&volume);

    let mut out: [DirEntryInfo; 20] = core::array::from_fn(|_| DirEntryInfo::default());
    let count = list_dir(&mut disk, &volume, &root_dir, ListFields::ALL, &mut out).unwrap();
    assert!(out[..count].iter().any(|e| e.long_name.as_str() == name));

    let mut reader = FileReader::open(&mut disk, &volume, &root_dir, name).unwrap();
    assert_eq!(reader.size(), 4);

    let mut block = [0u8; BLOCK_SIZE];
    let n = reader.next_block(&mut disk, &volume, &mut block).unwrap();
    assert_eq!(n, Some(4));
    assert_eq!(&block[..4], b"spun");
}

#[test]
fn resolve_is_case_insensitive() {
    let mut disk = sample_image();
    let volume = mount(&mut disk).unwrap();
    let root = ResolvedDirectory::root(&volume);

    let dir = resolve(&mut disk, &volume, &root, "dOcUmEnTs").unwrap();
    assert_eq!(dir.long_name.as_str(), "Documents");
}

#[test]
fn resolve_tracks_parent_paths() {
    let mut disk = sample_image();
    let volume = mount(&mut disk).unwrap();
    let root = ResolvedDirectory::root(&volume);

    let docs = resolve(&mut disk, &volume, &root, "Documents").unwrap();
    let reports = resolve(&mut disk, &volume, &docs, "Reports").unwrap();
    assert_eq!(reports.long_parent_path.as_str(), "/Documents");
    assert_eq!(reports.short_parent_path.as_str(), "/DOCUME~1");
    assert_eq!(reports.first_cluster, 7);
}

#[test]
fn dot_and_dotdot_navigation() {
    let mut disk = sample_image();
    let volume = mount(&mut disk).unwrap();
    let root = ResolvedDirectory::root(&volume);

    let docs = resolve(&mut disk, &volume, &root, "Documents").unwrap();
    let same = resolve(&mut disk, &volume, &docs, ".").unwrap();
    assert_eq!(same.first_cluster, docs.first_cluster);

    let reports = resolve(&mut disk, &volume, &docs, "Reports").unwrap();
    let back = resolve(&mut disk, &volume, &reports, "..").unwrap();
    assert_eq!(back.first_cluster, docs.first_cluster);
    assert_eq!(back.long_name.as_str(), "Documents");

    let top = resolve(&mut disk, &volume, &docs, "..").unwrap();
    assert!(top.is_root());
    let still_top = resolve(&mut disk, &volume, &top, "..").unwrap();
    assert!(still_top.is_root());
}

#[test]
fn resolve_rejects_invalid_names() {
    let mut disk = sample_image();
    let volume = mount(&mut disk).unwrap();
    let root = ResolvedDirectory::root(&volume);

    for bad in ["", "   ", "a/b", "bad:name", "what?"] {
        assert_eq!(
            resolve(&mut disk, &volume, &root, bad),
            Err(FatError::InvalidName),
            "{bad:?} should be rejected"
        );
    }
}

#[test]
fn resolve_distinguishes_files_and_directories() {
    let mut disk = sample_image();
    let volume = mount(&mut disk).unwrap();
    let root = ResolvedDirectory::root(&volume);

    assert_eq!(
        resolve(&mut disk, &volume, &root, "README.TXT"),
        Err(FatError::NotDirectory)
    );
    assert_eq!(
        resolve(&mut disk, &volume, &root, "Missing"),
        Err(FatError::DirNotFound)
    );
    assert!(matches!(
        FileReader::open(&mut disk, &volume, &root, "Documents"),
        Err(FatError::NotFile)
    ));
    assert!(matches!(
        FileReader::open(&mut disk, &volume, &root, "NOPE.TXT"),
        Err(FatError::FileNotFound)
    ));
}

#[test]
fn empty_directory_reports_end_of_directory() {
    let mut disk = sample_image();
    let volume = mount(&mut disk).unwrap();
    let root = ResolvedDirectory::root(&volume);

    let empty = resolve(&mut disk, &volume, &root, "LongDirectoryName").unwrap();
    assert_eq!(
        resolve(&mut disk, &volume, &empty, "anything"),
        Err(FatError::EndOfDirectory)
    );
}

#[test]
fn listing_honors_field_mask_and_hidden_flag() {
    let mut disk = sample_image();
    let volume = mount(&mut disk).unwrap();
    let root = ResolvedDirectory::root(&volume);

    let mut out: [DirEntryInfo; 16] = core::array::from_fn(|_| DirEntryInfo::default());
    let count = list_dir(&mut disk, &volume, &root, ListFields::default(), &mut out).unwrap();
    assert_eq!(count, 4);
    let names: Vec<&str> = out[..count].iter().map(|e| e.long_name.as_str()).collect();
    assert_eq!(
        names,
        ["README.TXT", "Documents", "LongDirectoryName", "DATA.BIN"]
    );
    // Timestamps were not requested.
    assert_eq!(out[0].modified, None);

    let count = list_dir(&mut disk, &volume, &root, ListFields::ALL, &mut out).unwrap();
    assert_eq!(count, 5);
    assert!(out[..count]
        .iter()
        .any(|e| e.short_name.as_str() == "SECRET.DAT"));
    assert_eq!(
        out[0].modified,
        Some(Timestamp {
            year: 2024,
            month: 7,
            day: 15,
            hour: 12,
            minute: 34,
            second: 56,
        })
    );
}

#[test]
fn lister_is_lazy_and_finite() {
    let mut disk = sample_image();
    let volume = mount(&mut disk).unwrap();
    let root = ResolvedDirectory::root(&volume);

    let mut lister = DirLister::new(&root);
    let first = lister
        .next_entry(&mut disk, &volume, ListFields::default())
        .unwrap()
        .unwrap();
    assert_eq!(first.long_name.as_str(), "README.TXT");

    let mut rest = 0;
    while lister
        .next_entry(&mut disk, &volume, ListFields::default())
        .unwrap()
        .is_some()
    {
        rest += 1;
    }
    assert_eq!(rest, 3);
    // Exhausted listers stay exhausted.
    assert!(lister
        .next_entry(&mut disk, &volume, ListFields::default())
        .unwrap()
        .is_none());
}

#[test]
fn corrupt_lfn_checksum_is_reported() {
    let mut disk = blank_image();
    let raw_short = short("WRECK", "TXT");
    let mut root = lfn_entries("Wrecked Name.txt", &raw_short);
    for entry in root.iter_mut() {
        entry[13] ^= 0xFF;
    }
    root.push(short_entry(raw_short, 0x20, 0, 0));
    write_dir(&mut disk, &[2], &root);

    let volume = mount(&mut disk).unwrap();
    let root_dir = ResolvedDirectory::root(&volume);
    assert_eq!(
        resolve(&mut disk, &volume, &root_dir, "Wrecked Name.txt"),
        Err(FatError::CorruptFatEntry)
    );
}

#[test]
fn file_reader_streams_across_clusters() {
    let mut disk = sample_image();
    let volume = mount(&mut disk).unwrap();
    let root = ResolvedDirectory::root(&volume);

    let mut reader = FileReader::open(&mut disk, &volume, &root, "DATA.BIN").unwrap();
    assert_eq!(reader.size(), DATA_LEN as u32);

    let expected = data_content();
    let mut collected = Vec::new();
    let mut block = [0u8; BLOCK_SIZE];
    while let Some(n) = reader.next_block(&mut disk, &volume, &mut block).unwrap() {
        collected.extend_from_slice(&block[..n]);
    }
    assert_eq!(collected, expected);
    // A drained reader keeps reporting end of file.
    assert_eq!(reader.next_block(&mut disk, &volume, &mut block), Ok(None));
}

#[test]
fn truncated_chain_is_corruption() {
    let mut disk = sample_image();
    // DATA.BIN claims 1300 bytes but its chain now ends after one cluster.
    set_fat(&mut disk, 8, EOC);
    let volume = mount(&mut disk).unwrap();
    let root = ResolvedDirectory::root(&volume);

    let mut reader = FileReader::open(&mut disk, &volume, &root, "DATA.BIN").unwrap();
    let mut block = [0u8; BLOCK_SIZE];
    assert_eq!(
        reader.next_block(&mut disk, &volume, &mut block),
        Ok(Some(BLOCK_SIZE))
    );
    assert_eq!(
        reader.next_block(&mut disk, &volume, &mut block),
        Err(FatError::CorruptFatEntry)
    );
}
