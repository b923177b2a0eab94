use heapless::String;
use log::trace;

use super::cursor::{Attributes, DirCursor, DirEntry, ShortEntry};
use super::names::{self, LfnAccumulator, LfnTakeError};
use super::volume::VolumeLayout;
use super::{FatError, Timestamp, NAME_MAX, PATH_MAX};
use crate::device::BlockDevice;

/// The caller-visible working-directory cursor. Mutated only by replacing
/// it with the result of a successful resolve.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedDirectory {
    pub short_name: String<12>,
    pub long_name: String<NAME_MAX>,
    pub short_parent_path: String<PATH_MAX>,
    pub long_parent_path: String<PATH_MAX>,
    pub first_cluster: u32,
}

impl ResolvedDirectory {
    /// Sentinel for the volume root: named "/", no parent.
    pub fn root(volume: &VolumeLayout) -> Self {
        let mut short_name = String::new();
        let mut long_name = String::new();
        let _ = short_name.push('/');
        let _ = long_name.push('/');
        Self {
            short_name,
            long_name,
            short_parent_path: String::new(),
            long_parent_path: String::new(),
            first_cluster: volume.root_cluster,
        }
    }

    pub fn is_root(&self) -> bool {
        self.long_parent_path.is_empty() && self.long_name.as_str() == "/"
    }

    fn full_short_path<E>(&self) -> Result<String<PATH_MAX>, FatError<E>> {
        if self.is_root() {
            return Ok(root_path());
        }
        join_path(self.short_parent_path.as_str(), self.short_name.as_str())
    }

    fn full_long_path<E>(&self) -> Result<String<PATH_MAX>, FatError<E>> {
        if self.is_root() {
            return Ok(root_path());
        }
        join_path(self.long_parent_path.as_str(), self.long_name.as_str())
    }
}

fn root_path() -> String<PATH_MAX> {
    let mut path = String::new();
    let _ = path.push('/');
    path
}

fn join_path<E>(parent: &str, name: &str) -> Result<String<PATH_MAX>, FatError<E>> {
    let mut out: String<PATH_MAX> = String::new();
    if parent != "/" {
        out.push_str(parent).map_err(|_| FatError::PathTooDeep)?;
    }
    out.push('/').map_err(|_| FatError::PathTooDeep)?;
    out.push_str(name).map_err(|_| FatError::PathTooDeep)?;
    Ok(out)
}

pub(crate) struct Found {
    pub entry: ShortEntry,
    pub long_name: Option<String<NAME_MAX>>,
}

struct ScanOutcome {
    found: Option<Found>,
    /// Whether any short entry was examined before the scan ended.
    examined: bool,
}

fn scan_for<B: BlockDevice>(
    dev: &mut B,
    volume: &VolumeLayout,
    dir_cluster: u32,
    component: &str,
) -> Result<ScanOutcome, FatError<B::Error>> {
    let mut cursor = DirCursor::new(dir_cluster);
    let mut lfn = LfnAccumulator::new();
    let mut examined = false;

    while let Some(raw) = cursor.next_entry(dev, volume)? {
        match DirEntry::decode(&raw) {
            DirEntry::EndOfDirectory => break,
            DirEntry::Free => lfn.clear(),
            DirEntry::Lfn(fragment) => {
                if !lfn.push(&fragment) {
                    return Err(FatError::CorruptFatEntry);
                }
            }
            DirEntry::Short(entry) => {
                if entry.attributes.volume_id() {
                    lfn.clear();
                    continue;
                }
                examined = true;
                let long_name = take_long_name(&mut lfn, &entry)?;
                let matched = match &long_name {
                    Some(name) => {
                        names::ascii_eq_ignore_case(component.as_bytes(), name.as_bytes())
                    }
                    None => names::matches_short_name(component, &entry.raw_name),
                };
                if matched {
                    return Ok(ScanOutcome {
                        found: Some(Found { entry, long_name }),
                        examined,
                    });
                }
            }
        }
    }

    Ok(ScanOutcome {
        found: None,
        examined,
    })
}

fn take_long_name<E>(
    lfn: &mut LfnAccumulator,
    entry: &ShortEntry,
) -> Result<Option<String<NAME_MAX>>, FatError<E>> {
    match lfn.take_long_name(&entry.raw_name) {
        Ok(name) => Ok(name),
        Err(LfnTakeError::Mismatch) => Err(FatError::CorruptFatEntry),
        Err(LfnTakeError::TooLong) => Err(FatError::NameTooLong),
    }
}

pub(crate) fn find_entry<B: BlockDevice>(
    dev: &mut B,
    volume: &VolumeLayout,
    dir: &ResolvedDirectory,
    component: &str,
) -> Result<Option<Found>, FatError<B::Error>> {
    names::validate_component(component)?;
    let outcome = scan_for(dev, volume, dir.first_cluster, component)?;
    if outcome.found.is_none() && !outcome.examined {
        return Err(FatError::EndOfDirectory);
    }
    Ok(outcome.found)
}

/// Resolves one name component against `current` and returns the new
/// working-directory cursor. `.` is a no-op; `..` re-walks the stored
/// parent path from the root.
pub fn resolve<B: BlockDevice>(
    dev: &mut B,
    volume: &VolumeLayout,
    current: &ResolvedDirectory,
    name: &str,
) -> Result<ResolvedDirectory, FatError<B::Error>> {
    names::validate_component(name)?;
    if name == "." {
        return Ok(current.clone());
    }
    if name == ".." {
        if current.is_root() {
            return Ok(current.clone());
        }
        return resolve_path(dev, volume, current.long_parent_path.as_str());
    }

    let found = find_entry(dev, volume, current, name)?.ok_or(FatError::DirNotFound)?;
    if !found.entry.attributes.directory() {
        return Err(FatError::NotDirectory);
    }
    trace!(
        "fat: resolved {} cluster={}",
        name,
        found.entry.first_cluster
    );

    let mut short_name = String::new();
    let mut text = [0u8; 12];
    let len = names::short_name_to_text(&found.entry.raw_name, &mut text);
    for &b in &text[..len] {
        let _ = short_name.push(b as char);
    }
    let long_name = match found.long_name {
        Some(name) => name,
        None => {
            let mut fallback: String<NAME_MAX> = String::new();
            fallback
                .push_str(short_name.as_str())
                .map_err(|_| FatError::NameTooLong)?;
            fallback
        }
    };

    // A `..` entry pointing at the root stores cluster 0.
    let first_cluster = if found.entry.first_cluster >= 2 {
        found.entry.first_cluster
    } else {
        volume.root_cluster
    };

    Ok(ResolvedDirectory {
        short_name,
        long_name,
        short_parent_path: current.full_short_path()?,
        long_parent_path: current.full_long_path()?,
        first_cluster,
    })
}

/// Walks an absolute `/`-separated path down from the volume root.
pub fn resolve_path<B: BlockDevice>(
    dev: &mut B,
    volume: &VolumeLayout,
    path: &str,
) -> Result<ResolvedDirectory, FatError<B::Error>> {
    let mut current = ResolvedDirectory::root(volume);
    for component in path.split('/').filter(|c| !c.is_empty()) {
        current = resolve(dev, volume, &current, component)?;
    }
    Ok(current)
}

/// Which fields `list_dir` fills in, and whether hidden entries show up.
#[derive(Clone, Copy, Debug)]
pub struct ListFields {
    pub short_name: bool,
    pub long_name: bool,
    pub hidden: bool,
    pub timestamps: bool,
}

impl ListFields {
    pub const ALL: Self = Self {
        short_name: true,
        long_name: true,
        hidden: true,
        timestamps: true,
    };
}

impl Default for ListFields {
    fn default() -> Self {
        Self {
            short_name: true,
            long_name: true,
            hidden: false,
            timestamps: false,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DirEntryInfo {
    pub short_name: String<12>,
    pub long_name: String<NAME_MAX>,
    pub attributes: Attributes,
    pub first_cluster: u32,
    pub size: u32,
    pub modified: Option<Timestamp>,
}

/// Lazy, finite directory listing. Restart by constructing a fresh lister.
pub struct DirLister {
    cursor: DirCursor,
    lfn: LfnAccumulator,
    done: bool,
}

impl DirLister {
    pub fn new(dir: &ResolvedDirectory) -> Self {
        Self {
            cursor: DirCursor::new(dir.first_cluster),
            lfn: LfnAccumulator::new(),
            done: false,
        }
    }

    pub fn next_entry<B: BlockDevice>(
        &mut self,
        dev: &mut B,
        volume: &VolumeLayout,
        fields: ListFields,
    ) -> Result<Option<DirEntryInfo>, FatError<B::Error>> {
        if self.done {
            return Ok(None);
        }

        while let Some(raw) = self.cursor.next_entry(dev, volume)? {
            match DirEntry::decode(&raw) {
                DirEntry::EndOfDirectory => {
                    self.done = true;
                    return Ok(None);
                }
                DirEntry::Free => self.lfn.clear(),
                DirEntry::Lfn(fragment) => {
                    if !self.lfn.push(&fragment) {
                        return Err(FatError::CorruptFatEntry);
                    }
                }
                DirEntry::Short(entry) => {
                    if entry.attributes.volume_id() {
                        self.lfn.clear();
                        continue;
                    }
                    let long_name = take_long_name(&mut self.lfn, &entry)?;
                    if entry.attributes.hidden() && !fields.hidden {
                        continue;
                    }

                    let mut info = DirEntryInfo {
                        attributes: entry.attributes,
                        first_cluster: entry.first_cluster,
                        size: entry.size,
                        ..DirEntryInfo::default()
                    };
                    if fields.short_name {
                        let mut text = [0u8; 12];
                        let len = names::short_name_to_text(&entry.raw_name, &mut text);
                        for &b in &text[..len] {
                            let _ = info.short_name.push(b as char);
                        }
                    }
                    if fields.long_name {
                        match long_name {
                            Some(name) => info.long_name = name,
                            None => {
                                let mut text = [0u8; 12];
                                let len = names::short_name_to_text(&entry.raw_name, &mut text);
                                for &b in &text[..len] {
                                    let _ = info.long_name.push(b as char);
                                }
                            }
                        }
                    }
                    if fields.timestamps {
                        info.modified = Some(entry.modified);
                    }
                    return Ok(Some(info));
                }
            }
        }

        self.done = true;
        Ok(None)
    }
}

/// Fills `out` with up to one screenful of entries; returns how many.
pub fn list_dir<B: BlockDevice>(
    dev: &mut B,
    volume: &VolumeLayout,
    dir: &ResolvedDirectory,
    fields: ListFields,
    out: &mut [DirEntryInfo],
) -> Result<usize, FatError<B::Error>> {
    let mut lister = DirLister::new(dir);
    let mut count = 0usize;
    while count < out.len() {
        match lister.next_entry(dev, volume, fields)? {
            Some(info) => {
                out[count] = info;
                count += 1;
            }
            None => break,
        }
    }
    Ok(count)
}
