//! Directory traversal and the operations that change directories.

use crate::fat::{
    lfn_checksum, lfn_slot_entry, new_short_entry, CacheMode, FatType, OnDiskDirEntry,
    OnDiskLfnEntry,
};
use crate::filesystem::{
    is_dir_separator, parse_path_component, Attributes, FileAttr, FileName, FilenameError,
    OpenFlags, ShortFileName, TimeSource, Timestamp,
};
use crate::{debug, BlockDevice, Error, File, SectorIdx};

/// Marks a deleted directory slot.
const NAME_DELETED: u8 = 0xE5;

/// Represents a directory entry, which tells you about other files and
/// directories.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DirEntry {
    /// The name of the file
    pub name: ShortFileName,
    /// When the file was last modified
    pub mtime: Timestamp,
    /// When the file was first created
    pub ctime: Timestamp,
    /// The file attributes (Read Only, Archive, etc)
    pub attributes: Attributes,
    /// The starting cluster of the file. The FAT tells us the following
    /// clusters.
    pub first_cluster: u32,
    /// The size of the file in bytes.
    pub size: u32,
}

impl<'p, D, T> File<'p, D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    // ************************************************************************
    // Listing
    // ************************************************************************

    /// Read the next file or subdirectory entry from this directory.
    ///
    /// Deleted slots, long file name fragments, volume labels and the
    /// `.`/`..` entries are skipped. Returns `None` when the directory is
    /// exhausted.
    pub fn read_dir(&mut self) -> Result<Option<DirEntry>, Error<D::Error>> {
        if !self.attr.is_dir() {
            return Err(Error::OpenedFileAsDir);
        }
        if self.cur_position & 0x1F != 0 {
            return Err(Error::InvalidOffset);
        }
        loop {
            let mut raw = [0u8; 32];
            if self.read(&mut raw)? != 32 {
                return Ok(None);
            }
            let entry = OnDiskDirEntry::new(&raw);
            if entry.is_end() {
                return Ok(None);
            }
            if entry.is_deleted() || raw[0] == b'.' {
                continue;
            }
            if entry.is_file_or_subdir() {
                return Ok(Some(entry.decode(self.part.fat_type())));
            }
        }
    }

    // ************************************************************************
    // Opening
    // ************************************************************************

    /// Open a file or directory by path, relative to the directory `dir`.
    ///
    /// A leading separator makes the path absolute; a path of only
    /// separators opens the root itself. `dir` is not repositioned -
    /// traversal happens on scoped copies.
    pub fn open(
        dir: &File<'p, D, T>,
        path: &str,
        flags: OpenFlags,
    ) -> Result<File<'p, D, T>, Error<D::Error>> {
        if !dir.attr.is_dir() {
            return Err(Error::OpenedFileAsDir);
        }
        let mut path = path;
        let mut cursor = if path.bytes().next().is_some_and(is_dir_separator) {
            path = path.trim_start_matches('/');
            if path.is_empty() {
                return Ok(Self::open_root(dir.part));
            }
            Self::open_root(dir.part)
        } else {
            dir.clone()
        };
        loop {
            let (fname, rest) =
                parse_path_component(path).map_err(Error::FilenameError)?;
            if rest.is_empty() {
                return Self::open_in(&mut cursor, &fname, flags);
            }
            cursor = Self::open_in(&mut cursor, &fname, OpenFlags::READ)?;
            path = rest;
        }
    }

    /// Open an entry of the directory `dir` by name.
    ///
    /// With [`OpenFlags::CREAT`], a missing file is created (reusing
    /// deleted slots where possible, growing the directory otherwise);
    /// adding [`OpenFlags::EXCL`] makes an existing entry an error
    /// instead.
    pub fn open_in(
        dir: &mut File<'p, D, T>,
        fname: &FileName,
        flags: OpenFlags,
    ) -> Result<File<'p, D, T>, Error<D::Error>> {
        if !dir.attr.is_dir() {
            return Err(Error::OpenedFileAsDir);
        }
        let need = fname.lfn_slots() + 1;
        // long-name chain state
        let mut chain_len = 0u8;
        let mut chain_expect = 0u8;
        let mut chain_csum = 0u8;
        let mut chain_match = false;
        // free-slot run tracking for creation
        let mut found_run = None;
        let mut run_start = 0;
        let mut run_len = 0;
        dir.rewind();
        let insertion = loop {
            let index = dir.cur_position / 32;
            let Some(raw) = dir.read_dir_cache(false)? else {
                break found_run.unwrap_or(index);
            };
            let entry = OnDiskDirEntry::new(&raw);
            if entry.is_end() {
                break found_run.unwrap_or(index);
            }
            if entry.is_deleted() {
                if run_len == 0 {
                    run_start = index;
                }
                run_len += 1;
                if run_len >= need && found_run.is_none() {
                    found_run = Some(run_start);
                }
                chain_len = 0;
                continue;
            }
            run_len = 0;
            if entry.is_lfn() {
                let lfn = OnDiskLfnEntry::new(&raw);
                if lfn.is_last() && lfn.ordinal() != 0 {
                    chain_len = lfn.ordinal();
                    chain_expect = chain_len - 1;
                    chain_csum = lfn.checksum();
                    chain_match = match fname.lfn {
                        Some(long) => {
                            u32::from(chain_len) + 1 == need
                                && lfn.fragment_matches(long, chain_len)
                        }
                        None => false,
                    };
                } else if chain_len != 0
                    && lfn.ordinal() == chain_expect
                    && lfn.checksum() == chain_csum
                {
                    chain_expect -= 1;
                    if chain_match {
                        chain_match = fname
                            .lfn
                            .map(|long| lfn.fragment_matches(long, lfn.ordinal()))
                            .unwrap_or(false);
                    }
                } else {
                    chain_len = 0;
                    chain_match = false;
                }
                continue;
            }
            if !entry.is_file_or_subdir() {
                // volume label
                chain_len = 0;
                continue;
            }
            let chain_valid =
                chain_len != 0 && chain_expect == 0 && chain_csum == lfn_checksum(&raw[0..11]);
            let matched = match (&fname.lfn, &fname.sfn) {
                (Some(_), _) => chain_valid && chain_match,
                (None, Some(sfn)) => entry.matches(sfn),
                (None, None) => false,
            };
            if matched {
                if flags.contains(OpenFlags::CREAT | OpenFlags::EXCL) {
                    return Err(Error::FileAlreadyExists);
                }
                let lfn_ord = if chain_valid { chain_len } else { 0 };
                return Self::open_cached_entry(dir, index as u16, flags, lfn_ord);
            }
            chain_len = 0;
            chain_match = false;
        };
        // not found
        if !flags.contains(OpenFlags::CREAT) {
            return Err(Error::NotFound);
        }
        let index = Self::create_entry(dir, fname, insertion)?;
        Self::open_cached_entry(dir, index as u16, flags, fname.lfn_slots() as u8)
    }

    /// Open the `index`th entry of the directory `dir`.
    ///
    /// The slot before the entry is probed so a long file name prefix is
    /// noticed and validated.
    pub fn open_by_index(
        dir: &mut File<'p, D, T>,
        index: u16,
        flags: OpenFlags,
    ) -> Result<File<'p, D, T>, Error<D::Error>> {
        if !dir.attr.is_dir() {
            return Err(Error::OpenedFileAsDir);
        }
        // opening a known slot cannot "create" anything
        if flags.contains(OpenFlags::EXCL) {
            return Err(Error::BadMode);
        }
        let mut checksum = 0;
        let mut lfn_ord = 0;
        if index > 0 {
            dir.seek_set(32 * (u32::from(index) - 1))?;
            let raw = dir.read_dir_cache(false)?.ok_or(Error::NotFound)?;
            let entry = OnDiskDirEntry::new(&raw);
            if entry.is_lfn() {
                let lfn = OnDiskLfnEntry::new(&raw);
                if lfn.ordinal() == 1 {
                    checksum = lfn.checksum();
                    // the longest possible chain still fits in the slots
                    // before us
                    lfn_ord = if index > 20 { 20 } else { index as u8 };
                }
            }
        } else {
            dir.rewind();
        }
        let raw = dir.read_dir_cache(false)?.ok_or(Error::NotFound)?;
        if raw[0] == NAME_DELETED || raw[0] == 0x00 || raw[0] == b'.' {
            return Err(Error::NotFound);
        }
        if lfn_ord > 0 && checksum != lfn_checksum(&raw[0..11]) {
            return Err(Error::LfnChecksumMismatch);
        }
        Self::open_cached_entry(dir, index, flags, lfn_ord)
    }

    /// Open the next file or subdirectory of the directory `dir`,
    /// advancing its position. Returns `None` once the directory is
    /// exhausted.
    pub fn open_next(
        dir: &mut File<'p, D, T>,
        flags: OpenFlags,
    ) -> Result<Option<File<'p, D, T>>, Error<D::Error>> {
        if !dir.attr.is_dir() {
            return Err(Error::OpenedFileAsDir);
        }
        if dir.cur_position & 0x1F != 0 {
            return Err(Error::InvalidOffset);
        }
        let mut checksum = 0;
        let mut lfn_ord = 0u8;
        loop {
            let index = dir.cur_position / 32;
            let Some(raw) = dir.read_dir_cache(false)? else {
                return Ok(None);
            };
            let entry = OnDiskDirEntry::new(&raw);
            if entry.is_end() {
                return Ok(None);
            }
            if raw[0] == b'.' || entry.is_deleted() {
                lfn_ord = 0;
            } else if entry.is_file_or_subdir() {
                if lfn_ord > 0 && checksum != lfn_checksum(&raw[0..11]) {
                    return Err(Error::LfnChecksumMismatch);
                }
                return Ok(Some(Self::open_cached_entry(
                    dir,
                    index as u16,
                    flags,
                    lfn_ord,
                )?));
            } else if entry.is_lfn() {
                let lfn = OnDiskLfnEntry::new(&raw);
                if lfn.is_last() {
                    lfn_ord = lfn.ordinal();
                    checksum = lfn.checksum();
                }
            } else {
                lfn_ord = 0;
            }
        }
    }

    /// Open the directory entry the cache currently holds (put there by
    /// [`File::read_dir_cache`]).
    fn open_cached_entry(
        dir: &File<'p, D, T>,
        index: u16,
        flags: OpenFlags,
        lfn_ord: u8,
    ) -> Result<File<'p, D, T>, Error<D::Error>> {
        let part = dir.part;
        let sector = part
            .cache_sector_number()
            .ok_or(Error::FormatError("Directory entry not cached"))?;
        let mut raw = [0u8; 32];
        {
            let line = part.cache_fetch(sector, CacheMode::ForRead)?;
            let start = usize::from(index & 0xF) * 32;
            raw.copy_from_slice(&line.data[start..start + 32]);
        }
        let entry = OnDiskDirEntry::new(&raw);
        if !entry.is_file_or_subdir() {
            return Err(Error::NotFound);
        }
        let mut attr = FileAttr(entry.raw_attr() & FileAttr::COPY_MASK);
        if entry.is_file_entry() {
            attr |= FileAttr::FILE;
        }
        if flags.intersects(OpenFlags::WRITE | OpenFlags::TRUNC | OpenFlags::AT_END) {
            if attr.is_subdir() {
                return Err(Error::OpenedDirAsFile);
            }
            if attr.is_read_only() {
                return Err(Error::ReadOnly);
            }
        }
        let mut file = File {
            part,
            attr,
            flags: flags.masked(),
            first_cluster: 0,
            file_size: 0,
            cur_cluster: 0,
            cur_position: 0,
            dir_sector: sector,
            dir_index: (index & 0xF) as u8,
            dir_cluster: dir.first_cluster,
            lfn_ord,
            error: 0,
        };
        let first_cluster = entry.first_cluster(FatType::Fat32);
        if flags.contains(OpenFlags::TRUNC) {
            if !flags.contains(OpenFlags::WRITE) {
                return Err(Error::BadMode);
            }
            if first_cluster != 0 {
                part.free_chain(first_cluster)?;
            }
            // entry now disagrees with the chain we just freed
            file.flags |= OpenFlags::DIR_DIRTY;
        } else {
            file.first_cluster = first_cluster;
            file.file_size = entry.file_size();
        }
        if flags.contains(OpenFlags::AT_END) {
            let size = file.file_size;
            file.seek_set(size)?;
        }
        Ok(file)
    }

    // ************************************************************************
    // Entry creation
    // ************************************************************************

    /// Write the long-name slots (if any) and a blank short entry for
    /// `fname`, starting at slot `insertion`. Returns the index of the
    /// short entry and leaves it in the cache.
    fn create_entry(
        dir: &mut File<'p, D, T>,
        fname: &FileName,
        insertion: u32,
    ) -> Result<u32, Error<D::Error>> {
        let Some(sfn) = &fname.sfn else {
            return Err(Error::FilenameError(FilenameError::NeedsShortAlias));
        };
        debug!("Creating entry {:?} at slot {}", sfn, insertion);
        let mut slot = insertion;
        if let Some(long) = fname.lfn {
            let total = fname.lfn_slots() as u8;
            let checksum = sfn.csum();
            for ordinal in (1..=total).rev() {
                let data = lfn_slot_entry(long, ordinal, ordinal == total, checksum);
                Self::write_dir_slot(dir, slot, &data)?;
                slot += 1;
            }
        }
        let data = new_short_entry(sfn, 0, dir.part.timestamp_now());
        Self::write_dir_slot(dir, slot, &data)?;
        Ok(slot)
    }

    /// Write 32 bytes into the given slot of the directory `dir`, growing
    /// the directory by a cluster if the slot lies just past its data.
    fn write_dir_slot(
        dir: &mut File<'p, D, T>,
        slot: u32,
        data: &[u8; 32],
    ) -> Result<(), Error<D::Error>> {
        let pos = slot * 32;
        dir.seek_set(pos)?;
        // a discarded one-byte read walks the chain and loads the sector
        let mut probe = [0u8; 1];
        if dir.read(&mut probe)? == 0 {
            dir.add_dir_cluster()?;
            dir.seek_set(pos)?;
            if dir.read(&mut probe)? == 0 {
                return Err(Error::DirectoryFull);
            }
        }
        let part = dir.part;
        let sector = part
            .cache_sector_number()
            .ok_or(Error::FormatError("Directory sector not cached"))?;
        {
            let mut line = part.cache_fetch(sector, CacheMode::ForWrite)?;
            let start = (pos & part.sector_mask()) as usize;
            line.data[start..start + 32].copy_from_slice(data);
        }
        dir.seek_set(pos + 32)?;
        Ok(())
    }

    // ************************************************************************
    // mkdir
    // ************************************************************************

    /// Make a directory at `path`, relative to the directory `dir`, and
    /// open it. With `create_parents`, missing intermediate directories
    /// are created along the way.
    pub fn mkdir(
        dir: &File<'p, D, T>,
        path: &str,
        create_parents: bool,
    ) -> Result<File<'p, D, T>, Error<D::Error>> {
        if !dir.attr.is_dir() {
            return Err(Error::OpenedFileAsDir);
        }
        let mut path = path;
        let mut cursor = if path.bytes().next().is_some_and(is_dir_separator) {
            path = path.trim_start_matches('/');
            Self::open_root(dir.part)
        } else {
            dir.clone()
        };
        loop {
            let (fname, rest) =
                parse_path_component(path).map_err(Error::FilenameError)?;
            if rest.is_empty() {
                return Self::mkdir_in(&mut cursor, &fname);
            }
            cursor = match Self::open_in(&mut cursor, &fname, OpenFlags::READ) {
                Ok(sub) => sub,
                Err(Error::NotFound) if create_parents => Self::mkdir_in(&mut cursor, &fname)?,
                Err(e) => return Err(e),
            };
            path = rest;
        }
    }

    /// Make one directory in `dir` and open it.
    fn mkdir_in(
        dir: &mut File<'p, D, T>,
        fname: &FileName,
    ) -> Result<File<'p, D, T>, Error<D::Error>> {
        let part = dir.part;
        // create a plain file to claim the entry
        let mut new_dir = Self::open_in(
            dir,
            fname,
            OpenFlags::CREAT | OpenFlags::EXCL | OpenFlags::RDWR,
        )?;
        // convert it to a directory
        new_dir.flags = OpenFlags::READ;
        new_dir.attr = FileAttr(FileAttr::SUBDIR);
        new_dir.add_dir_cluster()?;
        new_dir.first_cluster = new_dir.cur_cluster;
        new_dir.rewind();
        // push the first cluster into the entry on the device
        new_dir.sync()?;
        // fix the attribute byte, and keep the synced entry as the
        // template for the dot entries
        let mut template = [0u8; 32];
        {
            let mut line = part.cache_fetch(new_dir.dir_sector, CacheMode::ForWrite)?;
            let start = usize::from(new_dir.dir_index) * 32;
            let entry = &mut line.data[start..start + 32];
            entry[11] = Attributes::DIRECTORY;
            template.copy_from_slice(entry);
        }
        // build '.' (pointing at ourselves) ...
        let mut dot = template;
        dot[0] = b'.';
        for b in &mut dot[1..11] {
            *b = b' ';
        }
        let first_sector = part.cluster_start_sector(new_dir.first_cluster);
        {
            let mut line = part.cache_fetch(first_sector, CacheMode::ForWrite)?;
            line.data[0..32].copy_from_slice(&dot);
            // ... and '..' pointing at our parent (cluster zero when the
            // parent is the root)
            dot[1] = b'.';
            dot[26..28].copy_from_slice(&((dir.first_cluster & 0xFFFF) as u16).to_le_bytes());
            dot[20..22].copy_from_slice(&((dir.first_cluster >> 16) as u16).to_le_bytes());
            line.data[32..64].copy_from_slice(&dot);
        }
        part.cache_sync()?;
        Ok(new_dir)
    }

    // ************************************************************************
    // Removal
    // ************************************************************************

    /// Delete this file: free its cluster chain and release its directory
    /// entry, along with any long file name slots in front of it.
    pub fn remove(self) -> Result<(), Error<D::Error>> {
        if !self.attr.is_file() {
            return Err(Error::OpenedDirAsFile);
        }
        if !self.flags.contains(OpenFlags::WRITE) {
            return Err(Error::BadMode);
        }
        debug!("Removing entry at {:?}/{}", self.dir_sector, self.dir_index);
        if self.first_cluster != 0 {
            self.part.free_chain(self.first_cluster)?;
        }
        if self.lfn_ord > 0 {
            let slot = self.entry_slot_in_dir()?;
            let mut cursor = self.containing_dir();
            for ordinal in 1..=u32::from(self.lfn_ord) {
                let name_slot = slot
                    .checked_sub(ordinal)
                    .ok_or(Error::FormatError("Name slots missing before entry"))?;
                Self::mark_slot_deleted(&mut cursor, name_slot)?;
            }
        }
        {
            let mut line = self.part.cache_fetch(self.dir_sector, CacheMode::ForWrite)?;
            line.data[usize::from(self.dir_index) * 32] = NAME_DELETED;
        }
        self.part.cache_sync()
    }

    /// A fresh read cursor over the directory holding our entry.
    fn containing_dir(&self) -> File<'p, D, T> {
        if self.dir_cluster == 0 {
            return Self::open_root(self.part);
        }
        File {
            part: self.part,
            attr: FileAttr(FileAttr::SUBDIR),
            flags: OpenFlags::READ,
            first_cluster: self.dir_cluster,
            file_size: 0,
            cur_cluster: 0,
            cur_position: 0,
            dir_sector: SectorIdx(0),
            dir_index: 0,
            dir_cluster: 0,
            lfn_ord: 0,
            error: 0,
        }
    }

    /// Which slot of its containing directory holds our entry.
    fn entry_slot_in_dir(&self) -> Result<u32, Error<D::Error>> {
        let part = self.part;
        if self.dir_cluster == 0 && part.fat_type() != FatType::Fat32 {
            let sectors_in = self.dir_sector.0 - part.root_dir_sector().0;
            return Ok(sectors_in * 16 + u32::from(self.dir_index));
        }
        let spc = u32::from(part.sectors_per_cluster());
        let mut cluster = if self.dir_cluster == 0 {
            part.root_dir_cluster()
        } else {
            self.dir_cluster
        };
        let mut walked = 0;
        loop {
            let start = part.cluster_start_sector(cluster);
            if self.dir_sector >= start && self.dir_sector.0 < start.0 + spc {
                return Ok(
                    walked * spc * 16 + (self.dir_sector.0 - start.0) * 16 + u32::from(self.dir_index)
                );
            }
            match part.fat_get(cluster)? {
                Some(next) => {
                    cluster = next;
                    walked += 1;
                }
                None => return Err(Error::FormatError("Entry not found in its directory")),
            }
        }
    }

    /// Flag one slot of the directory `dir` as deleted.
    fn mark_slot_deleted(dir: &mut File<'p, D, T>, slot: u32) -> Result<(), Error<D::Error>> {
        let pos = slot * 32;
        dir.seek_set(pos)?;
        let mut probe = [0u8; 1];
        if dir.read(&mut probe)? != 1 {
            return Err(Error::FormatError("Name slot outside its directory"));
        }
        let part = dir.part;
        let sector = part
            .cache_sector_number()
            .ok_or(Error::FormatError("Directory sector not cached"))?;
        let mut line = part.cache_fetch(sector, CacheMode::ForWrite)?;
        line.data[(pos & part.sector_mask()) as usize] = NAME_DELETED;
        Ok(())
    }

    /// Delete this directory. It must be empty.
    pub fn rmdir(mut self) -> Result<(), Error<D::Error>> {
        if self.attr.is_root() {
            return Err(Error::BadMode);
        }
        if !self.attr.is_subdir() {
            return Err(Error::OpenedFileAsDir);
        }
        self.rewind();
        loop {
            let Some(raw) = self.read_dir_cache(true)? else {
                break;
            };
            let entry = OnDiskDirEntry::new(&raw);
            if entry.is_end() {
                break;
            }
            if entry.is_deleted() || raw[0] == b'.' {
                continue;
            }
            if entry.is_file_or_subdir() {
                return Err(Error::DirectoryNotEmpty);
            }
        }
        // delete like a plain file, so remove() frees the cluster chain
        self.attr = FileAttr(FileAttr::FILE);
        self.flags |= OpenFlags::WRITE;
        self.remove()
    }

    /// Delete this directory and everything inside it, recursively. The
    /// root directory is emptied but not itself removed.
    pub fn remove_recursive(mut self) -> Result<(), Error<D::Error>> {
        if !self.attr.is_dir() {
            return Err(Error::OpenedFileAsDir);
        }
        self.rewind();
        loop {
            let index = self.cur_position / 32;
            let Some(raw) = self.read_dir_cache(false)? else {
                break;
            };
            let entry = OnDiskDirEntry::new(&raw);
            if entry.is_end() {
                break;
            }
            if entry.is_deleted() || raw[0] == b'.' {
                continue;
            }
            if !entry.is_file_or_subdir() {
                continue;
            }
            let mut child = Self::open_by_index(&mut self, index as u16, OpenFlags::READ)?;
            if child.attr.is_subdir() {
                child.remove_recursive()?;
            } else {
                // deletion doesn't honour read-only
                child.flags |= OpenFlags::WRITE;
                child.remove()?;
            }
            // the recursion may have moved our cursor
            if self.cur_position != 32 * (index + 1) {
                self.seek_set(32 * (index + 1))?;
            }
        }
        if !self.attr.is_root() {
            self.rmdir()?;
        }
        Ok(())
    }

    // ************************************************************************
    // Renaming
    // ************************************************************************

    /// Move this file or subdirectory to `new_path` under the directory
    /// `dest_dir` (which must be on the same volume). The destination
    /// must not already exist.
    pub fn rename(
        &mut self,
        dest_dir: &File<'p, D, T>,
        new_path: &str,
    ) -> Result<(), Error<D::Error>> {
        if !(self.attr.is_file() || self.attr.is_subdir()) {
            return Err(Error::BadMode);
        }
        if !core::ptr::eq(self.part, dest_dir.part) {
            return Err(Error::VolumeMismatch);
        }
        let part = self.part;
        self.sync()?;
        let mut old = self.clone();
        // snapshot our entry before anything moves
        let mut snapshot = [0u8; 32];
        {
            let line = part.cache_fetch(self.dir_sector, CacheMode::ForRead)?;
            let start = usize::from(self.dir_index) * 32;
            snapshot.copy_from_slice(&line.data[start..start + 32]);
        }
        // claim an entry at the destination
        let (new_file, scratch_cluster) = if self.attr.is_file() {
            let f = Self::open(
                dest_dir,
                new_path,
                OpenFlags::CREAT | OpenFlags::EXCL | OpenFlags::WRITE,
            )?;
            (f, 0)
        } else {
            let d = Self::mkdir(dest_dir, new_path, false)?;
            let cluster = d.first_cluster;
            (d, cluster)
        };
        // become the new entry
        self.dir_sector = new_file.dir_sector;
        self.dir_index = new_file.dir_index;
        self.dir_cluster = new_file.dir_cluster;
        self.lfn_ord = new_file.lfn_ord;
        // keep the new name and NT byte, take everything else (including
        // the cluster fields, which still point at our data) from the
        // snapshot
        {
            let mut line = part.cache_fetch(self.dir_sector, CacheMode::ForWrite)?;
            let start = usize::from(self.dir_index) * 32;
            let entry = &mut line.data[start..start + 32];
            entry[13..32].copy_from_slice(&snapshot[13..32]);
            entry[11] = snapshot[11];
        }
        if scratch_cluster != 0 {
            // mkdir built a correct '..' in a cluster we won't use; lift
            // it into our own first cluster and free the scratch one
            let mut dotdot = [0u8; 32];
            {
                let line =
                    part.cache_fetch(part.cluster_start_sector(scratch_cluster), CacheMode::ForRead)?;
                dotdot.copy_from_slice(&line.data[32..64]);
            }
            part.free_chain(scratch_cluster)?;
            {
                let mut line = part
                    .cache_fetch(part.cluster_start_sector(self.first_cluster), CacheMode::ForWrite)?;
                line.data[32..64].copy_from_slice(&dotdot);
            }
        }
        // release the old entry; its chain now belongs to the new one
        old.first_cluster = 0;
        old.attr = FileAttr(FileAttr::FILE);
        old.flags = OpenFlags::WRITE;
        old.remove()?;
        part.cache_sync()
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
