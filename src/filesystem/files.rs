//! The open-file object and its data paths.

use byteorder::{ByteOrder, LittleEndian};

use crate::fat::{CacheMode, FatPartition, OnDiskDirEntry};
use crate::filesystem::{FileAttr, TimeSource, Timestamp, TimestampFlags};
use crate::{debug, trace, BlockDevice, Error, SectorIdx, MAX_FILE_SIZE};

/// Directories may not grow beyond 4095 sectors of entries.
pub(crate) const MAX_DIR_SIZE: u32 = 512 * 4095;

/// The different ways a file can be opened, as a set of flags.
///
/// Flags combine with `|`, subject to the usual rules: `TRUNC`, `APPEND`
/// and `AT_END` need `WRITE`; `EXCL` only means something next to
/// `CREAT`.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OpenFlags(u16);

impl OpenFlags {
    /// Open for reading.
    pub const READ: OpenFlags = OpenFlags(0x01);
    /// Open for writing.
    pub const WRITE: OpenFlags = OpenFlags(0x02);
    /// Open for reading and writing.
    pub const RDWR: OpenFlags = OpenFlags(0x03);
    /// Every write lands at the end of the file.
    pub const APPEND: OpenFlags = OpenFlags(0x04);
    /// Sync the directory entry to the device after every write.
    pub const SYNC: OpenFlags = OpenFlags(0x08);
    /// Throw away the existing contents on open.
    pub const TRUNC: OpenFlags = OpenFlags(0x10);
    /// Position at the end of the file on open.
    pub const AT_END: OpenFlags = OpenFlags(0x20);
    /// Create the file if it doesn't exist.
    pub const CREAT: OpenFlags = OpenFlags(0x40);
    /// With `CREAT`: fail if the file already exists.
    pub const EXCL: OpenFlags = OpenFlags(0x80);

    /// The in-memory copy of the directory entry needs writing back.
    pub(crate) const DIR_DIRTY: OpenFlags = OpenFlags(0x100);

    /// The flags a caller may pass to open.
    const OPEN_MASK: u16 = 0xFF;

    /// Are all of `other`'s flags set in this value?
    pub fn contains(self, other: OpenFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Is at least one of `other`'s flags set in this value?
    pub fn intersects(self, other: OpenFlags) -> bool {
        (self.0 & other.0) != 0
    }

    pub(crate) fn masked(self) -> OpenFlags {
        OpenFlags(self.0 & Self::OPEN_MASK)
    }

    pub(crate) fn clear(&mut self, other: OpenFlags) {
        self.0 &= !other.0;
    }
}

impl core::ops::BitOr for OpenFlags {
    type Output = OpenFlags;
    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for OpenFlags {
    fn bitor_assign(&mut self, rhs: OpenFlags) {
        self.0 |= rhs.0;
    }
}

/// A saved file position, cheap to take and restore.
///
/// Only valid for the file it came from, and only until that file is
/// truncated or removed.
#[derive(Debug, Copy, Clone)]
pub struct FilePos {
    pub(crate) position: u32,
    pub(crate) cluster: u32,
}

/// An open file or directory on a FAT volume.
///
/// A `File` borrows its [`FatPartition`] and holds everything else by
/// value, so it can be cheaply cloned for directory walking. Files on the
/// same partition share one cached sector; they may be used freely in any
/// order, but at most one `File` should hold [`OpenFlags::WRITE`] for any
/// given directory entry at a time.
///
/// Call [`File::close`] (or at least [`File::sync`]) when you are done
/// writing: dropping a dirty `File` loses the directory-entry update.
pub struct File<'p, D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    pub(crate) part: &'p FatPartition<D, T>,
    pub(crate) attr: FileAttr,
    pub(crate) flags: OpenFlags,
    /// First data cluster; zero for an empty file.
    pub(crate) first_cluster: u32,
    pub(crate) file_size: u32,
    /// The cluster holding the byte before `cur_position`; zero at
    /// position zero.
    pub(crate) cur_cluster: u32,
    pub(crate) cur_position: u32,
    /// Where our 32-byte directory entry lives.
    pub(crate) dir_sector: SectorIdx,
    /// Slot of our entry within its sector (0..15).
    pub(crate) dir_index: u8,
    /// First cluster of the directory holding our entry; zero when that
    /// directory is the volume root.
    pub(crate) dir_cluster: u32,
    /// How many long file name slots precede our entry.
    pub(crate) lfn_ord: u8,
    pub(crate) error: u8,
}

// A derived Clone would demand `D: Clone + T: Clone`, but the handle only
// holds a shared reference to the partition.
impl<'p, D, T> Clone for File<'p, D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    fn clone(&self) -> Self {
        File {
            part: self.part,
            attr: self.attr,
            flags: self.flags,
            first_cluster: self.first_cluster,
            file_size: self.file_size,
            cur_cluster: self.cur_cluster,
            cur_position: self.cur_position,
            dir_sector: self.dir_sector,
            dir_index: self.dir_index,
            dir_cluster: self.dir_cluster,
            lfn_ord: self.lfn_ord,
            error: self.error,
        }
    }
}

impl<'p, D, T> File<'p, D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    /// Sticky flag: a read against this file failed.
    pub const READ_ERROR: u8 = 0x01;
    /// Sticky flag: a write or sync against this file failed.
    pub const WRITE_ERROR: u8 = 0x02;

    /// Open the root directory of a partition.
    pub fn open_root(part: &'p FatPartition<D, T>) -> File<'p, D, T> {
        let attr = match part.fat_type() {
            crate::FatType::Fat12 | crate::FatType::Fat16 => FileAttr(FileAttr::ROOT_FIXED),
            crate::FatType::Fat32 => FileAttr(FileAttr::ROOT32),
        };
        File {
            part,
            attr,
            flags: OpenFlags::READ,
            first_cluster: 0,
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

    // ************************************************************************
    // Accessors
    // ************************************************************************

    /// Is this a plain file?
    pub fn is_file(&self) -> bool {
        self.attr.is_file()
    }

    /// Is this a directory (subdirectory or root)?
    pub fn is_dir(&self) -> bool {
        self.attr.is_dir()
    }

    /// Is this a subdirectory (not the root)?
    pub fn is_subdir(&self) -> bool {
        self.attr.is_subdir()
    }

    /// Is this the root directory?
    pub fn is_root(&self) -> bool {
        self.attr.is_root()
    }

    /// Does the directory entry carry the read-only attribute?
    pub fn is_read_only(&self) -> bool {
        self.attr.is_read_only()
    }

    /// Does the directory entry carry the hidden attribute?
    pub fn is_hidden(&self) -> bool {
        self.attr.is_hidden()
    }

    /// Does the directory entry carry the system attribute?
    pub fn is_system(&self) -> bool {
        self.attr.is_system()
    }

    /// The file's length in bytes. Zero for directories.
    pub fn length(&self) -> u32 {
        self.file_size
    }

    /// The current position in the file.
    pub fn position(&self) -> u32 {
        self.cur_position
    }

    /// How many bytes remain between the position and the end of the
    /// file.
    pub fn available(&self) -> u32 {
        if self.attr.is_file() {
            self.file_size - self.cur_position
        } else {
            0
        }
    }

    /// Are we at the end of the file?
    pub fn is_eof(&self) -> bool {
        self.attr.is_file() && self.cur_position == self.file_size
    }

    /// The file's first data cluster; zero for an empty file.
    pub fn first_cluster(&self) -> u32 {
        self.first_cluster
    }

    /// The sticky [`File::READ_ERROR`]/[`File::WRITE_ERROR`] flags.
    pub fn error_flags(&self) -> u8 {
        self.error
    }

    /// Clear the sticky error flags.
    pub fn clear_error(&mut self) {
        self.error = 0;
    }

    // ************************************************************************
    // Seeking
    // ************************************************************************

    /// Move the position back to the start of the file.
    pub fn rewind(&mut self) {
        self.cur_position = 0;
        self.cur_cluster = 0;
    }

    /// Set the position to `pos` bytes from the start of the file.
    ///
    /// The cluster chain is only re-walked as far as needed: seeking
    /// forward continues from the current cluster, seeking backward
    /// restarts from the first. On failure the position is unchanged.
    pub fn seek_set(&mut self, pos: u32) -> Result<(), Error<D::Error>> {
        // Optimize appending writes, which seek to where they are.
        if pos == self.cur_position {
            return Ok(());
        }
        if pos == 0 {
            self.rewind();
            return Ok(());
        }
        if self.attr.is_file() {
            if pos > self.file_size {
                return Err(Error::InvalidOffset);
            }
        } else if self.attr.is_root_fixed() {
            if pos > 32 * u32::from(self.part.root_dir_entry_count()) {
                return Err(Error::InvalidOffset);
            }
            self.cur_position = pos;
            return Ok(());
        }
        let shift = self.part.bytes_per_cluster_shift();
        let n_new = (pos - 1) >> shift;
        let saved_cluster = self.cur_cluster;
        let steps = if self.cur_position == 0 || n_new < (self.cur_position - 1) >> shift {
            // must follow the chain from the first cluster
            self.cur_cluster = if self.attr.is_root32() {
                self.part.root_dir_cluster()
            } else {
                self.first_cluster
            };
            n_new
        } else {
            n_new - ((self.cur_position - 1) >> shift)
        };
        for _ in 0..steps {
            match self.part.fat_get(self.cur_cluster) {
                Ok(Some(next)) => self.cur_cluster = next,
                Ok(None) => {
                    self.cur_cluster = saved_cluster;
                    return Err(Error::EndOfFile);
                }
                Err(e) => {
                    self.cur_cluster = saved_cluster;
                    return Err(e);
                }
            }
        }
        self.cur_position = pos;
        Ok(())
    }

    /// Move the position by `offset` bytes relative to where it is now.
    pub fn seek_cur(&mut self, offset: i32) -> Result<(), Error<D::Error>> {
        let pos = i64::from(self.cur_position) + i64::from(offset);
        if pos < 0 || pos > i64::from(u32::MAX) {
            return Err(Error::InvalidOffset);
        }
        self.seek_set(pos as u32)
    }

    /// Set the position to `offset` bytes back from the end of the file.
    pub fn seek_end(&mut self, offset: u32) -> Result<(), Error<D::Error>> {
        if offset > self.file_size {
            return Err(Error::InvalidOffset);
        }
        self.seek_set(self.file_size - offset)
    }

    /// Save the position for a later [`File::set_pos`].
    pub fn get_pos(&self) -> FilePos {
        FilePos {
            position: self.cur_position,
            cluster: self.cur_cluster,
        }
    }

    /// Restore a position saved with [`File::get_pos`].
    pub fn set_pos(&mut self, pos: FilePos) {
        self.cur_position = pos.position;
        self.cur_cluster = pos.cluster;
    }

    // ************************************************************************
    // Reading
    // ************************************************************************

    /// Read bytes from the file into `buffer`, advancing the position.
    ///
    /// Returns the number of bytes transferred, which is less than
    /// `buffer.len()` when the end of the file gets in the way. Reading at
    /// the end of the file transfers zero bytes and is not an error.
    pub fn read(&mut self, buffer: &mut [u8]) -> Result<usize, Error<D::Error>> {
        match self.read_impl(buffer) {
            Err(e) => {
                self.error |= Self::READ_ERROR;
                Err(e)
            }
            other => other,
        }
    }

    fn read_impl(&mut self, buffer: &mut [u8]) -> Result<usize, Error<D::Error>> {
        if !self.flags.contains(OpenFlags::READ) {
            return Err(Error::BadMode);
        }
        let part = self.part;
        let mut nbyte = buffer.len();
        if self.attr.is_file() {
            nbyte = nbyte.min((self.file_size - self.cur_position) as usize);
        } else if self.attr.is_root_fixed() {
            let limit = 32 * u32::from(part.root_dir_entry_count()) - self.cur_position;
            nbyte = nbyte.min(limit as usize);
        }
        let mut to_read = nbyte;
        let mut done = 0;
        while to_read > 0 {
            let offset = (self.cur_position & part.sector_mask()) as usize;
            let mut sector_of_cluster = 0u8;
            let sector = if self.attr.is_root_fixed() {
                part.root_dir_sector() + (self.cur_position >> part.bytes_per_sector_shift())
            } else {
                sector_of_cluster = part.sector_of_cluster(self.cur_position);
                if offset == 0 && sector_of_cluster == 0 {
                    // start of a new cluster
                    if self.cur_position == 0 {
                        self.cur_cluster = if self.attr.is_root32() {
                            part.root_dir_cluster()
                        } else {
                            self.first_cluster
                        };
                    } else {
                        match part.fat_get(self.cur_cluster)? {
                            Some(next) => self.cur_cluster = next,
                            None if self.attr.is_dir() => break,
                            None => {
                                return Err(Error::FormatError(
                                    "Cluster chain shorter than file size",
                                ))
                            }
                        }
                    }
                }
                part.cluster_start_sector(self.cur_cluster) + u32::from(sector_of_cluster)
            };
            let n;
            if offset != 0
                || to_read < part.bytes_per_sector() as usize
                || Some(sector) == part.cache_sector_number()
            {
                // partial sector, or the cache already holds this sector
                n = (part.bytes_per_sector() as usize - offset).min(to_read);
                let line = part.cache_fetch(sector, CacheMode::ForRead)?;
                buffer[done..done + n].copy_from_slice(&line.data[offset..offset + n]);
            } else if to_read >= 2 * part.bytes_per_sector() as usize {
                // whole sectors straight into the caller's buffer
                let mut ns = (to_read as u32) >> part.bytes_per_sector_shift();
                if !self.attr.is_root_fixed() {
                    let in_cluster =
                        u32::from(part.sectors_per_cluster()) - u32::from(sector_of_cluster);
                    ns = ns.min(in_cluster);
                }
                n = (ns << part.bytes_per_sector_shift()) as usize;
                if let Some(cached) = part.cache_sector_number() {
                    if cached >= sector && cached.0 < sector.0 + ns {
                        part.cache_sync_data()?;
                    }
                }
                part.read_sectors(sector, &mut buffer[done..done + n])?;
            } else {
                n = part.bytes_per_sector() as usize;
                part.read_sectors(sector, &mut buffer[done..done + n])?;
            }
            done += n;
            self.cur_position += n as u32;
            to_read -= n;
        }
        Ok(nbyte - to_read)
    }

    /// Read the next byte without moving the position.
    pub fn peek(&mut self) -> Result<Option<u8>, Error<D::Error>> {
        let pos = self.get_pos();
        let mut byte = [0u8; 1];
        let result = self.read(&mut byte);
        self.set_pos(pos);
        match result {
            Ok(1) => Ok(Some(byte[0])),
            Ok(_) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Read a line of text.
    ///
    /// Bytes are read until the buffer is full, the file ends, a `\n`
    /// arrives, or any byte in `delimiters` arrives (when given).
    /// Carriage returns are dropped. Returns the number of bytes stored;
    /// zero means end-of-file.
    pub fn read_line(
        &mut self,
        buffer: &mut [u8],
        delimiters: Option<&[u8]>,
    ) -> Result<usize, Error<D::Error>> {
        let mut stored = 0;
        while stored < buffer.len() {
            let mut byte = [0u8; 1];
            if self.read(&mut byte)? == 0 {
                break;
            }
            let byte = byte[0];
            if byte == b'\r' {
                continue;
            }
            buffer[stored] = byte;
            stored += 1;
            let done = match delimiters {
                None => byte == b'\n',
                Some(set) => set.contains(&byte),
            };
            if done {
                break;
            }
        }
        Ok(stored)
    }

    // ************************************************************************
    // Writing
    // ************************************************************************

    /// Write all of `buffer` at the current position, extending the file
    /// and allocating clusters as needed.
    pub fn write(&mut self, buffer: &[u8]) -> Result<(), Error<D::Error>> {
        match self.write_impl(buffer) {
            Err(e) => {
                self.error |= Self::WRITE_ERROR;
                Err(e)
            }
            other => other,
        }
    }

    fn write_impl(&mut self, buffer: &[u8]) -> Result<(), Error<D::Error>> {
        if !self.attr.is_file() {
            return Err(Error::OpenedDirAsFile);
        }
        if !self.flags.contains(OpenFlags::WRITE) {
            return Err(Error::BadMode);
        }
        if self.flags.contains(OpenFlags::APPEND) {
            let size = self.file_size;
            self.seek_set(size)?;
        }
        if buffer.len() as u64 > u64::from(MAX_FILE_SIZE - self.cur_position) {
            return Err(Error::NotEnoughSpace);
        }
        let part = self.part;
        let mut to_write = buffer.len();
        let mut done = 0;
        while to_write > 0 {
            let sector_of_cluster = part.sector_of_cluster(self.cur_position);
            let sector_offset = (self.cur_position & part.sector_mask()) as usize;
            if sector_of_cluster == 0 && sector_offset == 0 {
                // start of a new cluster
                if self.cur_cluster != 0 {
                    match part.fat_get(self.cur_cluster)? {
                        Some(next) => self.cur_cluster = next,
                        None => self.add_cluster()?,
                    }
                } else if self.first_cluster == 0 {
                    // allocate the first cluster of the file
                    self.add_cluster()?;
                    self.first_cluster = self.cur_cluster;
                } else {
                    self.cur_cluster = self.first_cluster;
                }
            }
            let sector = part.cluster_start_sector(self.cur_cluster) + u32::from(sector_of_cluster);
            let n;
            if sector_offset != 0 || to_write < part.bytes_per_sector() as usize {
                // partial sector - must go through the cache
                n = (part.bytes_per_sector() as usize - sector_offset).min(to_write);
                let mode = if sector_offset == 0 && self.cur_position >= self.file_size {
                    // fresh sector past the end of the file, nothing to
                    // read back first
                    CacheMode::ReserveForWrite
                } else {
                    CacheMode::ForWrite
                };
                {
                    let mut line = part.cache_fetch(sector, mode)?;
                    line.data[sector_offset..sector_offset + n]
                        .copy_from_slice(&buffer[done..done + n]);
                }
                if sector_offset + n == part.bytes_per_sector() as usize {
                    // the sector is full; pushing it out now keeps long
                    // sequential writes streaming
                    part.cache_sync_data()?;
                }
            } else if to_write >= 2 * part.bytes_per_sector() as usize {
                let in_cluster =
                    u32::from(part.sectors_per_cluster()) - u32::from(sector_of_cluster);
                let ns = ((to_write as u32) >> part.bytes_per_sector_shift()).min(in_cluster);
                n = (ns << part.bytes_per_sector_shift()) as usize;
                if let Some(cached) = part.cache_sector_number() {
                    if cached >= sector && cached.0 < sector.0 + ns {
                        // the bulk write below supersedes whatever the
                        // cache holds
                        part.cache_invalidate();
                    }
                }
                part.write_sectors(sector, &buffer[done..done + n])?;
            } else {
                n = part.bytes_per_sector() as usize;
                if part.cache_sector_number() == Some(sector) {
                    part.cache_invalidate();
                }
                part.write_sectors(sector, &buffer[done..done + n])?;
            }
            self.cur_position += n as u32;
            done += n;
            to_write -= n;
        }
        if self.cur_position > self.file_size {
            self.file_size = self.cur_position;
        }
        // the modify timestamp changes either way
        self.flags |= OpenFlags::DIR_DIRTY;
        if self.flags.contains(OpenFlags::SYNC) {
            self.sync()?;
        }
        Ok(())
    }

    // ************************************************************************
    // Cluster chain maintenance
    // ************************************************************************

    /// Append one cluster to the file's chain and step into it.
    pub(crate) fn add_cluster(&mut self) -> Result<(), Error<D::Error>> {
        self.cur_cluster = self.part.allocate_cluster(self.cur_cluster)?;
        self.flags |= OpenFlags::DIR_DIRTY;
        Ok(())
    }

    /// Append a zeroed cluster to a directory's chain.
    ///
    /// Leaves the first sector of the new cluster in the cache, and the
    /// position advanced by one whole cluster: the position/cluster
    /// invariant must hold even though no entries were appended.
    pub(crate) fn add_dir_cluster(&mut self) -> Result<(), Error<D::Error>> {
        if self.attr.is_root_fixed() || self.cur_position >= MAX_DIR_SIZE {
            return Err(Error::DirectoryFull);
        }
        self.add_cluster()?;
        let sector = self.part.cluster_start_sector(self.cur_cluster);
        {
            let mut line = self.part.cache_fetch(sector, CacheMode::ReserveForWrite)?;
            line.data.fill(0);
            for i in 1..self.part.sectors_per_cluster() {
                self.part.write_sectors(sector + u32::from(i), &line.data)?;
            }
        }
        self.cur_position += self.part.bytes_per_cluster();
        Ok(())
    }

    /// Reserve `length` bytes of contiguous storage for an empty file.
    ///
    /// The file keeps the length as its size; writing into it then never
    /// allocates, and [`File::contiguous_range`] is guaranteed to
    /// succeed.
    pub fn pre_allocate(&mut self, length: u32) -> Result<(), Error<D::Error>> {
        if !self.attr.is_file() {
            return Err(Error::OpenedDirAsFile);
        }
        if length == 0 || !self.flags.contains(OpenFlags::WRITE) || self.first_cluster != 0 {
            return Err(Error::BadMode);
        }
        let need = 1 + ((length - 1) >> self.part.bytes_per_cluster_shift());
        self.first_cluster = self.part.alloc_contiguous(need)?;
        self.file_size = length;
        self.flags |= OpenFlags::DIR_DIRTY;
        self.sync()
    }

    /// Cut the file off at the current position, freeing the clusters
    /// past it.
    pub fn truncate(&mut self) -> Result<(), Error<D::Error>> {
        if !self.attr.is_file() {
            return Err(Error::OpenedDirAsFile);
        }
        if !self.flags.contains(OpenFlags::WRITE) {
            return Err(Error::BadMode);
        }
        if self.first_cluster == 0 {
            return Ok(());
        }
        let mut to_free = 0;
        if self.cur_cluster != 0 {
            if let Some(next) = self.part.fat_get(self.cur_cluster)? {
                to_free = next;
                self.part.fat_put_eoc(self.cur_cluster)?;
            }
        } else {
            to_free = self.first_cluster;
            self.first_cluster = 0;
        }
        if to_free != 0 {
            self.part.free_chain(to_free)?;
        }
        self.file_size = self.cur_position;
        self.flags |= OpenFlags::DIR_DIRTY;
        self.sync()
    }

    /// Check the file occupies one contiguous run of sectors, and return
    /// the first and last sector of that run.
    pub fn contiguous_range(&self) -> Result<(SectorIdx, SectorIdx), Error<D::Error>> {
        if self.first_cluster == 0 {
            return Err(Error::NotContiguous);
        }
        let mut cluster = self.first_cluster;
        loop {
            match self.part.fat_get(cluster)? {
                Some(next) if next == cluster + 1 => cluster = next,
                Some(_) => return Err(Error::NotContiguous),
                None => {
                    let begin = self.part.cluster_start_sector(self.first_cluster);
                    let end = self.part.cluster_start_sector(cluster)
                        + (u32::from(self.part.sectors_per_cluster()) - 1);
                    return Ok((begin, end));
                }
            }
        }
    }

    // ************************************************************************
    // Directory entry upkeep
    // ************************************************************************

    /// Write the in-memory size, first cluster and timestamps back to the
    /// file's directory entry (if they changed) and flush the cache to
    /// the device.
    pub fn sync(&mut self) -> Result<(), Error<D::Error>> {
        match self.sync_impl() {
            Err(e) => {
                self.error |= Self::WRITE_ERROR;
                Err(e)
            }
            other => other,
        }
    }

    fn sync_impl(&mut self) -> Result<(), Error<D::Error>> {
        if self.flags.contains(OpenFlags::DIR_DIRTY) {
            let now = self.part.timestamp_now();
            {
                let mut line = self.part.cache_fetch(self.dir_sector, CacheMode::ForWrite)?;
                let start = usize::from(self.dir_index) * OnDiskDirEntry::LEN;
                let entry = &mut line.data[start..start + OnDiskDirEntry::LEN];
                // the entry may have been deleted through another handle
                if entry[0] == 0xE5 {
                    return Err(Error::NotFound);
                }
                if self.attr.is_file() {
                    LittleEndian::write_u32(&mut entry[28..32], self.file_size);
                }
                LittleEndian::write_u16(&mut entry[26..28], (self.first_cluster & 0xFFFF) as u16);
                LittleEndian::write_u16(&mut entry[20..22], (self.first_cluster >> 16) as u16);
                LittleEndian::write_u16(&mut entry[24..26], now.fat_date());
                LittleEndian::write_u16(&mut entry[18..20], now.fat_date());
                LittleEndian::write_u16(&mut entry[22..24], now.fat_time());
            }
            self.flags.clear(OpenFlags::DIR_DIRTY);
            trace!("Directory entry updated at {:?}/{}", self.dir_sector, self.dir_index);
        }
        self.part.update_info_sector()?;
        self.part.cache_sync()
    }

    /// Sync and give back the raw 32-byte directory entry for this file.
    pub fn dir_entry(&mut self) -> Result<[u8; 32], Error<D::Error>> {
        self.sync()?;
        let line = self.part.cache_fetch(self.dir_sector, CacheMode::ForRead)?;
        let start = usize::from(self.dir_index) * OnDiskDirEntry::LEN;
        let mut out = [0u8; 32];
        out.copy_from_slice(&line.data[start..start + OnDiskDirEntry::LEN]);
        Ok(out)
    }

    /// Overwrite a chosen subset of the entry's timestamps.
    pub fn set_timestamp(
        &mut self,
        which: TimestampFlags,
        timestamp: Timestamp,
    ) -> Result<(), Error<D::Error>> {
        if !self.attr.is_file() {
            return Err(Error::OpenedDirAsFile);
        }
        if !timestamp.fits_fat_range() {
            return Err(Error::InvalidTimestamp);
        }
        self.sync()?;
        {
            let mut line = self.part.cache_fetch(self.dir_sector, CacheMode::ForWrite)?;
            let start = usize::from(self.dir_index) * OnDiskDirEntry::LEN;
            let entry = &mut line.data[start..start + OnDiskDirEntry::LEN];
            let date = timestamp.fat_date();
            let time = timestamp.fat_time();
            if which.contains(TimestampFlags::ACCESS) {
                LittleEndian::write_u16(&mut entry[18..20], date);
            }
            if which.contains(TimestampFlags::CREATE) {
                LittleEndian::write_u16(&mut entry[16..18], date);
                LittleEndian::write_u16(&mut entry[14..16], time);
                // units of 1/100 second, carrying the odd second FAT time
                // cannot store
                entry[13] = if timestamp.seconds & 1 == 1 { 100 } else { 0 };
            }
            if which.contains(TimestampFlags::WRITE) {
                LittleEndian::write_u16(&mut entry[24..26], date);
                LittleEndian::write_u16(&mut entry[22..24], time);
            }
        }
        self.part.cache_sync()
    }

    /// Sync the file and give the handle up.
    pub fn close(mut self) -> Result<(), Error<D::Error>> {
        debug!("Closing file at {:?}/{}", self.dir_sector, self.dir_index);
        self.sync()
    }

    // ************************************************************************
    // Directory iteration plumbing
    // ************************************************************************

    /// Step the directory cursor one 32-byte entry forward and return a
    /// copy of that entry, or `None` at the end of the directory's data.
    ///
    /// A one-byte read forces the cache to the right sector (the byte
    /// itself is discarded). With `skip_read_ok`, entries that are not
    /// first in their sector trust the cache to still hold it from the
    /// previous step, which holds for a tight iteration loop.
    pub(crate) fn read_dir_cache(
        &mut self,
        skip_read_ok: bool,
    ) -> Result<Option<[u8; 32]>, Error<D::Error>> {
        let slot = ((self.cur_position >> 5) & 0xF) as usize;
        if slot == 0 || !skip_read_ok {
            let mut probe = [0u8; 1];
            if self.read(&mut probe)? == 0 {
                return Ok(None);
            }
            self.cur_position += 31;
        } else {
            self.cur_position += 32;
        }
        let sector = self
            .part
            .cache_sector_number()
            .ok_or(Error::FormatError("Directory sector not cached"))?;
        let line = self.part.cache_fetch(sector, CacheMode::ForRead)?;
        let mut entry = [0u8; 32];
        entry.copy_from_slice(&line.data[slot * 32..slot * 32 + 32]);
        Ok(Some(entry))
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
