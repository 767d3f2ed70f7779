//! The FAT partition service.
//!
//! A [`FatPartition`] owns the block device and everything the file and
//! directory code needs to share: the volume geometry, the File
//! Allocation Table, and the single cached sector every data path goes
//! through. All services take `&self` so any number of open files can
//! borrow one partition.

use core::cell::{Cell, RefCell, RefMut};

use crate::fat::{Bpb, FatType, InfoSector, RESERVED_ENTRIES};
use crate::filesystem::{TimeSource, Timestamp};
use crate::{
    debug, trace, warn, BlockDevice, Error, SectorCount, SectorIdx, SECTOR_SIZE, SECTOR_SIZE_U32,
};

/// Bytes-per-sector as a power of two.
const SECTOR_SHIFT: u32 = 9;

/// How a caller intends to use a fetched cache line.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum CacheMode {
    /// Fill the line from the device and read it.
    ForRead,
    /// Fill the line from the device, modify it, and have it written back
    /// later.
    ForWrite,
    /// Claim the line without reading the device - the caller overwrites
    /// the whole sector, so a read-modify-write would be wasted.
    ReserveForWrite,
}

/// The partition's single cached sector.
pub(crate) struct CacheLine {
    /// The sector contents.
    pub(crate) data: [u8; SECTOR_SIZE],
    /// Which sector is resident, if any.
    sector: Option<SectorIdx>,
    /// Whether the line must be written back before it can be replaced.
    dirty: bool,
}

impl CacheLine {
    fn empty() -> CacheLine {
        CacheLine {
            data: [0u8; SECTOR_SIZE],
            sector: None,
            dirty: false,
        }
    }
}

/// The result of reading the boot sector: everything we need to know about
/// the volume before we start doing I/O against it.
struct Layout {
    fat_type: FatType,
    volume_label: [u8; 11],
    sectors_per_cluster: u8,
    cluster_shift: u8,
    cluster_count: u32,
    fat_start: SectorIdx,
    fat_size: u32,
    num_fats: u8,
    root_dir_sector: SectorIdx,
    root_dir_entry_count: u16,
    root_dir_cluster: u32,
    first_data_sector: SectorIdx,
    info_sector: Option<SectorIdx>,
    free_clusters: Option<u32>,
    next_free: Option<u32>,
}

/// Identifies a mounted FAT12, FAT16 or FAT32 volume on a block device.
pub struct FatPartition<D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    device: D,
    time_source: T,
    fat_type: FatType,
    volume_label: [u8; 11],
    sectors_per_cluster: u8,
    cluster_shift: u8,
    cluster_count: u32,
    fat_start: SectorIdx,
    fat_size: u32,
    num_fats: u8,
    root_dir_sector: SectorIdx,
    root_dir_entry_count: u16,
    root_dir_cluster: u32,
    first_data_sector: SectorIdx,
    info_sector: Option<SectorIdx>,
    free_clusters: Cell<Option<u32>>,
    next_free: Cell<Option<u32>>,
    cache: RefCell<CacheLine>,
}

impl<D, T> FatPartition<D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    /// Mount the FAT volume whose boot sector is at `lba_start`.
    ///
    /// Reads the Boot Parameter Block (and, on FAT32, the Info Sector) and
    /// fails if they don't describe a FAT volume this crate can handle.
    pub fn new(
        device: D,
        time_source: T,
        lba_start: SectorIdx,
        num_sectors: SectorCount,
    ) -> Result<FatPartition<D, T>, Error<D::Error>> {
        let layout = read_layout(&device, lba_start, num_sectors)?;
        Ok(Self::from_layout(device, time_source, layout))
    }

    fn from_layout(device: D, time_source: T, layout: Layout) -> FatPartition<D, T> {
        debug!(
            "Mounted {:?} volume, {} clusters of {} sectors",
            layout.fat_type, layout.cluster_count, layout.sectors_per_cluster
        );
        FatPartition {
            device,
            time_source,
            fat_type: layout.fat_type,
            volume_label: layout.volume_label,
            sectors_per_cluster: layout.sectors_per_cluster,
            cluster_shift: layout.cluster_shift,
            cluster_count: layout.cluster_count,
            fat_start: layout.fat_start,
            fat_size: layout.fat_size,
            num_fats: layout.num_fats,
            root_dir_sector: layout.root_dir_sector,
            root_dir_entry_count: layout.root_dir_entry_count,
            root_dir_cluster: layout.root_dir_cluster,
            first_data_sector: layout.first_data_sector,
            info_sector: layout.info_sector,
            free_clusters: Cell::new(layout.free_clusters),
            next_free: Cell::new(layout.next_free),
            cache: RefCell::new(CacheLine::empty()),
        }
    }

    /// Consume self and return the block device and time source.
    ///
    /// Flush with [`FatPartition::cache_sync`] first if there may be
    /// unwritten data.
    pub fn free(self) -> (D, T) {
        (self.device, self.time_source)
    }

    /// Get the type of FAT this volume is.
    pub fn fat_type(&self) -> FatType {
        self.fat_type
    }

    /// The volume label recorded in the boot sector.
    pub fn volume_label(&self) -> &[u8; 11] {
        &self.volume_label
    }

    /// The current time, from the partition's time source.
    pub(crate) fn timestamp_now(&self) -> Timestamp {
        self.time_source.get_timestamp()
    }

    // ************************************************************************
    // Geometry
    // ************************************************************************

    /// Number of bytes in a sector.
    pub fn bytes_per_sector(&self) -> u32 {
        SECTOR_SIZE_U32
    }

    /// Mask to extract the byte-within-sector from a position.
    pub fn sector_mask(&self) -> u32 {
        SECTOR_SIZE_U32 - 1
    }

    /// Bytes-per-sector as a power of two.
    pub fn bytes_per_sector_shift(&self) -> u32 {
        SECTOR_SHIFT
    }

    /// Number of sectors in a cluster.
    pub fn sectors_per_cluster(&self) -> u8 {
        self.sectors_per_cluster
    }

    /// Number of bytes in a cluster.
    pub fn bytes_per_cluster(&self) -> u32 {
        u32::from(self.sectors_per_cluster) * SECTOR_SIZE_U32
    }

    /// Bytes-per-cluster as a power of two.
    pub fn bytes_per_cluster_shift(&self) -> u32 {
        SECTOR_SHIFT + u32::from(self.cluster_shift)
    }

    /// Which sector of its cluster holds the given file position.
    pub fn sector_of_cluster(&self, position: u32) -> u8 {
        ((position >> SECTOR_SHIFT) & u32::from(self.sectors_per_cluster - 1)) as u8
    }

    /// The first sector of the given cluster, as an absolute device
    /// sector.
    pub fn cluster_start_sector(&self, cluster: u32) -> SectorIdx {
        debug_assert!(cluster >= RESERVED_ENTRIES);
        self.first_data_sector + ((cluster - RESERVED_ENTRIES) << self.cluster_shift)
    }

    /// The first sector of the fixed root directory region (FAT12/FAT16
    /// only).
    pub fn root_dir_sector(&self) -> SectorIdx {
        self.root_dir_sector
    }

    /// How many entries the fixed root directory holds (FAT12/FAT16 only).
    pub fn root_dir_entry_count(&self) -> u16 {
        self.root_dir_entry_count
    }

    /// The first cluster of the root directory (FAT32 only).
    pub fn root_dir_cluster(&self) -> u32 {
        self.root_dir_cluster
    }

    /// The highest valid cluster number on this volume.
    pub fn last_cluster(&self) -> u32 {
        self.cluster_count + RESERVED_ENTRIES - 1
    }

    // ************************************************************************
    // Sector cache
    // ************************************************************************

    /// Fetch a sector into the shared cache line and borrow it.
    ///
    /// The returned guard must be dropped before any other partition
    /// service is called; holding it across another fetch is a programming
    /// error (and panics via `RefCell`).
    pub(crate) fn cache_fetch(
        &self,
        sector: SectorIdx,
        mode: CacheMode,
    ) -> Result<RefMut<'_, CacheLine>, Error<D::Error>> {
        let mut line = self.cache.borrow_mut();
        if line.sector != Some(sector) {
            self.flush_line(&mut line)?;
            line.sector = None;
            if mode != CacheMode::ReserveForWrite {
                self.device
                    .read(sector, &mut line.data)
                    .map_err(Error::DeviceError)?;
            }
            line.sector = Some(sector);
        }
        if mode != CacheMode::ForRead {
            line.dirty = true;
        }
        Ok(line)
    }

    /// Which sector is resident in the cache, if any.
    pub(crate) fn cache_sector_number(&self) -> Option<SectorIdx> {
        self.cache.borrow().sector
    }

    /// Discard the cache line without writing it back.
    pub(crate) fn cache_invalidate(&self) {
        let mut line = self.cache.borrow_mut();
        line.sector = None;
        line.dirty = false;
    }

    /// Write the cache line back to the device if it is dirty.
    pub fn cache_sync(&self) -> Result<(), Error<D::Error>> {
        let mut line = self.cache.borrow_mut();
        self.flush_line(&mut line)
    }

    /// Write file data held in the cache line back to the device.
    pub fn cache_sync_data(&self) -> Result<(), Error<D::Error>> {
        self.cache_sync()
    }

    fn flush_line(&self, line: &mut CacheLine) -> Result<(), Error<D::Error>> {
        if let (true, Some(sector)) = (line.dirty, line.sector) {
            trace!("Writing back cached sector {:?}", sector);
            self.device
                .write(sector, &line.data)
                .map_err(Error::DeviceError)?;
            if self.num_fats == 2 && sector >= self.fat_start && sector.0 < self.fat_start.0 + self.fat_size
            {
                // keep the second FAT copy in step with the first
                self.device
                    .write(sector + self.fat_size, &line.data)
                    .map_err(Error::DeviceError)?;
            }
            line.dirty = false;
        }
        Ok(())
    }

    // ************************************************************************
    // Raw sector I/O
    // ************************************************************************

    /// Read one or more whole sectors, bypassing the cache.
    pub(crate) fn read_sectors(
        &self,
        sector: SectorIdx,
        buffer: &mut [u8],
    ) -> Result<(), Error<D::Error>> {
        self.device.read(sector, buffer).map_err(Error::DeviceError)
    }

    /// Write one or more whole sectors, bypassing the cache.
    pub(crate) fn write_sectors(
        &self,
        sector: SectorIdx,
        buffer: &[u8],
    ) -> Result<(), Error<D::Error>> {
        self.device
            .write(sector, buffer)
            .map_err(Error::DeviceError)
    }

    // ************************************************************************
    // File Allocation Table
    // ************************************************************************

    /// Look in the FAT to see which cluster comes next.
    ///
    /// Returns `Ok(Some(next))` while the chain continues and `Ok(None)`
    /// at the end-of-chain mark.
    pub fn fat_get(&self, cluster: u32) -> Result<Option<u32>, Error<D::Error>> {
        if cluster < RESERVED_ENTRIES || cluster > self.last_cluster() {
            return Err(Error::BadCluster);
        }
        let entry = self.fat_entry(cluster)?;
        match self.fat_type {
            FatType::Fat12 => match entry {
                0x000 => Err(Error::UnterminatedFatChain),
                0xFF7 => Err(Error::BadCluster),
                0xFF8..=0xFFF => Ok(None),
                next => Ok(Some(next)),
            },
            FatType::Fat16 => match entry {
                0x0000 => Err(Error::UnterminatedFatChain),
                0xFFF7 => Err(Error::BadCluster),
                0xFFF8..=0xFFFF => Ok(None),
                next => Ok(Some(next)),
            },
            FatType::Fat32 => match entry {
                0x0000_0000 => Err(Error::UnterminatedFatChain),
                0x0FFF_FFF7 => Err(Error::BadCluster),
                0x0000_0001 | 0x0FFF_FFF8..=0x0FFF_FFFF => Ok(None),
                next => Ok(Some(next)),
            },
        }
    }

    /// Mark the given cluster as the end of its chain.
    pub fn fat_put_eoc(&self, cluster: u32) -> Result<(), Error<D::Error>> {
        let eoc = match self.fat_type {
            FatType::Fat12 => 0xFFF,
            FatType::Fat16 => 0xFFFF,
            FatType::Fat32 => 0x0FFF_FFFF,
        };
        self.fat_put(cluster, eoc)
    }

    /// Read the raw FAT entry for a cluster.
    fn fat_entry(&self, cluster: u32) -> Result<u32, Error<D::Error>> {
        match self.fat_type {
            FatType::Fat12 => {
                let index = cluster + (cluster >> 1);
                let lo = self.fat_byte(index)?;
                let hi = self.fat_byte(index + 1)?;
                let pair = u16::from(lo) | (u16::from(hi) << 8);
                Ok(u32::from(if cluster & 1 == 1 {
                    pair >> 4
                } else {
                    pair & 0x0FFF
                }))
            }
            FatType::Fat16 => {
                let offset = cluster * 2;
                let line =
                    self.cache_fetch(self.fat_start + (offset >> SECTOR_SHIFT), CacheMode::ForRead)?;
                let idx = (offset & self.sector_mask()) as usize;
                Ok(u32::from(u16::from_le_bytes([
                    line.data[idx],
                    line.data[idx + 1],
                ])))
            }
            FatType::Fat32 => {
                let offset = cluster * 4;
                let line =
                    self.cache_fetch(self.fat_start + (offset >> SECTOR_SHIFT), CacheMode::ForRead)?;
                let idx = (offset & self.sector_mask()) as usize;
                let raw = u32::from_le_bytes([
                    line.data[idx],
                    line.data[idx + 1],
                    line.data[idx + 2],
                    line.data[idx + 3],
                ]);
                Ok(raw & 0x0FFF_FFFF)
            }
        }
    }

    fn fat_byte(&self, byte_index: u32) -> Result<u8, Error<D::Error>> {
        let line = self.cache_fetch(
            self.fat_start + (byte_index >> SECTOR_SHIFT),
            CacheMode::ForRead,
        )?;
        Ok(line.data[(byte_index & self.sector_mask()) as usize])
    }

    /// Write a new entry in the FAT.
    fn fat_put(&self, cluster: u32, value: u32) -> Result<(), Error<D::Error>> {
        if cluster < RESERVED_ENTRIES || cluster > self.last_cluster() {
            return Err(Error::BadCluster);
        }
        match self.fat_type {
            FatType::Fat12 => {
                let index = cluster + (cluster >> 1);
                let odd = cluster & 1 == 1;
                {
                    let mut line = self.cache_fetch(
                        self.fat_start + (index >> SECTOR_SHIFT),
                        CacheMode::ForWrite,
                    )?;
                    let b = &mut line.data[(index & self.sector_mask()) as usize];
                    if odd {
                        *b = (*b & 0x0F) | (((value & 0x0F) as u8) << 4);
                    } else {
                        *b = (value & 0xFF) as u8;
                    }
                }
                {
                    let mut line = self.cache_fetch(
                        self.fat_start + ((index + 1) >> SECTOR_SHIFT),
                        CacheMode::ForWrite,
                    )?;
                    let b = &mut line.data[((index + 1) & self.sector_mask()) as usize];
                    if odd {
                        *b = ((value >> 4) & 0xFF) as u8;
                    } else {
                        *b = (*b & 0xF0) | (((value >> 8) & 0x0F) as u8);
                    }
                }
                Ok(())
            }
            FatType::Fat16 => {
                let offset = cluster * 2;
                let mut line = self.cache_fetch(
                    self.fat_start + (offset >> SECTOR_SHIFT),
                    CacheMode::ForWrite,
                )?;
                let idx = (offset & self.sector_mask()) as usize;
                line.data[idx..idx + 2].copy_from_slice(&(value as u16).to_le_bytes());
                Ok(())
            }
            FatType::Fat32 => {
                let offset = cluster * 4;
                let mut line = self.cache_fetch(
                    self.fat_start + (offset >> SECTOR_SHIFT),
                    CacheMode::ForWrite,
                )?;
                let idx = (offset & self.sector_mask()) as usize;
                let existing = u32::from_le_bytes([
                    line.data[idx],
                    line.data[idx + 1],
                    line.data[idx + 2],
                    line.data[idx + 3],
                ]);
                // the top nibble of a FAT32 entry is reserved and preserved
                let new = (existing & 0xF000_0000) | (value & 0x0FFF_FFFF);
                line.data[idx..idx + 4].copy_from_slice(&new.to_le_bytes());
                Ok(())
            }
        }
    }

    // ************************************************************************
    // Cluster allocation
    // ************************************************************************

    /// Finds the next free cluster in `start..=end`.
    fn find_next_free(&self, start: u32, end: u32) -> Result<u32, Error<D::Error>> {
        for cluster in start..=end {
            if self.fat_entry(cluster)? == 0 {
                trace!("Found free cluster {}", cluster);
                return Ok(cluster);
            }
        }
        warn!("Out of space...");
        Err(Error::NotEnoughSpace)
    }

    /// Allocate one cluster, append it to `prev_cluster`'s chain (pass 0
    /// to start a new chain) and mark it end-of-chain.
    pub fn allocate_cluster(&self, prev_cluster: u32) -> Result<u32, Error<D::Error>> {
        debug!("Allocating new cluster, prev_cluster={}", prev_cluster);
        let end = self.last_cluster();
        let start = match self.next_free.get() {
            Some(cluster) if (RESERVED_ENTRIES..=end).contains(&cluster) => cluster,
            _ => RESERVED_ENTRIES,
        };
        let new_cluster = match self.find_next_free(start, end) {
            Ok(cluster) => cluster,
            Err(Error::NotEnoughSpace) if start > RESERVED_ENTRIES => {
                self.find_next_free(RESERVED_ENTRIES, end)?
            }
            Err(e) => return Err(e),
        };
        self.fat_put_eoc(new_cluster)?;
        if prev_cluster != 0 {
            trace!("Updating old cluster {} to {} in FAT", prev_cluster, new_cluster);
            self.fat_put(prev_cluster, new_cluster)?;
        }
        self.next_free.set(Some(new_cluster));
        if let Some(free) = self.free_clusters.get() {
            self.free_clusters.set(Some(free.saturating_sub(1)));
        }
        Ok(new_cluster)
    }

    /// Allocate `count` contiguous clusters and chain them together.
    /// Returns the first cluster of the run.
    pub fn alloc_contiguous(&self, count: u32) -> Result<u32, Error<D::Error>> {
        debug_assert!(count > 0);
        debug!("Allocating {} contiguous clusters", count);
        let mut run_start = 0;
        let mut run_len = 0;
        for cluster in RESERVED_ENTRIES..=self.last_cluster() {
            if self.fat_entry(cluster)? != 0 {
                run_len = 0;
                continue;
            }
            if run_len == 0 {
                run_start = cluster;
            }
            run_len += 1;
            if run_len == count {
                for c in run_start..run_start + count - 1 {
                    self.fat_put(c, c + 1)?;
                }
                self.fat_put_eoc(run_start + count - 1)?;
                self.next_free.set(Some(run_start + count - 1));
                if let Some(free) = self.free_clusters.get() {
                    self.free_clusters.set(Some(free.saturating_sub(count)));
                }
                return Ok(run_start);
            }
        }
        warn!("Out of space...");
        Err(Error::NotEnoughSpace)
    }

    /// Free every cluster in the chain starting at `first_cluster`.
    pub fn free_chain(&self, first_cluster: u32) -> Result<(), Error<D::Error>> {
        debug!("Freeing chain from cluster {}", first_cluster);
        let mut cluster = first_cluster;
        loop {
            let next = self.fat_get(cluster)?;
            self.fat_put(cluster, 0)?;
            if let Some(free) = self.free_clusters.get() {
                self.free_clusters.set(Some(free + 1));
            }
            match self.next_free.get() {
                Some(hint) if hint <= cluster => {}
                _ => self.next_free.set(Some(cluster)),
            }
            match next {
                Some(n) => cluster = n,
                None => break,
            }
        }
        Ok(())
    }

    /// Write the free-cluster hints back to the FAT32 Info Sector.
    pub(crate) fn update_info_sector(&self) -> Result<(), Error<D::Error>> {
        let Some(info_sector) = self.info_sector else {
            return Ok(());
        };
        if self.free_clusters.get().is_none() && self.next_free.get().is_none() {
            return Ok(());
        }
        let mut buffer = [0u8; SECTOR_SIZE];
        self.read_sectors(info_sector, &mut buffer)?;
        if let Some(count) = self.free_clusters.get() {
            buffer[488..492].copy_from_slice(&count.to_le_bytes());
        }
        if let Some(next_free) = self.next_free.get() {
            buffer[492..496].copy_from_slice(&next_free.to_le_bytes());
        }
        self.write_sectors(info_sector, &buffer)
    }
}

/// Load the boot sector from the start of the given partition and
/// determine if it contains a valid FAT12, FAT16 or FAT32 file system.
fn read_layout<D>(
    device: &D,
    lba_start: SectorIdx,
    _num_sectors: SectorCount,
) -> Result<Layout, Error<D::Error>>
where
    D: BlockDevice,
{
    let mut buffer = [0u8; SECTOR_SIZE];
    device
        .read(lba_start, &mut buffer)
        .map_err(Error::DeviceError)?;
    let bpb = Bpb::create_from_bytes(&buffer).map_err(Error::FormatError)?;
    if bpb.bytes_per_sector() != 512 {
        return Err(Error::BadBlockSize(bpb.bytes_per_sector()));
    }
    let sectors_per_cluster = bpb.sectors_per_cluster();
    let fat_start = lba_start + u32::from(bpb.reserved_sector_count());
    let root_dir_sectors = (u32::from(bpb.root_entries_count()) * 32).div_ceil(SECTOR_SIZE_U32);
    let root_dir_sector = fat_start + u32::from(bpb.num_fats()) * bpb.fat_size();
    let first_data_sector = root_dir_sector + root_dir_sectors;
    let mut volume_label = [0u8; 11];
    volume_label.copy_from_slice(bpb.volume_label());

    let mut layout = Layout {
        fat_type: bpb.fat_type,
        volume_label,
        sectors_per_cluster,
        cluster_shift: sectors_per_cluster.trailing_zeros() as u8,
        cluster_count: bpb.total_clusters(),
        fat_start,
        fat_size: bpb.fat_size(),
        num_fats: bpb.num_fats(),
        root_dir_sector,
        root_dir_entry_count: bpb.root_entries_count(),
        root_dir_cluster: bpb.first_root_dir_cluster(),
        first_data_sector,
        info_sector: None,
        free_clusters: None,
        next_free: None,
    };
    if bpb.fat_type == FatType::Fat32 {
        // Safe to unwrap since this is a FAT32 volume
        let info_sector = lba_start + bpb.fs_info_sector().unwrap();
        let mut info_buffer = [0u8; SECTOR_SIZE];
        device
            .read(info_sector, &mut info_buffer)
            .map_err(Error::DeviceError)?;
        let info = InfoSector::create_from_bytes(&info_buffer).map_err(Error::FormatError)?;
        layout.info_sector = Some(info_sector);
        layout.free_clusters = info.free_cluster_count();
        layout.next_free = info.next_free_cluster();
    }
    Ok(layout)
}

/// Probe a candidate volume without building a partition, so mount
/// attempts can fall back to another location.
pub(crate) fn is_fat_volume<D>(
    device: &D,
    lba_start: SectorIdx,
    num_sectors: SectorCount,
) -> Result<(), Error<D::Error>>
where
    D: BlockDevice,
{
    read_layout(device, lba_start, num_sectors).map(|_| ())
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
