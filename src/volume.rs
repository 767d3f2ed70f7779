//! The volume facade.
//!
//! A [`Volume`] binds a mounted [`FatPartition`] and offers whole-path
//! convenience operations, each of which opens the root directory and
//! delegates to the matching [`File`] operation.

use byteorder::{ByteOrder, LittleEndian};

use crate::fat::{is_fat_volume, FatPartition};
use crate::filesystem::{DirEntry, OpenFlags, TimeSource};
use crate::{debug, BlockDevice, Error, File, SectorCount, SectorIdx, SECTOR_SIZE};

/// Partition type for FAT12.
const PARTITION_ID_FAT12: u8 = 0x01;
/// Partition type for FAT16 volumes under 32 MiB.
const PARTITION_ID_FAT16_SMALL: u8 = 0x04;
/// Partition type for FAT16.
const PARTITION_ID_FAT16: u8 = 0x06;
/// Partition type for FAT32 with CHS and LBA addressing.
const PARTITION_ID_FAT32_CHS_LBA: u8 = 0x0B;
/// Partition type for FAT32 with LBA addressing.
const PARTITION_ID_FAT32_LBA: u8 = 0x0C;
/// Partition type for FAT16 with LBA addressing.
const PARTITION_ID_FAT16_LBA: u8 = 0x0E;

/// An entry in the Master Boot Record's partition table (0 through 3).
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VolumeIdx(pub usize);

/// A mounted FAT volume and the operations you can aim at it by path.
pub struct Volume<D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    partition: FatPartition<D, T>,
}

impl<D, T> Volume<D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    /// Mount a volume from the given block device.
    ///
    /// Tries the first partition in the Master Boot Record; if the device
    /// has no usable partition table, the whole device is treated as one
    /// FAT volume (as USB sticks and floppy images often are).
    pub fn new(device: D, time_source: T) -> Result<Volume<D, T>, Error<D::Error>> {
        let located = find_partition(&device, VolumeIdx(0)).and_then(|(start, len)| {
            is_fat_volume(&device, start, len)?;
            Ok((start, len))
        });
        let (start, len) = match located {
            Ok(region) => region,
            Err(_) => {
                debug!("No usable partition table, mounting whole device");
                let len = device.num_sectors().map_err(Error::DeviceError)?;
                (SectorIdx(0), len)
            }
        };
        Ok(Volume {
            partition: FatPartition::new(device, time_source, start, len)?,
        })
    }

    /// Mount the volume in the given Master Boot Record slot.
    pub fn new_with_partition(
        device: D,
        time_source: T,
        idx: VolumeIdx,
    ) -> Result<Volume<D, T>, Error<D::Error>> {
        let (start, len) = find_partition(&device, idx)?;
        Ok(Volume {
            partition: FatPartition::new(device, time_source, start, len)?,
        })
    }

    /// Access the underlying partition services.
    pub fn partition(&self) -> &FatPartition<D, T> {
        &self.partition
    }

    /// Open this volume's root directory.
    pub fn open_root(&self) -> File<'_, D, T> {
        File::open_root(&self.partition)
    }

    /// Open a file or directory by path.
    pub fn open(&self, path: &str, flags: OpenFlags) -> Result<File<'_, D, T>, Error<D::Error>> {
        File::open(&self.open_root(), path, flags)
    }

    /// Test for the existence of a file or directory.
    pub fn exists(&self, path: &str) -> bool {
        self.open(path, OpenFlags::READ).is_ok()
    }

    /// Make a directory, creating missing parents when `create_parents`
    /// is given.
    pub fn mkdir(&self, path: &str, create_parents: bool) -> Result<(), Error<D::Error>> {
        let root = self.open_root();
        File::mkdir(&root, path, create_parents)?.close()
    }

    /// Remove the file at `path`.
    pub fn remove(&self, path: &str) -> Result<(), Error<D::Error>> {
        self.open(path, OpenFlags::WRITE)?.remove()
    }

    /// Remove the directory at `path`, which must be empty.
    pub fn rmdir(&self, path: &str) -> Result<(), Error<D::Error>> {
        self.open(path, OpenFlags::READ)?.rmdir()
    }

    /// Remove the directory at `path` along with everything inside it.
    pub fn remove_recursive(&self, path: &str) -> Result<(), Error<D::Error>> {
        self.open(path, OpenFlags::READ)?.remove_recursive()
    }

    /// Rename (or move) a file or directory. The destination must not
    /// exist yet.
    pub fn rename(&self, old_path: &str, new_path: &str) -> Result<(), Error<D::Error>> {
        let root = self.open_root();
        let mut file = File::open(&root, old_path, OpenFlags::READ)?;
        file.rename(&root, new_path)
    }

    /// Truncate the file at `path` to `length` bytes, which must not
    /// exceed its current size.
    pub fn truncate(&self, path: &str, length: u32) -> Result<(), Error<D::Error>> {
        let mut file = self.open(path, OpenFlags::WRITE)?;
        file.seek_set(length)?;
        file.truncate()
    }

    /// Call `func` for every entry in the directory at `path` (`"/"` for
    /// the root).
    pub fn ls<F>(&self, path: &str, mut func: F) -> Result<(), Error<D::Error>>
    where
        F: FnMut(&DirEntry),
    {
        let mut dir = self.open(path, OpenFlags::READ)?;
        while let Some(entry) = dir.read_dir()? {
            func(&entry);
        }
        Ok(())
    }

    /// Flush any cached data and consume self, returning the block
    /// device and time source.
    pub fn free(self) -> Result<(D, T), Error<D::Error>> {
        self.partition.cache_sync()?;
        Ok(self.partition.free())
    }
}

/// Find a FAT partition in the Master Boot Record.
///
/// We do not support GUID Partition Table disks. Nor do we support any
/// concept of drive letters - that is for a higher layer to handle.
fn find_partition<D>(
    device: &D,
    idx: VolumeIdx,
) -> Result<(SectorIdx, SectorCount), Error<D::Error>>
where
    D: BlockDevice,
{
    const PARTITION1_START: usize = 446;
    const PARTITION2_START: usize = PARTITION1_START + PARTITION_INFO_LENGTH;
    const PARTITION3_START: usize = PARTITION2_START + PARTITION_INFO_LENGTH;
    const PARTITION4_START: usize = PARTITION3_START + PARTITION_INFO_LENGTH;
    const FOOTER_START: usize = 510;
    const FOOTER_VALUE: u16 = 0xAA55;
    const PARTITION_INFO_LENGTH: usize = 16;
    const PARTITION_INFO_STATUS_INDEX: usize = 0;
    const PARTITION_INFO_TYPE_INDEX: usize = 4;
    const PARTITION_INFO_LBA_START_INDEX: usize = 8;
    const PARTITION_INFO_NUM_SECTORS_INDEX: usize = 12;

    let mut sector = [0u8; SECTOR_SIZE];
    device
        .read(SectorIdx(0), &mut sector)
        .map_err(Error::DeviceError)?;
    if LittleEndian::read_u16(&sector[FOOTER_START..FOOTER_START + 2]) != FOOTER_VALUE {
        return Err(Error::FormatError("Invalid MBR signature"));
    }
    let partition = match idx {
        VolumeIdx(0) => &sector[PARTITION1_START..(PARTITION1_START + PARTITION_INFO_LENGTH)],
        VolumeIdx(1) => &sector[PARTITION2_START..(PARTITION2_START + PARTITION_INFO_LENGTH)],
        VolumeIdx(2) => &sector[PARTITION3_START..(PARTITION3_START + PARTITION_INFO_LENGTH)],
        VolumeIdx(3) => &sector[PARTITION4_START..(PARTITION4_START + PARTITION_INFO_LENGTH)],
        _ => {
            return Err(Error::NoSuchVolume);
        }
    };
    // Only 0x80 and 0x00 are valid (bootable, and non-bootable)
    if (partition[PARTITION_INFO_STATUS_INDEX] & 0x7F) != 0x00 {
        return Err(Error::FormatError("Invalid partition status"));
    }
    match partition[PARTITION_INFO_TYPE_INDEX] {
        PARTITION_ID_FAT12
        | PARTITION_ID_FAT16_SMALL
        | PARTITION_ID_FAT16
        | PARTITION_ID_FAT16_LBA
        | PARTITION_ID_FAT32_CHS_LBA
        | PARTITION_ID_FAT32_LBA => {}
        _ => {
            return Err(Error::FormatError("Partition type not supported"));
        }
    }
    let lba_start = LittleEndian::read_u32(
        &partition[PARTITION_INFO_LBA_START_INDEX..(PARTITION_INFO_LBA_START_INDEX + 4)],
    );
    let num_sectors = LittleEndian::read_u32(
        &partition[PARTITION_INFO_NUM_SECTORS_INDEX..(PARTITION_INFO_NUM_SECTORS_INDEX + 4)],
    );
    Ok((SectorIdx(lba_start), SectorCount(num_sectors)))
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
