//! Traits and types for working with block devices.
//!
//! Generic code for handling block devices, such as types for identifying
//! a particular sector on a block device by its index.

/// All our sectors are a fixed length of 512 bytes. We do not support
/// 'Advanced Format' drives with 4 KiB sectors, nor weird old
/// pre-3.5-inch floppy disk formats.
pub const SECTOR_SIZE: usize = 512;

/// Sometimes we want the sector size as a `u32` and the casts don't look
/// nice.
pub const SECTOR_SIZE_U32: u32 = 512;

/// The position of a sector on a block device, counted from the start of
/// the device.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SectorIdx(pub u32);

/// A number of sectors.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SectorCount(pub u32);

impl core::ops::Add<u32> for SectorIdx {
    type Output = SectorIdx;
    fn add(self, rhs: u32) -> SectorIdx {
        SectorIdx(self.0 + rhs)
    }
}

impl core::ops::AddAssign<u32> for SectorIdx {
    fn add_assign(&mut self, rhs: u32) {
        self.0 += rhs;
    }
}

/// A block device - a device which can read and write sectors of 512
/// bytes each.
///
/// Implementors should use interior mutability if the underlying hardware
/// needs a mutable handle - the filesystem layer only ever takes `&self`
/// so that many open files can share one device.
pub trait BlockDevice {
    /// The error type returned by the device.
    type Error: core::fmt::Debug;

    /// Read one or more sectors, starting at the given sector index.
    ///
    /// The buffer length must be a non-zero multiple of [`SECTOR_SIZE`];
    /// one call may therefore transfer a single sector or a contiguous
    /// run of sectors.
    fn read(&self, start: SectorIdx, buffer: &mut [u8]) -> Result<(), Self::Error>;

    /// Write one or more sectors, starting at the given sector index.
    ///
    /// The buffer length must be a non-zero multiple of [`SECTOR_SIZE`].
    fn write(&self, start: SectorIdx, buffer: &[u8]) -> Result<(), Self::Error>;

    /// Determine how many sectors this device can hold.
    fn num_sectors(&self) -> Result<SectorCount, Self::Error>;
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
