//! # embedded-fat
//!
//! > A FAT filesystem library written in Embedded Rust
//!
//! This crate reads and writes files on FAT12, FAT16 and FAT32 formatted
//! block devices - SD cards, flash translation layers, RAM disks, disk
//! image files - anything that can transfer 512-byte sectors. It is
//! written in pure-Rust, is `#![no_std]` and does not use `alloc` or
//! `collections` to keep the memory footprint low. In the first instance
//! it is designed for readability and simplicity over performance.
//!
//! You will need something that implements the [`BlockDevice`] trait,
//! which can read and write 512-byte sectors. The driver for your
//! particular storage medium (SPI SD card, eMMC, USB mass storage) lives
//! outside this crate.
//!
//! ```rust
//! use embedded_fat::{BlockDevice, Error, OpenFlags, TimeSource, Volume};
//!
//! fn log_sample<D: BlockDevice, T: TimeSource>(
//!     volume: &Volume<D, T>,
//! ) -> Result<(), Error<D::Error>> {
//!     let mut file = volume.open(
//!         "DATA.CSV",
//!         OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::APPEND,
//!     )?;
//!     file.write(b"2025-01-01T00:00:00Z,TEMP,25.0\n")?;
//!     // Don't forget to close the file so the directory entry is updated
//!     file.close()
//! }
//! ```
//!
//! ## Features
//!
//! * `log`: Enabled by default. Generates log messages using the `log`
//!   crate.
//! * `defmt-log`: By turning off the default features and enabling the
//!   `defmt-log` feature you can configure this crate to log messages
//!   over defmt instead.
//!
//! You cannot enable both the `log` feature and the `defmt-log` feature.

#![cfg_attr(not(test), no_std)]

#[cfg(test)]
#[macro_use]
extern crate hex_literal;

#[macro_use]
mod structure;

pub mod blockdevice;
pub mod fat;
pub mod filesystem;
mod volume;

#[doc(inline)]
pub use crate::blockdevice::{BlockDevice, SectorCount, SectorIdx, SECTOR_SIZE, SECTOR_SIZE_U32};

#[doc(inline)]
pub use crate::fat::{FatPartition, FatType};

#[doc(inline)]
pub use crate::filesystem::{
    Attributes, DirEntry, File, FileName, FilePos, FilenameError, OpenFlags, ShortFileName,
    TimeSource, Timestamp, TimestampFlags,
};

#[doc(inline)]
pub use crate::volume::{Volume, VolumeIdx};

/// Maximum file size supported by this library
pub const MAX_FILE_SIZE: u32 = u32::MAX;

#[cfg(all(feature = "defmt-log", feature = "log"))]
compile_error!("Cannot enable both log and defmt-log");

#[cfg(feature = "log")]
use log::{debug, trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace, warn};

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::debug! but does nothing at all
macro_rules! debug {
    ($($arg:tt)+) => {};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::trace! but does nothing at all
macro_rules! trace {
    ($($arg:tt)+) => {};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::warn! but does nothing at all
macro_rules! warn {
    ($($arg:tt)+) => {};
}

/// All the ways the functions in this crate can fail.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone)]
pub enum Error<E>
where
    E: core::fmt::Debug,
{
    /// The underlying block device threw an error.
    DeviceError(E),
    /// The filesystem is badly formatted (or this code is buggy).
    FormatError(&'static str),
    /// The given partition index was bad.
    NoSuchVolume,
    /// The given filename was bad.
    FilenameError(FilenameError),
    /// That file or directory doesn't exist.
    NotFound,
    /// Tried to create a file or directory that already exists.
    FileAlreadyExists,
    /// You can't write to, truncate, or delete a directory as if it was a
    /// file.
    OpenedDirAsFile,
    /// That operation needs a directory, but this is a plain file.
    OpenedFileAsDir,
    /// The file's open mode or state does not permit this operation.
    BadMode,
    /// Tried to open a read-only file for writing.
    ReadOnly,
    /// Bad offset given when seeking, or a position past the end of the
    /// file.
    InvalidOffset,
    /// A cluster chain ended before the expected position.
    EndOfFile,
    /// Found a bad cluster in the File Allocation Table.
    BadCluster,
    /// Jumped to free space while traversing the File Allocation Table.
    UnterminatedFatChain,
    /// The long file name slots do not checksum against their short entry.
    LfnChecksumMismatch,
    /// The device does not have enough space for the operation.
    NotEnoughSpace,
    /// A directory hit its maximum size.
    DirectoryFull,
    /// Tried to remove a directory that still has entries in it.
    DirectoryNotEmpty,
    /// The file's cluster chain is not one contiguous run of sectors.
    NotContiguous,
    /// Tried to rename across two different volumes.
    VolumeMismatch,
    /// A timestamp field was out of range.
    InvalidTimestamp,
    /// Bad sector size - only 512 byte sectors supported.
    BadBlockSize(u16),
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
