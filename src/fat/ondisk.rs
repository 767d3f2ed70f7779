//! Directory entries as stored on-disk.
//!
//! A directory is a file holding a sequence of 32-byte records. Each
//! record is a short (8.3) entry, a long file name fragment, a volume
//! label, or a free slot.

use crate::filesystem::{Attributes, DirEntry, ShortFileName, Timestamp};
use crate::fat::FatType;
use byteorder::{ByteOrder, LittleEndian};

/// Marks a slot whose file has been deleted.
pub(crate) const NAME_DELETED: u8 = 0xE5;

/// Marks the slot terminating a directory - this slot and everything after
/// it has never been used.
pub(crate) const NAME_FREE: u8 = 0x00;

/// Where the thirteen UTF-16 code units live inside a long file name slot.
const LFN_UNIT_OFFSETS: [usize; 13] = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];

/// Represents a 32-byte directory entry as stored on-disk in a directory
/// file. This is the same layout for FAT12, FAT16 and FAT32 (except the
/// older formats don't use `first_cluster_hi`).
pub struct OnDiskDirEntry<'a> {
    data: &'a [u8],
}

impl<'a> OnDiskDirEntry<'a> {
    pub(crate) const LEN: usize = 32;
    pub(crate) const LEN_U32: u32 = 32;

    define_field!(raw_attr, u8, 11);
    define_field!(create_time_tenths, u8, 13);
    define_field!(create_time, u16, 14);
    define_field!(create_date, u16, 16);
    define_field!(access_date, u16, 18);
    define_field!(first_cluster_hi, u16, 20);
    define_field!(write_time, u16, 22);
    define_field!(write_date, u16, 24);
    define_field!(first_cluster_lo, u16, 26);
    define_field!(file_size, u32, 28);

    /// Create a new on-disk directory entry view over 32 bytes read from a
    /// directory file.
    pub fn new(data: &[u8]) -> OnDiskDirEntry {
        OnDiskDirEntry { data }
    }

    /// Is this the terminating entry of the directory?
    pub fn is_end(&self) -> bool {
        self.data[0] == NAME_FREE
    }

    /// Has the file this entry described been deleted?
    pub fn is_deleted(&self) -> bool {
        self.data[0] == NAME_DELETED
    }

    /// Is this a Long File Name fragment?
    pub fn is_lfn(&self) -> bool {
        Attributes::create_from_fat(self.raw_attr()).is_lfn()
    }

    /// Is this entry a plain file or a subdirectory - that is, an in-use
    /// entry which is neither a volume label nor a long file name
    /// fragment? Note that the `.` and `..` entries qualify; callers that
    /// want to skip those check the leading name byte.
    pub fn is_file_or_subdir(&self) -> bool {
        !self.is_end() && !self.is_deleted() && (self.raw_attr() & Attributes::VOLUME) == 0
    }

    /// Is this entry a plain file (not a directory, not a volume label)?
    pub fn is_file_entry(&self) -> bool {
        (self.raw_attr() & (Attributes::DIRECTORY | Attributes::VOLUME)) == 0
    }

    /// Does this on-disk entry carry the given 8.3 filename?
    pub fn matches(&self, sfn: &ShortFileName) -> bool {
        self.data[0..11] == sfn.contents
    }

    /// Which cluster, if any, does this file start at?
    pub fn first_cluster(&self, fat_type: FatType) -> u32 {
        match fat_type {
            FatType::Fat32 => {
                (u32::from(self.first_cluster_hi()) << 16) | u32::from(self.first_cluster_lo())
            }
            _ => u32::from(self.first_cluster_lo()),
        }
    }

    /// Convert the on-disk format into a [`DirEntry`].
    pub fn decode(&self, fat_type: FatType) -> DirEntry {
        let mut name = ShortFileName { contents: [0u8; 11] };
        name.contents.copy_from_slice(&self.data[0..11]);
        DirEntry {
            name,
            mtime: Timestamp::from_fat(self.write_date(), self.write_time()),
            ctime: Timestamp::from_fat(self.create_date(), self.create_time()),
            attributes: Attributes::create_from_fat(self.raw_attr()),
            first_cluster: self.first_cluster(fat_type),
            size: self.file_size(),
        }
    }
}

/// Represents a 32-byte long file name fragment. It shares its layout with
/// [`OnDiskDirEntry`] but is distinguished by the attribute byte being
/// 0x0F.
pub struct OnDiskLfnEntry<'a> {
    data: &'a [u8],
}

impl<'a> OnDiskLfnEntry<'a> {
    /// The bit in the order byte marking the last (highest-ordinal)
    /// fragment of a sequence.
    pub const LAST_FLAG: u8 = 0x40;

    define_field!(checksum, u8, 13);

    /// View 32 bytes as a long file name fragment.
    pub fn new(data: &[u8]) -> OnDiskLfnEntry {
        OnDiskLfnEntry { data }
    }

    /// The one-based position of this fragment in its sequence (1..=20).
    pub fn ordinal(&self) -> u8 {
        self.data[0] & 0x1F
    }

    /// Is this the last fragment of its sequence (the one stored first)?
    pub fn is_last(&self) -> bool {
        (self.data[0] & Self::LAST_FLAG) != 0
    }

    /// One of the thirteen UTF-16 code units held by this fragment.
    pub fn unit(&self, idx: usize) -> u16 {
        let offset = LFN_UNIT_OFFSETS[idx];
        LittleEndian::read_u16(&self.data[offset..offset + 2])
    }

    /// Does this fragment hold code units `13 * (ordinal - 1)..` of the
    /// given name? The comparison is case-sensitive and accounts for the
    /// NUL terminator and 0xFFFF fill in the final fragment.
    pub fn fragment_matches(&self, name: &str, ordinal: u8) -> bool {
        let mut units = LfnUnits::new(name).skip(13 * (usize::from(ordinal) - 1));
        for idx in 0..13 {
            // The padded stream never ends
            let Some(expected) = units.next() else {
                return false;
            };
            if self.unit(idx) != expected {
                return false;
            }
        }
        true
    }
}

/// The UTF-16 code units of a long name, followed by a single NUL
/// terminator and then endless 0xFFFF fill, which is how the name is laid
/// out across its fragments on disk.
struct LfnUnits<'a> {
    inner: core::str::EncodeUtf16<'a>,
    terminated: bool,
}

impl<'a> LfnUnits<'a> {
    fn new(name: &'a str) -> Self {
        LfnUnits {
            inner: name.encode_utf16(),
            terminated: false,
        }
    }
}

impl<'a> Iterator for LfnUnits<'a> {
    type Item = u16;
    fn next(&mut self) -> Option<u16> {
        match self.inner.next() {
            Some(u) => Some(u),
            None if !self.terminated => {
                self.terminated = true;
                Some(0x0000)
            }
            None => Some(0xFFFF),
        }
    }
}

/// The checksum over an 8.3 name that ties long file name fragments to
/// their short entry.
pub fn lfn_checksum(short_name: &[u8]) -> u8 {
    let mut sum = 0u8;
    for b in short_name.iter() {
        sum = sum.rotate_right(1).wrapping_add(*b);
    }
    sum
}

/// Build a fresh short directory entry with no clusters and zero size.
pub(crate) fn new_short_entry(
    name: &ShortFileName,
    attributes: u8,
    now: Timestamp,
) -> [u8; OnDiskDirEntry::LEN] {
    let mut data = [0u8; OnDiskDirEntry::LEN];
    data[0..11].copy_from_slice(&name.contents);
    data[11] = attributes;
    let time = now.fat_time().to_le_bytes();
    let date = now.fat_date().to_le_bytes();
    data[14..16].copy_from_slice(&time);
    data[16..18].copy_from_slice(&date);
    data[18..20].copy_from_slice(&date);
    data[22..24].copy_from_slice(&time);
    data[24..26].copy_from_slice(&date);
    data
}

/// Build one long file name fragment for the given name.
pub(crate) fn lfn_slot_entry(
    name: &str,
    ordinal: u8,
    last: bool,
    checksum: u8,
) -> [u8; OnDiskDirEntry::LEN] {
    let mut data = [0u8; OnDiskDirEntry::LEN];
    data[0] = ordinal | if last { OnDiskLfnEntry::LAST_FLAG } else { 0 };
    data[11] = Attributes::LFN;
    data[13] = checksum;
    let mut units = LfnUnits::new(name).skip(13 * (usize::from(ordinal) - 1));
    for offset in LFN_UNIT_OFFSETS {
        // The padded stream never ends
        let Some(unit) = units.next() else {
            break;
        };
        LittleEndian::write_u16(&mut data[offset..offset + 2], unit);
    }
    data
}

// ****************************************************************************
//
// Unit Tests
//
// ****************************************************************************

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn short_entry_round_trip() {
        let name = ShortFileName::create_from_str("HELLO.TXT").unwrap();
        let now = Timestamp::from_calendar(2021, 6, 15, 12, 30, 10).unwrap();
        let data = new_short_entry(&name, Attributes::ARCHIVE, now);
        let entry = OnDiskDirEntry::new(&data);
        assert!(entry.is_file_or_subdir());
        assert!(entry.is_file_entry());
        assert!(!entry.is_lfn());
        assert!(entry.matches(&name));
        assert_eq!(entry.first_cluster(FatType::Fat32), 0);
        assert_eq!(entry.file_size(), 0);
        let decoded = entry.decode(FatType::Fat16);
        assert_eq!(decoded.name, name);
        assert_eq!(format!("{}", decoded.mtime), "2021-06-15 12:30:10");
        assert_eq!(format!("{}", decoded.ctime), "2021-06-15 12:30:10");
    }

    #[test]
    fn long_name_fragments() {
        let name = "long_name_example.txt";
        let alias = ShortFileName::create_from_str("LONG_N~1.TXT").unwrap();
        let csum = lfn_checksum(&alias.contents);
        // 21 code units -> two fragments, the second one short
        let first = lfn_slot_entry(name, 2, true, csum);
        let second = lfn_slot_entry(name, 1, false, csum);

        let lfn = OnDiskLfnEntry::new(&first);
        assert!(lfn.is_last());
        assert_eq!(lfn.ordinal(), 2);
        assert_eq!(lfn.checksum(), csum);
        assert!(lfn.fragment_matches(name, 2));
        assert!(!lfn.fragment_matches(name, 1));
        // code units 13.. are "mple.txt", then NUL and fill
        assert_eq!(lfn.unit(0), u16::from(b'm'));
        assert_eq!(lfn.unit(8), 0x0000);
        assert_eq!(lfn.unit(9), 0xFFFF);

        let lfn = OnDiskLfnEntry::new(&second);
        assert!(!lfn.is_last());
        assert_eq!(lfn.ordinal(), 1);
        assert!(lfn.fragment_matches(name, 1));
        assert!(!lfn.fragment_matches("LONG_NAME_EXAMPLE.TXT", 1));
        assert_eq!(lfn.unit(0), u16::from(b'l'));

        assert!(OnDiskDirEntry::new(&first).is_lfn());
        assert!(!OnDiskDirEntry::new(&first).is_file_or_subdir());
    }

    #[test]
    fn exact_fragment_has_no_terminator() {
        // Exactly 13 code units fill one fragment completely
        let name = "thirteen.char";
        assert_eq!(name.encode_utf16().count(), 13);
        let slot = lfn_slot_entry(name, 1, true, 0);
        let lfn = OnDiskLfnEntry::new(&slot);
        assert_eq!(lfn.unit(12), u16::from(b'r'));
        assert!(lfn.fragment_matches(name, 1));
    }

    #[test]
    fn checksum() {
        let sfn = ShortFileName::create_from_str("UNARCH~1.DAT").unwrap();
        assert_eq!(0xB3, lfn_checksum(&sfn.contents));
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
