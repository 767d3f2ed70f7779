//! Timestamps, and where they come from.

/// Things that impl this can tell you the current time.
pub trait TimeSource {
    /// Returns the current time
    fn get_timestamp(&self) -> Timestamp;
}

/// Represents an instant in time, in the local time zone.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Copy, Clone, PartialOrd, Ord, PartialEq, Eq)]
pub struct Timestamp {
    /// Add 1970 to this file to get the calendar year
    pub year_since_1970: u8,
    /// Add one to this value to get the calendar month
    pub zero_indexed_month: u8,
    /// Add one to this value to get the calendar day
    pub zero_indexed_day: u8,
    /// The number of hours past midnight
    pub hours: u8,
    /// The number of minutes past the hour
    pub minutes: u8,
    /// The number of seconds past the minute
    pub seconds: u8,
}

impl Timestamp {
    /// Create a `Timestamp` from the 16-bit FAT date and time fields.
    pub fn from_fat(date: u16, time: u16) -> Timestamp {
        let year = 1980 + (date >> 9);
        let month = ((date >> 5) & 0x000F) as u8;
        let day = (date & 0x001F) as u8;
        let hours = ((time >> 11) & 0x001F) as u8;
        let minutes = ((time >> 5) & 0x003F) as u8;
        let seconds = ((time << 1) & 0x003F) as u8;
        // Volume labels have a zero for month/day, so tolerate that...
        Timestamp {
            year_since_1970: (year - 1970) as u8,
            zero_indexed_month: if month == 0 { 0 } else { month - 1 },
            zero_indexed_day: if day == 0 { 0 } else { day - 1 },
            hours,
            minutes,
            seconds,
        }
    }

    /// This instant as a 16-bit FAT date: `(year - 1980) << 9 | month << 5
    /// | day`. Years before 1980 clamp to the epoch.
    pub fn fat_date(&self) -> u16 {
        let year = if self.year_since_1970 < 10 {
            0
        } else {
            (u16::from(self.year_since_1970 - 10) << 9) & 0xFE00
        };
        let month = (u16::from(self.zero_indexed_month + 1) << 5) & 0x01E0;
        let day = u16::from(self.zero_indexed_day + 1) & 0x001F;
        year | month | day
    }

    /// This instant as a 16-bit FAT time: `hour << 11 | minute << 5 |
    /// second / 2`. FAT times have two-second resolution.
    pub fn fat_time(&self) -> u16 {
        let hours = (u16::from(self.hours) << 11) & 0xF800;
        let minutes = (u16::from(self.minutes) << 5) & 0x07E0;
        let seconds = u16::from(self.seconds / 2) & 0x001F;
        hours | minutes | seconds
    }

    /// Create a `Timestamp` from year/month/day/hour/minute/second.
    ///
    /// Values should be given as you'd write them (i.e. 1980, 01, 01, 13,
    /// 30, 05) is 1980-Jan-01, 1:30:05pm.
    pub fn from_calendar(
        year: u16,
        month: u8,
        day: u8,
        hours: u8,
        minutes: u8,
        seconds: u8,
    ) -> Result<Timestamp, &'static str> {
        Ok(Timestamp {
            year_since_1970: if (1970..=(1970 + 255)).contains(&year) {
                (year - 1970) as u8
            } else {
                return Err("Bad year");
            },
            zero_indexed_month: if (1..=12).contains(&month) {
                month - 1
            } else {
                return Err("Bad month");
            },
            zero_indexed_day: if (1..=31).contains(&day) {
                day - 1
            } else {
                return Err("Bad day");
            },
            hours: if hours <= 23 {
                hours
            } else {
                return Err("Bad hours");
            },
            minutes: if minutes <= 59 {
                minutes
            } else {
                return Err("Bad minutes");
            },
            seconds: if seconds <= 59 {
                seconds
            } else {
                return Err("Bad seconds");
            },
        })
    }

    /// Is this a timestamp a FAT directory entry can actually represent?
    pub(crate) fn fits_fat_range(&self) -> bool {
        let year = 1970 + u16::from(self.year_since_1970);
        (1980..=2107).contains(&year)
            && self.zero_indexed_month < 12
            && self.zero_indexed_day < 31
            && self.hours <= 23
            && self.minutes <= 59
            && self.seconds <= 59
    }
}

impl core::fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "Timestamp({})", self)
    }
}

impl core::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "{}-{:02}-{:02} {:02}:{:02}:{:02}",
            u16::from(self.year_since_1970) + 1970,
            self.zero_indexed_month + 1,
            self.zero_indexed_day + 1,
            self.hours,
            self.minutes,
            self.seconds
        )
    }
}

/// Selects which timestamps [`crate::File::set_timestamp`] updates.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TimestampFlags(u8);

impl TimestampFlags {
    /// Update the access date.
    pub const ACCESS: TimestampFlags = TimestampFlags(0x01);
    /// Update the creation date and time.
    pub const CREATE: TimestampFlags = TimestampFlags(0x02);
    /// Update the modification date and time.
    pub const WRITE: TimestampFlags = TimestampFlags(0x04);

    /// Are all of `other`'s flags set in this value?
    pub fn contains(self, other: TimestampFlags) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl core::ops::BitOr for TimestampFlags {
    type Output = TimestampFlags;
    fn bitor(self, rhs: TimestampFlags) -> TimestampFlags {
        TimestampFlags(self.0 | rhs.0)
    }
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
    fn fat_round_trip() {
        let ts = Timestamp::from_calendar(2018, 12, 9, 19, 22, 34).unwrap();
        let back = Timestamp::from_fat(ts.fat_date(), ts.fat_time());
        // FAT times round down to two-second resolution
        assert_eq!(format!("{}", back), "2018-12-09 19:22:34");
        let ts = Timestamp::from_calendar(2003, 4, 4, 13, 30, 5).unwrap();
        let back = Timestamp::from_fat(ts.fat_date(), ts.fat_time());
        assert_eq!(format!("{}", back), "2003-04-04 13:30:04");
    }

    #[test]
    fn pre_epoch_clamps() {
        let ts = Timestamp::from_calendar(1975, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(ts.fat_date() >> 9, 0);
        assert!(!ts.fits_fat_range());
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
