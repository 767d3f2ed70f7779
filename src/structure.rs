//! Macros for accessing fields in on-disk structures.

macro_rules! define_field {
    ($name:ident, u8, $offset:expr) => {
        /// Get the value from the $name field
        pub fn $name(&self) -> u8 {
            self.data[$offset]
        }
    };

    ($name:ident, u16, $offset:expr) => {
        /// Get the value from the $name field
        pub fn $name(&self) -> u16 {
            LittleEndian::read_u16(&self.data[$offset..$offset + 2])
        }
    };

    ($name:ident, u32, $offset:expr) => {
        /// Get the $name field
        pub fn $name(&self) -> u32 {
            LittleEndian::read_u32(&self.data[$offset..$offset + 4])
        }
    };
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
