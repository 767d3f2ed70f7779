//! FAT32 Info Sector

use byteorder::{ByteOrder, LittleEndian};

/// Represents a FAT32 Info Sector, which holds a hint about the number of
/// free clusters and where allocation should search next.
pub struct InfoSector<'a> {
    data: &'a [u8; 512],
}

impl<'a> InfoSector<'a> {
    const LEAD_SIG: u32 = 0x4161_5252;
    const STRUC_SIG: u32 = 0x6141_7272;

    define_field!(lead_sig, u32, 0);
    define_field!(struc_sig, u32, 484);
    define_field!(raw_free_count, u32, 488);
    define_field!(raw_next_free, u32, 492);

    /// Try and parse a sector as a FAT32 Info Sector.
    pub fn create_from_bytes(data: &[u8; 512]) -> Result<InfoSector, &'static str> {
        let info = InfoSector { data };
        if info.lead_sig() != Self::LEAD_SIG {
            return Err("Bad lead signature on InfoSector");
        }
        if info.struc_sig() != Self::STRUC_SIG {
            return Err("Bad struc signature on InfoSector");
        }
        Ok(info)
    }

    /// How many clusters on the volume are free, if known.
    pub fn free_cluster_count(&self) -> Option<u32> {
        match self.raw_free_count() {
            0xFFFF_FFFF => None,
            n => Some(n),
        }
    }

    /// The cluster number allocation should try first, if known.
    pub fn next_free_cluster(&self) -> Option<u32> {
        match self.raw_next_free() {
            0xFFFF_FFFF => None,
            n => Some(n),
        }
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
