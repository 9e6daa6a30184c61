//! nRF24LE1 memory map: the regions the programmer can read and write.
use std::ops::Range;

use crate::constants::*;

/// A programmable memory region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// Main block, the 16KiB program memory
    MainFlash,
    /// The separately addressed info page, visible only while FSR.INFEN is set
    InfoPage,
    /// Two normal-endurance NVM pages, placed above the program memory
    NvmNormal,
}

impl ::std::fmt::Display for Region {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        let name = match self {
            Region::MainFlash => "firmware",
            Region::InfoPage => "infopage",
            Region::NvmNormal => "nvm",
        };
        write!(f, "{}", name)
    }
}

impl Region {
    /// Address of the first byte, as transmitted in READ/PROGRAM frames
    pub const fn base(&self) -> u16 {
        match self {
            Region::MainFlash | Region::InfoPage => 0x0000,
            Region::NvmNormal => NVM_NORMAL_BASE,
        }
    }

    pub const fn size(&self) -> usize {
        match self {
            Region::MainFlash => MAX_FIRMWARE_SIZE,
            Region::InfoPage => INFO_PAGE_SIZE,
            Region::NvmNormal => NVM_NORMAL_SIZE,
        }
    }

    /// Page indices passed to ERASEPAGE to clear this region
    pub fn pages(&self) -> Range<u8> {
        match self {
            Region::MainFlash => 0..PROGRAM_PAGES as u8,
            Region::InfoPage => 0..1,
            Region::NvmNormal => NVM_NORMAL_PAGE0..NVM_NORMAL_PAGE1 + 1,
        }
    }

    /// Address of the byte at `offset` into the region
    pub(crate) fn address(&self, offset: usize) -> u16 {
        self.base() + offset as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nvm_pages_match_base_address() {
        let pages = Region::NvmNormal.pages();
        assert_eq!(pages.len() * PAGE_SIZE, Region::NvmNormal.size());
        assert_eq!(pages.start as usize * PAGE_SIZE, NVM_NORMAL_BASE as usize);
    }

    #[test]
    fn program_pages_cover_firmware() {
        assert_eq!(
            Region::MainFlash.pages().len() * PAGE_SIZE,
            Region::MainFlash.size()
        );
        assert_eq!(Region::MainFlash.address(15872), 0x3e00);
    }
}
