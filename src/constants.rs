/// Flash page size, shared by main flash, info page and NVM.
pub const PAGE_SIZE: usize = 512;
/// Number of main flash (program memory) pages.
pub const PROGRAM_PAGES: usize = 32;
pub const MAX_FIRMWARE_SIZE: usize = PAGE_SIZE * PROGRAM_PAGES;
pub const INFO_PAGE_SIZE: usize = PAGE_SIZE;

/// NVM "normal endurance" pages, numbered in the program memory page space.
pub const NVM_NORMAL_PAGE0: u8 = 34;
pub const NVM_NORMAL_PAGE1: u8 = 35;
pub const NVM_NORMAL_BASE: u16 = 0x4400;
pub const NVM_NORMAL_SIZE: usize = 2 * PAGE_SIZE;

/// Largest READ payload in a single transaction.
pub const READ_CHUNK_SIZE: usize = 128;
/// Largest PROGRAM payload for the info page and NVM writers.
pub const WRITE_CHUNK_SIZE: usize = 16;
/// The firmware writer programs a full page per transaction.
pub const FIRMWARE_CHUNK_SIZE: usize = PAGE_SIZE;
pub const FIRMWARE_CHUNKS: usize = MAX_FIRMWARE_SIZE / FIRMWARE_CHUNK_SIZE;

/// opcode + 16-bit address + the largest payload
pub const MAX_FRAME_SIZE: usize = 3 + FIRMWARE_CHUNK_SIZE;

pub mod commands {
    pub const WRSR: u8 = 0x01;
    pub const PROGRAM: u8 = 0x02;
    pub const READ: u8 = 0x03;
    pub const WRDIS: u8 = 0x04;
    pub const RDSR: u8 = 0x05;
    pub const WREN: u8 = 0x06;
    pub const ERASE_PAGE: u8 = 0x52;
    pub const ERASE_ALL: u8 = 0x62;
}

/// Bridge GPIO line wired to the target's PROG input.
pub const PROG_PIN: u8 = 24;
