//! The SPI command set of the nRF24LE1 flash controller

use std::fmt;

use scroll::{BE, Pread, Pwrite};

use crate::constants::{FIRMWARE_CHUNK_SIZE, MAX_FRAME_SIZE, commands};
use crate::error::{Error, Result};

// FSR, bits 1:0 are reserved.
bitfield::bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    pub struct FlashStatus(u8);
    impl Debug;
    pub rdismb, set_rdismb: 2;
    pub infen, set_infen: 3;
    pub rdyn, set_rdyn: 4;
    pub wen, set_wen: 5;
    pub stp, set_stp: 6;
    pub endebug, set_endebug: 7;
}

impl FlashStatus {
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Busy with the previous erase/program command
    pub fn is_busy(&self) -> bool {
        self.rdyn()
    }
}

impl From<u8> for FlashStatus {
    fn from(raw: u8) -> Self {
        FlashStatus(raw)
    }
}

impl fmt::Display for FlashStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// nRF24LE1 SPI flash command
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Command {
    /// RDSR, one status byte is clocked back.
    ReadStatus,
    /// WRSR. Only INFEN, STP and RDISMB are writable.
    WriteStatus(u8),
    /// WREN, sets FSR.WEN. The bit clears itself once the device
    /// accepts the next erase or program command.
    WriteEnable,
    /// WRDIS, clears FSR.WEN.
    WriteDisable,
    /// READ from `address`, data is clocked back for as long as the
    /// transaction lasts.
    Read { address: u16 },
    /// PROGRAM `data` starting at `address`. Requires FSR.WEN.
    Program { address: u16, data: Vec<u8> },
    /// ERASE PAGE, by page index rather than address. Requires FSR.WEN.
    ErasePage { page: u8 },
    /// ERASE ALL, clears the main block (and the info page if FSR.INFEN is set).
    EraseAll,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::ReadStatus => write!(f, "RDSR"),
            Command::WriteStatus(fsr) => write!(f, "WRSR(0x{:02X})", fsr),
            Command::WriteEnable => write!(f, "WREN"),
            Command::WriteDisable => write!(f, "WRDIS"),
            Command::Read { address } => write!(f, "READ(0x{:04X})", address),
            Command::Program { address, data } => {
                write!(f, "PROGRAM(0x{:04X}, {} bytes)", address, data.len())
            }
            Command::ErasePage { page } => write!(f, "ERASEPAGE({})", page),
            Command::EraseAll => write!(f, "ERASEALL"),
        }
    }
}

impl Command {
    pub fn read(address: u16) -> Self {
        Command::Read { address }
    }

    pub fn program(address: u16, data: Vec<u8>) -> Self {
        Command::Program { address, data }
    }

    pub fn erase_page(page: u8) -> Self {
        Command::ErasePage { page }
    }

    pub fn opcode(&self) -> u8 {
        match self {
            Command::ReadStatus => commands::RDSR,
            Command::WriteStatus(_) => commands::WRSR,
            Command::WriteEnable => commands::WREN,
            Command::WriteDisable => commands::WRDIS,
            Command::Read { .. } => commands::READ,
            Command::Program { .. } => commands::PROGRAM,
            Command::ErasePage { .. } => commands::ERASE_PAGE,
            Command::EraseAll => commands::ERASE_ALL,
        }
    }

    /// Encodes the frame. Addresses go out most significant byte first.
    pub fn into_raw(self) -> Result<Vec<u8>> {
        let opcode = self.opcode();
        match self {
            Command::ReadStatus
            | Command::WriteEnable
            | Command::WriteDisable
            | Command::EraseAll => Ok(vec![opcode]),
            Command::WriteStatus(fsr) => Ok(vec![opcode, fsr]),
            Command::ErasePage { page } => Ok(vec![opcode, page]),
            Command::Read { address } => {
                let mut buf = vec![opcode, 0, 0];
                buf.pwrite_with(address, 1, BE)
                    .map_err(|e| Error::InvalidFrame(e.to_string()))?;
                Ok(buf)
            }
            Command::Program { address, data } => {
                if data.is_empty() || data.len() > FIRMWARE_CHUNK_SIZE {
                    return Err(Error::InvalidFrame(format!(
                        "PROGRAM payload of {} bytes, allowed 1..={}",
                        data.len(),
                        FIRMWARE_CHUNK_SIZE
                    )));
                }
                // CMD, ADDR_H, ADDR_L, DATA
                let mut buf = Vec::with_capacity(MAX_FRAME_SIZE);
                buf.extend_from_slice(&[opcode, 0, 0]);
                buf.pwrite_with(address, 1, BE)
                    .map_err(|e| Error::InvalidFrame(e.to_string()))?;
                buf.extend_from_slice(&data);
                Ok(buf)
            }
        }
    }

    pub fn from_raw(raw: &[u8]) -> Result<Self> {
        let invalid = || Error::InvalidFrame(hex::encode(raw));
        let (&opcode, args) = raw.split_first().ok_or_else(invalid)?;
        let address = || {
            raw.pread_with::<u16>(1, BE)
                .map_err(|e| Error::InvalidFrame(e.to_string()))
        };
        let cmd = match (opcode, args.len()) {
            (commands::RDSR, 0) => Command::ReadStatus,
            (commands::WREN, 0) => Command::WriteEnable,
            (commands::WRDIS, 0) => Command::WriteDisable,
            (commands::ERASE_ALL, 0) => Command::EraseAll,
            (commands::WRSR, 1) => Command::WriteStatus(args[0]),
            (commands::ERASE_PAGE, 1) => Command::ErasePage { page: args[0] },
            (commands::READ, 2) => Command::Read { address: address()? },
            (commands::PROGRAM, n) if n > 2 => Command::Program {
                address: address()?,
                data: args[2..].to_vec(),
            },
            _ => return Err(invalid()),
        };
        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_big_endian() {
        let raw = Command::read(0x4410).into_raw().unwrap();
        assert_eq!(raw, [commands::READ, 0x44, 0x10]);

        let raw = Command::program(0x0200, vec![0xaa; 4]).into_raw().unwrap();
        assert_eq!(raw, [commands::PROGRAM, 0x02, 0x00, 0xaa, 0xaa, 0xaa, 0xaa]);
    }

    #[test]
    fn argument_byte_frames() {
        assert_eq!(
            Command::erase_page(35).into_raw().unwrap(),
            [commands::ERASE_PAGE, 35]
        );
        assert_eq!(
            Command::WriteStatus(0x08).into_raw().unwrap(),
            [commands::WRSR, 0x08]
        );
        assert_eq!(Command::EraseAll.into_raw().unwrap(), [commands::ERASE_ALL]);
    }

    #[test]
    fn oversize_program_payload_is_rejected() {
        let cmd = Command::program(0, vec![0; FIRMWARE_CHUNK_SIZE + 1]);
        assert!(matches!(cmd.into_raw(), Err(Error::InvalidFrame(_))));

        let cmd = Command::program(0, vec![]);
        assert!(matches!(cmd.into_raw(), Err(Error::InvalidFrame(_))));
    }

    #[test]
    fn parse_frames() {
        let raw = [commands::PROGRAM, 0x3e, 0x00, 1, 2, 3];
        assert_eq!(
            Command::from_raw(&raw).unwrap(),
            Command::program(0x3e00, vec![1, 2, 3])
        );
        assert_eq!(
            Command::from_raw(&[commands::RDSR]).unwrap(),
            Command::ReadStatus
        );
        // READ without its address
        assert!(Command::from_raw(&[commands::READ, 0x00]).is_err());
        assert!(Command::from_raw(&[0xff]).is_err());
        assert!(Command::from_raw(&[]).is_err());
    }

    #[test]
    fn status_bits() {
        let fsr = FlashStatus::from(0x28);
        assert!(fsr.wen());
        assert!(fsr.infen());
        assert!(!fsr.is_busy());
        assert!(!fsr.rdismb());

        let mut fsr = FlashStatus::default();
        fsr.set_rdyn(true);
        assert_eq!(fsr.bits(), 0x10);
        assert_eq!(fsr.to_string(), "0x10");
    }
}
