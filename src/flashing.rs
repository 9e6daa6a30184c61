//! Chip flashing logic.

use std::{thread::sleep, time::Duration};

use log::Level;

use crate::constants::{
    FIRMWARE_CHUNK_SIZE, FIRMWARE_CHUNKS, PROG_PIN, READ_CHUNK_SIZE, WRITE_CHUNK_SIZE,
};
use crate::error::{Check, Error, Result};
use crate::{Command, FlashStatus, Region, Transport, transport::UsbTransport};

/// What to do when the flash is still busy after `Timing::max_polls` status reads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadyPolicy {
    /// Log the status register and carry on as if ready
    #[default]
    Lenient,
    /// Fail with [`Error::Timeout`]
    Strict,
}

#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Hold time after toggling PROG
    pub settle: Duration,
    /// Delay between two status reads while waiting for ready
    pub poll_interval: Duration,
    pub max_polls: u32,
    pub ready: ReadyPolicy,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            settle: Duration::from_secs(1),
            poll_interval: Duration::from_micros(300),
            max_polls: 1000,
            ready: ReadyPolicy::Lenient,
        }
    }
}

impl Timing {
    /// No delays at all, for emulated devices
    pub fn immediate() -> Self {
        Timing {
            settle: Duration::ZERO,
            poll_interval: Duration::ZERO,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Session {
    Disabled,
    Enabled,
}

/// Logs every named FSR flag
pub fn dump_status(fsr: FlashStatus, level: Level) {
    log::log!(level, "-> FSR.RDISMB: {}", fsr.rdismb() as u8);
    log::log!(level, "-> FSR.INFEN: {}", fsr.infen() as u8);
    log::log!(level, "-> FSR.RDYN: {}", fsr.rdyn() as u8);
    log::log!(level, "-> FSR.WEN: {}", fsr.wen() as u8);
    log::log!(level, "-> FSR.STP: {}", fsr.stp() as u8);
    log::log!(level, "-> FSR.ENDEBUG: {}", fsr.endebug() as u8);
}

fn check_len(region: Region, actual: usize) -> Result<()> {
    if actual != region.size() {
        log::error!(
            "Size of {} buffer ({}) differs from the region size ({})",
            region,
            actual,
            region.size()
        );
        return Err(Error::InvalidArgument {
            region,
            expected: region.size(),
            actual,
        });
    }
    Ok(())
}

/// A programming session with one nRF24LE1.
///
/// Program mode is left when the value is dropped.
pub struct Flashing<T: Transport> {
    transport: T,
    timing: Timing,
    session: Session,
}

impl Flashing<UsbTransport> {
    pub fn new_from_usb(timing: Timing) -> anyhow::Result<Self> {
        let transport = UsbTransport::open_any()?;
        Ok(Flashing::new(transport, timing))
    }
}

impl<T: Transport> Flashing<T> {
    pub fn new(transport: T, timing: Timing) -> Self {
        Flashing {
            transport,
            timing,
            session: Session::Disabled,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn is_program_mode(&self) -> bool {
        self.session == Session::Enabled
    }

    fn check_session(&self) -> Result<()> {
        if self.session != Session::Enabled {
            log::error!("Failed, program mode is not enabled");
            return Err(Error::InvalidState);
        }
        Ok(())
    }

    fn send(&mut self, cmd: Command) -> Result<()> {
        self.transport.transfer(cmd, &mut [])
    }

    pub fn read_status(&mut self) -> Result<FlashStatus> {
        let mut buf = [0u8; 1];
        self.transport.transfer(Command::ReadStatus, &mut buf)?;
        Ok(FlashStatus::from(buf[0]))
    }

    /// Polls FSR.RDYN, returns the last status read if it never cleared
    fn poll_ready(&mut self) -> Result<Option<FlashStatus>> {
        let mut fsr = FlashStatus::default();
        for _ in 0..self.timing.max_polls {
            fsr = self.read_status()?;
            if !fsr.is_busy() {
                return Ok(None);
            }
            sleep(self.timing.poll_interval);
        }
        Ok(Some(fsr))
    }

    /// Waits for the previous erase/program to finish, following `Timing::ready`.
    pub fn wait_ready(&mut self) -> Result<()> {
        match self.timing.ready {
            ReadyPolicy::Strict => self.wait_ready_strict(),
            ReadyPolicy::Lenient => {
                if let Some(fsr) = self.poll_ready()? {
                    log::error!("Failed to wait for flash to be ready, FSR: {}", fsr);
                    dump_status(fsr, Level::Error);
                }
                Ok(())
            }
        }
    }

    pub fn wait_ready_strict(&mut self) -> Result<()> {
        match self.poll_ready()? {
            None => Ok(()),
            Some(fsr) => {
                log::error!("Failed to wait for flash to be ready, FSR: {}", fsr);
                dump_status(fsr, Level::Error);
                Err(Error::Timeout {
                    polls: self.timing.max_polls,
                })
            }
        }
    }

    /// WREN, then checks that FSR.WEN took.
    pub fn enable_write(&mut self) -> Result<()> {
        self.check_session()?;
        self.send(Command::WriteEnable)?;
        let fsr = self.read_status()?;
        if !fsr.wen() {
            log::error!("Failed to enable flash programming -> FSR.WEN: 0");
            return Err(Error::Verification {
                check: Check::WriteEnable,
                original: None,
                observed: fsr,
            });
        }
        Ok(())
    }

    fn set_infopage_access(&mut self, enable: bool) -> Result<()> {
        self.check_session()?;
        let original = self.read_status()?;
        let mut fsr = original;
        fsr.set_infen(enable);
        self.send(Command::WriteStatus(fsr.bits()))?;

        let observed = self.read_status()?;
        if observed.infen() != enable {
            let check = if enable {
                Check::InfopageEnable
            } else {
                Check::InfopageDisable
            };
            log::error!("Failed to {}: {} {}", check, original, observed);
            return Err(Error::Verification {
                check,
                original: Some(original),
                observed,
            });
        }
        Ok(())
    }

    pub fn enable_infopage_access(&mut self) -> Result<()> {
        self.set_infopage_access(true)
    }

    pub fn disable_infopage_access(&mut self) -> Result<()> {
        self.set_infopage_access(false)
    }

    /// Runs `f` with the info page mapped in. Access is disabled again
    /// whatever `f` returns; an error from `f` takes precedence.
    fn with_infopage<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        self.enable_infopage_access()?;
        let result = f(self);
        let disabled = self.disable_infopage_access();
        match (result, disabled) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(e), Ok(())) | (Ok(_), Err(e)) => Err(e),
            (Err(e), Err(disable_err)) => {
                log::error!("Infopage access may still be enabled: {}", disable_err);
                Err(e)
            }
        }
    }

    /// Erases one page. Returns `Ok(false)` without erasing when
    /// write enable could not be asserted.
    pub fn erase_page(&mut self, page: u8) -> Result<bool> {
        self.check_session()?;
        match self.enable_write() {
            Ok(()) => (),
            Err(Error::Verification { .. }) => return Ok(false),
            Err(e) => return Err(e),
        }
        self.wait_ready()?;

        self.send(Command::erase_page(page))?;
        log::debug!("Erased page: {}", page);

        self.wait_ready()?;
        Ok(true)
    }

    pub fn erase_program_pages(&mut self) -> Result<()> {
        self.check_session()?;
        let mut erased = 0;
        for page in Region::MainFlash.pages() {
            if self.erase_page(page)? {
                erased += 1;
            }
        }
        log::debug!("Erased {} of {} program pages", erased, Region::MainFlash.pages().len());
        Ok(())
    }

    /// Programs `data` in `WRITE_CHUNK_SIZE` pieces. A failed chunk is
    /// counted and the loop goes on with the next one.
    fn program_chunks(&mut self, region: Region, data: &[u8]) -> Result<usize> {
        let chunks = data.len().div_ceil(WRITE_CHUNK_SIZE);
        let mut failed = 0;

        for (i, chunk) in data.chunks(WRITE_CHUNK_SIZE).enumerate() {
            if let Err(e) = self.send(Command::WriteEnable) {
                log::warn!("Failed in WREN: {}", e);
            }
            self.wait_ready()?;

            let address = region.address(i * WRITE_CHUNK_SIZE);
            if let Err(e) = self.send(Command::program(address, chunk.to_vec())) {
                log::warn!("Failed to program 0x{:04X}: {}", address, e);
                failed += 1;
            }
            self.wait_ready()?;
        }

        if failed > 0 {
            log::error!("Number of errors writing to {}: {}", region, failed);
            return Err(Error::ChunksFailed { failed, chunks });
        }
        Ok(data.len())
    }

    /// Fills `buf` from `region` with `READ_CHUNK_SIZE` transactions,
    /// stopping at the first failed one.
    pub fn read_region(&mut self, region: Region, buf: &mut [u8]) -> Result<usize> {
        self.check_session()?;
        check_len(region, buf.len())?;

        let mut read = 0;
        for chunk in buf.chunks_mut(READ_CHUNK_SIZE) {
            let address = region.address(read);
            match self.transport.transfer(Command::read(address), chunk) {
                Ok(()) => read += chunk.len(),
                Err(Error::Transport(source)) => {
                    log::error!("Failed reading {} at 0x{:04X}", region, address);
                    return Err(Error::Incomplete {
                        read,
                        expected: region.size(),
                        source,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        log::debug!("Number of bytes read: {}", read);
        Ok(read)
    }

    pub fn enter_program_mode(&mut self) -> Result<()> {
        if self.session == Session::Enabled {
            return Ok(());
        }
        log::info!("Initiate programming");
        self.transport
            .set_gpio(PROG_PIN, true)
            .map_err(Error::Transport)?;
        sleep(self.timing.settle);
        self.session = Session::Enabled;
        self.wait_ready()
    }

    pub fn exit_program_mode(&mut self) -> Result<()> {
        if self.session == Session::Disabled {
            return Ok(());
        }
        self.transport
            .set_gpio(PROG_PIN, false)
            .map_err(Error::Transport)?;
        sleep(self.timing.settle);
        self.session = Session::Disabled;
        log::info!("Finished programming");
        Ok(())
    }

    /// Checks SPI connectivity by toggling FSR.WEN.
    ///
    /// All steps always run, the first unexpected WEN value is returned.
    pub fn test_connectivity(&mut self, dump: bool) -> Result<()> {
        self.check_session()?;

        let fsr = self.read_status()?;
        if dump {
            log::info!("* FSR original");
            dump_status(fsr, Level::Info);
        }

        self.send(Command::WriteEnable)?;
        let fsr = self.read_status()?;
        if dump {
            log::info!("* FSR after WREN, WEN must be 1");
            dump_status(fsr, Level::Info);
        }
        let mut result = Ok(());
        if !fsr.wen() {
            log::error!("Failed to set Write Enable bit to 1");
            result = Err(Error::Verification {
                check: Check::WriteEnable,
                original: None,
                observed: fsr,
            });
        }

        self.send(Command::WriteDisable)?;
        let fsr = self.read_status()?;
        if dump {
            log::info!("* FSR after WRDIS, WEN must be 0");
            dump_status(fsr, Level::Info);
        }
        if fsr.wen() {
            log::error!("Failed to set Write Enable bit to 0");
            if result.is_ok() {
                result = Err(Error::Verification {
                    check: Check::WriteDisable,
                    original: None,
                    observed: fsr,
                });
            }
        }

        result
    }

    /// Erases the whole main block.
    pub fn erase_all(&mut self) -> Result<()> {
        self.check_session()?;

        log::info!("Initiating erase of all pages");
        self.send(Command::WriteEnable)?;
        self.wait_ready()?;
        self.send(Command::EraseAll)?;
        self.wait_ready()?;
        log::info!("Done erasing all pages");
        Ok(())
    }

    pub fn read_infopage(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_session()?;
        check_len(Region::InfoPage, buf.len())?;

        self.with_infopage(|f| f.read_region(Region::InfoPage, buf))
    }

    pub fn write_infopage(&mut self, image: &[u8]) -> Result<usize> {
        self.check_session()?;
        check_len(Region::InfoPage, image.len())?;

        let written = self.with_infopage(|f| {
            f.erase_page(0)?;
            log::debug!("Initiate writing to infopage");
            f.program_chunks(Region::InfoPage, image)
        })?;
        log::info!("Number of bytes written to infopage: {}", written);
        Ok(written)
    }

    pub fn read_nvm(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_session()?;
        self.read_region(Region::NvmNormal, buf)
    }

    pub fn write_nvm(&mut self, image: &[u8]) -> Result<usize> {
        self.check_session()?;
        check_len(Region::NvmNormal, image.len())?;

        for page in Region::NvmNormal.pages() {
            self.erase_page(page)?;
        }
        let written = self.program_chunks(Region::NvmNormal, image)?;
        log::info!("Number of bytes written to nvm: {}", written);
        Ok(written)
    }

    pub fn read_firmware(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_session()?;
        self.read_region(Region::MainFlash, buf)
    }

    /// Erases the program pages, then programs all of them, page by page.
    ///
    /// Always transmits `FIRMWARE_CHUNKS` full pages: an image shorter than
    /// the main block is padded with zeros. Stops at the first page that
    /// cannot be write enabled or transmitted.
    pub fn write_firmware(&mut self, image: &[u8]) -> Result<usize> {
        self.check_session()?;

        let region = Region::MainFlash;
        if image.is_empty() || image.len() > region.size() {
            log::error!("Firmware image of {} bytes does not fit", image.len());
            return Err(Error::InvalidArgument {
                region,
                expected: region.size(),
                actual: image.len(),
            });
        }
        if image.len() < region.size() {
            log::warn!(
                "Firmware image is {} bytes, programming all {} bytes zero filled",
                image.len(),
                region.size()
            );
        }
        let mut firmware = vec![0u8; region.size()];
        firmware[..image.len()].copy_from_slice(image);

        // PROGRAM can only clear bits
        self.erase_program_pages()?;
        self.wait_ready()?;

        for i in 0..FIRMWARE_CHUNKS {
            let offset = i * FIRMWARE_CHUNK_SIZE;
            let address = region.address(offset);
            let page = firmware[offset..offset + FIRMWARE_CHUNK_SIZE].to_vec();

            self.enable_write()?;
            log::debug!("Programming page at 0x{:04X}", address);
            self.send(Command::program(address, page))?;
            self.wait_ready()?;
        }

        log::info!("Number of bytes written to firmware: {}", firmware.len());
        Ok(firmware.len())
    }
}

impl<T: Transport> Drop for Flashing<T> {
    fn drop(&mut self) {
        if let Err(e) = self.exit_program_mode() {
            log::error!("Failed to leave program mode: {}", e);
        }
    }
}
