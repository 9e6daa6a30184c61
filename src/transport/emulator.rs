//! In-memory nRF24LE1, for tests and dry runs without a bridge attached.
use std::collections::HashMap;

use anyhow::Result;

use super::Transport;
use crate::constants::{INFO_PAGE_SIZE, NVM_NORMAL_PAGE1, PAGE_SIZE, PROG_PIN};
use crate::device::Region;
use crate::protocol::{Command, FlashStatus};

/// Main block plus the NVM pages, in program memory page numbering
const FLASH_SIZE: usize = (NVM_NORMAL_PAGE1 as usize + 1) * PAGE_SIZE;

/// Misbehaviour to inject into an [`Emulator`]
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// `(opcode, n)`: the n-th (0-based) transaction carrying `opcode` fails
    pub fail: Vec<(u8, usize)>,
    /// WREN is ignored
    pub wen_stuck_low: bool,
    /// WRSR cannot change FSR.INFEN
    pub infen_locked: bool,
    /// FSR.RDYN never clears
    pub always_busy: bool,
}

/// Emulates the flash controller of an nRF24LE1 behind the bridge.
///
/// Every frame and GPIO write is recorded, including those that fail.
/// While PROG is low the device ignores the bus and MISO reads back 0xFF.
pub struct Emulator {
    flash: Vec<u8>,
    info: Vec<u8>,
    fsr: FlashStatus,
    /// Status reads left that report RDYN
    busy: u32,
    busy_cycles: u32,
    prog: bool,
    faults: Faults,
    seen: HashMap<u8, usize>,
    frames: Vec<Vec<u8>>,
    gpio: Vec<(u8, bool)>,
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Emulator {
    /// A blank device, RDYN is reported for one status read after each
    /// erase or program command
    pub fn new() -> Self {
        Emulator {
            flash: vec![0xff; FLASH_SIZE],
            info: vec![0xff; INFO_PAGE_SIZE],
            fsr: FlashStatus::default(),
            busy: 0,
            busy_cycles: 1,
            prog: false,
            faults: Faults::default(),
            seen: HashMap::new(),
            frames: vec![],
            gpio: vec![],
        }
    }

    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    pub fn with_busy_cycles(mut self, cycles: u32) -> Self {
        self.busy_cycles = cycles;
        self
    }

    pub fn memory(&self, region: Region) -> &[u8] {
        match region {
            Region::InfoPage => &self.info,
            _ => &self.flash[region.base() as usize..][..region.size()],
        }
    }

    pub fn memory_mut(&mut self, region: Region) -> &mut [u8] {
        match region {
            Region::InfoPage => &mut self.info,
            _ => &mut self.flash[region.base() as usize..][..region.size()],
        }
    }

    pub fn status(&self) -> FlashStatus {
        self.fsr
    }

    pub fn prog_pin(&self) -> bool {
        self.prog
    }

    /// Raw frames in the order they were clocked out
    pub fn frames(&self) -> &[Vec<u8>] {
        &self.frames
    }

    pub fn commands(&self) -> Vec<Command> {
        self.frames
            .iter()
            .filter_map(|raw| Command::from_raw(raw).ok())
            .collect()
    }

    pub fn gpio_writes(&self) -> &[(u8, bool)] {
        &self.gpio
    }

    /// Forgets recorded traffic, fault occurrences count from here on
    pub fn clear_log(&mut self) {
        self.frames.clear();
        self.gpio.clear();
        self.seen.clear();
    }

    fn start_busy(&mut self) {
        self.fsr.set_wen(false);
        self.busy = self.busy_cycles;
    }

    fn execute(&mut self, cmd: Command, input: &mut [u8]) {
        input.fill(0xff);
        match cmd {
            Command::ReadStatus => {
                let mut fsr = self.fsr;
                fsr.set_rdyn(self.busy > 0 || self.faults.always_busy);
                self.busy = self.busy.saturating_sub(1);
                input.fill(fsr.bits());
            }
            Command::WriteStatus(raw) => {
                let requested = FlashStatus::from(raw);
                if !self.faults.infen_locked {
                    self.fsr.set_infen(requested.infen());
                }
                self.fsr.set_stp(requested.stp());
            }
            Command::WriteEnable => {
                if !self.faults.wen_stuck_low {
                    self.fsr.set_wen(true);
                }
            }
            Command::WriteDisable => self.fsr.set_wen(false),
            Command::Read { address } => {
                let mem = if self.fsr.infen() { &self.info } else { &self.flash };
                for (i, byte) in input.iter_mut().enumerate() {
                    *byte = mem.get(address as usize + i).copied().unwrap_or(0xff);
                }
            }
            Command::Program { address, data } => {
                if !self.fsr.wen() {
                    log::warn!("emulator: PROGRAM 0x{:04X} without WEN, ignored", address);
                    return;
                }
                let mem = if self.fsr.infen() {
                    &mut self.info
                } else {
                    &mut self.flash
                };
                // programming only clears bits
                for (i, byte) in data.iter().enumerate() {
                    if let Some(cell) = mem.get_mut(address as usize + i) {
                        *cell &= byte;
                    }
                }
                self.start_busy();
            }
            Command::ErasePage { page } => {
                if !self.fsr.wen() {
                    log::warn!("emulator: ERASEPAGE {} without WEN, ignored", page);
                    return;
                }
                if self.fsr.infen() {
                    if page == 0 {
                        self.info.fill(0xff);
                    }
                } else {
                    let start = page as usize * PAGE_SIZE;
                    if let Some(cells) = self.flash.get_mut(start..start + PAGE_SIZE) {
                        cells.fill(0xff);
                    }
                }
                self.start_busy();
            }
            Command::EraseAll => {
                if !self.fsr.wen() {
                    log::warn!("emulator: ERASEALL without WEN, ignored");
                    return;
                }
                self.flash.fill(0xff);
                if self.fsr.infen() {
                    self.info.fill(0xff);
                }
                self.start_busy();
            }
        }
    }
}

impl Transport for Emulator {
    fn write_then_read(&mut self, out: &[u8], input: &mut [u8]) -> Result<()> {
        self.frames.push(out.to_vec());
        let cmd = Command::from_raw(out)?;

        let seen = self.seen.entry(out[0]).or_default();
        let nth = *seen;
        *seen += 1;
        if self.faults.fail.contains(&(out[0], nth)) {
            anyhow::bail!("injected failure of {:?}", cmd);
        }

        if !self.prog {
            input.fill(0xff);
            return Ok(());
        }
        self.execute(cmd, input);
        Ok(())
    }

    fn set_gpio(&mut self, pin: u8, high: bool) -> Result<()> {
        self.gpio.push((pin, high));
        if pin == PROG_PIN {
            self.prog = high;
            if !high {
                // leaving program mode resets the flash controller
                self.fsr = FlashStatus::default();
                self.busy = 0;
            }
        }
        Ok(())
    }
}
