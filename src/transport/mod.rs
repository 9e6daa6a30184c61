//! Abstract SPI bridge transport interface.
use anyhow::Result;

use crate::error::Error;
use crate::protocol::Command;

pub use self::emulator::{Emulator, Faults};
pub use self::usb::UsbTransport;

mod emulator;
mod usb;

/// Abstraction of the SPI bridge.
/// Might be a USB dongle, or an in-memory device.
pub trait Transport {
    /// One SPI transaction: clock out `out`, then clock `input.len()` bytes back.
    fn write_then_read(&mut self, out: &[u8], input: &mut [u8]) -> Result<()>;
    fn set_gpio(&mut self, pin: u8, high: bool) -> Result<()>;

    fn transfer(&mut self, cmd: Command, input: &mut [u8]) -> crate::Result<()> {
        let req = cmd.into_raw()?;
        log::trace!("=> {}", hex::encode(&req));
        self.write_then_read(&req, input).map_err(Error::Transport)?;
        if !input.is_empty() {
            log::trace!("<= {}", hex::encode(&input));
        }
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write_then_read(&mut self, out: &[u8], input: &mut [u8]) -> Result<()> {
        (**self).write_then_read(out, input)
    }

    fn set_gpio(&mut self, pin: u8, high: bool) -> Result<()> {
        (**self).set_gpio(pin, high)
    }
}
