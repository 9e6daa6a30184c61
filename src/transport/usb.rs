//! USB Transportation, through a USBasp-class V-USB SPI bridge.
use std::time::Duration;

use anyhow::Result;
use rusb::{Context, Device, DeviceHandle, Direction, Recipient, RequestType, UsbContext};

use super::Transport;

const VENDOR_ID: u16 = 0x16c0;
const PRODUCT_ID: u16 = 0x05dc;
const VENDOR_NAME: &str = "www.fischl.de";
const PRODUCT_NAME: &str = "USBasp";

const TIMEOUT_MS: u64 = 5000;

/// Vendor control requests understood by the bridge firmware
mod requests {
    /// Enable the SPI lines
    pub const SPI_CONNECT: u8 = 0x01;
    /// Tri-state the SPI lines
    pub const SPI_DISCONNECT: u8 = 0x02;
    /// OUT: data is clocked out, wValue bytes are clocked back and latched
    pub const SPI_WRITE: u8 = 0x10;
    /// IN: fetch the bytes latched by the last SPI_WRITE
    pub const SPI_READ: u8 = 0x11;
    /// wValue = pin, wIndex = level
    pub const SET_GPIO: u8 = 0x12;
}

pub struct UsbTransport {
    device_handle: DeviceHandle<rusb::Context>,
}

fn matching_devices(context: &Context) -> Result<Vec<Device<Context>>> {
    Ok(context
        .devices()?
        .iter()
        .filter(|device| {
            device
                .device_descriptor()
                .map(|desc| desc.vendor_id() == VENDOR_ID && desc.product_id() == PRODUCT_ID)
                .unwrap_or(false)
        })
        .collect())
}

impl UsbTransport {
    pub fn open_nth(nth: usize) -> Result<UsbTransport> {
        let context = Context::new()?;

        let device = matching_devices(&context)?
            .into_iter()
            .nth(nth)
            .ok_or(anyhow::format_err!(
                "Could not find USB device \"{}\" with vid=0x{:04x} pid=0x{:04x} at index #{}",
                PRODUCT_NAME,
                VENDOR_ID,
                PRODUCT_ID,
                nth
            ))?;
        log::debug!("Found USB Device {:?}", device);

        let device_handle = device.open()?;
        let descriptor = device.device_descriptor()?;

        // Shared V-USB IDs, so the strings tell the bridges apart
        let vendor = device_handle.read_manufacturer_string_ascii(&descriptor)?;
        let product = device_handle.read_product_string_ascii(&descriptor)?;
        if vendor != VENDOR_NAME || product != PRODUCT_NAME {
            anyhow::bail!(
                "USB device 0x{:04x}:0x{:04x} is \"{}\" by \"{}\", expected \"{}\" by \"{}\"",
                VENDOR_ID,
                PRODUCT_ID,
                product,
                vendor,
                PRODUCT_NAME,
                VENDOR_NAME
            );
        }

        let transport = UsbTransport { device_handle };
        transport.control_out(requests::SPI_CONNECT, 0, 0, &[])?;
        log::debug!("SPI bridge connected");
        Ok(transport)
    }

    pub fn open_any() -> Result<UsbTransport> {
        Self::open_nth(0)
    }

    fn control_out(&self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<()> {
        let request_type =
            rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device);
        let n = self.device_handle.write_control(
            request_type,
            request,
            value,
            index,
            data,
            Duration::from_millis(TIMEOUT_MS),
        )?;
        anyhow::ensure!(
            n == data.len(),
            "short control write: {} of {} bytes",
            n,
            data.len()
        );
        Ok(())
    }

    fn control_in(&self, request: u8, buf: &mut [u8]) -> Result<()> {
        let request_type =
            rusb::request_type(Direction::In, RequestType::Vendor, Recipient::Device);
        let n = self.device_handle.read_control(
            request_type,
            request,
            0,
            0,
            buf,
            Duration::from_millis(TIMEOUT_MS),
        )?;
        anyhow::ensure!(
            n == buf.len(),
            "short control read: {} of {} bytes",
            n,
            buf.len()
        );
        Ok(())
    }
}

impl Transport for UsbTransport {
    fn write_then_read(&mut self, out: &[u8], input: &mut [u8]) -> Result<()> {
        self.control_out(requests::SPI_WRITE, input.len() as u16, 0, out)?;
        if !input.is_empty() {
            self.control_in(requests::SPI_READ, input)?;
        }
        Ok(())
    }

    fn set_gpio(&mut self, pin: u8, high: bool) -> Result<()> {
        self.control_out(requests::SET_GPIO, pin as u16, high as u16, &[])
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        if let Err(e) = self.control_out(requests::SPI_DISCONNECT, 0, 0, &[]) {
            log::warn!("Failed to disconnect SPI bridge: {}", e);
        }
        // the handle closes when dropped
    }
}
