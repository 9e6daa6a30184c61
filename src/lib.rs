//! nRF24LE1 flash programming through a USBasp-class SPI bridge.

pub mod constants;
pub mod device;
pub mod error;
pub mod flashing;
pub mod format;
pub mod protocol;
pub mod transport;

pub use self::device::Region;
pub use self::error::{Error, Result};
pub use self::flashing::{Flashing, ReadyPolicy, Timing};
pub use self::protocol::{Command, FlashStatus};
pub use self::transport::Transport;
