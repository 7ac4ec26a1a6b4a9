#![cfg_attr(all(not(feature = "std"), not(test)), no_std)]

pub mod command;
pub mod config;
pub mod error;
pub mod interface;
pub mod jtag;
pub mod knock;

#[cfg(feature = "std")]
pub use crate::interface::sim;
pub use crate::command::Console;
pub use crate::config::Config;
pub use crate::error::{CfgError, ChainError, CommandError};
pub use crate::jtag::chain::{ChainInfo, DeviceId};
pub use crate::jtag::driver::Driver;
pub use crate::jtag::jtag_state_machine::TapState;
pub use crate::jtag::tap::TapController;
pub use crate::jtag::{PinMask, Signal};
pub use crate::knock::Mode;

#[cfg(test)]
pub(crate) mod test_util {
    pub fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }
}
