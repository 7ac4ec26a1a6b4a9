//! Discovery of the devices on a scan chain: total IR length, number of
//! devices and their IDCODEs. Relies only on what IEEE 1149.1 mandates
//! (BYPASS is all ones, IDCODE is selected on reset when implemented).

use embedded_hal::delay::DelayNs;
use log::{debug, info};

use crate::error::ChainError;
use crate::interface::GpioPort;
use crate::jtag::jtag_state_machine::TapState;
use crate::jtag::tap::TapController;
use crate::jtag::Signal;

pub const MAX_IR_LENGTH: usize = 128;
pub const MAX_DEVICES: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceId {
    IdCode(u32),
    Bypass,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainInfo {
    /// Sum of the IR lengths of all devices.
    pub ir_length: usize,
    pub devices: usize,
    ids: [Option<DeviceId>; MAX_DEVICES],
}

impl ChainInfo {
    /// Device `index`, counted from the one nearest TDO.
    pub fn id(&self, index: usize) -> Option<DeviceId> {
        self.ids.get(index).copied().flatten()
    }

    pub fn ids(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.ids.iter().take(self.devices).flatten().copied()
    }
}

/// JEP106 manufacturer encoded in an IDCODE.
pub fn manufacturer(idcode: u32) -> Option<&'static str> {
    // Continuation code
    let cc = (idcode >> 8) & 0b1111;
    // Identity code
    let id = (idcode >> 1) & 0b0111_1111;
    jep106::JEP106Code::new(cc as u8, id as u8).get()
}

fn clocks<P: GpioPort, D: DelayNs>(tap: &mut TapController<P, D>, count: usize) {
    for _ in 0..count {
        tap.driver.clock();
    }
}

/// Total IR length of the chain.
///
/// Floods the IRs with ones, shifts a single zero in and counts the clocks
/// until it shows up on TDO. Every IR holds all ones (BYPASS) afterwards.
pub fn find_ir_length<P: GpioPort, D: DelayNs>(
    tap: &mut TapController<P, D>,
) -> Result<usize, ChainError> {
    tap.driver.set(Signal::Tdi, true);
    tap.set_state(TapState::IrShift);
    clocks(tap, MAX_IR_LENGTH);

    tap.driver.set(Signal::Tdi, false);
    tap.driver.clock();
    tap.driver.set(Signal::Tdi, true);

    let mut length = None;
    for count in 1..MAX_IR_LENGTH {
        if !tap.driver.get(Signal::Tdo) {
            length = Some(count);
            break;
        }
        tap.driver.clock();
    }
    // push the zero out so the chain ends up in BYPASS
    tap.driver.clock();

    debug!("IR length: {:?}", length);
    length.ok_or(ChainError::IrLengthNotFound)
}

/// Number of devices on the chain.
///
/// With every device in BYPASS the DR path is one bit per device, so the
/// number of ones needed before a one appears on TDO is the device count.
pub fn find_devices<P: GpioPort, D: DelayNs>(
    tap: &mut TapController<P, D>,
    ir_length: usize,
) -> Result<usize, ChainError> {
    tap.set_state(TapState::IrShift);
    tap.driver.set(Signal::Tdi, true);
    clocks(tap, ir_length);

    tap.set_state(TapState::DrShift);
    for count in 0..MAX_DEVICES {
        if tap.driver.get(Signal::Tdo) {
            debug!("devices: {}", count);
            return match count {
                0 => Err(ChainError::NoDevices),
                n => Ok(n),
            };
        }
        tap.driver.clock();
    }
    Err(ChainError::NoDevices)
}

/// Read the next device's DR, expecting DR-Shift right after a reset.
///
/// An IDCODE always has bit 0 set; a device without one sits in BYPASS
/// and contributes a single zero.
pub fn read_idcode<P: GpioPort, D: DelayNs>(tap: &mut TapController<P, D>) -> DeviceId {
    if !tap.driver.get(Signal::Tdo) {
        tap.driver.clock();
        return DeviceId::Bypass;
    }

    let mut idcode = 0u32;
    for _ in 0..32 {
        idcode >>= 1;
        if tap.driver.get(Signal::Tdo) {
            idcode |= 0x8000_0000;
        }
        tap.driver.clock();
    }
    DeviceId::IdCode(idcode)
}

/// Enumerate the chain. Leaves the TAP in DR-Shift with TDI high.
pub fn detect<P: GpioPort, D: DelayNs>(
    tap: &mut TapController<P, D>,
) -> Result<ChainInfo, ChainError> {
    let ir_length = find_ir_length(tap)?;
    let devices = find_devices(tap, ir_length)?;

    // IR resets to IDCODE, or BYPASS when there is none
    tap.set_state(TapState::Reset);
    tap.set_state(TapState::DrShift);
    tap.driver.set(Signal::Tdi, true);

    info!(
        "{} device(s) found, with total IR length of {}",
        devices, ir_length
    );

    let mut ids = [None; MAX_DEVICES];
    for (n, slot) in ids.iter_mut().take(devices).enumerate() {
        let id = read_idcode(tap);
        match id {
            DeviceId::IdCode(idcode) => info!(
                "device {} - {} (IDCODE:{:#010x})",
                n + 1,
                manufacturer(idcode).unwrap_or("Unknown"),
                idcode
            ),
            DeviceId::Bypass => info!("device {} - BYPASS", n + 1),
        }
        *slot = Some(id);
    }

    Ok(ChainInfo {
        ir_length,
        devices,
        ids,
    })
}
