//! Search for a JTAG port on a set of unlabelled pins.
//!
//! Two strategies are offered, picked with `Mode`:
//!
//! - `Mode::Reset` tries every (TCK, TMS) pair. A reset selects IDCODE in
//!   every device that has one, so clocking DR-Shift makes TDO stream out a
//!   recognisable 32-bit word. TDI is then found by toggling each free pin
//!   and watching for the one transition it causes on TDO. Needs at least
//!   one device with an IDCODE on the chain.
//! - `Mode::Bypass` tries every (TCK, TMS, TDI) assignment. With the TAPs
//!   in IR-Shift and their IRs flooded with ones, a zero is fed into the
//!   guessed TDI; a pin that goes low a few clocks later and stays low is
//!   carrying that zero back out, so it is TDO.

use core::fmt;

use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};

use crate::error::{CfgError, ChainError};
use crate::interface::{GpioPort, PORT_PINS};
use crate::jtag::chain::{self, ChainInfo};
use crate::jtag::jtag_state_machine::TapState;
use crate::jtag::tap::TapController;
use crate::jtag::Signal;

/// Clocks used to flood the IRs, and to wait for the zero to come out.
pub const IR_SHIFT_COUNT: usize = 100;

/// Most port samples taken after a reset.
pub const RESET_SAMPLES: usize = 1024;

/// Unchanged samples in a row that end the capture early. Longer than an
/// IDCODE.
pub const RESET_UNCHANGED: usize = 48;

pub const MIN_PINS: u8 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Look for IDCODEs shifted out after a reset.
    Reset,
    /// Look for a zero travelling through the IRs.
    Bypass,
}

impl Mode {
    pub fn from_keyword(keyword: &str) -> Option<Mode> {
        match keyword {
            "reset" => Some(Mode::Reset),
            "bypass" => Some(Mode::Bypass),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Reset => f.write_str("reset"),
            Mode::Bypass => f.write_str("bypass"),
        }
    }
}

/// A pin assignment that behaves like a JTAG port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub tck: u8,
    pub tms: u8,
    pub tdi: u8,
    pub tdo: u8,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TCK: {} TMS: {} TDO: {} TDI: {}",
            self.tck, self.tms, self.tdo, self.tdi
        )
    }
}

/// What a possible TDO did after TDI went low.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Edge {
    Steady,
    Fell(usize),
    Bounced,
}

/// Search the first `pins` pins of the port for a JTAG port. Each candidate
/// is enumerated with `chain::detect` and handed to `sink` together with
/// the result.
///
/// All signals are released before and after the search.
pub fn scan<P, D, F>(
    tap: &mut TapController<P, D>,
    mode: Mode,
    pins: u8,
    mut sink: F,
) -> Result<(), CfgError>
where
    P: GpioPort,
    D: DelayNs,
    F: FnMut(Candidate, Result<ChainInfo, ChainError>),
{
    tap.driver.release_all();

    let pins = pins.min(PORT_PINS);
    if pins < MIN_PINS {
        warn!("need at least {} pins to search, got {}", MIN_PINS, pins);
        return Ok(());
    }

    info!("Scanning for JTAG port on {} pins ({} mode)...", pins, mode);
    for tck in 0..pins {
        debug!("trying TCK: {}", tck);
        for tms in (0..pins).filter(|&tms| tms != tck) {
            debug!("trying TCK: {} TMS: {}", tck, tms);
            tap.driver.release_all();
            tap.driver.cfg(Signal::Tck, Some(tck))?;
            tap.driver.cfg(Signal::Tms, Some(tms))?;
            match mode {
                Mode::Reset => scan_reset(tap, pins, tck, tms, &mut sink)?,
                Mode::Bypass => scan_bypass(tap, pins, tck, tms, &mut sink)?,
            }
        }
    }

    tap.driver.release_all();
    tap.set_state(TapState::Unknown);
    info!("Scan finished");
    Ok(())
}

/// Enumerate the chain behind `candidate` and hand the result to `sink`.
fn report<P, D, F>(
    tap: &mut TapController<P, D>,
    candidate: Candidate,
    sink: &mut F,
) -> Result<(), CfgError>
where
    P: GpioPort,
    D: DelayNs,
    F: FnMut(Candidate, Result<ChainInfo, ChainError>),
{
    info!("[!] Potential chain: {}", candidate);
    tap.driver.cfg(Signal::Tdo, Some(candidate.tdo))?;
    let result = chain::detect(tap);
    tap.driver.release(Signal::Tdo);
    sink(candidate, result);
    Ok(())
}

fn scan_reset<P, D, F>(
    tap: &mut TapController<P, D>,
    pins: u8,
    tck: u8,
    tms: u8,
    sink: &mut F,
) -> Result<(), CfgError>
where
    P: GpioPort,
    D: DelayNs,
    F: FnMut(Candidate, Result<ChainInfo, ChainError>),
{
    tap.set_state(TapState::Unknown);
    tap.set_state(TapState::DrShift);

    let mut samples = [0u16; RESET_SAMPLES];
    let mut taken = RESET_SAMPLES;
    let mut changed = 0u16;
    let mut unchanged = 0;
    let mut prev = tap.driver.sample();
    for (count, slot) in samples.iter_mut().enumerate() {
        let levels = tap.driver.sample();
        let diff = levels ^ prev;
        changed |= diff;
        prev = levels;
        *slot = levels;
        tap.driver.clock();

        if diff != 0 {
            unchanged = 0;
        } else if count > 0 {
            unchanged += 1;
            if unchanged == RESET_UNCHANGED {
                taken = count;
                break;
            }
        }
    }
    let samples = &samples[..taken];

    let mut tdos = 0u16;
    for pin in (0..pins).filter(|&pin| pin != tck && pin != tms) {
        if changed & (1 << pin) != 0 && carries_idcode(samples, pin) {
            debug!("pin {} shifted out an IDCODE", pin);
            tdos |= 1 << pin;
        }
    }
    if tdos == 0 {
        return Ok(());
    }

    let idle = samples.last().copied().unwrap_or(prev);
    find_tdi(tap, pins, tck, tms, tdos, idle, taken, sink)
}

/// Whether the samples of `pin` hold a 32-bit word that starts with a one
/// and is not all ones.
fn carries_idcode(samples: &[u16], pin: u8) -> bool {
    let bit = |index: usize| samples[index] & (1 << pin) != 0;

    let mut index = 0;
    while index + 32 <= samples.len() {
        if !bit(index) {
            index += 1;
            continue;
        }
        let word = (0..32).fold(0u32, |acc, n| acc | (bit(index + n) as u32) << n);
        if word != u32::MAX {
            return true;
        }
        index += 32;
    }
    false
}

/// With the TAPs in DR-Shift and their DRs holding what the idle TDI level
/// shifted in, drive each free pin to the opposite level. The real TDI
/// makes TDO change exactly once, when its level reaches the end of the
/// chain.
#[allow(clippy::too_many_arguments)]
fn find_tdi<P, D, F>(
    tap: &mut TapController<P, D>,
    pins: u8,
    tck: u8,
    tms: u8,
    tdos: u16,
    idle: u16,
    clocks: usize,
    sink: &mut F,
) -> Result<(), CfgError>
where
    P: GpioPort,
    D: DelayNs,
    F: FnMut(Candidate, Result<ChainInfo, ChainError>),
{
    for tdo in (0..pins).filter(|&pin| tdos & (1 << pin) != 0) {
        for tdi in (0..pins).filter(|&pin| pin != tck && pin != tms && pin != tdo) {
            let level = idle & (1 << tdi) != 0;
            tap.driver.cfg(Signal::Tdi, Some(tdi))?;
            tap.driver.set(Signal::Tdi, !level);

            let mut transitions = 0;
            let mut prev = tap.driver.sample() & (1 << tdo);
            for _ in 0..clocks {
                let now = tap.driver.sample() & (1 << tdo);
                tap.driver.clock();
                if now != prev {
                    transitions += 1;
                }
                prev = now;
            }
            restore(tap, level, clocks);

            if transitions == 1 {
                let candidate = Candidate { tck, tms, tdi, tdo };
                report(tap, candidate, sink)?;
                // detect ends in DR-Shift after a reset, as the search began
                restore(tap, level, clocks);
            }
            tap.driver.release(Signal::Tdi);
        }
    }
    Ok(())
}

/// Shift the idle TDI level back through the DRs.
fn restore<P: GpioPort, D: DelayNs>(tap: &mut TapController<P, D>, level: bool, clocks: usize) {
    tap.driver.set(Signal::Tdi, level);
    for _ in 0..clocks {
        tap.driver.clock();
    }
}

fn scan_bypass<P, D, F>(
    tap: &mut TapController<P, D>,
    pins: u8,
    tck: u8,
    tms: u8,
    sink: &mut F,
) -> Result<(), CfgError>
where
    P: GpioPort,
    D: DelayNs,
    F: FnMut(Candidate, Result<ChainInfo, ChainError>),
{
    for tdi in (0..pins).filter(|&pin| pin != tck && pin != tms) {
        tap.driver.cfg(Signal::Tdi, Some(tdi))?;
        tap.driver.set(Signal::Tdi, true);

        tap.set_state(TapState::Unknown);
        tap.set_state(TapState::IrShift);
        for _ in 0..IR_SHIFT_COUNT {
            tap.driver.clock();
        }

        // anything high now that drops once and stays low is probably TDO
        let high = tap.driver.sample();
        let mut edges = [None; PORT_PINS as usize];
        for pin in (0..pins).filter(|&pin| pin != tck && pin != tms && pin != tdi) {
            if high & (1 << pin) != 0 {
                edges[pin as usize] = Some(Edge::Steady);
            }
        }

        tap.driver.set(Signal::Tdi, false);
        for count in 1..IR_SHIFT_COUNT {
            tap.driver.clock();
            let levels = tap.driver.sample();
            for (pin, edge) in edges.iter_mut().enumerate() {
                let low = levels & (1 << pin) == 0;
                *edge = match *edge {
                    Some(Edge::Steady) if low => Some(Edge::Fell(count)),
                    Some(Edge::Fell(_)) if !low => Some(Edge::Bounced),
                    other => other,
                };
            }
        }

        for (tdo, edge) in edges.iter().enumerate() {
            if let Some(Edge::Fell(n)) = edge {
                if *n < 2 {
                    continue;
                }
                let candidate = Candidate {
                    tck,
                    tms,
                    tdi,
                    tdo: tdo as u8,
                };
                report(tap, candidate, sink)?;
            }
        }

        // leave no IR full of zeros behind
        tap.driver.set(Signal::Tdi, true);
        for _ in 0..IR_SHIFT_COUNT {
            tap.driver.clock();
        }
    }
    tap.driver.release(Signal::Tdi);
    Ok(())
}
