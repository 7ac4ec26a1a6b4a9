//! A simulated GPIO port, optionally wired to a simulated JTAG scan chain.
//!
//! `SimPort` keeps the register values an STM32 port would hold and logs
//! every BSRR write. Pins configured as outputs read back their ODR bit,
//! the chain's TDO pin reads what the chain shifts out and any other input
//! reads the level set with `drive_input`. The chain samples TMS and TDI on
//! every rising edge of its TCK pin, so a driver talking to a `SimPort`
//! exercises the exact wire sequence it would put on real hardware.

use embedded_hal::delay::DelayNs;
use log::{debug, trace, warn};
use rust_fsm::*;
use spin::mutex::Mutex;

use super::stm32::RCC_AHBENR_IOPDEN;
use super::{GpioPort, Mode, PinConfig, PinPairs, PORT_PINS};
use crate::jtag::jtag_state_machine::{TapGraph, TapState};

/// Instruction selecting the IDCODE register on a simulated TAP.
pub const IDCODE_INSTRUCTION: u64 = 0b1;

/// Delay for use with `SimPort`; returns immediately.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimDelay;

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

/// Snapshot of the port's registers. `bsrr` is the last value written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Registers {
    pub moder: u32,
    pub otyper: u32,
    pub ospeedr: u32,
    pub pupdr: u32,
    pub idr: u32,
    pub odr: u32,
    pub bsrr: u32,
    pub clock_enable: u32,
}

impl Registers {
    pub fn mode(&self, pin: u8) -> Mode {
        Mode::from(PinPairs::new(self.moder).pin(pin as usize))
    }

    /// The output latch of `pin`.
    pub fn output(&self, pin: u8) -> bool {
        self.odr & (1 << pin) != 0
    }
}

/// Port pins the chain is connected to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Wiring {
    pub tck: u8,
    pub tms: u8,
    pub tdi: u8,
    pub tdo: u8,
    pub trst: Option<u8>,
}

impl Default for Wiring {
    fn default() -> Self {
        Wiring {
            tck: 0,
            tms: 1,
            tdi: 2,
            tdo: 3,
            trst: None,
        }
    }
}

/// One device on a simulated chain.
#[derive(Clone, Debug)]
pub struct SimTap {
    ir_len: u8,
    idcode: Option<u32>,
    instruction: u64,
    ir: u64,
    dr: u64,
    dr_len: u8,
}

impl SimTap {
    /// `ir_len` is clamped to 2..=32. Without an IDCODE the TAP selects
    /// BYPASS on reset.
    pub fn new(ir_len: u8, idcode: Option<u32>) -> Self {
        let mut tap = SimTap {
            ir_len: ir_len.clamp(2, 32),
            idcode,
            instruction: 0,
            ir: 0,
            dr: 0,
            dr_len: 1,
        };
        tap.reset();
        tap
    }

    pub fn instruction(&self) -> u64 {
        self.instruction
    }

    fn ir_mask(&self) -> u64 {
        (1 << self.ir_len) - 1
    }

    fn reset(&mut self) {
        self.instruction = match self.idcode {
            Some(_) => IDCODE_INSTRUCTION,
            None => self.ir_mask(),
        };
    }

    fn capture_ir(&mut self) {
        self.ir = 0b01;
    }

    fn update_ir(&mut self) {
        self.instruction = self.ir & self.ir_mask();
    }

    fn capture_dr(&mut self) {
        match self.idcode {
            Some(idcode) if self.instruction == IDCODE_INSTRUCTION => {
                self.dr = idcode as u64;
                self.dr_len = 32;
            }
            _ => {
                // BYPASS
                self.dr = 0;
                self.dr_len = 1;
            }
        }
    }
}

fn shift(reg: &mut u64, len: u8, input: bool) -> bool {
    let out = *reg & 1 != 0;
    *reg = (*reg >> 1) | ((input as u64) << (len - 1));
    out
}

/// Devices sharing TCK/TMS/TRST, with TDI entering `taps[0]` and TDO
/// leaving the last one.
pub struct SimChain {
    wiring: Wiring,
    taps: Vec<SimTap>,
    machine: StateMachine<TapGraph>,
    tdo: bool,
    tms_log: Vec<bool>,
    trst_releases: usize,
}

impl SimChain {
    pub fn new(wiring: Wiring, taps: Vec<SimTap>) -> Self {
        SimChain {
            wiring,
            taps,
            machine: StateMachine::new(),
            tdo: false,
            tms_log: Vec::new(),
            trst_releases: 0,
        }
    }

    pub fn state(&self) -> TapState {
        *self.machine.state()
    }

    fn reset(&mut self) {
        self.machine = StateMachine::new();
        for tap in self.taps.iter_mut() {
            tap.reset();
        }
        self.tdo = false;
    }

    fn clock(&mut self, tms: bool, tdi: bool) {
        self.tms_log.push(tms);

        match self.state() {
            TapState::IrCapture => self.taps.iter_mut().for_each(SimTap::capture_ir),
            TapState::DrCapture => self.taps.iter_mut().for_each(SimTap::capture_dr),
            TapState::IrShift => {
                let mut carry = tdi;
                for tap in self.taps.iter_mut() {
                    carry = shift(&mut tap.ir, tap.ir_len, carry);
                }
            }
            TapState::DrShift => {
                let mut carry = tdi;
                for tap in self.taps.iter_mut() {
                    carry = shift(&mut tap.dr, tap.dr_len, carry);
                }
            }
            _ => (),
        }

        if let Err(e) = self.machine.consume(&tms) {
            warn!("simulated chain stuck in {}: {:?}", self.state(), e);
        }

        match self.state() {
            TapState::IrUpdate => self.taps.iter_mut().for_each(SimTap::update_ir),
            TapState::Reset => self.taps.iter_mut().for_each(SimTap::reset),
            _ => (),
        }

        self.tdo = match (self.state(), self.taps.last()) {
            (TapState::IrShift, Some(tap)) => tap.ir & 1 != 0,
            (TapState::DrShift, Some(tap)) => tap.dr & 1 != 0,
            _ => false,
        };
        trace!("sim chain: tms {} tdi {} -> {}", tms, tdi, self.state());
    }
}

struct SimState {
    regs: Registers,
    external: u16,
    chain: Option<SimChain>,
    bsrr_log: Vec<u32>,
}

impl SimState {
    fn level(&self, pin: u8) -> bool {
        if self.regs.mode(pin) == Mode::Output {
            return self.regs.output(pin);
        }
        match &self.chain {
            Some(chain) if chain.wiring.tdo == pin => chain.tdo,
            _ => self.external & (1 << pin) != 0,
        }
    }

    fn levels(&self) -> u16 {
        (0..PORT_PINS)
            .filter(|&pin| self.level(pin))
            .fold(0, |acc, pin| acc | 1 << pin)
    }

    /// Let the chain react to the pin levels changing from `before`.
    fn settle(&mut self, before: u16) {
        let after = self.levels();
        if let Some(chain) = self.chain.as_mut() {
            let was = |pin: u8| before & (1 << pin) != 0;
            let is = |pin: u8| after & (1 << pin) != 0;
            let wiring = chain.wiring;

            let in_reset = match wiring.trst {
                Some(trst) => {
                    if !was(trst) && is(trst) {
                        chain.trst_releases += 1;
                    }
                    !is(trst)
                }
                None => false,
            };
            if in_reset {
                chain.reset();
            } else if !was(wiring.tck) && is(wiring.tck) {
                chain.clock(is(wiring.tms), is(wiring.tdi));
            }
        }
        self.regs.idr = self.levels() as u32;
    }
}

pub struct SimPort {
    inner: Mutex<SimState>,
}

impl SimPort {
    /// A port in its reset state with nothing attached.
    pub fn new() -> Self {
        SimPort::with_registers(Registers::default())
    }

    /// A port starting from arbitrary register contents. Reserved bits of
    /// OTYPER and ODR read as zero, IDR is derived from the pins.
    pub fn with_registers(regs: Registers) -> Self {
        let mut state = SimState {
            regs: Registers {
                otyper: regs.otyper & 0xFFFF,
                odr: regs.odr & 0xFFFF,
                ..regs
            },
            external: 0,
            chain: None,
            bsrr_log: Vec::new(),
        };
        state.regs.idr = state.levels() as u32;
        SimPort {
            inner: Mutex::new(state),
        }
    }

    /// A port in its reset state wired to `chain`. TRST, if wired, is
    /// pulled up while the port does not drive it.
    pub fn with_chain(chain: SimChain) -> Self {
        let port = SimPort::new();
        {
            let mut state = port.inner.lock();
            if let Some(trst) = chain.wiring.trst {
                state.external |= 1 << trst;
            }
            state.chain = Some(chain);
            state.regs.idr = state.levels() as u32;
        }
        port
    }

    pub fn registers(&self) -> Registers {
        self.inner.lock().regs
    }

    pub fn bsrr_writes(&self) -> Vec<u32> {
        self.inner.lock().bsrr_log.clone()
    }

    /// Forget the BSRR writes and TMS levels seen so far.
    pub fn clear_log(&self) {
        let mut state = self.inner.lock();
        state.bsrr_log.clear();
        if let Some(chain) = state.chain.as_mut() {
            chain.tms_log.clear();
            chain.trst_releases = 0;
        }
    }

    /// Level seen on `pin` while it is not an output.
    pub fn drive_input(&self, pin: u8, level: bool) {
        let mut state = self.inner.lock();
        let before = state.levels();
        if level {
            state.external |= 1 << pin;
        } else {
            state.external &= !(1 << pin);
        }
        state.settle(before);
    }

    /// TMS level at each rising TCK edge the chain saw.
    pub fn tms_log(&self) -> Vec<bool> {
        match &self.inner.lock().chain {
            Some(chain) => chain.tms_log.clone(),
            None => Vec::new(),
        }
    }

    /// Number of times TRST went from active (low) to released.
    pub fn trst_releases(&self) -> usize {
        match &self.inner.lock().chain {
            Some(chain) => chain.trst_releases,
            None => 0,
        }
    }

    /// State of the simulated TAPs.
    pub fn chain_state(&self) -> Option<TapState> {
        self.inner.lock().chain.as_ref().map(SimChain::state)
    }

    /// Latched instruction of every TAP, `taps[0]` first.
    pub fn instructions(&self) -> Vec<u64> {
        match &self.inner.lock().chain {
            Some(chain) => chain.taps.iter().map(SimTap::instruction).collect(),
            None => Vec::new(),
        }
    }
}

impl Default for SimPort {
    fn default() -> Self {
        SimPort::new()
    }
}

impl GpioPort for &SimPort {
    fn configure(&mut self, pin: u8, config: PinConfig) {
        let mut state = self.inner.lock();
        let before = state.levels();
        let regs = &mut state.regs;

        regs.otyper = (regs.otyper & !(1 << pin)) | (config.output_type as u32) << pin;
        let mut ospeedr = PinPairs::new(regs.ospeedr);
        ospeedr.set_pin(pin as usize, config.speed as u8);
        regs.ospeedr = ospeedr.bits();
        let mut pupdr = PinPairs::new(regs.pupdr);
        pupdr.set_pin(pin as usize, config.pull as u8);
        regs.pupdr = pupdr.bits();
        let mut moder = PinPairs::new(regs.moder);
        moder.set_pin(pin as usize, config.mode as u8);
        regs.moder = moder.bits();

        state.settle(before);
    }

    fn set_reset(&mut self, bits: u32) {
        let mut state = self.inner.lock();
        let before = state.levels();
        let set = bits & 0xFFFF;
        let reset = bits >> 16;
        // set wins when both bits of a pin are written
        state.regs.odr = (state.regs.odr & !reset) | set;
        state.regs.bsrr = bits;
        state.bsrr_log.push(bits);
        state.settle(before);
    }

    fn input(&self) -> u16 {
        self.inner.lock().regs.idr as u16
    }

    fn enable_clock(&mut self) {
        let mut state = self.inner.lock();
        state.regs.clock_enable |= RCC_AHBENR_IOPDEN;
        debug!("sim port clock enabled");
    }
}
