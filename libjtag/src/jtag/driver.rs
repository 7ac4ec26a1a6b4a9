use embedded_hal::delay::DelayNs;
use log::{debug, warn};

use crate::config::Config;
use crate::error::CfgError;
use crate::interface::{bsrr, GpioPort, PinConfig, PORT_PINS};
use crate::jtag::{PinMask, Signal, SIGNAL_COUNT};

/// Allocation programmed by `Driver::init`.
pub const DEFAULT_ALLOCATION: [(Signal, u8); 4] = [
    (Signal::Tck, 0),
    (Signal::Tms, 1),
    (Signal::Tdi, 2),
    (Signal::Tdo, 3),
];

/// Bit-bangs JTAG signals on the pins of one GPIO port.
///
/// Each signal owns at most one pin and each pin is owned by at most one
/// signal. `usage` always has exactly the bits of the pins in `signals`.
pub struct Driver<P, D> {
    port: P,
    delay: D,
    config: Config,
    signals: [Option<u8>; SIGNAL_COUNT],
    usage: PinMask,
}

impl<P: GpioPort, D: DelayNs> Driver<P, D> {
    /// Take over `port` and bring it to the default allocation.
    pub fn new(port: P, delay: D, config: Config) -> Self {
        let mut driver = Driver {
            port,
            delay,
            config,
            signals: [None; SIGNAL_COUNT],
            usage: PinMask::empty(),
        };
        driver.init();
        driver
    }

    /// Return every pin to a low, floating input, enable the port clock and
    /// program `DEFAULT_ALLOCATION`.
    pub fn init(&mut self) {
        for pin in 0..PORT_PINS {
            self.port.configure(pin, PinConfig::INPUT);
        }
        self.port.set_reset(bsrr::RESET_ALL);
        self.port.enable_clock();

        self.signals = [None; SIGNAL_COUNT];
        self.usage = PinMask::empty();
        for &(signal, pin) in DEFAULT_ALLOCATION.iter() {
            if let Err(e) = self.cfg(signal, Some(pin)) {
                warn!("default allocation of {} failed: {}", signal, e);
            }
        }
    }

    /// Route `signal` to `pin`, or release it with `None`.
    ///
    /// Output signals get a push-pull output driven low, input signals a
    /// floating input. A pin the signal held before is released first. On
    /// error nothing has been changed.
    pub fn cfg(&mut self, signal: Signal, pin: Option<u8>) -> Result<(), CfgError> {
        let pin = match pin {
            Some(pin) => pin,
            None => {
                self.release(signal);
                return Ok(());
            }
        };

        if pin >= PORT_PINS {
            warn!("cannot allocate {} to pin {}: out of range", signal, pin);
            return Err(CfgError::PinOutOfRange(pin));
        }
        if self.signals[signal.index()] == Some(pin) {
            return Ok(());
        }
        if let Some(owner) = self.owner(pin) {
            warn!("cannot allocate {} to pin {}: owned by {}", signal, pin, owner);
            return Err(CfgError::PinConflict { pin, owner });
        }

        self.release(signal);
        if signal.is_output() {
            self.port.set_reset(bsrr::reset(pin));
            self.port.configure(pin, PinConfig::OUTPUT);
        } else {
            self.port.configure(pin, PinConfig::INPUT);
        }
        self.usage.insert(PinMask::pin(pin));
        self.signals[signal.index()] = Some(pin);
        debug!("{} allocated to pin {}", signal, pin);
        Ok(())
    }

    /// Drive the signal's pin low, return it to input and free it.
    pub fn release(&mut self, signal: Signal) {
        if let Some(pin) = self.signals[signal.index()].take() {
            self.port.set_reset(bsrr::reset(pin));
            self.port.configure(pin, PinConfig::INPUT);
            self.usage.remove(PinMask::pin(pin));
            debug!("{} released from pin {}", signal, pin);
        }
    }

    pub fn release_all(&mut self) {
        for &signal in Signal::ALL.iter() {
            self.release(signal);
        }
    }

    pub fn allocation(&self, signal: Signal) -> Option<u8> {
        self.signals[signal.index()]
    }

    pub fn is_allocated(&self, signal: Signal) -> bool {
        self.signals[signal.index()].is_some()
    }

    pub fn pin_usage(&self) -> PinMask {
        self.usage
    }

    fn owner(&self, pin: u8) -> Option<Signal> {
        if !self.usage.contains(PinMask::pin(pin)) {
            return None;
        }
        Signal::ALL
            .iter()
            .copied()
            .find(|s| self.signals[s.index()] == Some(pin))
    }

    /// Drive an output signal. Ignored for unallocated and input signals.
    pub fn set(&mut self, signal: Signal, value: bool) {
        if !signal.is_output() {
            return;
        }
        if let Some(pin) = self.signals[signal.index()] {
            let bits = if value {
                bsrr::set(pin)
            } else {
                bsrr::reset(pin)
            };
            self.port.set_reset(bits);
        }
    }

    /// Level of the signal's pin, whichever direction it has. `false` when
    /// the signal is unallocated.
    pub fn get(&self, signal: Signal) -> bool {
        match self.signals[signal.index()] {
            Some(pin) => self.port.input() & (1 << pin) != 0,
            None => false,
        }
    }

    /// Level of every pin of the port, allocated or not.
    pub fn sample(&self) -> u16 {
        self.port.input()
    }

    /// One TCK pulse: high for half a period, then low for half a period.
    pub fn clock(&mut self) {
        let half = self.config.tck_half_period_ns;
        self.set(Signal::Tck, true);
        self.hold(half);
        self.set(Signal::Tck, false);
        self.hold(half);
    }

    pub fn hold(&mut self, ns: u32) {
        if ns > 0 {
            self.delay.delay_ns(ns);
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::sim::{Registers, SimDelay, SimPort};
    use crate::interface::Mode;
    use crate::test_util::init_logger;

    fn new_driver(sim: &SimPort) -> Driver<&SimPort, SimDelay> {
        init_logger();
        Driver::new(sim, SimDelay, Config::default())
    }

    fn assert_consistent<P: GpioPort, D: DelayNs>(driver: &Driver<P, D>) {
        let mut usage = PinMask::empty();
        for &signal in Signal::ALL.iter() {
            if let Some(pin) = driver.allocation(signal) {
                assert!(!usage.contains(PinMask::pin(pin)), "pin {} shared", pin);
                usage.insert(PinMask::pin(pin));
            }
        }
        assert_eq!(driver.pin_usage(), usage);
    }

    #[test]
    fn init_allocation() {
        let sim = SimPort::new();
        let driver = new_driver(&sim);

        assert_eq!(driver.allocation(Signal::Tck), Some(0));
        assert_eq!(driver.allocation(Signal::Tms), Some(1));
        assert_eq!(driver.allocation(Signal::Tdi), Some(2));
        assert_eq!(driver.allocation(Signal::Tdo), Some(3));
        for &signal in [Signal::Trst, Signal::Srst, Signal::Rtck].iter() {
            assert_eq!(driver.allocation(signal), None);
            assert!(!driver.is_allocated(signal));
        }
        assert_eq!(driver.pin_usage().bits(), 0x0F);
        assert_consistent(&driver);

        let regs = sim.registers();
        for pin in 0..3 {
            assert_eq!(regs.mode(pin), Mode::Output);
            assert!(!regs.output(pin));
        }
        assert_eq!(regs.mode(3), Mode::Input);
    }

    #[test]
    fn init_registers() {
        let tag = 0xABCD_1234;
        let sim = SimPort::with_registers(Registers {
            moder: tag,
            otyper: tag,
            ospeedr: tag,
            pupdr: tag,
            odr: tag,
            clock_enable: 0,
            ..Registers::default()
        });
        let _driver = new_driver(&sim);

        let regs = sim.registers();
        // 01 (output) for the three output pins, 00 (input) for the rest
        assert_eq!(regs.moder, 0x0000_0015);
        assert_eq!(regs.otyper, 0);
        assert_eq!(regs.ospeedr & 0x5555_5555, 0);
        assert_eq!(regs.pupdr, 0);
        assert_eq!(regs.odr, 0);
        assert_eq!(sim.bsrr_writes()[0], bsrr::RESET_ALL);
        assert_eq!(regs.clock_enable, 1 << 20);
    }

    #[test]
    fn init_keeps_other_clock_enables() {
        let sim = SimPort::with_registers(Registers {
            clock_enable: 0xFFFF_FFFF,
            ..Registers::default()
        });
        let mut driver = new_driver(&sim);
        assert_eq!(sim.registers().clock_enable, 0xFFFF_FFFF);

        driver.init();
        assert_eq!(sim.registers().clock_enable, 0xFFFF_FFFF);

        let sim = SimPort::new();
        let mut driver = new_driver(&sim);
        driver.init();
        assert_eq!(sim.registers().clock_enable, 1 << 20);
    }

    #[test]
    fn init_clears_previous_allocation() {
        let sim = SimPort::new();
        let mut driver = new_driver(&sim);
        driver.cfg(Signal::Trst, Some(9)).unwrap();
        driver.cfg(Signal::Tck, Some(12)).unwrap();

        driver.init();
        assert_eq!(driver.allocation(Signal::Trst), None);
        assert_eq!(driver.allocation(Signal::Tck), Some(0));
        assert_eq!(driver.pin_usage().bits(), 0x0F);
        assert_eq!(sim.registers().mode(9), Mode::Input);
        assert_eq!(sim.registers().mode(12), Mode::Input);
    }

    #[test]
    fn cfg_output() {
        let sim = SimPort::new();
        let mut driver = new_driver(&sim);
        driver.release_all();

        driver.cfg(Signal::Tck, Some(7)).unwrap();
        let regs = sim.registers();
        assert_eq!(regs.moder & (0b11 << 14), 0b01 << 14);
        assert_eq!(regs.otyper & (1 << 7), 0);
        assert_eq!(regs.pupdr & (0b11 << 14), 0);
        assert!(!regs.output(7));
        assert!(driver.pin_usage().contains(PinMask::P7));
        assert_eq!(driver.allocation(Signal::Tck), Some(7));
    }

    #[test]
    fn cfg_input() {
        let sim = SimPort::new();
        let mut driver = new_driver(&sim);
        driver.release_all();

        driver.cfg(Signal::Rtck, Some(8)).unwrap();
        assert_eq!(sim.registers().mode(8), Mode::Input);
        assert!(driver.pin_usage().contains(PinMask::P8));
        assert_eq!(driver.allocation(Signal::Rtck), Some(8));
    }

    #[test]
    fn cfg_out_of_range() {
        let sim = SimPort::new();
        let mut driver = new_driver(&sim);
        let before = sim.registers();
        sim.clear_log();

        assert_eq!(
            driver.cfg(Signal::Trst, Some(16)),
            Err(CfgError::PinOutOfRange(16))
        );
        assert_eq!(
            driver.cfg(Signal::Tck, Some(200)),
            Err(CfgError::PinOutOfRange(200))
        );
        assert_eq!(sim.registers(), before);
        assert!(sim.bsrr_writes().is_empty());
        assert_eq!(driver.allocation(Signal::Trst), None);
        assert_eq!(driver.allocation(Signal::Tck), Some(0));
        assert_eq!(driver.pin_usage().bits(), 0x0F);
    }

    #[test]
    fn cfg_conflict_changes_nothing() {
        let sim = SimPort::new();
        let mut driver = new_driver(&sim);
        driver.cfg(Signal::Trst, Some(4)).unwrap();
        let before = sim.registers();
        sim.clear_log();

        assert_eq!(
            driver.cfg(Signal::Tms, Some(0)),
            Err(CfgError::PinConflict {
                pin: 0,
                owner: Signal::Tck
            })
        );
        // also when the signal would have to give up its own pin first
        assert_eq!(
            driver.cfg(Signal::Trst, Some(3)),
            Err(CfgError::PinConflict {
                pin: 3,
                owner: Signal::Tdo
            })
        );

        assert_eq!(sim.registers(), before);
        assert!(sim.bsrr_writes().is_empty());
        assert_eq!(driver.allocation(Signal::Tms), Some(1));
        assert_eq!(driver.allocation(Signal::Trst), Some(4));
        assert_eq!(driver.pin_usage().bits(), 0x1F);
        assert_consistent(&driver);
    }

    #[test]
    fn cfg_same_pin_is_noop() {
        let sim = SimPort::new();
        let mut driver = new_driver(&sim);
        let before = sim.registers();
        sim.clear_log();

        assert_eq!(driver.cfg(Signal::Tdi, Some(2)), Ok(()));
        assert_eq!(sim.registers(), before);
        assert!(sim.bsrr_writes().is_empty());
        assert_eq!(driver.allocation(Signal::Tdi), Some(2));
    }

    #[test]
    fn cfg_release() {
        let sim = SimPort::new();
        let mut driver = new_driver(&sim);
        driver.set(Signal::Tms, true);
        assert!(sim.registers().output(1));
        sim.clear_log();

        assert_eq!(driver.cfg(Signal::Tms, None), Ok(()));
        let regs = sim.registers();
        assert_eq!(regs.mode(1), Mode::Input);
        assert!(!regs.output(1));
        assert_eq!(sim.bsrr_writes(), [bsrr::reset(1)]);
        assert!(!driver.pin_usage().contains(PinMask::P1));
        assert_eq!(driver.allocation(Signal::Tms), None);

        // releasing again does nothing
        sim.clear_log();
        let before = sim.registers();
        assert_eq!(driver.cfg(Signal::Tms, None), Ok(()));
        assert_eq!(sim.registers(), before);
        assert!(sim.bsrr_writes().is_empty());
        assert_consistent(&driver);
    }

    #[test]
    fn cfg_move() {
        let sim = SimPort::new();
        let mut driver = new_driver(&sim);
        driver.set(Signal::Tck, true);

        driver.cfg(Signal::Tck, Some(10)).unwrap();
        let regs = sim.registers();
        assert_eq!(regs.mode(0), Mode::Input);
        assert!(!regs.output(0));
        assert!(!driver.pin_usage().contains(PinMask::P0));
        assert_eq!(regs.mode(10), Mode::Output);
        assert!(!regs.output(10));
        assert!(driver.pin_usage().contains(PinMask::P10));
        assert_eq!(driver.allocation(Signal::Tck), Some(10));
        assert_consistent(&driver);

        // the old pin is free for someone else
        driver.cfg(Signal::Trst, Some(0)).unwrap();
        assert_consistent(&driver);

        driver.cfg(Signal::Tdo, Some(11)).unwrap();
        assert_eq!(sim.registers().mode(3), Mode::Input);
        assert_eq!(sim.registers().mode(11), Mode::Input);
        assert_eq!(driver.pin_usage().bits(), (1 << 0) | (1 << 1) | (1 << 2) | (1 << 10) | (1 << 11));
    }

    #[test]
    fn set_writes_one_bit() {
        let sim = SimPort::new();
        let mut driver = new_driver(&sim);
        driver.cfg(Signal::Tdi, Some(13)).unwrap();
        sim.clear_log();

        driver.set(Signal::Tdi, true);
        driver.set(Signal::Tdi, false);
        assert_eq!(sim.bsrr_writes(), [1 << 13, 1 << (13 + 16)]);
    }

    #[test]
    fn set_ignores_inputs_and_unallocated() {
        let sim = SimPort::new();
        let mut driver = new_driver(&sim);
        let before = sim.registers();
        sim.clear_log();

        driver.set(Signal::Tdo, true);
        driver.set(Signal::Trst, true);
        driver.set(Signal::Srst, false);
        assert!(sim.bsrr_writes().is_empty());
        assert_eq!(sim.registers(), before);
    }

    #[test]
    fn get_reads_pin_level() {
        let sim = SimPort::new();
        let mut driver = new_driver(&sim);

        assert!(!driver.get(Signal::Tdo));
        sim.drive_input(3, true);
        assert!(driver.get(Signal::Tdo));

        // outputs read back what they drive
        driver.set(Signal::Tms, true);
        assert!(driver.get(Signal::Tms));
        driver.set(Signal::Tms, false);
        assert!(!driver.get(Signal::Tms));

        // unallocated reads false even with the pin high
        sim.drive_input(5, true);
        assert_eq!(driver.sample() & (1 << 5), 1 << 5);
        assert!(!driver.get(Signal::Rtck));
        driver.cfg(Signal::Rtck, Some(5)).unwrap();
        assert!(driver.get(Signal::Rtck));
    }

    #[test]
    fn clock_pulses_tck() {
        let sim = SimPort::new();
        let mut driver = new_driver(&sim);
        sim.clear_log();

        driver.clock();
        assert_eq!(sim.bsrr_writes(), [bsrr::set(0), bsrr::reset(0)]);

        driver.release(Signal::Tck);
        sim.clear_log();
        driver.clock();
        assert!(sim.bsrr_writes().is_empty());
    }

    #[test]
    fn allocation_stays_consistent() {
        let sim = SimPort::new();
        let mut driver = new_driver(&sim);
        let mut seed = 0x1234_5678u32;
        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let signal = Signal::ALL[(seed % SIGNAL_COUNT as u32) as usize];
            let pin = match (seed >> 8) % 20 {
                p if p < 17 => Some(p as u8),
                _ => None,
            };
            let _ = driver.cfg(signal, pin);
            assert_consistent(&driver);
        }
    }
}
