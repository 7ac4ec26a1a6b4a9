use core::ptr;

use super::{GpioPort, PinConfig, PinPairs};

/// GPIO port D on the STM32F3 series.
pub const GPIOD_BASE: usize = 0x4800_0C00;
pub const RCC_AHBENR: usize = 0x4002_1014;
/// IOPDEN, the GPIOD clock enable bit in RCC_AHBENR.
pub const RCC_AHBENR_IOPDEN: u32 = 1 << 20;

// Word offsets into the port's register block.
const MODER: usize = 0x00 / 4;
const OTYPER: usize = 0x04 / 4;
const OSPEEDR: usize = 0x08 / 4;
const PUPDR: usize = 0x0C / 4;
const IDR: usize = 0x10 / 4;
const BSRR: usize = 0x18 / 4;

/// Memory mapped STM32 GPIO port.
pub struct Stm32Gpio {
    base: *mut u32,
    clock_enable: *mut u32,
    clock_bit: u32,
}

impl Stm32Gpio {
    /// # Safety
    ///
    /// `base` must be the address of a GPIO register block and
    /// `clock_enable` the RCC enable register controlling it. Nothing else
    /// may write the port's registers while this value is alive.
    pub unsafe fn new(base: usize, clock_enable: usize, clock_bit: u32) -> Self {
        Stm32Gpio {
            base: base as *mut u32,
            clock_enable: clock_enable as *mut u32,
            clock_bit,
        }
    }

    /// # Safety
    ///
    /// See [`Stm32Gpio::new`].
    pub unsafe fn gpiod() -> Self {
        Stm32Gpio::new(GPIOD_BASE, RCC_AHBENR, RCC_AHBENR_IOPDEN)
    }

    fn read(&self, word: usize) -> u32 {
        unsafe { ptr::read_volatile(self.base.add(word)) }
    }

    fn write(&mut self, word: usize, value: u32) {
        unsafe { ptr::write_volatile(self.base.add(word), value) }
    }

    fn modify_pair(&mut self, word: usize, pin: u8, value: u8) {
        let mut reg = PinPairs::new(self.read(word));
        reg.set_pin(pin as usize, value);
        self.write(word, reg.bits());
    }
}

impl GpioPort for Stm32Gpio {
    fn configure(&mut self, pin: u8, config: PinConfig) {
        let otyper = self.read(OTYPER) & !(1 << pin);
        self.write(OTYPER, otyper | (config.output_type as u32) << pin);
        self.modify_pair(OSPEEDR, pin, config.speed as u8);
        self.modify_pair(PUPDR, pin, config.pull as u8);
        // mode last, so an output starts with its final type and speed
        self.modify_pair(MODER, pin, config.mode as u8);
    }

    fn set_reset(&mut self, bits: u32) {
        self.write(BSRR, bits);
    }

    fn input(&self) -> u16 {
        self.read(IDR) as u16
    }

    fn enable_clock(&mut self) {
        unsafe {
            let enr = ptr::read_volatile(self.clock_enable);
            ptr::write_volatile(self.clock_enable, enr | self.clock_bit);
        }
    }
}
