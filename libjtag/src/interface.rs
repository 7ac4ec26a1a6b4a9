use bitfield::bitfield;

#[cfg(feature = "std")]
pub mod sim;
pub mod stm32;

/// Number of pins on one GPIO port.
pub const PORT_PINS: u8 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    Input = 0b00,
    Output = 0b01,
    Alternate = 0b10,
    Analog = 0b11,
}

impl From<u8> for Mode {
    fn from(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Mode::Input,
            0b01 => Mode::Output,
            0b10 => Mode::Alternate,
            _ => Mode::Analog,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputType {
    PushPull = 0,
    OpenDrain = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Speed {
    Low = 0b00,
    Medium = 0b01,
    High = 0b11,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Pull {
    None = 0b00,
    Up = 0b01,
    Down = 0b10,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PinConfig {
    pub mode: Mode,
    pub output_type: OutputType,
    pub speed: Speed,
    pub pull: Pull,
}

impl PinConfig {
    /// Floating input. Output type and speed are left at their reset values so
    /// the pin comes back push-pull and slow if it is made an output again.
    pub const INPUT: PinConfig = PinConfig {
        mode: Mode::Input,
        output_type: OutputType::PushPull,
        speed: Speed::Low,
        pull: Pull::None,
    };

    pub const OUTPUT: PinConfig = PinConfig {
        mode: Mode::Output,
        output_type: OutputType::PushPull,
        speed: Speed::Low,
        pull: Pull::None,
    };
}

bitfield! {
    /// Register with two bits per pin: MODER, OSPEEDR and PUPDR.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct PinPairs(u32);
    pub u8, pin, set_pin: 1, 0, 16;
}

impl PinPairs {
    pub fn new(bits: u32) -> Self {
        PinPairs(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

/// Values for an atomic bit set/reset write.
pub mod bsrr {
    /// Drives every pin low.
    pub const RESET_ALL: u32 = 0xFFFF_0000;

    pub fn set(pin: u8) -> u32 {
        1 << pin
    }

    pub fn reset(pin: u8) -> u32 {
        1 << (pin + 16)
    }
}

/// One 16 pin GPIO port. Pin numbers passed in are always below `PORT_PINS`.
pub trait GpioPort {
    fn configure(&mut self, pin: u8, config: PinConfig);

    /// Single write with BSRR semantics: bit `n` drives pin `n` high, bit
    /// `n + 16` drives it low, pins with neither bit set are untouched.
    fn set_reset(&mut self, bits: u32);

    /// Live level of every pin, outputs included.
    fn input(&self) -> u16;

    /// Turn on the port's peripheral clock. Must not clear any other enable bit.
    fn enable_clock(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_pairs_fields() {
        let mut moder = PinPairs::new(0);
        moder.set_pin(0, Mode::Output as u8);
        moder.set_pin(2, Mode::Output as u8);
        moder.set_pin(15, Mode::Analog as u8);
        assert_eq!(moder.bits(), 0xC000_0011);
        assert_eq!(Mode::from(moder.pin(15)), Mode::Analog);
        assert_eq!(Mode::from(moder.pin(1)), Mode::Input);

        moder.set_pin(15, Mode::Input as u8);
        assert_eq!(moder.bits(), 0x0000_0011);
    }

    #[test]
    fn bsrr_bits() {
        assert_eq!(bsrr::set(0), 0x0000_0001);
        assert_eq!(bsrr::reset(0), 0x0001_0000);
        assert_eq!(bsrr::set(15), 0x0000_8000);
        assert_eq!(bsrr::reset(15), 0x8000_0000);
    }
}
