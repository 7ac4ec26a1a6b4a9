use bitflags::bitflags;
use core::fmt;

pub mod chain;
pub mod driver;
pub mod jtag_state_machine;
pub mod tap;

pub const SIGNAL_COUNT: usize = 7;

/// Logical JTAG lines the driver can route to a port pin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Signal {
    Tck,
    Tms,
    Tdi,
    Tdo,
    Trst,
    Srst,
    Rtck,
}

impl Signal {
    pub const ALL: [Signal; SIGNAL_COUNT] = [
        Signal::Tck,
        Signal::Tms,
        Signal::Tdi,
        Signal::Tdo,
        Signal::Trst,
        Signal::Srst,
        Signal::Rtck,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Lines driven by the probe. TDO and RTCK come from the target.
    pub const fn is_output(self) -> bool {
        !matches!(self, Signal::Tdo | Signal::Rtck)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Signal::Tck => "TCK",
            Signal::Tms => "TMS",
            Signal::Tdi => "TDI",
            Signal::Tdo => "TDO",
            Signal::Trst => "TRST",
            Signal::Srst => "SRST",
            Signal::Rtck => "RTCK",
        }
    }
}

impl Signal {
    /// Parse a signal name, ignoring case.
    pub fn from_name(name: &str) -> Option<Signal> {
        Signal::ALL
            .iter()
            .copied()
            .find(|signal| signal.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

bitflags! {
    /// Pins of the port currently owned by a signal.
    #[derive(Default)]
    pub struct PinMask: u16 {
        const P0 = 1 << 0;
        const P1 = 1 << 1;
        const P2 = 1 << 2;
        const P3 = 1 << 3;
        const P4 = 1 << 4;
        const P5 = 1 << 5;
        const P6 = 1 << 6;
        const P7 = 1 << 7;
        const P8 = 1 << 8;
        const P9 = 1 << 9;
        const P10 = 1 << 10;
        const P11 = 1 << 11;
        const P12 = 1 << 12;
        const P13 = 1 << 13;
        const P14 = 1 << 14;
        const P15 = 1 << 15;
    }
}

impl PinMask {
    /// Mask for a single pin; empty if `pin` is not on the port.
    pub fn pin(pin: u8) -> Self {
        PinMask::from_bits_truncate(1u16.checked_shl(pin as u32).unwrap_or(0))
    }
}
