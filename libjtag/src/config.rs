/// Timing parameters of the bit-bang driver.
///
/// Both values are lower bounds handed to the injected `DelayNs`; how
/// precisely they are met depends on the delay implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Time TCK is held high, and then low, for one clock pulse.
    pub tck_half_period_ns: u32,
    /// Time TRST is held at its active (low) level during a hardware reset.
    pub trst_hold_ns: u32,
}

impl Config {
    pub const fn new(tck_half_period_ns: u32, trst_hold_ns: u32) -> Self {
        Config {
            tck_half_period_ns,
            trst_hold_ns,
        }
    }

    /// Derive the half period from a TCK frequency in kHz.
    pub fn with_tck_khz(self, freq_khz: u32) -> Self {
        let period_ns = 1_000_000 / freq_khz.max(1);
        Config {
            tck_half_period_ns: period_ns / 2,
            ..self
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        // 8000 and 20000 nop iterations at 64MHz
        Config::new(125_000, 312_500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tck_khz_sets_half_period() {
        let config = Config::default().with_tck_khz(4);
        assert_eq!(config.tck_half_period_ns, 125_000);
        assert_eq!(config.trst_hold_ns, Config::default().trst_hold_ns);

        let config = Config::default().with_tck_khz(1000);
        assert_eq!(config.tck_half_period_ns, 500);
    }
}
