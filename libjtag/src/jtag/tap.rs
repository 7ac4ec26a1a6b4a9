use embedded_hal::delay::DelayNs;
use log::{debug, trace};

use crate::interface::GpioPort;
use crate::jtag::driver::Driver;
use crate::jtag::jtag_state_machine::{next_step, TapState, Transition};
use crate::jtag::Signal;

/// Number of TMS=1 clocks that bring a TAP to Reset from any state.
pub const RESET_CLOCKS: usize = 5;

/// Tracks the state of the target's TAP and moves it around the IEEE 1149.1
/// graph through the driver.
///
/// The cached state is only correct if every TMS/TCK change goes through
/// `set_state`. Raw `driver.clock()` calls are only valid in a stable state
/// (`TapState::is_stable`: Reset, Run/Idle and the Shift and Pause states)
/// with TMS left where `set_state` put it. After anything else has touched
/// the lines, call `set_state(TapState::Unknown)` so the next move starts
/// with a reset.
pub struct TapController<P, D> {
    pub driver: Driver<P, D>,
    state: TapState,
}

impl<P: GpioPort, D: DelayNs> TapController<P, D> {
    pub fn new(driver: Driver<P, D>) -> Self {
        TapController {
            driver,
            state: TapState::Unknown,
        }
    }

    pub fn init(&mut self) {
        self.state = TapState::Unknown;
    }

    pub fn state(&self) -> TapState {
        self.state
    }

    /// Walk the TAP to `target`, one TCK pulse per edge of the graph.
    ///
    /// `Reset` with TRST allocated pulses TRST instead of walking, even if
    /// the TAP is believed to be in Reset already.
    pub fn set_state(&mut self, target: TapState) {
        if target == TapState::Reset && self.driver.is_allocated(Signal::Trst) {
            self.hardware_reset();
        }

        loop {
            match next_step(self.state, target) {
                Transition::Done => return,
                Transition::Forget => {
                    debug!("tap state forgotten (was {})", self.state);
                    self.state = TapState::Unknown;
                    return;
                }
                Transition::Resync => {
                    if self.driver.is_allocated(Signal::Trst) {
                        self.hardware_reset();
                    } else {
                        self.driver.set(Signal::Tms, true);
                        for _ in 0..RESET_CLOCKS {
                            self.driver.clock();
                        }
                        self.enter(TapState::Reset);
                    }
                }
                Transition::Clock { tms, next } => {
                    self.driver.set(Signal::Tms, tms);
                    self.driver.clock();
                    self.enter(next);
                }
            }
        }
    }

    /// Hold TRST low (active) with TMS high, then release it.
    fn hardware_reset(&mut self) {
        let hold = self.driver.config().trst_hold_ns;
        self.driver.set(Signal::Tms, true);
        self.driver.set(Signal::Trst, false);
        self.driver.hold(hold);
        self.driver.set(Signal::Trst, true);
        self.enter(TapState::Reset);
    }

    fn enter(&mut self, next: TapState) {
        trace!("tap state change: {} -> {}", self.state, next);
        self.state = next;
    }
}
