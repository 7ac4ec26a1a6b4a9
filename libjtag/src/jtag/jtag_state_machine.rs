use core::fmt;

use log::trace;
use rust_fsm::*;

/// IEEE 1149.1 TAP controller states, plus `Unknown` for a TAP whose state
/// can no longer be trusted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TapState {
    Unknown,
    Reset,
    Idle,
    DrScan,
    DrCapture,
    DrShift,
    DrExit1,
    DrPause,
    DrExit2,
    DrUpdate,
    IrScan,
    IrCapture,
    IrShift,
    IrExit1,
    IrPause,
    IrExit2,
    IrUpdate,
}

impl TapState {
    /// Every state of the IEEE graph, i.e. all but `Unknown`.
    pub const GRAPH: [TapState; 16] = [
        TapState::Reset,
        TapState::Idle,
        TapState::DrScan,
        TapState::DrCapture,
        TapState::DrShift,
        TapState::DrExit1,
        TapState::DrPause,
        TapState::DrExit2,
        TapState::DrUpdate,
        TapState::IrScan,
        TapState::IrCapture,
        TapState::IrShift,
        TapState::IrExit1,
        TapState::IrPause,
        TapState::IrExit2,
        TapState::IrUpdate,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            TapState::Unknown => "Unknown",
            TapState::Reset => "Reset",
            TapState::Idle => "Run/Idle",
            TapState::DrScan => "Scan DR",
            TapState::DrCapture => "Capture DR",
            TapState::DrShift => "Shift DR",
            TapState::DrExit1 => "Exit 1 DR",
            TapState::DrPause => "Pause DR",
            TapState::DrExit2 => "Exit 2 DR",
            TapState::DrUpdate => "Update DR",
            TapState::IrScan => "Scan IR",
            TapState::IrCapture => "Capture IR",
            TapState::IrShift => "Shift IR",
            TapState::IrExit1 => "Exit 1 IR",
            TapState::IrPause => "Pause IR",
            TapState::IrExit2 => "Exit 2 IR",
            TapState::IrUpdate => "Update IR",
        }
    }
}

impl TapState {
    /// Lower case single-word name, as typed on the console.
    pub const fn keyword(self) -> &'static str {
        match self {
            TapState::Unknown => "unknown",
            TapState::Reset => "reset",
            TapState::Idle => "idle",
            TapState::DrScan => "drscan",
            TapState::DrCapture => "drcapture",
            TapState::DrShift => "drshift",
            TapState::DrExit1 => "drexit1",
            TapState::DrPause => "drpause",
            TapState::DrExit2 => "drexit2",
            TapState::DrUpdate => "drupdate",
            TapState::IrScan => "irscan",
            TapState::IrCapture => "ircapture",
            TapState::IrShift => "irshift",
            TapState::IrExit1 => "irexit1",
            TapState::IrPause => "irpause",
            TapState::IrExit2 => "irexit2",
            TapState::IrUpdate => "irupdate",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<TapState> {
        if keyword == TapState::Unknown.keyword() {
            return Some(TapState::Unknown);
        }
        TapState::GRAPH
            .iter()
            .copied()
            .find(|state| state.keyword() == keyword)
    }

    /// States the TAP stays in while TMS is held at the level that entered
    /// them, so extra clocks do not move it.
    pub const fn is_stable(self) -> bool {
        matches!(
            self,
            TapState::Reset
                | TapState::Idle
                | TapState::DrShift
                | TapState::DrPause
                | TapState::IrShift
                | TapState::IrPause
        )
    }
}

impl fmt::Display for TapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The IEEE 1149.1 state graph: input is the TMS level at a rising TCK edge.
#[derive(Debug)]
pub struct TapGraph;

impl StateMachineImpl for TapGraph {
    type Input = bool;
    type State = TapState;
    type Output = ();

    const INITIAL_STATE: Self::State = TapState::Reset;

    fn transition(state: &Self::State, input: &Self::Input) -> Option<Self::State> {
        use TapState::*;

        let res = match (state, input) {
            (Unknown, _) => None,

            (Reset, &true) => Some(Reset),
            (Reset, &false) => Some(Idle),
            (Idle, &true) => Some(DrScan),
            (Idle, &false) => Some(Idle),

            // DR
            (DrScan, &true) => Some(IrScan),
            (DrScan, &false) => Some(DrCapture),
            (DrCapture, &true) => Some(DrExit1),
            (DrCapture, &false) => Some(DrShift),
            (DrShift, &true) => Some(DrExit1),
            (DrShift, &false) => Some(DrShift),
            (DrExit1, &true) => Some(DrUpdate),
            (DrExit1, &false) => Some(DrPause),
            (DrPause, &true) => Some(DrExit2),
            (DrPause, &false) => Some(DrPause),
            (DrExit2, &true) => Some(DrUpdate),
            (DrExit2, &false) => Some(DrShift),
            (DrUpdate, &true) => Some(DrScan),
            (DrUpdate, &false) => Some(Idle),

            // IR
            (IrScan, &true) => Some(Reset),
            (IrScan, &false) => Some(IrCapture),
            (IrCapture, &true) => Some(IrExit1),
            (IrCapture, &false) => Some(IrShift),
            (IrShift, &true) => Some(IrExit1),
            (IrShift, &false) => Some(IrShift),
            (IrExit1, &true) => Some(IrUpdate),
            (IrExit1, &false) => Some(IrPause),
            (IrPause, &true) => Some(IrExit2),
            (IrPause, &false) => Some(IrPause),
            (IrExit2, &true) => Some(IrUpdate),
            (IrExit2, &false) => Some(IrShift),
            (IrUpdate, &true) => Some(DrScan),
            (IrUpdate, &false) => Some(Idle),
        };
        if let Some(next) = res {
            trace!("tap graph: {} -> {}", state, next);
        }
        res
    }

    fn output(_state: &Self::State, _input: &Self::Input) -> Option<Self::Output> {
        None
    }
}

/// What to do next to move the TAP from `current` towards `target`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Already there.
    Done,
    /// The target is `Unknown`: drop the cached state, touch nothing.
    Forget,
    /// The current state is unknown and the TAP must be reset first.
    Resync,
    /// Drive TMS to `tms`, pulse TCK once, and the TAP is in `next`.
    Clock { tms: bool, next: TapState },
}

/// One step of the walk from `current` to `target`.
///
/// Branch points pick the edge that leads towards `target`; every other
/// state has a single useful exit.
pub fn next_step(current: TapState, target: TapState) -> Transition {
    use TapState::*;

    if current == target {
        return Transition::Done;
    }
    if target == Unknown {
        return Transition::Forget;
    }

    let (tms, next) = match current {
        Unknown => return Transition::Resync,
        Reset => (false, Idle),
        Idle => (true, DrScan),

        DrScan => match target {
            DrCapture | DrShift | DrExit1 | DrPause | DrExit2 | DrUpdate => (false, DrCapture),
            _ => (true, IrScan),
        },
        DrCapture => match target {
            DrShift => (false, DrShift),
            _ => (true, DrExit1),
        },
        DrShift => (true, DrExit1),
        DrExit1 => match target {
            DrPause | DrExit2 | DrShift => (false, DrPause),
            _ => (true, DrUpdate),
        },
        DrPause => (true, DrExit2),
        DrExit2 => match target {
            DrPause | DrExit1 | DrShift => (false, DrShift),
            _ => (true, DrUpdate),
        },
        DrUpdate => match target {
            Idle => (false, Idle),
            _ => (true, DrScan),
        },

        IrScan => match target {
            IrCapture | IrShift | IrExit1 | IrPause | IrExit2 | IrUpdate => (false, IrCapture),
            _ => (true, Reset),
        },
        IrCapture => match target {
            IrShift => (false, IrShift),
            _ => (true, IrExit1),
        },
        IrShift => (true, IrExit1),
        IrExit1 => match target {
            IrPause | IrExit2 | IrShift => (false, IrPause),
            _ => (true, IrUpdate),
        },
        IrPause => (true, IrExit2),
        IrExit2 => match target {
            IrPause | IrExit1 | IrShift => (false, IrShift),
            _ => (true, IrUpdate),
        },
        IrUpdate => match target {
            Idle => (false, Idle),
            _ => (true, DrScan),
        },
    };

    Transition::Clock { tms, next }
}
