//! Line oriented operator console.
//!
//! Bytes arrive in arbitrary chunks from whatever transport carries the
//! console. `LineBuffer` folds them into lower case lines, honouring
//! backspace and delete, and `execute` runs each line against the TAP.
//! Every command is answered with `OK` or `ERROR`, followed by a prompt.

use core::fmt::{self, Write};
use core::str::SplitWhitespace;

use embedded_hal::delay::DelayNs;
use log::{debug, warn, LevelFilter};

use crate::error::{ChainError, CommandError};
use crate::interface::{GpioPort, PORT_PINS};
use crate::jtag::chain::{self, ChainInfo, DeviceId};
use crate::jtag::jtag_state_machine::TapState;
use crate::jtag::tap::TapController;
use crate::jtag::Signal;
use crate::knock::{self, Candidate, Mode};

/// Longest command line, terminator included.
pub const LINE_LENGTH: usize = 80;

pub const REPLY_OK: &str = "OK";
pub const REPLY_ERROR: &str = "ERROR";
pub const PROMPT: &str = "> ";

const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7F;

/// Log level selected by each `message` level.
const MESSAGE_LEVELS: [LevelFilter; 4] = [
    LevelFilter::Warn,
    LevelFilter::Info,
    LevelFilter::Debug,
    LevelFilter::Trace,
];

/// Collects console input until a line feed.
///
/// Input is lower cased; backspace and delete drop the previous byte. A
/// line that does not fit is dropped as a whole once its terminator
/// arrives.
pub struct LineBuffer {
    buf: [u8; LINE_LENGTH],
    len: usize,
}

impl LineBuffer {
    pub const fn new() -> Self {
        LineBuffer {
            buf: [0; LINE_LENGTH],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Add one byte; returns the line, without its terminator, when `byte`
    /// completes one.
    pub fn push(&mut self, byte: u8) -> Option<&str> {
        if self.len == LINE_LENGTH {
            if byte == b'\n' {
                warn!("command longer than {} bytes dropped", LINE_LENGTH);
                self.len = 0;
            }
            return None;
        }

        match byte {
            BACKSPACE | DELETE => {
                self.len = self.len.saturating_sub(1);
                None
            }
            b'\n' => {
                let len = core::mem::replace(&mut self.len, 0);
                let line = &self.buf[..len];
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                match core::str::from_utf8(line) {
                    Ok(line) => Some(line),
                    Err(e) => {
                        warn!("command dropped: {}", e);
                        None
                    }
                }
            }
            _ => {
                self.buf[self.len] = byte.to_ascii_lowercase();
                self.len += 1;
                None
            }
        }
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        LineBuffer::new()
    }
}

type Handler<P, D> = fn(
    &mut TapController<P, D>,
    &mut SplitWhitespace<'_>,
    &mut dyn Write,
) -> Result<(), CommandError>;

pub struct Command<P, D> {
    pub name: &'static str,
    pub usage: &'static str,
    pub help_text: &'static str,
    function: Handler<P, D>,
}

pub fn commands<P: GpioPort, D: DelayNs>() -> [Command<P, D>; 10] {
    [
        Command {
            name: "help",
            usage: "help",
            help_text: "List the commands",
            function: help,
        },
        Command {
            name: "chain",
            usage: "chain",
            help_text: "Count the devices on the chain and read their IDCODEs",
            function: chain_detect,
        },
        Command {
            name: "clock",
            usage: "clock n",
            help_text: "Pulse TCK n times",
            function: clock,
        },
        Command {
            name: "message",
            usage: "message [level]",
            help_text: "Show or set the message level (0 to 3)",
            function: message,
        },
        Command {
            name: "scan",
            usage: "scan npins [reset|bypass]",
            help_text: "Search pins 1 to npins for a JTAG port",
            function: scan,
        },
        Command {
            name: "cfg",
            usage: "cfg signal pin",
            help_text: "Assign a signal to pin 1 to 16, 0 to unassign it",
            function: cfg,
        },
        Command {
            name: "config",
            usage: "config",
            help_text: "Show the signal assignments",
            function: config,
        },
        Command {
            name: "tap",
            usage: "tap [state]",
            help_text: "Show the TAP state or move the TAP to a state",
            function: tap_state,
        },
        Command {
            name: "set",
            usage: "set signal 0|1",
            help_text: "Drive an output signal",
            function: set,
        },
        Command {
            name: "get",
            usage: "get signal",
            help_text: "Read the level of a signal's pin",
            function: get,
        },
    ]
}

/// Run one command line and write its reply, the `OK`/`ERROR` status and a
/// new prompt to `out`.
pub fn execute<P, D, W>(tap: &mut TapController<P, D>, line: &str, out: &mut W) -> fmt::Result
where
    P: GpioPort,
    D: DelayNs,
    W: Write,
{
    let mut args = line.split_whitespace();
    let name = match args.next() {
        Some(name) => name,
        None => return out.write_str(PROMPT),
    };

    let result = match commands::<P, D>().iter().find(|c| c.name == name) {
        Some(command) => (command.function)(tap, &mut args, out),
        None => Err(CommandError::UnknownCommand),
    };
    match result {
        Ok(()) => write!(out, "{}\r\n", REPLY_OK)?,
        Err(CommandError::Output) => return Err(fmt::Error),
        Err(e) => {
            debug!("{}: {}", name, e);
            write!(out, "{}\r\n{}\r\n", e, REPLY_ERROR)?;
        }
    }
    out.write_str(PROMPT)
}

/// A TAP driven from console input.
pub struct Console<P, D> {
    pub tap: TapController<P, D>,
    line: LineBuffer,
}

impl<P: GpioPort, D: DelayNs> Console<P, D> {
    pub fn new(tap: TapController<P, D>) -> Self {
        Console {
            tap,
            line: LineBuffer::new(),
        }
    }

    /// Feed received bytes; every completed line is executed in order.
    pub fn process<W: Write>(&mut self, bytes: &[u8], out: &mut W) -> fmt::Result {
        for &byte in bytes {
            if let Some(line) = self.line.push(byte) {
                execute(&mut self.tap, line, out)?;
            }
        }
        Ok(())
    }

    pub fn execute<W: Write>(&mut self, line: &str, out: &mut W) -> fmt::Result {
        execute(&mut self.tap, line, out)
    }

    /// Bytes of the line being typed.
    pub fn pending(&self) -> usize {
        self.line.len()
    }
}

fn parameter<'a>(
    args: &mut SplitWhitespace<'a>,
    name: &'static str,
) -> Result<&'a str, CommandError> {
    args.next().ok_or(CommandError::MissingParameter(name))
}

fn number(args: &mut SplitWhitespace<'_>, name: &'static str) -> Result<u32, CommandError> {
    parameter(args, name)?
        .parse()
        .map_err(|_| CommandError::NotANumber(name))
}

fn signal(args: &mut SplitWhitespace<'_>) -> Result<Signal, CommandError> {
    Signal::from_name(parameter(args, "signal")?).ok_or(CommandError::InvalidSignal)
}

/// Driving these outside `set_state` leaves the cached TAP state stale.
fn moves_tap(signal: Signal) -> bool {
    matches!(signal, Signal::Tck | Signal::Tms | Signal::Trst)
}

fn help<P: GpioPort, D: DelayNs>(
    _tap: &mut TapController<P, D>,
    _args: &mut SplitWhitespace<'_>,
    out: &mut dyn Write,
) -> Result<(), CommandError> {
    for command in commands::<P, D>().iter() {
        write!(out, "  {:<26}{}\r\n", command.usage, command.help_text)?;
    }
    Ok(())
}

fn write_chain(out: &mut dyn Write, info: &ChainInfo) -> fmt::Result {
    write!(
        out,
        "{} device(s), IR length {}\r\n",
        info.devices, info.ir_length
    )?;
    for (n, id) in info.ids().enumerate() {
        match id {
            DeviceId::IdCode(idcode) => write!(
                out,
                "  {}: IDCODE {:#010x} ({})\r\n",
                n + 1,
                idcode,
                chain::manufacturer(idcode).unwrap_or("Unknown")
            )?,
            DeviceId::Bypass => write!(out, "  {}: BYPASS\r\n", n + 1)?,
        }
    }
    Ok(())
}

fn chain_detect<P: GpioPort, D: DelayNs>(
    tap: &mut TapController<P, D>,
    _args: &mut SplitWhitespace<'_>,
    out: &mut dyn Write,
) -> Result<(), CommandError> {
    let info = chain::detect(tap)?;
    write_chain(out, &info)?;
    Ok(())
}

fn clock<P: GpioPort, D: DelayNs>(
    tap: &mut TapController<P, D>,
    args: &mut SplitWhitespace<'_>,
    _out: &mut dyn Write,
) -> Result<(), CommandError> {
    let count = number(args, "n")?;
    for _ in 0..count {
        tap.driver.clock();
    }
    if !tap.state().is_stable() {
        tap.set_state(TapState::Unknown);
    }
    Ok(())
}

fn message<P: GpioPort, D: DelayNs>(
    _tap: &mut TapController<P, D>,
    args: &mut SplitWhitespace<'_>,
    out: &mut dyn Write,
) -> Result<(), CommandError> {
    let max = (MESSAGE_LEVELS.len() - 1) as u8;
    let level = match args.next() {
        None => {
            let current = MESSAGE_LEVELS
                .iter()
                .position(|&filter| log::max_level() <= filter)
                .unwrap_or(max as usize);
            write!(out, "Current Level: {}\r\n", current)?;
            return Ok(());
        }
        Some(word) => word
            .parse::<u8>()
            .map_err(|_| CommandError::NotANumber("level"))?,
    };

    let filter = MESSAGE_LEVELS
        .get(level as usize)
        .ok_or(CommandError::LevelOutOfRange { max })?;
    log::set_max_level(*filter);
    Ok(())
}

fn write_candidate(
    out: &mut dyn Write,
    candidate: Candidate,
    result: Result<ChainInfo, ChainError>,
) -> fmt::Result {
    write!(out, "[!] Potential chain: {}\r\n", candidate)?;
    match result {
        Ok(info) => write_chain(out, &info),
        Err(e) => write!(out, "  {}\r\n", e),
    }
}

fn scan<P: GpioPort, D: DelayNs>(
    tap: &mut TapController<P, D>,
    args: &mut SplitWhitespace<'_>,
    out: &mut dyn Write,
) -> Result<(), CommandError> {
    let pins = number(args, "npins")?;
    let mode = match args.next() {
        Some(word) => Mode::from_keyword(word).ok_or(CommandError::InvalidMode)?,
        None => Mode::Reset,
    };
    if pins < knock::MIN_PINS as u32 || pins > PORT_PINS as u32 {
        return Err(CommandError::PinCount {
            min: knock::MIN_PINS,
            max: PORT_PINS,
        });
    }

    let mut written = Ok(());
    knock::scan(tap, mode, pins as u8, |candidate, result| {
        if written.is_ok() {
            written = write_candidate(out, candidate, result);
        }
    })?;
    written?;
    Ok(())
}

fn cfg<P: GpioPort, D: DelayNs>(
    tap: &mut TapController<P, D>,
    args: &mut SplitWhitespace<'_>,
    _out: &mut dyn Write,
) -> Result<(), CommandError> {
    let signal = signal(args)?;
    let pin = number(args, "pin")?;
    if pin > PORT_PINS as u32 {
        return Err(CommandError::PinOutOfRange { max: PORT_PINS });
    }

    // pins are counted from 1 on the console, 0 unassigns
    let pin = pin.checked_sub(1).map(|pin| pin as u8);
    tap.driver.cfg(signal, pin)?;
    if moves_tap(signal) {
        tap.set_state(TapState::Unknown);
    }
    Ok(())
}

fn config<P: GpioPort, D: DelayNs>(
    tap: &mut TapController<P, D>,
    _args: &mut SplitWhitespace<'_>,
    out: &mut dyn Write,
) -> Result<(), CommandError> {
    write!(out, "Signal Configuration:\r\n  Signal  Pin\r\n")?;
    for &signal in Signal::ALL.iter() {
        if let Some(pin) = tap.driver.allocation(signal) {
            write!(out, "    {:>4}   {:>2}\r\n", signal, pin + 1)?;
        }
    }
    Ok(())
}

fn tap_state<P: GpioPort, D: DelayNs>(
    tap: &mut TapController<P, D>,
    args: &mut SplitWhitespace<'_>,
    out: &mut dyn Write,
) -> Result<(), CommandError> {
    match args.next() {
        None => write!(out, "TAP State: {}\r\n", tap.state())?,
        Some(word) => {
            let target = TapState::from_keyword(word).ok_or(CommandError::InvalidState)?;
            let old = tap.state();
            tap.set_state(target);
            write!(out, "TAP State: {} -> {}\r\n", old, tap.state())?;
        }
    }
    Ok(())
}

fn set<P: GpioPort, D: DelayNs>(
    tap: &mut TapController<P, D>,
    args: &mut SplitWhitespace<'_>,
    _out: &mut dyn Write,
) -> Result<(), CommandError> {
    let signal = signal(args)?;
    let value = number(args, "value")?;
    tap.driver.set(signal, value != 0);
    if moves_tap(signal) {
        tap.set_state(TapState::Unknown);
    }
    Ok(())
}

fn get<P: GpioPort, D: DelayNs>(
    tap: &mut TapController<P, D>,
    args: &mut SplitWhitespace<'_>,
    out: &mut dyn Write,
) -> Result<(), CommandError> {
    let signal = signal(args)?;
    write!(out, "{}: {}\r\n", signal, tap.driver.get(signal) as u8)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::interface::sim::{SimChain, SimDelay, SimPort, SimTap, Wiring};
    use crate::jtag::driver::Driver;
    use crate::test_util::init_logger;

    const ARM_DAP: u32 = 0x4BA0_0477;

    fn lines(buffer: &mut LineBuffer, input: &[u8]) -> Vec<String> {
        input
            .iter()
            .filter_map(|&byte| buffer.push(byte).map(String::from))
            .collect()
    }

    fn board(wiring: Wiring) -> SimPort {
        SimPort::with_chain(SimChain::new(wiring, vec![SimTap::new(4, Some(ARM_DAP))]))
    }

    fn console(sim: &SimPort) -> Console<&SimPort, SimDelay> {
        init_logger();
        Console::new(TapController::new(Driver::new(
            sim,
            SimDelay,
            Config::default(),
        )))
    }

    fn run(console: &mut Console<&SimPort, SimDelay>, line: &str) -> String {
        let mut out = String::new();
        console.execute(line, &mut out).unwrap();
        assert!(out.ends_with(PROMPT));
        out
    }

    fn ok(reply: &str) -> bool {
        reply.contains("OK\r\n") && !reply.contains(REPLY_ERROR)
    }

    #[test]
    fn line_terminators() {
        let mut buffer = LineBuffer::new();
        assert_eq!(lines(&mut buffer, b"test one\r\n"), ["test one"]);
        assert!(buffer.is_empty());
        assert_eq!(lines(&mut buffer, b"test one\n"), ["test one"]);
        assert_eq!(lines(&mut buffer, b"\r\n"), [""]);
    }

    #[test]
    fn line_lower_case() {
        let mut buffer = LineBuffer::new();
        assert_eq!(
            lines(&mut buffer, b"tEst ONe 2 THREE\r\n"),
            ["test one 2 three"]
        );
    }

    #[test]
    fn line_backspace_and_delete() {
        let mut buffer = LineBuffer::new();
        assert_eq!(
            lines(&mut buffer, b"tEstc6\x08\x08 Op\x7FNe 2 THREE\r\n"),
            ["test one 2 three"]
        );

        assert!(lines(&mut buffer, b"test\x08\x08\x08\x08\x08\x08\x08\x08").is_empty());
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn line_split_across_chunks() {
        let mut buffer = LineBuffer::new();
        for chunk in ["t", "est", " one", " ", "2 thr", "ee"].iter() {
            assert!(lines(&mut buffer, chunk.as_bytes()).is_empty());
        }
        assert_eq!(lines(&mut buffer, b"\r\n"), ["test one 2 three"]);
    }

    #[test]
    fn lines_back_to_back() {
        let mut buffer = LineBuffer::new();
        assert_eq!(
            lines(&mut buffer, b"test one\r\ntest two\r\ntest"),
            ["test one", "test two"]
        );
        assert_eq!(lines(&mut buffer, b" three\r\n"), ["test three"]);
    }

    #[test]
    fn overlong_line_dropped() {
        let mut buffer = LineBuffer::new();
        for _ in 0..9 {
            assert!(lines(&mut buffer, b"0123456789").is_empty());
        }
        assert_eq!(buffer.len(), LINE_LENGTH);
        assert!(lines(&mut buffer, b"\n").is_empty());
        assert_eq!(buffer.len(), 0);

        assert_eq!(lines(&mut buffer, b"chain\n"), ["chain"]);
    }

    #[test]
    fn unknown_command() {
        let sim = board(Wiring::default());
        let mut console = console(&sim);

        let reply = run(&mut console, "frobnicate");
        assert!(reply.contains("unknown command"));
        assert!(reply.contains("ERROR\r\n"));

        // empty lines only get a prompt
        assert_eq!(run(&mut console, ""), PROMPT);
    }

    #[test]
    fn help_lists_commands() {
        let sim = board(Wiring::default());
        let mut console = console(&sim);

        let reply = run(&mut console, "help");
        assert!(ok(&reply));
        for command in commands::<&SimPort, SimDelay>().iter() {
            assert!(reply.contains(command.usage), "{}", command.name);
        }
    }

    #[test]
    fn clock_parameters() {
        let sim = board(Wiring::default());
        let mut console = console(&sim);

        let reply = run(&mut console, "clock");
        assert!(reply.contains("missing parameter n."));
        assert!(reply.contains("ERROR\r\n"));

        let reply = run(&mut console, "clock ten");
        assert!(reply.contains("n needs to be a number."));
        assert!(reply.contains("ERROR\r\n"));

        sim.clear_log();
        assert!(ok(&run(&mut console, "clock 3")));
        assert_eq!(sim.tms_log().len(), 3);
    }

    #[test]
    fn clock_outside_stable_state_forgets() {
        let sim = board(Wiring::default());
        let mut console = console(&sim);

        assert!(ok(&run(&mut console, "tap drshift")));
        assert!(ok(&run(&mut console, "clock 5")));
        assert_eq!(console.tap.state(), TapState::DrShift);

        assert!(ok(&run(&mut console, "tap drexit1")));
        assert!(ok(&run(&mut console, "clock 1")));
        assert_eq!(console.tap.state(), TapState::Unknown);
    }

    #[test]
    fn tap_states() {
        let sim = board(Wiring::default());
        let mut console = console(&sim);

        let reply = run(&mut console, "tap sideways");
        assert!(reply.contains("invalid state."));
        assert!(reply.contains("ERROR\r\n"));
        assert_eq!(sim.chain_state(), Some(TapState::Reset));

        assert!(run(&mut console, "tap").contains("TAP State: Unknown"));
        let reply = run(&mut console, "tap irpause");
        assert!(ok(&reply));
        assert!(reply.contains("Unknown -> Pause IR"));
        assert_eq!(sim.chain_state(), Some(TapState::IrPause));
    }

    #[test]
    fn chain_command() {
        let sim = board(Wiring::default());
        let mut console = console(&sim);

        let reply = run(&mut console, "chain");
        assert!(ok(&reply));
        assert!(reply.contains("1 device(s), IR length 4"));
        assert!(reply.contains("IDCODE 0x4ba00477 (ARM Ltd)"));

        assert!(ok(&run(&mut console, "cfg tdo 0")));
        let reply = run(&mut console, "chain");
        assert!(reply.contains("Are the signal assignments correct?"));
        assert!(reply.contains("ERROR\r\n"));
    }

    #[test]
    fn signal_configuration() {
        let sim = board(Wiring::default());
        let mut console = console(&sim);

        let reply = run(&mut console, "config");
        assert!(ok(&reply));
        assert!(reply.contains("     TCK    1\r\n"));
        assert!(reply.contains("     TDO    4\r\n"));

        assert!(ok(&run(&mut console, "cfg trst 5")));
        assert_eq!(console.tap.driver.allocation(Signal::Trst), Some(4));
        assert!(run(&mut console, "config").contains("    TRST    5\r\n"));

        let reply = run(&mut console, "cfg tdi 1");
        assert!(reply.contains("Configuration failed"));
        assert!(reply.contains("ERROR\r\n"));
        assert_eq!(console.tap.driver.allocation(Signal::Tdi), Some(2));

        let reply = run(&mut console, "cfg tck 17");
        assert!(reply.contains("Pin must be between 0 and 16 inclusive."));

        assert!(run(&mut console, "cfg tdx 3").contains("invalid signal."));
        assert!(run(&mut console, "cfg tms").contains("missing parameter pin."));

        assert!(ok(&run(&mut console, "cfg tms 0")));
        assert!(!console.tap.driver.is_allocated(Signal::Tms));
        assert!(!run(&mut console, "config").contains("TMS"));
    }

    #[test]
    fn set_and_get() {
        let sim = board(Wiring::default());
        let mut console = console(&sim);

        assert!(ok(&run(&mut console, "set tdi 1")));
        assert!(sim.registers().output(2));
        assert!(run(&mut console, "get tdi").contains("TDI: 1\r\n"));

        assert!(ok(&run(&mut console, "set tdi 0")));
        assert!(run(&mut console, "get tdi").contains("TDI: 0\r\n"));

        assert!(run(&mut console, "set tdi high").contains("value needs to be a number."));
        assert!(run(&mut console, "get").contains("missing parameter signal."));

        console.tap.set_state(TapState::Idle);
        assert!(ok(&run(&mut console, "set tms 1")));
        assert_eq!(console.tap.state(), TapState::Unknown);
    }

    #[test]
    fn message_level() {
        let sim = board(Wiring::default());
        let mut console = console(&sim);
        let before = log::max_level();

        assert!(ok(&run(&mut console, "message 2")));
        assert_eq!(log::max_level(), LevelFilter::Debug);
        assert!(run(&mut console, "message").contains("Current Level: 2"));

        let reply = run(&mut console, "message 4");
        assert!(reply.contains("Level must be between 0 and 3 inclusive."));
        assert!(reply.contains("ERROR\r\n"));
        assert!(run(&mut console, "message loud").contains("level needs to be a number."));
        assert_eq!(log::max_level(), LevelFilter::Debug);

        log::set_max_level(before);
    }

    #[test]
    fn scan_command() {
        let wiring = Wiring {
            tck: 5,
            tms: 2,
            tdi: 4,
            tdo: 0,
            trst: None,
        };
        let sim = board(wiring);
        let mut console = console(&sim);

        assert!(run(&mut console, "scan").contains("missing parameter npins."));
        assert!(run(&mut console, "scan six").contains("npins needs to be a number."));
        assert!(run(&mut console, "scan 6 sideways").contains("invalid mode."));
        let reply = run(&mut console, "scan 3");
        assert!(reply.contains("At least 4 pins are required for a scan. Max 16."));
        assert!(reply.contains("ERROR\r\n"));

        for line in ["scan 6", "scan 6 bypass"].iter() {
            let reply = run(&mut console, line);
            assert!(ok(&reply), "{}", line);
            assert!(reply.contains("[!] Potential chain: TCK: 5 TMS: 2 TDO: 0 TDI: 4\r\n"));
            assert!(reply.contains("IDCODE 0x4ba00477"));
        }
    }

    #[test]
    fn console_input() {
        let sim = board(Wiring::default());
        let mut console = console(&sim);
        let mut out = String::new();

        console.process(b"TAP ID", &mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(console.pending(), 6);

        console.process(b"LE\r\nget tdo\r\n", &mut out).unwrap();
        assert_eq!(sim.chain_state(), Some(TapState::Idle));
        assert_eq!(out.matches(PROMPT).count(), 2);
        assert!(out.contains("TDO: 0\r\n"));
        assert_eq!(console.pending(), 0);
    }
}
