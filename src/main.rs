use std::io::{Read, Write};

use anyhow::{anyhow, Context, Result};
use function_name::named;
use log::{debug, info};

extern crate libjtag;

use libjtag::command::PROMPT;
use libjtag::sim::{SimChain, SimDelay, SimPort, SimTap, Wiring};
use libjtag::{Config, Console, Driver, TapController};

/// Log targets too chatty for the console: every TCK edge of the simulated
/// chain and every state machine step.
const QUIET_TARGETS: [&str; 2] = [
    "libjtag::jtag::jtag_state_machine",
    "libjtag::interface::sim",
];

fn is_quiet(target: &str) -> bool {
    QUIET_TARGETS.iter().any(|quiet| target.starts_with(quiet))
}

fn setup_logger() -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(log::LevelFilter::Trace)
        .chain(std::io::stdout())
        .filter(|meta| !is_quiet(meta.target()))
        .apply()?;
    // `message` raises and lowers this at run time
    log::set_max_level(log::LevelFilter::Info);
    Ok(())
}

/// A board with an unlabelled header: a Cortex-M debug port followed by a
/// boundary scan TAP without IDCODE, on scrambled pins.
fn demo_board() -> SimPort {
    let wiring = Wiring {
        tck: 6,
        tms: 3,
        tdi: 1,
        tdo: 4,
        trst: None,
    };
    let taps = vec![SimTap::new(5, None), SimTap::new(4, Some(0x4BA0_0477))];
    SimPort::with_chain(SimChain::new(wiring, taps))
}

#[named]
fn run() -> Result<()> {
    let port = demo_board();
    let mut console = Console::new(TapController::new(Driver::new(
        &port,
        SimDelay,
        Config::default(),
    )));

    info!("JTAG knocker on a simulated board, type help for the commands");
    let stdin = std::io::stdin();
    let mut stdin = stdin.lock();
    let stdout = std::io::stdout();
    let mut stdout = stdout.lock();
    write!(stdout, "{}", PROMPT)?;
    stdout.flush()?;

    let mut buf = [0u8; 64];
    let mut reply = String::new();
    loop {
        let n = stdin.read(&mut buf).context("failed to read the console")?;
        if n == 0 {
            debug!("{}: end of input", function_name!());
            break;
        }

        reply.clear();
        console
            .process(&buf[..n], &mut reply)
            .map_err(|_| anyhow!("failed to format a reply"))?;
        stdout.write_all(reply.as_bytes())?;
        stdout.flush()?;
    }
    Ok(())
}

fn main() -> Result<()> {
    setup_logger().context("failed to set up logger")?;
    run()
}
