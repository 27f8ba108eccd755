//! Tickloop demo
//!
//! Runs the null backend with a heartbeat timer, a stdin watch and a helper
//! thread posting wakeups, then exits after a number of beats.

use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use log::{debug, info, warn};
use tickloop::backend::NullBackend;
use tickloop::{Interest, Timer, Watch};

const DEFAULT_BEATS: u32 = 5;
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(200);
const WAKEUP_INTERVAL: Duration = Duration::from_millis(150);

/// State shared with every callback
#[derive(Debug, Default)]
struct Demo {
    beats: u32,
    stdin_bytes: usize,
    ticks: u64,
}

fn parse_beats() -> anyhow::Result<u32> {
    let mut args = std::env::args().skip(1);
    let mut beats = DEFAULT_BEATS;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--beats" => {
                let value = args.next().context("--beats requires a value")?;
                beats = value
                    .parse()
                    .with_context(|| format!("invalid beat count: {}", value))?;
            }
            "-h" | "--help" => {
                println!("Usage: tickloop [--beats N]");
                std::process::exit(0);
            }
            other => bail!("unknown argument: {}", other),
        }
    }

    Ok(beats)
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let target = parse_beats()?;
    info!("Starting tickloop demo for {} beats", target);

    let mut backend = NullBackend::<Demo>::new()?;
    let signal = backend.signal();

    backend.registry().add_timer(
        Timer::new("heartbeat", HEARTBEAT_INTERVAL, move |_, demo: &mut Demo, _| {
            demo.beats += 1;
            info!("Beat {}/{}", demo.beats, target);
            if demo.beats >= target {
                signal.stop();
            }
        })
        .repeating(true),
    )?;

    backend.registry().add_watch(
        Watch::new("stdin", stdin_fd(), Interest::READABLE | Interest::HANGUP).with_callback(
            |registry, demo: &mut Demo, event| {
                let mut buf = [0u8; 4096];
                // SAFETY: stdin stays open for the life of the process
                let fd = unsafe { std::os::fd::BorrowedFd::borrow_raw(event.fd) };
                match rustix::io::read(fd, &mut buf[..]) {
                    Ok(0) => {
                        debug!("stdin closed");
                        registry.remove_watch(event.id);
                    }
                    Ok(n) => demo.stdin_bytes += n,
                    Err(err) => {
                        warn!("Failed to read stdin: {}", err);
                        registry.remove_watch(event.id);
                    }
                }
            },
        ),
    )?;

    let waker = backend
        .event_loop()
        .wakeup_handle()
        .context("wakeup channel closed")?;
    let helper = thread::spawn(move || {
        for _ in 0..target {
            thread::sleep(WAKEUP_INTERVAL);
            waker.wakeup();
        }
    });

    let mut demo = Demo::default();
    backend.run_main_loop(&mut demo, |_, demo| demo.ticks += 1)?;

    if helper.join().is_err() {
        warn!("Wakeup thread panicked");
    }

    info!(
        "Done after {} beats, {} ticks, {} bytes from stdin",
        demo.beats, demo.ticks, demo.stdin_bytes
    );
    Ok(())
}

fn stdin_fd() -> i32 {
    use std::os::fd::AsRawFd;
    std::io::stdin().as_raw_fd()
}
