//! End-to-end loop behavior against the real clock and `poll(2)`

use std::cell::Cell;
use std::os::fd::AsRawFd;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use tickloop::event_loop::{MAX_WATCHES, WAKEUP_WATCH_NAME};
use tickloop::{EventLoop, EventLoopBuilder, Interest, LoopError, Registry, Timer, Watch};

#[test]
fn test_cross_thread_wakeup_ends_blocking_tick() {
    let mut event_loop = EventLoop::<()>::new().unwrap();
    let waker = event_loop.wakeup_handle().unwrap();

    let helper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        waker.wakeup();
    });

    let start = Instant::now();
    event_loop.tick(None, &mut ()).unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(event_loop.wakeup_ready());
    assert!(event_loop.wakeup_data_read());

    helper.join().unwrap();
}

#[test]
fn test_pipe_watch_ready_before_timeout() {
    let mut event_loop = EventLoop::<Vec<u8>>::new().unwrap();
    let (read, write) = rustix::pipe::pipe().unwrap();

    let id = event_loop
        .add_watch(
            Watch::new("pipe", read.as_raw_fd(), Interest::READABLE).with_callback(
                |_, bytes: &mut Vec<u8>, event| {
                    assert!(event.readiness.contains(Interest::READABLE));
                    let mut buf = [0u8; 16];
                    let fd = unsafe { std::os::fd::BorrowedFd::borrow_raw(event.fd) };
                    let n = rustix::io::read(fd, &mut buf[..]).unwrap();
                    bytes.extend_from_slice(&buf[..n]);
                },
            ),
        )
        .unwrap();

    rustix::io::write(&write, b"ping").unwrap();

    let mut bytes = Vec::new();
    let start = Instant::now();
    event_loop
        .tick(Some(Duration::from_millis(1000)), &mut bytes)
        .unwrap();

    assert!(start.elapsed() < Duration::from_millis(500));
    assert!(event_loop.watch_ready(id));
    assert_eq!(bytes, b"ping");
}

#[test]
fn test_watch_capacity_counts_wakeup_watch() {
    let mut event_loop = EventLoop::<()>::new().unwrap();
    let (read, _write) = rustix::pipe::pipe().unwrap();

    // The wakeup channel already occupies one slot
    assert_eq!(event_loop.watch_count(), 1);
    let first = event_loop.watch_ids().next().unwrap();
    assert_eq!(event_loop.watch_name(first), Some(WAKEUP_WATCH_NAME));

    for i in 1..MAX_WATCHES {
        event_loop
            .add_watch(Watch::new(format!("pipe-{}", i), read.as_raw_fd(), Interest::READABLE))
            .unwrap();
    }

    let result = event_loop.add_watch(Watch::new("overflow", read.as_raw_fd(), Interest::READABLE));
    assert_eq!(result, Err(LoopError::TooManyWatches { limit: MAX_WATCHES }));
    assert_eq!(event_loop.watch_count(), MAX_WATCHES);
}

#[test]
fn test_repeating_timer_fires_on_schedule() {
    let mut event_loop = EventLoop::<u32>::new().unwrap();
    event_loop
        .add_timer(
            Timer::new("beat", Duration::from_millis(50), |_, count: &mut u32, _| *count += 1)
                .repeating(true),
        )
        .unwrap();

    let mut count = 0;
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(280) {
        event_loop
            .tick(Some(Duration::from_millis(10)), &mut count)
            .unwrap();
    }

    assert!(count >= 4, "fired {} times", count);
    assert!(count <= 6, "fired {} times", count);
}

#[test]
fn test_one_shot_timer_removed_after_firing() {
    let mut event_loop = EventLoop::<u32>::new().unwrap();
    let id = event_loop
        .add_timer(Timer::new("once", Duration::from_millis(10), |_, count: &mut u32, _| {
            *count += 1
        }))
        .unwrap();

    let mut count = 0;
    event_loop.tick(None, &mut count).unwrap();
    assert_eq!(count, 1);
    assert_eq!(event_loop.timer_name(id), None);
    assert_eq!(event_loop.timer_count(), 0);
}

#[test]
fn test_display_fd_is_primary_watch() {
    let (read, write) = rustix::pipe::pipe().unwrap();
    let mut event_loop = EventLoopBuilder::new()
        .display_fd(read.as_raw_fd())
        .build::<()>()
        .unwrap();

    assert!(!event_loop.dispatch_pending(&mut ()).unwrap());

    rustix::io::write(&write, b"x").unwrap();
    assert!(event_loop.tick(Some(Duration::from_millis(1000)), &mut ()).unwrap());
    assert!(!event_loop.wakeup_ready());
}

#[test]
fn test_display_ready_survives_timer_toggling_watch() {
    let (read, write) = rustix::pipe::pipe().unwrap();
    let (other, _other_write) = rustix::pipe::pipe().unwrap();
    let mut event_loop = EventLoopBuilder::new()
        .display_fd(read.as_raw_fd())
        .build::<()>()
        .unwrap();

    let extra = event_loop
        .add_watch(Watch::new("extra", other.as_raw_fd(), Interest::READABLE).enabled(false))
        .unwrap();
    event_loop
        .add_timer(Timer::new("toggle", Duration::ZERO, move |registry: &mut Registry<()>, _, _| {
            registry.toggle_watch(extra, true)
        }))
        .unwrap();

    rustix::io::write(&write, b"x").unwrap();
    assert!(event_loop.tick(Some(Duration::from_millis(1000)), &mut ()).unwrap());
    assert_eq!(event_loop.watch_enabled(extra), Some(true));
}

#[test]
fn test_teardown_runs_cleanup_once() {
    let released = Rc::new(Cell::new(0));
    let mut event_loop = EventLoop::<()>::new().unwrap();

    event_loop
        .add_timer(
            Timer::new("t", Duration::from_secs(60), |_, _, _| {}).on_cleanup({
                let released = released.clone();
                move |_| released.set(released.get() + 1)
            }),
        )
        .unwrap();

    event_loop.teardown();
    event_loop.teardown();
    drop(event_loop);

    assert_eq!(released.get(), 1);
}

#[test]
fn test_signal_stops_run_from_thread() {
    let mut event_loop = EventLoop::<()>::new().unwrap();
    let signal = event_loop.signal();

    let helper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        signal.stop();
    });

    let mut ticks = 0;
    event_loop.run(&mut (), |_, _| ticks += 1).unwrap();
    assert!(ticks >= 1);
    assert!(!event_loop.is_running());

    helper.join().unwrap();
}
