//! The housekeeping tick: status-LED blink cadence and the run-test
//! countdown.
//!
//! A single background thread ticks at a fixed period and touches nothing
//! but the LED handle and its own counters, so it can never contend with
//! the service loop for the TAP lines or the packet buffers. The service
//! loop communicates with it through a blink counter (activity indication)
//! and a countdown it can arm and block on (long run-test delays).

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::StatusLed;

/// Period of the housekeeping tick.
pub const TICK_PERIOD: Duration = Duration::from_micros(5461);

/// Activity blinks charged per serviced packet.
pub const NUM_ACTIVITY_BLINKS: u8 = 10;

/// Blink level held while a long stream command runs.
pub const SUSTAINED_BLINK: u8 = u8::MAX;

/// Ticks between LED updates; stretches the visible blink rate.
const BLINK_SCALER: u8 = 10;

struct Shared {
    countdown: Mutex<u32>,
    expired: Condvar,
    blink: AtomicU8,
    shutdown: AtomicBool,
}

fn lock(mutex: &Mutex<u32>) -> MutexGuard<'_, u32> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Owner of the tick thread. Dropping it stops the thread.
pub struct Ticker {
    shared: Arc<Shared>,
    thread: Option<thread::JoinHandle<()>>,
}

/// Cloneable handle for arming blinks and countdowns.
#[derive(Clone)]
pub struct TickHandle {
    shared: Arc<Shared>,
}

impl Ticker {
    /// Starts the tick thread. The LED handle, if any, is owned by the
    /// thread from here on.
    pub fn spawn(led: Option<Box<dyn StatusLed>>) -> io::Result<Ticker> {
        let shared = Arc::new(Shared {
            countdown: Mutex::new(0),
            expired: Condvar::new(),
            blink: AtomicU8::new(0),
            shutdown: AtomicBool::new(false),
        });
        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("xsusb-tick".to_string())
            .spawn(move || tick_loop(thread_shared, led))?;
        Ok(Ticker {
            shared,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> TickHandle {
        TickHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        // Unblock anyone parked on the countdown.
        *lock(&self.shared.countdown) = 0;
        self.shared.expired.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl TickHandle {
    /// Charges the blink counter; the LED toggles once per scaled tick
    /// until it runs out.
    pub fn set_blink(&self, count: u8) {
        self.shared.blink.store(count, Ordering::Relaxed);
    }

    pub fn blink_level(&self) -> u8 {
        self.shared.blink.load(Ordering::Relaxed)
    }

    /// Winds a sustained blink down to a short tail after a long command:
    /// whatever was consumed counts, but at least a few blinks remain.
    pub fn finish_activity(&self) {
        let _ = self
            .shared
            .blink
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |count| {
                Some(if count < SUSTAINED_BLINK - NUM_ACTIVITY_BLINKS {
                    0
                } else {
                    count - (SUSTAINED_BLINK - NUM_ACTIVITY_BLINKS)
                })
            });
    }

    /// Arms the countdown with a number of ticks.
    pub fn start_countdown(&self, ticks: u32) {
        *lock(&self.shared.countdown) = ticks;
    }

    /// Blocks until the armed countdown reaches zero.
    pub fn wait_countdown(&self) {
        let mut remaining = lock(&self.shared.countdown);
        while *remaining > 0 {
            remaining = match self.shared.expired.wait(remaining) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Cancels an armed countdown, releasing any waiter immediately.
    pub fn cancel_countdown(&self) {
        *lock(&self.shared.countdown) = 0;
        self.shared.expired.notify_all();
    }
}

fn tick_loop(shared: Arc<Shared>, mut led: Option<Box<dyn StatusLed>>) {
    let mut scaler = BLINK_SCALER;
    let mut lit = false;
    while !shared.shutdown.load(Ordering::Acquire) {
        thread::sleep(TICK_PERIOD);

        {
            let mut remaining = lock(&shared.countdown);
            if *remaining > 0 {
                *remaining -= 1;
                if *remaining == 0 {
                    shared.expired.notify_all();
                }
            }
        }

        scaler -= 1;
        if scaler > 0 {
            continue;
        }
        scaler = BLINK_SCALER;

        if let Some(led) = led.as_mut() {
            let charged = shared
                .blink
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |count| {
                    count.checked_sub(1)
                })
                .is_ok();
            if charged {
                lit = !lit;
                led.set(lit);
            } else if !lit {
                // Idle with the LED steady on once blinking is done.
                lit = true;
                led.set(true);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    #[test]
    fn countdown_expires_after_armed_ticks() {
        let ticker = Ticker::spawn(None).unwrap();
        let handle = ticker.handle();
        let start = Instant::now();
        handle.start_countdown(4);
        handle.wait_countdown();
        assert!(start.elapsed() >= TICK_PERIOD * 3);
    }

    #[test]
    fn wait_returns_immediately_when_unarmed() {
        let ticker = Ticker::spawn(None).unwrap();
        ticker.handle().wait_countdown();
    }

    #[test]
    fn cancel_releases_waiter() {
        let ticker = Ticker::spawn(None).unwrap();
        let handle = ticker.handle();
        handle.start_countdown(100_000);
        let canceller = handle.clone();
        let unblock = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            canceller.cancel_countdown();
        });
        let start = Instant::now();
        handle.wait_countdown();
        assert!(start.elapsed() < Duration::from_secs(60));
        unblock.join().unwrap();
    }

    #[test]
    fn blink_counter_drains_and_toggles_led() {
        let toggles = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&toggles);
        let ticker = Ticker::spawn(Some(Box::new(move |_on: bool| {
            seen.fetch_add(1, Ordering::Relaxed);
        })))
        .unwrap();
        let handle = ticker.handle();
        handle.set_blink(4);
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.blink_level() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(handle.blink_level(), 0);
        assert!(toggles.load(Ordering::Relaxed) >= 4);
    }

    #[test]
    fn finish_activity_winds_down_sustained_blink() {
        let ticker = Ticker::spawn(None).unwrap();
        let handle = ticker.handle();
        handle.set_blink(SUSTAINED_BLINK);
        handle.finish_activity();
        assert_eq!(handle.blink_level(), NUM_ACTIVITY_BLINKS);
        handle.set_blink(3);
        handle.finish_activity();
        assert_eq!(handle.blink_level(), 0);
    }
}
