use std::time::Duration;
use std::thread;
use log::info;

/// Blocking wait for the manual sign-in window before any page interaction.
pub fn login_window(secs: u64) {
    info!("Waiting {}s for manual login if needed...", secs);
    thread::sleep(Duration::from_secs(secs));
}

/// Short fixed pause after a click or keystroke so the page can settle.
pub fn settle(millis: u64) {
    thread::sleep(Duration::from_millis(millis));
}

/// Exponential retry sleep: `base * 2^attempt` seconds, attempt counted from 0.
pub fn retry_backoff(base_secs: u64, attempt: u32) {
    let secs = base_secs.saturating_mul(1u64 << attempt.min(10));
    info!("Backing off {}s before retry...", secs);
    thread::sleep(Duration::from_secs(secs));
}
