//! Event hour source.
//!
//! The current hour is published on a `watch` channel holding
//! `Option<u8>`: `None` until the event starts, then the hour number, which
//! only ever grows and stops at the last hour of the event.

use std::time::Duration;

use relay_core::config::HoursConfig;
use relay_core::types::HOURS_PER_EVENT;
use tokio::sync::watch;
use tokio::time::{Instant, interval_at};
use tracing::info;

use crate::ShutdownReceiver;

const LAST_HOUR: u8 = (HOURS_PER_EVENT - 1) as u8;

/// Delivers `start_hour` after `start_in`, then one more hour per `tick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourTicker {
    start_hour: u8,
    start_in: Duration,
    tick: Duration,
}

impl HourTicker {
    pub fn new(start_hour: u8, start_in: Duration, tick: Duration) -> Self {
        Self {
            start_hour: start_hour.min(LAST_HOUR),
            start_in,
            tick,
        }
    }

    pub fn from_config(cfg: &HoursConfig) -> Self {
        Self::new(cfg.effective_start_hour(), cfg.start_in(), cfg.tick())
    }

    /// Run until shutdown. Once the last hour is reached the ticker only
    /// waits for shutdown.
    pub async fn run(self, hour_tx: watch::Sender<Option<u8>>, mut shutdown: ShutdownReceiver) {
        if *shutdown.borrow() {
            return;
        }
        if !self.start_in.is_zero() {
            info!("[ticker] event starts in {:?} at hour {}", self.start_in, self.start_hour);
            tokio::select! {
                _ = tokio::time::sleep(self.start_in) => {}
                _ = shutdown.changed() => return,
            }
        }

        let mut hour = self.start_hour;
        hour_tx.send_replace(Some(hour));
        info!("[ticker] event started, hour {hour}");

        let mut ticks = interval_at(Instant::now() + self.tick, self.tick);
        while hour < LAST_HOUR {
            tokio::select! {
                _ = ticks.tick() => {
                    hour += 1;
                    hour_tx.send_replace(Some(hour));
                    info!("[ticker] hour {hour}");
                }
                _ = shutdown.changed() => return,
            }
        }

        info!("[ticker] final hour reached");
        let _ = shutdown.changed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_hour_is_clamped() {
        let t = HourTicker::new(40, Duration::ZERO, Duration::from_secs(1));
        assert_eq!(t.start_hour, 23);
    }

    #[tokio::test]
    async fn hours_rise_then_saturate() {
        let ticker = HourTicker::new(21, Duration::from_millis(20), Duration::from_millis(40));
        let (hour_tx, mut hour_rx) = watch::channel(None);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(ticker.run(hour_tx, stop_rx));

        assert_eq!(*hour_rx.borrow_and_update(), None);
        let mut seen = Vec::new();
        while seen.last() != Some(&23) {
            tokio::time::timeout(Duration::from_secs(2), hour_rx.changed())
                .await
                .unwrap()
                .unwrap();
            if let Some(h) = *hour_rx.borrow_and_update() {
                seen.push(h);
            }
        }
        assert_eq!(seen.first(), Some(&21));
        assert!(seen.windows(2).all(|w| w[0] < w[1]));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!hour_rx.has_changed().unwrap());
        assert_eq!(*hour_rx.borrow(), Some(23));

        stop_tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_before_start() {
        let ticker = HourTicker::new(0, Duration::from_secs(3600), Duration::from_secs(3600));
        let (hour_tx, hour_rx) = watch::channel(None);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(ticker.run(hour_tx, stop_rx));

        stop_tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert_eq!(*hour_rx.borrow(), None);
    }
}
