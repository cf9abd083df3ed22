//! Time-based event sources attached to an [`EventBus`].

use crate::error::{ClientError, Result};
use crate::event_bus::EventBus;
use crate::types::events::{Event, EventPayload, SOURCE_SCHEDULE, timer_path, timing_path};
use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime, TimeZone};
use log::{debug, info, warn};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

/// Parses `H:MM`, `HH:MM` or `HH:MM:SS`.
pub fn parse_time_of_day(text: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(text.trim(), "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(text.trim(), "%H:%M"))
        .map_err(|e| ClientError::Decode(format!("invalid time of day {text:?}: {e}")))
}

/// The next moment `at` occurs strictly after `now`: today if still ahead,
/// otherwise tomorrow.
pub fn next_occurrence(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

fn delay_until(at: NaiveTime) -> Duration {
    let now = Local::now();
    let target = next_occurrence(now.naive_local(), at);
    // A wall-clock time skipped by a DST jump resolves to the hour after.
    let resolved = Local
        .from_local_datetime(&target)
        .earliest()
        .or_else(|| {
            Local
                .from_local_datetime(&(target + ChronoDuration::hours(1)))
                .earliest()
        });
    match resolved {
        Some(when) => (when - now).to_std().unwrap_or(Duration::ZERO),
        None => Duration::from_secs(3600),
    }
}

impl EventBus {
    /// Publishes a `TimerTick` on `/timer/<interval>` every `interval`,
    /// first at one interval from now, until the bus is closed.
    pub fn add_recurring_timer(&self, interval: Duration) -> JoinHandle<()> {
        let bus = self.clone();
        let mut shutdown = self.shutdown_signal();
        let path = timer_path(interval);
        info!(target: "Schedule", "Registering recurring timer {path}");

        tokio::spawn(async move {
            let period = interval.max(Duration::from_millis(1));
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut count: u64 = 0;
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        debug!(target: "Schedule", "Timer {path} stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        count += 1;
                        let event = Event::new(path.clone(), SOURCE_SCHEDULE, EventPayload::TimerTick { count });
                        if bus.publish(event).await.is_err() {
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Publishes a `TimingFire` on `/timing/<time_of_day>` every day at the
    /// given local wall-clock time.
    pub fn add_daily_timing(&self, time_of_day: &str) -> Result<JoinHandle<()>> {
        let at = parse_time_of_day(time_of_day)?;
        let label = time_of_day.trim().to_string();
        let path = timing_path(&label);
        let bus = self.clone();
        let mut shutdown = self.shutdown_signal();
        info!(target: "Schedule", "Registering daily timing {path}");

        Ok(tokio::spawn(async move {
            loop {
                let wait = delay_until(at);
                debug!(target: "Schedule", "{path} fires in {}s", wait.as_secs());
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        debug!(target: "Schedule", "Daily timing {path} stopped");
                        return;
                    }
                    _ = tokio::time::sleep(wait) => {
                        let event = Event::new(
                            path.clone(),
                            SOURCE_SCHEDULE,
                            EventPayload::TimingFire { time_of_day: label.clone() },
                        );
                        if bus.publish(event).await.is_err() {
                            warn!(target: "Schedule", "Bus closed, dropping {path}");
                            return;
                        }
                        // Step past the firing second so the next round targets tomorrow.
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::{Arc, Mutex};

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn later_today_fires_today() {
        let nine = parse_time_of_day("9:00").unwrap();
        assert_eq!(next_occurrence(at(8, 0), nine), at(9, 0));
    }

    #[test]
    fn passed_time_fires_tomorrow() {
        let nine = parse_time_of_day("09:00").unwrap();
        let next = next_occurrence(at(9, 0), nine);
        assert_eq!(next, at(9, 0) + ChronoDuration::days(1));
        let next = next_occurrence(at(21, 30), nine);
        assert_eq!(next.date(), NaiveDate::from_ymd_opt(2026, 10, 20).unwrap());
    }

    #[test]
    fn rejects_bad_times() {
        assert!(parse_time_of_day("25:00").is_err());
        assert!(parse_time_of_day("noon").is_err());
        assert!(parse_time_of_day("07:15:30").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn recurring_timer_counts_up_until_closed() {
        let bus = EventBus::new(16);
        let counts = Arc::new(Mutex::new(Vec::new()));
        let sink = counts.clone();
        bus.subscribe("/timer/10s", move |event: &Event| {
            if let EventPayload::TimerTick { count } = event.payload {
                sink.lock().unwrap().push(count);
            }
            Ok(())
        });

        let handle = bus.add_recurring_timer(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(9)).await;
        bus.flush().await.unwrap();
        assert!(counts.lock().unwrap().is_empty(), "first tick is one interval out");

        tokio::time::sleep(Duration::from_secs(25)).await;
        bus.flush().await.unwrap();
        assert_eq!(*counts.lock().unwrap(), vec![1, 2, 3]);

        bus.close();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn daily_timing_publishes_on_its_path() {
        let label = (Local::now() + ChronoDuration::minutes(2))
            .format("%H:%M:%S")
            .to_string();
        let bus = EventBus::new(4);
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = fired.clone();
        bus.subscribe(timing_path(&label), move |event: &Event| {
            sink.lock().unwrap().push(event.payload.clone());
            Ok(())
        });

        let handle = bus.add_daily_timing(&label).unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        bus.flush().await.unwrap();
        assert!(fired.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(120)).await;
        bus.flush().await.unwrap();
        assert_eq!(
            *fired.lock().unwrap(),
            vec![EventPayload::TimingFire { time_of_day: label.clone() }]
        );

        bus.close();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn daily_timing_validates_input() {
        let bus = EventBus::new(4);
        assert!(bus.add_daily_timing("99:99").is_err());
        let handle = bus.add_daily_timing("9:00").unwrap();
        bus.close();
        handle.await.unwrap();
    }
}
