//! Background polling task.
//!
//! `Stopped -> Running` on [`Scheduler::start`], `Running -> Stopped` on
//! [`Scheduler::stop`]. While running, one pass runs immediately and then
//! once per interval. Stopping only prevents future passes; a pass already
//! in flight runs to completion.

use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::updater::Ingestor;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub interval_ms: u64,
}

struct Running {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct State {
    running: Option<Running>,
    /// Tasks told to stop that may still be finishing a pass
    stopping: Vec<JoinHandle<()>>,
}

pub struct Scheduler {
    ingestor: Ingestor,
    interval: Duration,
    state: Mutex<State>,
}

impl Scheduler {
    /// A zero `interval` is raised to one millisecond.
    pub fn new(ingestor: Ingestor, interval: Duration) -> Self {
        Self {
            ingestor,
            interval: interval.max(Duration::from_millis(1)),
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the polling task. No-op if already running.
    pub fn start(&self) {
        let mut state = self.lock();
        if state.running.is_some() {
            tracing::info!("Feed update scheduler is already running");
            return;
        }

        tracing::info!(interval_secs = self.interval.as_secs(), "Starting feed update scheduler");
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(poll_loop(self.ingestor.clone(), self.interval, stop_rx));
        state.stopping.retain(|h| !h.is_finished());
        state.running = Some(Running { stop_tx, handle });
    }

    /// Signal the polling task to stop. No-op if not running.
    pub fn stop(&self) {
        let mut state = self.lock();
        let Some(running) = state.running.take() else {
            tracing::info!("Feed update scheduler is not running");
            return;
        };

        tracing::info!("Stopping feed update scheduler");
        // Err means the task already exited
        let _ = running.stop_tx.send(true);
        state.stopping.push(running.handle);
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.lock().running.is_some(),
            interval_ms: u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Stop, then wait for any in-flight pass to finish.
    pub async fn shutdown(&self) {
        if self.lock().running.is_some() {
            self.stop();
        }
        let handles = std::mem::take(&mut self.lock().stopping);
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Feed update task panicked");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(running) = self.lock().running.take() {
            let _ = running.stop_tx.send(true);
        }
    }
}

async fn poll_loop(ingestor: Ingestor, interval: Duration, mut stop_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        // The first tick completes immediately
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop_rx.changed() => break,
        }
        if *stop_rx.borrow() {
            break;
        }

        if let Err(e) = ingestor.run_pass().await {
            tracing::error!(error = %e, "Feed update pass failed");
        }
    }

    tracing::debug!("Feed update task exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedClient, FeedClientOptions};
    use crate::storage::{Database, NewFeed};
    use crate::util::HostPolicy;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn scheduler(interval: Duration) -> (Scheduler, Database) {
        let db = Database::open(":memory:").await.unwrap();
        let client = FeedClient::new(FeedClientOptions {
            host_policy: HostPolicy::AllowPrivate,
            ..FeedClientOptions::default()
        })
        .unwrap();
        let ingestor = Ingestor::new(db.clone(), client).with_inter_feed_delay(Duration::ZERO);
        (Scheduler::new(ingestor, interval), db)
    }

    #[tokio::test]
    async fn test_start_stop_transitions() {
        let (scheduler, _) = scheduler(DEFAULT_POLL_INTERVAL).await;
        assert_eq!(
            scheduler.status(),
            SchedulerStatus {
                running: false,
                interval_ms: 30 * 60 * 1000
            }
        );

        scheduler.start();
        assert!(scheduler.status().running);

        // second start is a no-op
        scheduler.start();
        assert!(scheduler.status().running);

        scheduler.stop();
        assert!(!scheduler.status().running);

        // second stop is a no-op
        scheduler.stop();
        assert!(!scheduler.status().running);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let (scheduler, _) = scheduler(DEFAULT_POLL_INTERVAL).await;
        scheduler.start();
        scheduler.stop();
        scheduler.start();
        assert!(scheduler.status().running);
        scheduler.shutdown().await;
        assert!(!scheduler.status().running);
    }

    #[tokio::test]
    async fn test_runs_pass_immediately_and_repeats() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/rss+xml")
                    .set_body_string("<rss><channel><title>T</title></channel></rss>"),
            )
            .mount(&server)
            .await;

        let (scheduler, db) = scheduler(Duration::from_millis(100)).await;
        db.create_feed(NewFeed {
            url: format!("{}/feed.xml", server.uri()),
            title: "T".to_owned(),
            description: String::new(),
            link: String::new(),
        })
        .await
        .unwrap();

        scheduler.start();

        let mut polls = 0;
        for _ in 0..50 {
            polls = server.received_requests().await.map_or(0, |r| r.len());
            if polls >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        scheduler.shutdown().await;

        assert!(polls >= 2, "expected repeated passes, saw {polls}");
        let feeds = db.list_feeds().await.unwrap();
        assert!(feeds[0].last_fetched.is_some());
    }

    #[tokio::test]
    async fn test_stopped_scheduler_runs_no_further_passes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/rss+xml")
                    .set_body_string("<rss><channel><title>T</title></channel></rss>"),
            )
            .mount(&server)
            .await;

        let (scheduler, db) = scheduler(Duration::from_millis(50)).await;
        db.create_feed(NewFeed {
            url: format!("{}/feed.xml", server.uri()),
            title: "T".to_owned(),
            description: String::new(),
            link: String::new(),
        })
        .await
        .unwrap();

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(120)).await;
        scheduler.shutdown().await;

        let after_shutdown = server.received_requests().await.map_or(0, |r| r.len());
        tokio::time::sleep(Duration::from_millis(200)).await;
        let later = server.received_requests().await.map_or(0, |r| r.len());
        assert_eq!(after_shutdown, later);
    }
}
