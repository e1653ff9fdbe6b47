//! The periodic scheduler. Three loops feed the dispatcher with the
//! fleet-wide refresh tasks on fixed intervals; a tick whose task is
//! still in flight is suppressed, and a full queue drops the tick with a
//! warning. No other backpressure.
use crate::tasks::dispatcher::Submitter;
use crate::tasks::Task;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Seconds between scheduled submissions of each fleet-wide task. Every
/// interval must exceed the hard time limit of its task so one
/// submission cannot still be running when the next fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollerIntervals {
    pub refresh_state_sec: u64,
    pub ecc_online_sec: u64,
    pub router_status_sec: u64,
}

impl Default for PollerIntervals {
    fn default() -> Self {
        Self {
            refresh_state_sec: 15,
            ecc_online_sec: 90,
            router_status_sec: 90,
        }
    }
}

impl PollerIntervals {
    /// Bump any interval that does not clear its task's hard limit,
    /// with a warning
    pub fn normalized(self) -> Self {
        Self {
            refresh_state_sec: at_least_hard(self.refresh_state_sec, &Task::EccServerRefreshAll),
            ecc_online_sec: at_least_hard(self.ecc_online_sec, &Task::CheckEccServerOnlineAll),
            router_status_sec: at_least_hard(self.router_status_sec, &Task::CheckDataRouterStatusAll),
        }
    }
}

fn at_least_hard(interval_sec: u64, task: &Task) -> u64 {
    let hard = task.limits().hard.as_secs();
    if interval_sec > hard {
        interval_sec
    } else {
        let bumped = hard + 5;
        tracing::warn!(
            "Interval of {}s for {} is inside its hard limit of {}s, using {}s",
            interval_sec,
            task.name(),
            hard,
            bumped
        );
        bumped
    }
}

pub struct Poller {
    loops: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Poller {
    pub fn start(intervals: PollerIntervals, submitter: Submitter) -> Self {
        let intervals = intervals.normalized();
        let cancel = CancellationToken::new();
        let loops = vec![
            tokio::spawn(tick_loop(
                Duration::from_secs(intervals.refresh_state_sec),
                submitter.clone(),
                cancel.clone(),
                || Task::EccServerRefreshAll,
            )),
            tokio::spawn(tick_loop(
                Duration::from_secs(intervals.ecc_online_sec),
                submitter.clone(),
                cancel.clone(),
                || Task::CheckEccServerOnlineAll,
            )),
            tokio::spawn(tick_loop(
                Duration::from_secs(intervals.router_status_sec),
                submitter,
                cancel.clone(),
                || Task::CheckDataRouterStatusAll,
            )),
        ];
        Self { loops, cancel }
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.loops {
            let _ = handle.await;
        }
    }
}

async fn tick_loop(
    period: Duration,
    submitter: Submitter,
    cancel: CancellationToken,
    make: impl Fn() -> Task,
) {
    let mut timer = tokio::time::interval(period);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = timer.tick() => {
                submitter.submit_scheduled(make());
            }
        }
    }
}
