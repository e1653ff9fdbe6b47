//! The fleet controller: one consistent view of the whole farm and the
//! fleet-wide commands the operator issues against it. Individual ECC
//! transitions are dispatched as tasks; the run lifecycle piggy-backs on
//! the transitions into and out of the Running state.
pub mod error;

use crate::store::entities::{EccServer, EccState, Key};
use crate::store::Store;
use crate::tasks::dispatcher::Submitter;
use crate::tasks::Task;
use error::FleetError;
use serde::Serialize;

/// A fleet-wide transition request: either a concrete state machine
/// state or the reset pseudo-target, which backs the whole farm up one
/// step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FleetTarget {
    Reset,
    State(EccState),
}

/// The common state of all ECC servers, or None when they disagree
pub fn overall_state(eccs: &[EccServer]) -> Option<EccState> {
    let first = eccs.first()?.state;
    eccs.iter().all(|e| e.state == first).then_some(first)
}

/// Display name of the overall state; "Mixed" when there is none
pub fn overall_state_name(eccs: &[EccServer]) -> String {
    match overall_state(eccs) {
        Some(state) => state.to_string(),
        None => String::from("Mixed"),
    }
}

/// Per-ECC entry of the status payload handed to the request layer
#[derive(Debug, Clone, Serialize)]
pub struct EccStatusEntry {
    pub pk: Key,
    pub name: String,
    pub state: i32,
    pub state_name: String,
    pub transitioning: bool,
    pub online: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouterStatusEntry {
    pub pk: Key,
    pub name: String,
    pub online: bool,
    pub staging_clean: bool,
}

/// Everything the status page needs in one read
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub overall_state: Option<i32>,
    pub overall_state_name: String,
    pub ecc_servers: Vec<EccStatusEntry>,
    pub data_routers: Vec<RouterStatusEntry>,
    pub run_number: Option<i32>,
    pub start_time: Option<String>,
    pub run_duration: Option<String>,
}

impl StatusSnapshot {
    /// The JSON body the request layer ships to the status page
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

pub struct FleetController {
    store: Store,
    submitter: Submitter,
}

impl FleetController {
    pub fn new(store: Store, submitter: Submitter) -> Self {
        Self { store, submitter }
    }

    /// Drive every ECC server of an experiment toward a target state.
    ///
    /// The reset pseudo-target resolves to one step back from the common
    /// state and is refused outright on a mixed fleet. A transition into
    /// Running requires every data router to have a clean staging
    /// directory and opens a new run; a transition to Ready while a run
    /// is on closes the run and fans out file organization across the
    /// routers. Per-ECC submission failures are logged and skipped, never
    /// raised.
    pub fn change_state_all(
        &self,
        experiment: Key,
        target: FleetTarget,
    ) -> Result<EccState, FleetError> {
        let eccs = self.store.ecc_servers_of(experiment);
        let overall = overall_state(&eccs);
        let target = match target {
            FleetTarget::Reset => match overall {
                Some(state) => state.step_back(),
                None => return Err(FleetError::InconsistentFleet),
            },
            FleetTarget::State(state) => state,
        };

        if target == EccState::Running {
            let dirty: Vec<String> = self
                .store
                .data_routers_of(experiment)
                .into_iter()
                .filter(|r| !r.staging_directory_is_clean)
                .map(|r| r.name)
                .collect();
            if !dirty.is_empty() {
                return Err(FleetError::PrerequisiteFailed(format!(
                    "Data routers are not ready to start: {}",
                    dirty.join(", ")
                )));
            }
        }

        for ecc in &eccs {
            if let Err(e) = self
                .store
                .update_ecc_server(ecc.key, |e| e.is_transitioning = true)
            {
                tracing::error!("Could not mark {} as transitioning: {}", ecc.name, e);
                continue;
            }
            self.submitter.submit(Task::EccServerChangeState {
                ecc: ecc.key,
                target,
            });
        }

        if target == EccState::Running && !self.store.is_running(experiment) {
            self.store.start_run(experiment)?;
        }
        if target == EccState::Ready && self.store.is_running(experiment) {
            let run = self.store.stop_run(experiment)?;
            let experiment_name = self.store.experiment(experiment)?.name;
            for router in self.store.data_routers_of(experiment) {
                self.submitter.submit(Task::OrganizeFiles {
                    router: router.key,
                    experiment: experiment_name.clone(),
                    run_number: run.run_number,
                });
            }
        }

        Ok(target)
    }

    /// One committed read of everything the status page shows
    pub fn status_snapshot(&self, experiment: Key) -> Result<StatusSnapshot, FleetError> {
        let eccs = self.store.ecc_servers_of(experiment);
        let routers = self.store.data_routers_of(experiment);
        let current_run = self.store.latest_run(experiment);

        let (run_number, start_time, run_duration) = match &current_run {
            Some(run) => (
                Some(run.run_number),
                Some(run.start_datetime.format("%b %d %Y, %H:%M:%S").to_string()),
                Some(run.duration_string()),
            ),
            None => (None, None, None),
        };

        Ok(StatusSnapshot {
            overall_state: overall_state(&eccs).map(i32::from),
            overall_state_name: overall_state_name(&eccs),
            ecc_servers: eccs
                .into_iter()
                .map(|e| EccStatusEntry {
                    pk: e.key,
                    name: e.name.clone(),
                    state: e.state.into(),
                    state_name: e.state.to_string(),
                    transitioning: e.is_transitioning,
                    online: e.is_online,
                })
                .collect(),
            data_routers: routers
                .into_iter()
                .map(|r| RouterStatusEntry {
                    pk: r.key,
                    name: r.name,
                    online: r.is_online,
                    staging_clean: r.staging_directory_is_clean,
                })
                .collect(),
            run_number,
            start_time,
            run_duration,
        })
    }
}
