//! The persistent model of the control plane. Every piece of shared
//! mutable state in the crate lives here; workers never cache entity
//! state in memory. Reads hand out clones of committed rows, writes go
//! through the lock, and [`Store::with_transaction`] gives multi-entity
//! operations all-or-nothing semantics.
pub mod entities;
pub mod error;

use chrono::{DateTime, Utc};
use entities::{
    ConfigId, DataRouter, DataSource, EccServer, Experiment, Key, Measurement, MeasurementValue,
    Observable, RunMetadata, RunClass,
};
use error::StoreError;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The full table set. Cloneable so a transaction can work on a private
/// copy and swap it in on commit.
#[derive(Debug, Default, Clone)]
pub struct Tables {
    next_key: Key,
    pub experiments: BTreeMap<Key, Experiment>,
    pub ecc_servers: BTreeMap<Key, EccServer>,
    pub data_routers: BTreeMap<Key, DataRouter>,
    pub data_sources: BTreeMap<Key, DataSource>,
    pub config_ids: BTreeMap<Key, ConfigId>,
    pub runs: BTreeMap<Key, RunMetadata>,
    pub observables: BTreeMap<Key, Observable>,
    pub measurements: BTreeMap<Key, Measurement>,
}

impl Tables {
    fn allocate_key(&mut self) -> Key {
        self.next_key += 1;
        self.next_key
    }

    pub fn add_experiment(&mut self, mut row: Experiment) -> Result<Key, StoreError> {
        if self.experiments.values().any(|e| e.name == row.name) {
            return Err(StoreError::DuplicateName("Experiment", row.name));
        }
        let key = self.allocate_key();
        row.key = key;
        self.experiments.insert(key, row);
        Ok(key)
    }

    pub fn add_ecc_server(&mut self, mut row: EccServer) -> Result<Key, StoreError> {
        if self.ecc_servers.values().any(|e| e.name == row.name) {
            return Err(StoreError::DuplicateName("ECCServer", row.name));
        }
        let key = self.allocate_key();
        row.key = key;
        self.ecc_servers.insert(key, row);
        Ok(key)
    }

    pub fn add_data_router(&mut self, mut row: DataRouter) -> Result<Key, StoreError> {
        if self.data_routers.values().any(|r| r.name == row.name) {
            return Err(StoreError::DuplicateName("DataRouter", row.name));
        }
        let key = self.allocate_key();
        row.key = key;
        self.data_routers.insert(key, row);
        Ok(key)
    }

    pub fn add_data_source(&mut self, mut row: DataSource) -> Result<Key, StoreError> {
        if self.data_sources.values().any(|s| s.name == row.name) {
            return Err(StoreError::DuplicateName("DataSource", row.name));
        }
        // A router receives exactly one stream
        if let Some(router) = row.data_router {
            if self
                .data_sources
                .values()
                .any(|s| s.data_router == Some(router))
            {
                return Err(StoreError::DuplicateName("DataSource router link", row.name));
            }
        }
        let key = self.allocate_key();
        row.key = key;
        self.data_sources.insert(key, row);
        Ok(key)
    }

    pub fn add_observable(&mut self, mut row: Observable) -> Key {
        let key = self.allocate_key();
        row.key = key;
        self.observables.insert(key, row);
        key
    }

    /// Insert-or-update a config triple for an ECC server, stamping
    /// `last_fetched`. An existing row keeps its key so that
    /// `selected_config` references do not churn across refreshes.
    pub fn upsert_config(
        &mut self,
        describe: &str,
        prepare: &str,
        configure: &str,
        ecc_server: Key,
        fetched: DateTime<Utc>,
    ) -> Key {
        let existing = self
            .config_ids
            .values_mut()
            .find(|c| c.ecc_server == ecc_server && c.triple() == (describe, prepare, configure));
        if let Some(row) = existing {
            row.last_fetched = fetched;
            return row.key;
        }
        let key = self.allocate_key();
        let mut row = ConfigId::new(describe, prepare, configure, ecc_server);
        row.key = key;
        row.last_fetched = fetched;
        self.config_ids.insert(key, row);
        key
    }

    /// Delete every config of an ECC server last fetched strictly before
    /// the cutoff, clearing any selection that pointed at a swept row
    pub fn sweep_configs(&mut self, ecc_server: Key, cutoff: DateTime<Utc>) {
        let dead: Vec<Key> = self
            .config_ids
            .values()
            .filter(|c| c.ecc_server == ecc_server && c.last_fetched < cutoff)
            .map(|c| c.key)
            .collect();
        for key in dead {
            self.delete_config(key);
        }
    }

    pub fn delete_config(&mut self, key: Key) {
        self.config_ids.remove(&key);
        for ecc in self.ecc_servers.values_mut() {
            if ecc.selected_config == Some(key) {
                ecc.selected_config = None;
            }
        }
    }

    pub fn delete_ecc_server(&mut self, key: Key) {
        self.ecc_servers.remove(&key);
        let configs: Vec<Key> = self
            .config_ids
            .values()
            .filter(|c| c.ecc_server == key)
            .map(|c| c.key)
            .collect();
        for config in configs {
            self.config_ids.remove(&config);
        }
        for source in self.data_sources.values_mut() {
            if source.ecc_server == Some(key) {
                source.ecc_server = None;
            }
        }
    }

    pub fn delete_data_router(&mut self, key: Key) {
        self.data_routers.remove(&key);
        for source in self.data_sources.values_mut() {
            if source.data_router == Some(key) {
                source.data_router = None;
            }
        }
    }

    pub fn delete_experiment(&mut self, key: Key) {
        self.experiments.remove(&key);
        let eccs: Vec<Key> = self
            .ecc_servers
            .values()
            .filter(|e| e.experiment == key)
            .map(|e| e.key)
            .collect();
        for ecc in eccs {
            self.delete_ecc_server(ecc);
        }
        let routers: Vec<Key> = self
            .data_routers
            .values()
            .filter(|r| r.experiment == key)
            .map(|r| r.key)
            .collect();
        for router in routers {
            self.delete_data_router(router);
        }
        let runs: Vec<Key> = self
            .runs
            .values()
            .filter(|r| r.experiment == key)
            .map(|r| r.key)
            .collect();
        for run in &runs {
            self.runs.remove(run);
        }
        self.measurements.retain(|_, m| !runs.contains(&m.run));
        let observables: Vec<Key> = self
            .observables
            .values()
            .filter(|o| o.experiment == key)
            .map(|o| o.key)
            .collect();
        for obs in &observables {
            self.observables.remove(obs);
        }
        self.measurements
            .retain(|_, m| !observables.contains(&m.observable));
    }

    pub fn ecc_server(&self, key: Key) -> Result<&EccServer, StoreError> {
        self.ecc_servers
            .get(&key)
            .ok_or(StoreError::MissingEntity("ECCServer", key))
    }

    pub fn ecc_server_mut(&mut self, key: Key) -> Result<&mut EccServer, StoreError> {
        self.ecc_servers
            .get_mut(&key)
            .ok_or(StoreError::MissingEntity("ECCServer", key))
    }

    pub fn data_router(&self, key: Key) -> Result<&DataRouter, StoreError> {
        self.data_routers
            .get(&key)
            .ok_or(StoreError::MissingEntity("DataRouter", key))
    }

    pub fn experiment(&self, key: Key) -> Result<&Experiment, StoreError> {
        self.experiments
            .get(&key)
            .ok_or(StoreError::MissingEntity("Experiment", key))
    }

    /// The most recent run of an experiment, running or not
    pub fn latest_run(&self, experiment: Key) -> Option<&RunMetadata> {
        self.runs
            .values()
            .filter(|r| r.experiment == experiment)
            .max_by_key(|r| r.run_number)
    }

    pub fn is_running(&self, experiment: Key) -> bool {
        match self.latest_run(experiment) {
            Some(run) => run.stop_datetime.is_none(),
            None => false,
        }
    }

    pub fn next_run_number(&self, experiment: Key) -> i32 {
        match self.latest_run(experiment) {
            Some(run) => run.run_number + 1,
            None => 0,
        }
    }

    /// Open a new run with the next run number. The config snapshot is the
    /// set of distinct selected config names across the experiment's ECC
    /// servers at start time.
    pub fn start_run(&mut self, experiment: Key) -> Result<RunMetadata, StoreError> {
        self.experiment(experiment)?;
        if self.is_running(experiment) {
            return Err(StoreError::AlreadyRunning);
        }
        let mut config_names: Vec<String> = self
            .ecc_servers
            .values()
            .filter(|e| e.experiment == experiment)
            .filter_map(|e| e.selected_config)
            .filter_map(|c| self.config_ids.get(&c))
            .map(|c| c.to_string())
            .collect();
        config_names.sort();
        config_names.dedup();

        let key = self.allocate_key();
        let run = RunMetadata {
            key,
            experiment,
            run_number: self.next_run_number(experiment),
            start_datetime: Utc::now(),
            stop_datetime: None,
            title: String::new(),
            config_name: config_names.join(", "),
            run_class: RunClass::Testing,
        };
        self.runs.insert(key, run.clone());
        Ok(run)
    }

    /// Close the current run, stamping its stop time
    pub fn stop_run(&mut self, experiment: Key) -> Result<RunMetadata, StoreError> {
        self.experiment(experiment)?;
        if !self.is_running(experiment) {
            return Err(StoreError::NotRunning);
        }
        let key = self
            .latest_run(experiment)
            .map(|r| r.key)
            .ok_or(StoreError::NotRunning)?;
        let run = self
            .runs
            .get_mut(&key)
            .ok_or(StoreError::MissingEntity("RunMetadata", key))?;
        run.stop_datetime = Some(Utc::now());
        Ok(run.clone())
    }

    /// Record the value of an observable on a run, replacing any earlier
    /// value so at most one measurement exists per (observable, run)
    pub fn set_measurement(
        &mut self,
        observable: Key,
        run: Key,
        value: MeasurementValue,
    ) -> Result<Key, StoreError> {
        if !self.observables.contains_key(&observable) {
            return Err(StoreError::MissingEntity("Observable", observable));
        }
        if !self.runs.contains_key(&run) {
            return Err(StoreError::MissingEntity("RunMetadata", run));
        }
        let existing = self
            .measurements
            .values_mut()
            .find(|m| m.observable == observable && m.run == run);
        if let Some(row) = existing {
            row.value = value;
            return Ok(row.key);
        }
        let key = self.allocate_key();
        self.measurements.insert(
            key,
            Measurement {
                key,
                observable,
                run,
                value,
            },
        );
        Ok(key)
    }
}

/// Handle to the shared table set. Cheap to clone; all clones see the
/// same committed state.
#[derive(Debug, Clone, Default)]
pub struct Store {
    inner: Arc<RwLock<Tables>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a multi-entity operation atomically: the closure works on a
    /// private copy of the tables which replaces the committed state only
    /// if it returns Ok. On Err every write is discarded.
    pub fn with_transaction<T, E>(
        &self,
        f: impl FnOnce(&mut Tables) -> Result<T, E>,
    ) -> Result<T, E> {
        let mut guard = self.inner.write();
        let mut work = guard.clone();
        match f(&mut work) {
            Ok(value) => {
                *guard = work;
                Ok(value)
            }
            Err(e) => Err(e),
        }
    }

    pub fn add_experiment(&self, row: Experiment) -> Result<Key, StoreError> {
        self.inner.write().add_experiment(row)
    }

    pub fn add_ecc_server(&self, row: EccServer) -> Result<Key, StoreError> {
        self.inner.write().add_ecc_server(row)
    }

    pub fn add_data_router(&self, row: DataRouter) -> Result<Key, StoreError> {
        self.inner.write().add_data_router(row)
    }

    pub fn add_data_source(&self, row: DataSource) -> Result<Key, StoreError> {
        self.inner.write().add_data_source(row)
    }

    pub fn add_observable(&self, row: Observable) -> Key {
        self.inner.write().add_observable(row)
    }

    pub fn experiment(&self, key: Key) -> Result<Experiment, StoreError> {
        self.inner.read().experiment(key).cloned()
    }

    pub fn experiments(&self) -> Vec<Experiment> {
        self.inner.read().experiments.values().cloned().collect()
    }

    pub fn ecc_server(&self, key: Key) -> Result<EccServer, StoreError> {
        self.inner.read().ecc_server(key).cloned()
    }

    pub fn ecc_servers(&self) -> Vec<EccServer> {
        self.inner.read().ecc_servers.values().cloned().collect()
    }

    pub fn ecc_servers_of(&self, experiment: Key) -> Vec<EccServer> {
        self.inner
            .read()
            .ecc_servers
            .values()
            .filter(|e| e.experiment == experiment)
            .cloned()
            .collect()
    }

    pub fn data_router(&self, key: Key) -> Result<DataRouter, StoreError> {
        self.inner.read().data_router(key).cloned()
    }

    pub fn data_routers(&self) -> Vec<DataRouter> {
        self.inner.read().data_routers.values().cloned().collect()
    }

    pub fn data_routers_of(&self, experiment: Key) -> Vec<DataRouter> {
        self.inner
            .read()
            .data_routers
            .values()
            .filter(|r| r.experiment == experiment)
            .cloned()
            .collect()
    }

    pub fn data_source(&self, key: Key) -> Result<DataSource, StoreError> {
        self.inner
            .read()
            .data_sources
            .get(&key)
            .cloned()
            .ok_or(StoreError::MissingEntity("DataSource", key))
    }

    pub fn data_sources(&self) -> Vec<DataSource> {
        self.inner.read().data_sources.values().cloned().collect()
    }

    /// The sources whose streams this ECC server drives, read as a filter
    /// query every time rather than held as an owned collection
    pub fn sources_of_ecc(&self, ecc_server: Key) -> Vec<DataSource> {
        self.inner
            .read()
            .data_sources
            .values()
            .filter(|s| s.ecc_server == Some(ecc_server))
            .cloned()
            .collect()
    }

    pub fn config_id(&self, key: Key) -> Result<ConfigId, StoreError> {
        self.inner
            .read()
            .config_ids
            .get(&key)
            .cloned()
            .ok_or(StoreError::MissingEntity("ConfigId", key))
    }

    pub fn configs_of_ecc(&self, ecc_server: Key) -> Vec<ConfigId> {
        self.inner
            .read()
            .config_ids
            .values()
            .filter(|c| c.ecc_server == ecc_server)
            .cloned()
            .collect()
    }

    pub fn observables_of(&self, experiment: Key) -> Vec<Observable> {
        let mut rows: Vec<Observable> = self
            .inner
            .read()
            .observables
            .values()
            .filter(|o| o.experiment == experiment)
            .cloned()
            .collect();
        rows.sort_by_key(|o| o.ordinal);
        rows
    }

    pub fn measurements_of_run(&self, run: Key) -> Vec<Measurement> {
        self.inner
            .read()
            .measurements
            .values()
            .filter(|m| m.run == run)
            .cloned()
            .collect()
    }

    pub fn set_measurement(
        &self,
        observable: Key,
        run: Key,
        value: MeasurementValue,
    ) -> Result<Key, StoreError> {
        self.inner.write().set_measurement(observable, run, value)
    }

    pub fn update_ecc_server(
        &self,
        key: Key,
        f: impl FnOnce(&mut EccServer),
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write();
        let row = guard.ecc_server_mut(key)?;
        f(row);
        Ok(())
    }

    pub fn update_data_router(
        &self,
        key: Key,
        f: impl FnOnce(&mut DataRouter),
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write();
        let row = guard
            .data_routers
            .get_mut(&key)
            .ok_or(StoreError::MissingEntity("DataRouter", key))?;
        f(row);
        Ok(())
    }

    pub fn delete_experiment(&self, key: Key) {
        self.inner.write().delete_experiment(key)
    }

    pub fn delete_ecc_server(&self, key: Key) {
        self.inner.write().delete_ecc_server(key)
    }

    pub fn delete_data_router(&self, key: Key) {
        self.inner.write().delete_data_router(key)
    }

    pub fn delete_config(&self, key: Key) {
        self.inner.write().delete_config(key)
    }

    pub fn latest_run(&self, experiment: Key) -> Option<RunMetadata> {
        self.inner.read().latest_run(experiment).cloned()
    }

    pub fn is_running(&self, experiment: Key) -> bool {
        self.inner.read().is_running(experiment)
    }

    pub fn next_run_number(&self, experiment: Key) -> i32 {
        self.inner.read().next_run_number(experiment)
    }

    pub fn start_run(&self, experiment: Key) -> Result<RunMetadata, StoreError> {
        self.inner.write().start_run(experiment)
    }

    pub fn stop_run(&self, experiment: Key) -> Result<RunMetadata, StoreError> {
        self.inner.write().stop_run(experiment)
    }

    /// Throw away an experiment's sources, ECC servers and routers and
    /// recreate the given set, all inside one transaction. Used by the
    /// setup path to rebuild a farm in one step.
    pub fn replace_fleet(
        &self,
        experiment: Key,
        eccs: Vec<EccServer>,
        routers: Vec<DataRouter>,
        sources: Vec<(String, Option<usize>, Option<usize>)>,
    ) -> Result<(), StoreError> {
        self.with_transaction(|tables| {
            tables.experiment(experiment)?;
            let old_sources: Vec<Key> = tables
                .data_sources
                .values()
                .filter(|s| {
                    let ecc_owned = s
                        .ecc_server
                        .and_then(|k| tables.ecc_servers.get(&k))
                        .map(|e| e.experiment == experiment)
                        .unwrap_or(false);
                    let router_owned = s
                        .data_router
                        .and_then(|k| tables.data_routers.get(&k))
                        .map(|r| r.experiment == experiment)
                        .unwrap_or(false);
                    ecc_owned || router_owned
                })
                .map(|s| s.key)
                .collect();
            for key in old_sources {
                tables.data_sources.remove(&key);
            }
            let old_eccs: Vec<Key> = tables
                .ecc_servers
                .values()
                .filter(|e| e.experiment == experiment)
                .map(|e| e.key)
                .collect();
            for key in old_eccs {
                tables.delete_ecc_server(key);
            }
            let old_routers: Vec<Key> = tables
                .data_routers
                .values()
                .filter(|r| r.experiment == experiment)
                .map(|r| r.key)
                .collect();
            for key in old_routers {
                tables.delete_data_router(key);
            }

            let mut ecc_keys = Vec::with_capacity(eccs.len());
            for ecc in eccs {
                ecc_keys.push(tables.add_ecc_server(ecc)?);
            }
            let mut router_keys = Vec::with_capacity(routers.len());
            for router in routers {
                router_keys.push(tables.add_data_router(router)?);
            }
            for (name, ecc_idx, router_idx) in sources {
                let source = DataSource::new(
                    &name,
                    ecc_idx.and_then(|i| ecc_keys.get(i).copied()),
                    router_idx.and_then(|i| router_keys.get(i).copied()),
                );
                tables.add_data_source(source)?;
            }
            Ok(())
        })
    }
}
