//! The bodies of the named tasks. Shared contract: the target entity is
//! looked up by key and a miss is logged, not raised, so a stale task
//! from before a delete finishes quietly; every network call is guarded
//! against the soft-deadline signal; fan-out tasks enqueue their
//! children and return without waiting on them.
use super::dispatcher::TaskContext;
use super::error::TaskError;
use super::Task;
use crate::ecc::controller;
use crate::remote::worker::WorkerInterface;
use crate::store::entities::{DataRouter, EccServer, EccState, Key};

pub async fn execute(task: Task, ctx: TaskContext) -> Result<(), TaskError> {
    match task {
        Task::EccServerRefreshState { ecc } => refresh_state(&ctx, ecc).await,
        Task::EccServerRefreshAll => refresh_all(&ctx),
        Task::EccServerChangeState { ecc, target } => change_state(&ctx, ecc, target).await,
        Task::CheckEccServerOnline { ecc } => check_ecc_online(&ctx, ecc).await,
        Task::CheckEccServerOnlineAll => check_ecc_online_all(&ctx),
        Task::CheckDataRouterStatus { router } => check_router_status(&ctx, router).await,
        Task::CheckDataRouterStatusAll => check_router_status_all(&ctx),
        Task::OrganizeFiles {
            router,
            experiment,
            run_number,
        } => organize_files(&ctx, router, &experiment, run_number).await,
        Task::OrganizeFilesAll {
            experiment,
            run_number,
        } => organize_files_all(&ctx, &experiment, run_number),
    }
}

fn lookup_ecc(ctx: &TaskContext, key: Key) -> Option<EccServer> {
    match ctx.store.ecc_server(key) {
        Ok(row) => Some(row),
        Err(e) => {
            ctx.log.error(format!("Skipping task: {e}"));
            None
        }
    }
}

fn lookup_router(ctx: &TaskContext, key: Key) -> Option<DataRouter> {
    match ctx.store.data_router(key) {
        Ok(row) => Some(row),
        Err(e) => {
            ctx.log.error(format!("Skipping task: {e}"));
            None
        }
    }
}

async fn close_quietly(ctx: &TaskContext, worker: WorkerInterface) {
    if let Err(e) = worker.close().await {
        ctx.log.warning(format!("Failed closing an SSH session: {e}"));
    }
}

async fn refresh_state(ctx: &TaskContext, key: Key) -> Result<(), TaskError> {
    const NAME: &str = "eccserver_refresh_state";
    let Some(ecc) = lookup_ecc(ctx, key) else {
        return Ok(());
    };
    let client = ctx.clients.client(&ecc.ecc_url())?;
    ctx.guard(
        NAME,
        controller::refresh_state(&ctx.store, client.as_ref(), key),
    )
    .await?;
    Ok(())
}

fn refresh_all(ctx: &TaskContext) -> Result<(), TaskError> {
    for ecc in ctx.store.ecc_servers() {
        ctx.submitter.submit(Task::EccServerRefreshState { ecc: ecc.key });
    }
    Ok(())
}

async fn change_state(ctx: &TaskContext, key: Key, target: EccState) -> Result<(), TaskError> {
    const NAME: &str = "eccserver_change_state";
    let Some(ecc) = lookup_ecc(ctx, key) else {
        return Ok(());
    };
    let client = ctx.clients.client(&ecc.ecc_url())?;
    ctx.guard(
        NAME,
        controller::change_state(&ctx.store, client.as_ref(), key, target),
    )
    .await?;
    Ok(())
}

async fn check_ecc_online(ctx: &TaskContext, key: Key) -> Result<(), TaskError> {
    const NAME: &str = "check_ecc_server_online";
    let Some(ecc) = lookup_ecc(ctx, key) else {
        return Ok(());
    };
    let shell = ctx.guard(NAME, ctx.shells.connect(&ecc.ip_address)).await?;
    let worker = WorkerInterface::new(shell);
    let online = ctx.guard(NAME, worker.check_ecc_server_status()).await;
    close_quietly(ctx, worker).await;
    let online = online?;
    ctx.store.update_ecc_server(key, |e| e.is_online = online)?;
    Ok(())
}

fn check_ecc_online_all(ctx: &TaskContext) -> Result<(), TaskError> {
    for ecc in ctx.store.ecc_servers() {
        ctx.submitter.submit(Task::CheckEccServerOnline { ecc: ecc.key });
    }
    Ok(())
}

async fn check_router_status(ctx: &TaskContext, key: Key) -> Result<(), TaskError> {
    const NAME: &str = "check_data_router_status";
    let Some(router) = lookup_router(ctx, key) else {
        return Ok(());
    };
    let shell = ctx.guard(NAME, ctx.shells.connect(&router.ip_address)).await?;
    let worker = WorkerInterface::new(shell);
    let online = ctx.guard(NAME, worker.check_data_router_status()).await;
    // Only a live router has a working directory worth inspecting
    let clean = match &online {
        Ok(true) => Some(ctx.guard(NAME, worker.working_dir_is_clean()).await),
        _ => None,
    };
    close_quietly(ctx, worker).await;
    let online = online?;
    ctx.store.update_data_router(key, |r| r.is_online = online)?;
    if let Some(clean) = clean {
        let clean = clean?;
        ctx.store
            .update_data_router(key, |r| r.staging_directory_is_clean = clean)?;
    }
    Ok(())
}

fn check_router_status_all(ctx: &TaskContext) -> Result<(), TaskError> {
    for router in ctx.store.data_routers() {
        ctx.submitter.submit(Task::CheckDataRouterStatus { router: router.key });
    }
    Ok(())
}

async fn organize_files(
    ctx: &TaskContext,
    key: Key,
    experiment: &str,
    run_number: i32,
) -> Result<(), TaskError> {
    const NAME: &str = "organize_files";
    let Some(router) = lookup_router(ctx, key) else {
        return Ok(());
    };
    let shell = ctx.guard(NAME, ctx.shells.connect(&router.ip_address)).await?;
    let worker = WorkerInterface::new(shell);
    let moved = ctx
        .guard(NAME, worker.organize_files(experiment, run_number))
        .await;
    close_quietly(ctx, worker).await;
    moved?;
    ctx.store
        .update_data_router(key, |r| r.staging_directory_is_clean = true)?;
    Ok(())
}

fn organize_files_all(ctx: &TaskContext, experiment: &str, run_number: i32) -> Result<(), TaskError> {
    for router in ctx.store.data_routers() {
        ctx.submitter.submit(Task::OrganizeFiles {
            router: router.key,
            experiment: experiment.to_string(),
            run_number,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecc::testing::{FakeCall, FakeClientFactory, FakeEccClient};
    use crate::remote::testing::{ScriptedShell, ScriptedShellFactory};
    use crate::store::entities::{DataSource, Experiment};
    use crate::store::error::StoreError;
    use crate::store::Store;
    use crate::tasks::dispatcher::Submitter;
    use crate::tasks::CapturingLog;
    use chrono::Utc;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct Fixture {
        store: Store,
        experiment: Key,
        client: Arc<FakeEccClient>,
        shell: Arc<ScriptedShell>,
        shells: Arc<ScriptedShellFactory>,
        log: Arc<CapturingLog>,
        ctx: TaskContext,
        rx: mpsc::Receiver<Task>,
    }

    fn fixture() -> Fixture {
        let store = Store::new();
        let experiment = store
            .add_experiment(Experiment::new("e20001", "operator"))
            .unwrap();
        let client = Arc::new(FakeEccClient::default());
        let shell = ScriptedShell::new();
        let shells = ScriptedShellFactory::wrapping(shell.clone());
        let log = CapturingLog::new();
        let (tx, rx) = mpsc::channel(32);
        let ctx = TaskContext::new(
            store.clone(),
            FakeClientFactory::wrapping(client.clone()),
            shells.clone(),
            Submitter::new(tx, log.clone()),
            log.clone(),
        );
        Fixture {
            store,
            experiment,
            client,
            shell,
            shells,
            log,
            ctx,
            rx,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<Task>) -> Vec<Task> {
        let mut tasks = Vec::new();
        while let Ok(task) = rx.try_recv() {
            tasks.push(task);
        }
        tasks
    }

    #[tokio::test]
    async fn a_missing_entity_is_logged_and_the_task_returns_normally() {
        let f = fixture();
        execute(Task::EccServerRefreshState { ecc: 999 }, f.ctx.clone())
            .await
            .unwrap();
        assert_eq!(f.log.matching("ECCServer with key 999"), 1);

        execute(
            Task::OrganizeFiles {
                router: 998,
                experiment: String::from("e20001"),
                run_number: 0,
            },
            f.ctx.clone(),
        )
        .await
        .unwrap();
        assert_eq!(f.log.matching("DataRouter with key 998"), 1);
    }

    #[tokio::test]
    async fn refresh_all_submits_one_child_per_ecc_server() {
        let mut f = fixture();
        let mut keys = Vec::new();
        for i in 0..10 {
            keys.push(
                f.store
                    .add_ecc_server(EccServer::new(&format!("ecc{i}"), "10.0.0.1", f.experiment))
                    .unwrap(),
            );
        }
        execute(Task::EccServerRefreshAll, f.ctx.clone()).await.unwrap();
        let children = drain(&mut f.rx);
        assert_eq!(children.len(), 10);
        for key in &keys {
            assert!(children.contains(&Task::EccServerRefreshState { ecc: *key }));
        }

        execute(Task::CheckEccServerOnlineAll, f.ctx.clone()).await.unwrap();
        let children = drain(&mut f.rx);
        assert_eq!(children.len(), 10);
        for key in &keys {
            assert!(children.contains(&Task::CheckEccServerOnline { ecc: *key }));
        }
    }

    #[tokio::test]
    async fn router_fan_outs_carry_their_arguments() {
        let mut f = fixture();
        let mut keys = Vec::new();
        for i in 0..4 {
            keys.push(
                f.store
                    .add_data_router(DataRouter::new(&format!("dr{i}"), "10.0.0.1", f.experiment))
                    .unwrap(),
            );
        }
        execute(
            Task::OrganizeFilesAll {
                experiment: String::from("e20001"),
                run_number: 7,
            },
            f.ctx.clone(),
        )
        .await
        .unwrap();
        let children = drain(&mut f.rx);
        assert_eq!(children.len(), 4);
        for key in keys {
            assert!(children.contains(&Task::OrganizeFiles {
                router: key,
                experiment: String::from("e20001"),
                run_number: 7,
            }));
        }

        execute(Task::CheckDataRouterStatusAll, f.ctx.clone()).await.unwrap();
        assert_eq!(drain(&mut f.rx).len(), 4);
    }

    #[tokio::test]
    async fn check_ecc_online_connects_to_the_server_host_and_writes_the_flag() {
        let f = fixture();
        let ecc = f
            .store
            .add_ecc_server(EccServer::new("ecc0", "10.0.0.40", f.experiment))
            .unwrap();
        f.shell
            .on("ps", " 50 ?? 0:01.00 /opt/get/getEccSoapServer --config foo\n");
        execute(Task::CheckEccServerOnline { ecc }, f.ctx.clone())
            .await
            .unwrap();
        assert!(f.store.ecc_server(ecc).unwrap().is_online);
        assert_eq!(*f.shells.hosts.lock(), vec![String::from("10.0.0.40")]);
        assert!(f.shell.was_closed());
    }

    #[tokio::test]
    async fn check_router_status_refreshes_online_and_clean_flags() {
        let f = fixture();
        let router = f
            .store
            .add_data_router(DataRouter::new("dr0", "10.0.0.41", f.experiment))
            .unwrap();
        f.store
            .update_data_router(router, |r| {
                r.is_online = false;
                r.staging_directory_is_clean = false;
            })
            .unwrap();
        f.shell
            .on("ps", " 51 ?? 0:09.00 /opt/get/dataRouter 10.0.0.41 46005 TCP\n")
            .on("lsof", "p51\ncdataRouter\nn/data/staging\n")
            .on("ls -1", "");
        execute(Task::CheckDataRouterStatus { router }, f.ctx.clone())
            .await
            .unwrap();
        let row = f.store.data_router(router).unwrap();
        assert!(row.is_online);
        assert!(row.staging_directory_is_clean);
    }

    #[tokio::test]
    async fn an_offline_router_skips_the_staging_directory_check() {
        let f = fixture();
        let router = f
            .store
            .add_data_router(DataRouter::new("dr0", "10.0.0.41", f.experiment))
            .unwrap();
        f.store
            .update_data_router(router, |r| r.staging_directory_is_clean = false)
            .unwrap();
        f.shell.on("ps", " 1 ?? 0:00.01 /sbin/launchd\n");
        execute(Task::CheckDataRouterStatus { router }, f.ctx.clone())
            .await
            .unwrap();
        let row = f.store.data_router(router).unwrap();
        assert!(!row.is_online);
        assert!(!row.staging_directory_is_clean);
        let commands = f.shell.commands.lock();
        assert!(!commands.iter().any(|c| c.starts_with("lsof")));
    }

    #[tokio::test]
    async fn organize_files_moves_and_marks_the_router_clean() {
        let f = fixture();
        let router = f
            .store
            .add_data_router(DataRouter::new("dr0", "10.0.0.41", f.experiment))
            .unwrap();
        f.store
            .update_data_router(router, |r| r.staging_directory_is_clean = false)
            .unwrap();
        f.shell
            .on("lsof", "p51\ncdataRouter\nn/data/staging\n")
            .on("ls -1", "/data/staging/run7_0.graw\n");
        execute(
            Task::OrganizeFiles {
                router,
                experiment: String::from("e20001"),
                run_number: 7,
            },
            f.ctx.clone(),
        )
        .await
        .unwrap();
        assert!(f.store.data_router(router).unwrap().staging_directory_is_clean);
        let commands = f.shell.commands.lock();
        assert!(commands
            .iter()
            .any(|c| c == "mkdir -p /data/staging/e20001/run_0007"));
        assert!(commands
            .iter()
            .any(|c| c == "mv /data/staging/run7_0.graw /data/staging/e20001/run_0007"));
        assert!(f.shell.was_closed());
    }

    #[tokio::test]
    async fn change_state_task_drives_the_soap_transition() {
        let f = fixture();
        let ecc = f
            .store
            .add_ecc_server(EccServer::new("ecc0", "10.0.0.60", f.experiment))
            .unwrap();
        let config = f
            .store
            .with_transaction(|t| {
                Ok::<Key, StoreError>(t.upsert_config("d", "p", "c", ecc, Utc::now()))
            })
            .unwrap();
        f.store
            .update_ecc_server(ecc, |e| e.selected_config = Some(config))
            .unwrap();
        let router = f
            .store
            .add_data_router(DataRouter::new("dr0", "10.0.0.61", f.experiment))
            .unwrap();
        f.store
            .add_data_source(DataSource::new("CoBo[0]", Some(ecc), Some(router)))
            .unwrap();

        execute(
            Task::EccServerChangeState {
                ecc,
                target: EccState::Described,
            },
            f.ctx.clone(),
        )
        .await
        .unwrap();

        assert!(f.store.ecc_server(ecc).unwrap().is_transitioning);
        let calls = f.client.calls.lock();
        assert!(matches!(calls[0], FakeCall::Transition { .. }));
    }
}
