//! The store-backed ECC operations: refreshing remote state, refreshing
//! the config list, and requesting a one-step transition. Each takes the
//! client for the server's endpoint; the task layer builds that client
//! from the row's URL through the [`EccClientFactory`](super::client::EccClientFactory).
use super::client::{EccClient, EccStatusResponse};
use super::error::EccError;
use super::operation::compute_transition;
use super::xml::{self, DataLink};
use crate::store::entities::{EccServer, EccState, Key};
use crate::store::error::StoreError;
use crate::store::Store;
use chrono::Utc;

/// Ask the remote for its state machine position and write the answer
/// into the store. A non-zero transition number means the machine is
/// between states.
pub async fn refresh_state(
    store: &Store,
    client: &dyn EccClient,
    ecc_key: Key,
) -> Result<EccStatusResponse, EccError> {
    let reply = client.get_state().await?;
    if reply.error_code != 0 {
        return Err(EccError::Remote(reply.error_message));
    }
    let state = EccState::try_from(reply.state)?;
    let transitioning = reply.transition != 0;
    store.update_ecc_server(ecc_key, |ecc| {
        ecc.state = state;
        ecc.is_transitioning = transitioning;
    })?;
    Ok(reply)
}

/// Fetch the config list from the remote and reconcile the store with it:
/// every triple in the reply is upserted with a fresh fetch stamp, then
/// everything older than the stamp is swept. An unchanged triple keeps
/// its row key so selections pointing at it survive the refresh.
pub async fn refresh_configs(
    store: &Store,
    client: &dyn EccClient,
    ecc_key: Key,
) -> Result<usize, EccError> {
    let reply = client.get_config_ids().await?;
    if reply.error_code != 0 {
        return Err(EccError::Remote(reply.error_message));
    }
    let triples = xml::config_id_list_from_xml(&reply.text)?;
    let fetched = Utc::now();
    store.with_transaction(|tables| {
        tables.ecc_server(ecc_key)?;
        for (describe, prepare, configure) in &triples {
            tables.upsert_config(describe, prepare, configure, ecc_key, fetched);
        }
        tables.sweep_configs(ecc_key, fetched);
        Ok::<(), StoreError>(())
    })?;
    Ok(triples.len())
}

/// Ask the remote to take one step toward `target`. On success the row is
/// marked transitioning and its state is left alone; the next refresh
/// reconciles it. On a remote error the flag is cleared and the message
/// surfaced.
pub async fn change_state(
    store: &Store,
    client: &dyn EccClient,
    ecc_key: Key,
    target: EccState,
) -> Result<(), EccError> {
    let ecc = store.ecc_server(ecc_key)?;
    let config_key = ecc
        .selected_config
        .ok_or_else(|| EccError::NoConfigSelected(ecc.name.clone()))?;
    let config = store.config_id(config_key)?;
    let config_xml = xml::config_id_to_xml(&config.describe, &config.prepare, &config.configure);
    let datalink_xml = xml::data_link_set_to_xml(&data_links_of(store, &ecc)?);
    let op = compute_transition(ecc.state, target)?;

    let reply = client.transition(op, &config_xml, &datalink_xml).await?;
    if reply.error_code != 0 {
        store.update_ecc_server(ecc_key, |ecc| ecc.is_transitioning = false)?;
        return Err(EccError::Remote(reply.error_message));
    }
    store.update_ecc_server(ecc_key, |ecc| ecc.is_transitioning = true)?;
    Ok(())
}

/// The link table for one ECC server: one entry per data source it
/// drives. Every source must have a router to stream to.
fn data_links_of(store: &Store, ecc: &EccServer) -> Result<Vec<DataLink>, EccError> {
    let mut links = Vec::new();
    for source in store.sources_of_ecc(ecc.key) {
        let router_key = source
            .data_router
            .ok_or_else(|| EccError::NoDataRouter(source.name.clone()))?;
        let router = store.data_router(router_key)?;
        links.push(DataLink::new(&source, &router));
    }
    Ok(links)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecc::operation::EccOperation;
    use crate::ecc::testing::{FakeCall, FakeEccClient};
    use crate::ecc::xml::config_id_to_xml;
    use crate::store::entities::*;
    use std::sync::Arc;

    fn fixture() -> (Store, Key, Key) {
        let store = Store::new();
        let exp = store
            .add_experiment(Experiment::new("e20001", "operator"))
            .unwrap();
        let ecc = store
            .add_ecc_server(EccServer::new("ecc0", "10.0.0.9", exp))
            .unwrap();
        (store, exp, ecc)
    }

    fn select_config(store: &Store, ecc: Key, d: &str, p: &str, c: &str) -> Key {
        let key = store
            .with_transaction(|t| Ok::<Key, StoreError>(t.upsert_config(d, p, c, ecc, Utc::now())))
            .unwrap();
        store
            .update_ecc_server(ecc, |e| e.selected_config = Some(key))
            .unwrap();
        key
    }

    #[tokio::test]
    async fn refresh_state_writes_every_state_and_transition_combination() {
        let (store, _, ecc) = fixture();
        for wire_state in 1..=5 {
            for transition in [0, 7] {
                let client = FakeEccClient::with_status(wire_state, transition);
                refresh_state(&store, client.as_ref(), ecc).await.unwrap();
                let row = store.ecc_server(ecc).unwrap();
                assert_eq!(i32::from(row.state), wire_state);
                // Transition != 0 means a transition is in flight
                assert_eq!(row.is_transitioning, transition != 0);
            }
        }
    }

    #[tokio::test]
    async fn refresh_state_surfaces_remote_errors_without_writing() {
        let (store, _, ecc) = fixture();
        store
            .update_ecc_server(ecc, |e| e.state = EccState::Ready)
            .unwrap();
        let client = FakeEccClient::with_status(1, 0);
        client.status.lock().error_code = 3;
        client.status.lock().error_message = String::from("CoBo dropped out");
        let err = refresh_state(&store, client.as_ref(), ecc)
            .await
            .unwrap_err();
        match err {
            EccError::Remote(msg) => assert_eq!(msg, "CoBo dropped out"),
            other => panic!("expected Remote, got {other:?}"),
        }
        assert_eq!(store.ecc_server(ecc).unwrap().state, EccState::Ready);
    }

    #[tokio::test]
    async fn refresh_configs_mirrors_the_remote_list() {
        let (store, _, ecc) = fixture();
        // Start with two sets; the remote now only knows one of them
        select_config(&store, ecc, "A", "B", "C");
        store
            .with_transaction(|t| {
                t.upsert_config("A", "C", "B", ecc, Utc::now());
                Ok::<(), StoreError>(())
            })
            .unwrap();

        let list = format!("<ConfigIdList>{}</ConfigIdList>", config_id_to_xml("A", "B", "C"));
        let client = FakeEccClient::with_config_list(&list);
        refresh_configs(&store, client.as_ref(), ecc).await.unwrap();

        let configs = store.configs_of_ecc(ecc);
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].triple(), ("A", "B", "C"));
    }

    #[tokio::test]
    async fn repeated_refreshes_do_not_duplicate_and_keep_row_keys() {
        let (store, _, ecc) = fixture();
        let selected = select_config(&store, ecc, "A", "B", "C");
        let list = format!("<ConfigIdList>{}</ConfigIdList>", config_id_to_xml("A", "B", "C"));
        let client = FakeEccClient::with_config_list(&list);
        for _ in 0..3 {
            refresh_configs(&store, client.as_ref(), ecc).await.unwrap();
        }
        let configs = store.configs_of_ecc(ecc);
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].key, selected);
        assert_eq!(store.ecc_server(ecc).unwrap().selected_config, Some(selected));
    }

    #[tokio::test]
    async fn refresh_configs_rejects_a_remote_error() {
        let (store, _, ecc) = fixture();
        let client = FakeEccClient::with_config_list("<ConfigIdList></ConfigIdList>");
        client.configs.lock().error_code = 1;
        client.configs.lock().error_message = String::from("no configs dir");
        assert!(matches!(
            refresh_configs(&store, client.as_ref(), ecc).await,
            Err(EccError::Remote(_))
        ));
    }

    #[tokio::test]
    async fn describe_an_idle_cobo_sends_both_payloads() {
        let (store, exp, ecc) = fixture();
        select_config(&store, ecc, "d", "p", "c");
        let router = store
            .add_data_router(DataRouter::new("dr0", "10.0.0.1", exp))
            .unwrap();
        store
            .add_data_source(DataSource::new("CoBo[0]", Some(ecc), Some(router)))
            .unwrap();

        let client = Arc::new(FakeEccClient::default());
        change_state(&store, client.as_ref(), ecc, EccState::Described)
            .await
            .unwrap();

        let calls = client.calls.lock();
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            FakeCall::Transition {
                op,
                config_xml,
                datalink_xml,
            } => {
                assert_eq!(*op, EccOperation::Describe);
                assert_eq!(config_xml, &config_id_to_xml("d", "p", "c"));
                assert_eq!(datalink_xml.matches("<DataLink>").count(), 1);
                assert!(datalink_xml.contains(r#"<DataSender id="CoBo[0]" />"#));
                assert!(datalink_xml.contains(
                    r#"<DataRouter name="dr0" ipAddress="10.0.0.1" port="46005" type="TCP" />"#
                ));
            }
            other => panic!("expected a transition call, got {other:?}"),
        }
        drop(calls);

        let row = store.ecc_server(ecc).unwrap();
        assert!(row.is_transitioning);
        assert_eq!(row.state, EccState::Idle);
    }

    #[tokio::test]
    async fn change_state_requires_a_selected_config() {
        let (store, _, ecc) = fixture();
        let client = Arc::new(FakeEccClient::default());
        let err = change_state(&store, client.as_ref(), ecc, EccState::Described)
            .await
            .unwrap_err();
        assert!(matches!(err, EccError::NoConfigSelected(_)));
        assert!(client.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn change_state_requires_routers_on_every_source() {
        let (store, _, ecc) = fixture();
        select_config(&store, ecc, "d", "p", "c");
        store
            .add_data_source(DataSource::new("CoBo[0]", Some(ecc), None))
            .unwrap();
        let client = Arc::new(FakeEccClient::default());
        let err = change_state(&store, client.as_ref(), ecc, EccState::Described)
            .await
            .unwrap_err();
        assert!(matches!(err, EccError::NoDataRouter(_)));
        assert!(client.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn change_state_rejects_non_adjacent_targets() {
        let (store, _, ecc) = fixture();
        select_config(&store, ecc, "d", "p", "c");
        let client = Arc::new(FakeEccClient::default());
        let err = change_state(&store, client.as_ref(), ecc, EccState::Ready)
            .await
            .unwrap_err();
        assert!(matches!(err, EccError::Transition(_)));
        assert!(client.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn remote_transition_error_clears_the_transitioning_flag() {
        let (store, exp, ecc) = fixture();
        select_config(&store, ecc, "d", "p", "c");
        let router = store
            .add_data_router(DataRouter::new("dr0", "10.0.0.1", exp))
            .unwrap();
        store
            .add_data_source(DataSource::new("CoBo[0]", Some(ecc), Some(router)))
            .unwrap();
        store
            .update_ecc_server(ecc, |e| e.is_transitioning = true)
            .unwrap();

        let client = Arc::new(FakeEccClient::default());
        client.transition_reply.lock().error_code = 2;
        client.transition_reply.lock().error_message = String::from("bad config");

        let err = change_state(&store, client.as_ref(), ecc, EccState::Described)
            .await
            .unwrap_err();
        match err {
            EccError::Remote(msg) => assert_eq!(msg, "bad config"),
            other => panic!("expected Remote, got {other:?}"),
        }
        assert!(!store.ecc_server(ecc).unwrap().is_transitioning);
    }
}
