//! Integration tests for transfer session orchestration.

mod common;

use std::sync::Arc;

use common::{
    create_temp_dir, http_request, line_request, media_batch, test_config, MemoryCatalog,
};
use mediaferry_core::history::HistoryLedger;
use mediaferry_core::protocol;
use mediaferry_core::session::{SessionState, SessionStore};
use mediaferry_core::transfer::{Eligibility, EmptyReason, TransferSession};
use mediaferry_core::transport::TransportKind;
use mediaferry_core::Error;

fn open_session(dir: &std::path::Path, catalog: MemoryCatalog) -> TransferSession {
    TransferSession::open(test_config(dir), Arc::new(catalog))
}

#[tokio::test]
async fn test_eligibility() {
    let dir = create_temp_dir();
    let (batch, catalog, _) = media_batch(&[("a.jpg", 10), ("b.jpg", 20), ("c.jpg", 30)]);
    let session = open_session(dir.path(), catalog);
    let assets = batch.as_slice();

    assert!(matches!(
        session.compute_eligible_assets(&[], false),
        Eligibility::Empty(EmptyReason::NothingSelected)
    ));

    session.record_only(&assets[..2]).unwrap();

    match session.compute_eligible_assets(assets, true) {
        Eligibility::Ready(eligible) => {
            assert_eq!(eligible.len(), 1);
            assert_eq!(eligible.get(0).unwrap().display_name, "c.jpg");
        }
        Eligibility::Empty(reason) => panic!("unexpected: {reason}"),
    }

    match session.compute_eligible_assets(assets, false) {
        Eligibility::Ready(eligible) => assert_eq!(eligible.len(), 3),
        Eligibility::Empty(reason) => panic!("unexpected: {reason}"),
    }

    session.record_only(&assets[2..]).unwrap();
    assert!(matches!(
        session.compute_eligible_assets(assets, true),
        Eligibility::Empty(EmptyReason::NothingNew)
    ));
}

#[tokio::test]
async fn test_history_survives_reopen() {
    let dir = create_temp_dir();
    let (batch, catalog, _) = media_batch(&[("a.jpg", 10)]);
    let session = open_session(dir.path(), catalog);
    session.record_only(batch.as_slice()).unwrap();
    drop(session);

    let ledger = HistoryLedger::open(test_config(dir.path()).history_path());
    assert!(ledger.is_transferred(batch.get(0).unwrap()));
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let dir = create_temp_dir();
    let (batch, catalog, _) = media_batch(&[("a.jpg", 10)]);
    let mut session = open_session(dir.path(), catalog);

    let started = session.start(TransportKind::Http, batch.clone()).await.unwrap();
    assert!(session.is_running());
    assert_eq!(started.file_count, 1);
    assert_eq!(session.local_addr(), Some(started.local_addr));

    let err = session.start(TransportKind::Line, batch.clone()).await.unwrap_err();
    assert!(matches!(err, Error::SessionActive));

    let err = session.start(TransportKind::Http, batch).await.unwrap_err();
    let port = started.local_addr.port();
    assert!(matches!(err, Error::AddressInUse { port: p } if p == port));
    assert!(session.is_running());

    session.stop().await;
    session.stop().await;
    assert!(!session.is_running());
    assert!(session.batch().is_none());
}

#[tokio::test]
async fn test_busy_port_is_reported() {
    let dir = create_temp_dir();
    let (batch, catalog, _) = media_batch(&[("a.jpg", 10)]);
    let mut first = open_session(dir.path(), catalog);
    let started = first.start(TransportKind::Http, batch.clone()).await.unwrap();
    let port = started.local_addr.port();

    let other_dir = create_temp_dir();
    let mut config = test_config(other_dir.path());
    config.http.port = port;
    let mut second = TransferSession::open(config, Arc::new(MemoryCatalog::new()));

    let err = second.start(TransportKind::Http, batch).await.unwrap_err();
    assert!(matches!(err, Error::AddressInUse { port: p } if p == port));
    assert!(!second.is_running());
    assert!(!second.progress().snapshot().is_active);

    first.stop().await;
}

#[tokio::test]
async fn test_both_transports_side_by_side() {
    let (batch, catalog, contents) = media_batch(&[("a.jpg", 1000)]);
    let catalog = Arc::new(catalog);

    let http_dir = create_temp_dir();
    let mut http = TransferSession::open(test_config(http_dir.path()), catalog.clone());
    let line_dir = create_temp_dir();
    let mut line = TransferSession::open(test_config(line_dir.path()), catalog);

    let http_addr = http.start(TransportKind::Http, batch.clone()).await.unwrap().local_addr;
    let line_addr = line.start(TransportKind::Line, batch).await.unwrap().local_addr;
    assert_ne!(http_addr.port(), line_addr.port());

    let reply = http_request(http_addr, "GET", "/download/0").await;
    assert_eq!(reply.body, contents[0]);

    let response = line_request(line_addr, "GET 0").await;
    let mut reader = response.as_slice();
    protocol::read_file_header(&mut reader, false).await.unwrap();
    assert_eq!(reader, contents[0].as_slice());

    http.stop().await;
    line.stop().await;
}

#[tokio::test]
async fn test_restart_serves_new_batch() {
    let dir = create_temp_dir();
    let (first_batch, catalog, _) = media_batch(&[("old.jpg", 10)]);
    let (second_batch, _, _) = media_batch(&[("new1.jpg", 10), ("new2.jpg", 10)]);
    let mut session = open_session(dir.path(), catalog);

    session.start(TransportKind::Http, first_batch).await.unwrap();
    session.stop().await;

    let addr = session
        .start(TransportKind::Http, second_batch)
        .await
        .unwrap()
        .local_addr;
    let reply = http_request(addr, "GET", "/list").await;
    let json: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
    let names: Vec<&str> = json["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["new1.jpg", "new2.jpg"]);

    session.stop().await;
}

#[tokio::test]
async fn test_downloads_are_recorded() {
    let dir = create_temp_dir();
    let (batch, catalog, _) = media_batch(&[("a.jpg", 10), ("b.jpg", 10)]);
    let mut session = open_session(dir.path(), catalog);

    let addr = session
        .start(TransportKind::Http, batch.clone())
        .await
        .unwrap()
        .local_addr;
    http_request(addr, "GET", "/download/1").await;

    {
        let ledger = session.ledger().lock().unwrap();
        assert!(!ledger.is_transferred(batch.get(0).unwrap()));
        assert!(ledger.is_transferred(batch.get(1).unwrap()));
    }
    assert_eq!(session.progress().snapshot().completed_files, 1);

    session.stop().await;
}

#[tokio::test]
async fn test_repeated_download_does_not_complete_batch() {
    let dir = create_temp_dir();
    let (batch, catalog, _) = media_batch(&[("a.jpg", 10), ("b.mp4", 1000)]);
    let mut session = open_session(dir.path(), catalog);
    let addr = session
        .start(TransportKind::Line, batch)
        .await
        .unwrap()
        .local_addr;

    line_request(addr, "GET 0").await;
    line_request(addr, "GET 0").await;

    let snapshot = session.progress().snapshot();
    assert_eq!(snapshot.completed_files, 1);
    assert_eq!(snapshot.total_files, 2);
    assert_eq!(snapshot.transferred_bytes, 10);
    assert!(snapshot.is_active);
    assert!(snapshot.overall_fraction < 1.0);
    assert!(!snapshot.all_files_done());

    {
        let store = session.store().lock().unwrap();
        let state = store.load().unwrap();
        assert!(state.files[0].completed);
        assert_eq!(state.files[0].transferred_bytes, 10);
        assert!(!state.files[1].completed);
    }

    session.stop().await;
}

#[tokio::test]
async fn test_repeated_http_download_counts_once() {
    let dir = create_temp_dir();
    let (batch, catalog, _) = media_batch(&[("a.jpg", 10), ("b.mp4", 1000)]);
    let mut session = open_session(dir.path(), catalog);
    let addr = session
        .start(TransportKind::Http, batch)
        .await
        .unwrap()
        .local_addr;

    http_request(addr, "GET", "/download/1").await;
    http_request(addr, "GET", "/download/1").await;

    let snapshot = session.progress().snapshot();
    assert_eq!(snapshot.completed_files, 1);
    assert!(snapshot.is_active);
    session.stop().await;
}

#[tokio::test]
async fn test_bind_failure_keeps_interrupted_job() {
    let dir = create_temp_dir();
    let mut config = test_config(dir.path());
    let (old_batch, _, _) = media_batch(&[("old.jpg", 10)]);
    let (batch, catalog, _) = media_batch(&[("new.jpg", 10)]);

    let interrupted = SessionState::from_batch(&old_batch);
    {
        let mut store = SessionStore::open(config.session_path(), 50);
        store.save(interrupted.clone()).unwrap();
    }

    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    config.line.port = occupied.local_addr().unwrap().port();
    let mut session = TransferSession::open(config, Arc::new(catalog));

    let err = session.start(TransportKind::Line, batch).await.unwrap_err();
    assert!(matches!(err, Error::AddressInUse { .. }));
    assert!(!session.progress().snapshot().is_active);

    let store = session.store().lock().unwrap();
    assert_eq!(store.load().unwrap().session_id, interrupted.session_id);
    assert!(store.history().is_empty());
}

#[tokio::test]
async fn test_unwritable_session_state_aborts_start() {
    let dir = create_temp_dir();
    let config = test_config(dir.path());
    std::fs::create_dir_all(config.session_path()).unwrap();
    let (batch, catalog, _) = media_batch(&[("a.jpg", 10)]);
    let mut session = TransferSession::open(config, Arc::new(catalog));

    assert!(session.start(TransportKind::Line, batch.clone()).await.is_err());
    assert!(!session.is_running());
    assert!(!session.progress().snapshot().is_active);

    // the http transport keeps no session state
    session.start(TransportKind::Http, batch).await.unwrap();
    session.stop().await;
}

#[tokio::test]
async fn test_line_session_tracks_and_resumes() {
    let dir = create_temp_dir();
    let config = test_config(dir.path());
    let (batch, catalog, contents) = media_batch(&[("a.jpg", 100), ("b.mp4", 200), ("c.jpg", 50)]);

    // Leave behind an interrupted job for the same batch.
    {
        let mut store = SessionStore::open(config.session_path(), 50);
        let mut state = SessionState::from_batch(&batch);
        state.files[0].transferred_bytes = 100;
        state.files[0].completed = true;
        state.files[1].transferred_bytes = 50;
        store.save(state).unwrap();
    }

    let mut session = TransferSession::open(config.clone(), Arc::new(catalog));
    let pending = session.incomplete_session().expect("interrupted job");
    assert!((pending.progress_fraction() - 150.0 / 350.0).abs() < 1e-9);

    let started = session.start(TransportKind::Line, batch).await.unwrap();
    assert!(started.resumed);
    let snapshot = session.progress().snapshot();
    assert_eq!(snapshot.completed_files, 1);
    assert_eq!(snapshot.transferred_bytes, 150);

    let response = line_request(started.local_addr, "RESUME 1 50").await;
    let mut reader = response.as_slice();
    let header = protocol::read_file_header(&mut reader, true).await.unwrap();
    assert_eq!(header.offset, 50);
    assert_eq!(reader, &contents[1][50..]);

    {
        let store = session.store().lock().unwrap();
        let state = store.load().unwrap();
        assert!(state.files[1].completed);
        assert_eq!(state.files[1].transferred_bytes, 200);
        assert!(!state.completed);
    }

    line_request(started.local_addr, "GET 2").await;
    assert!(session.incomplete_session().is_none());
    assert!(!session.progress().snapshot().is_active);

    session.stop().await;

    let store = SessionStore::open(config.session_path(), 50);
    assert!(!store.has_incomplete());
    assert_eq!(store.history().len(), 1);
}

#[tokio::test]
async fn test_line_session_starts_fresh_for_other_batch() {
    let dir = create_temp_dir();
    let config = test_config(dir.path());
    let (old_batch, _, _) = media_batch(&[("old.jpg", 10)]);
    let (batch, catalog, _) = media_batch(&[("new.jpg", 10)]);

    {
        let mut store = SessionStore::open(config.session_path(), 50);
        store.save(SessionState::from_batch(&old_batch)).unwrap();
    }

    let mut session = TransferSession::open(config, Arc::new(catalog));
    let started = session.start(TransportKind::Line, batch.clone()).await.unwrap();
    assert!(!started.resumed);

    {
        let store = session.store().lock().unwrap();
        assert!(store.load().unwrap().matches_batch(&batch));
        assert_eq!(store.history().len(), 1);
    }

    session.stop().await;
}

#[tokio::test]
async fn test_complete_and_delete() {
    let dir = create_temp_dir();
    let (batch, catalog, _) = media_batch(&[("a.jpg", 10), ("b.jpg", 10), ("c.jpg", 10)]);
    let stuck = batch.get(1).unwrap().clone();
    let catalog = Arc::new(catalog.fail_delete(&stuck));

    let mut session = TransferSession::open(test_config(dir.path()), catalog.clone());
    session.start(TransportKind::Http, batch.clone()).await.unwrap();

    let report = session.complete_and_delete(&batch).await.unwrap();
    assert_eq!(report.deleted, 2);
    assert_eq!(report.failed, 1);
    assert!(matches!(
        report.ensure_complete(),
        Err(Error::PartialDeletion {
            deleted: 2,
            failed: 1
        })
    ));
    assert!(!session.is_running());

    assert!(!catalog.contains(batch.get(0).unwrap()));
    assert!(catalog.contains(&stuck));
    let ledger = session.ledger().lock().unwrap();
    assert!(batch.iter().all(|asset| ledger.is_transferred(asset)));
}
