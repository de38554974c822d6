//! Tests for persisted channel state and sessions

mod common;

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use nexum_apdu_channel::lifecycle::{CHANNEL_ID_KEY_PREFIX, CHANNEL_RESPONSE_KEY_PREFIX};
use nexum_apdu_channel::{
    ApduSender, BuildError, ChannelRegistry, FileStore, KeyValueStore, MemoryStore, NoSessions,
    OpenChannelResponse, OpenChannelStatus, PipelineError, RequestBuilder, SessionManager,
};
use nexum_apdu_core::{ChannelHandle, Response};

use common::{Event, FakeTransport, SELECT_RESPONSE};

fn id_key() -> String {
    format!("{CHANNEL_ID_KEY_PREFIX}-{}", common::test_aid().to_hex())
}

fn response_key() -> String {
    format!("{CHANNEL_RESPONSE_KEY_PREFIX}-{}", common::test_aid().to_hex())
}

/// Provider that reports the select response it was given
fn capture_select(
    tx: crossbeam_channel::Sender<Vec<u8>>,
) -> impl FnOnce(&[u8], &mut RequestBuilder) -> Result<(), BuildError> + Send + 'static {
    move |select: &[u8], request: &mut RequestBuilder| {
        tx.send(select.to_vec()).unwrap();
        request.add_apdu(0x80, 0xCA, 0x00, 0x5A);
        Ok(())
    }
}

#[test]
fn test_applet_with_open_channel_reuses_persisted_handle() {
    common::init_tracing();
    let transport = FakeTransport::new();
    transport.push_open(OpenChannelResponse::failure(OpenChannelStatus::NoSuchElement));

    let store = Arc::new(MemoryStore::new());
    store.put_int(&id_key(), 3).unwrap();
    store
        .put_string(&response_key(), &BASE64.encode([0xE3, 0x05]))
        .unwrap();

    let sessions = Arc::new(SessionManager::new());
    sessions.start_session("download");
    let sender = common::sender_with(
        &transport,
        &Arc::new(ChannelRegistry::new()),
        store.clone(),
        sessions.clone(),
    );

    let (tx, rx) = crossbeam_channel::bounded(1);
    sender.send_and_wait(capture_select(tx)).unwrap();

    assert_eq!(rx.recv().unwrap(), vec![0xE3, 0x05]);
    assert_eq!(transport.transmitted()[0].channel(), ChannelHandle::new(3));
    assert!(transport.closes().is_empty());
    assert!(sender.is_channel_open());
    assert_eq!(store.get_int(&id_key()), Some(3));
}

#[test]
fn test_applet_refusal_without_persisted_state_fails() {
    let transport = FakeTransport::new();
    transport.push_open(OpenChannelResponse::failure(OpenChannelStatus::NoSuchElement));
    let sender = common::sender(&transport);

    let err = sender.send_and_wait(common::tagged(1, 1)).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::OpenFailed {
            status: OpenChannelStatus::NoSuchElement
        }
    ));
    assert_eq!(err.status_code(), Some(3));
}

#[test]
fn test_open_failure_clears_stale_state() {
    let transport = FakeTransport::new();
    transport.push_open(OpenChannelResponse::failure(OpenChannelStatus::UnknownError));

    let store = Arc::new(MemoryStore::new());
    store.put_int(&id_key(), 2).unwrap();
    store.put_string(&response_key(), "AQI=").unwrap();
    let sender = common::sender_with(
        &transport,
        &Arc::new(ChannelRegistry::new()),
        store.clone(),
        Arc::new(NoSessions),
    );

    assert!(sender.send_and_wait(common::tagged(1, 1)).is_err());
    assert!(store.is_empty());
}

#[test]
fn test_undecodable_persisted_response_reads_as_empty() {
    let transport = FakeTransport::new();
    transport.push_open(OpenChannelResponse::failure(OpenChannelStatus::NoSuchElement));

    let store = Arc::new(MemoryStore::new());
    store.put_int(&id_key(), 2).unwrap();
    store.put_string(&response_key(), "%%not base64%%").unwrap();
    let sender = common::sender_with(
        &transport,
        &Arc::new(ChannelRegistry::new()),
        store,
        Arc::new(NoSessions),
    );

    let (tx, rx) = crossbeam_channel::bounded(1);
    sender.send_and_wait(capture_select(tx)).unwrap();
    assert!(rx.recv().unwrap().is_empty());
    assert_eq!(transport.closes(), vec![ChannelHandle::new(2)]);
}

#[test]
fn test_session_keeps_channel_open_until_it_ends() {
    let transport = FakeTransport::new();
    let store = Arc::new(MemoryStore::new());
    let sessions = Arc::new(SessionManager::new());
    let sender = common::sender_with(
        &transport,
        &Arc::new(ChannelRegistry::new()),
        store.clone(),
        sessions.clone(),
    );

    sessions.start_session("download");
    sender.send_and_wait(common::tagged(1, 1)).unwrap();
    sender.send_and_wait(common::tagged(2, 1)).unwrap();

    assert_eq!(transport.opens(), 1);
    assert!(transport.closes().is_empty());
    assert!(sender.is_channel_open());
    assert_eq!(store.get_int(&id_key()), Some(1));
    assert_eq!(
        store.get_string(&response_key()),
        Some(BASE64.encode(SELECT_RESPONSE))
    );

    sessions.end_session("download");

    assert_eq!(transport.closes(), vec![ChannelHandle::new(1)]);
    assert!(!sender.is_channel_open());
    assert!(store.is_empty());

    sender.send_and_wait(common::tagged(3, 1)).unwrap();
    assert_eq!(transport.opens(), 2);
    assert_eq!(transport.closes().len(), 2);
}

/// Sender with an active "download" session over a fresh memory store
fn session_sender(
    transport: &Arc<FakeTransport>,
) -> (ApduSender, Arc<MemoryStore>, Arc<SessionManager>) {
    let store = Arc::new(MemoryStore::new());
    let sessions = Arc::new(SessionManager::new());
    sessions.start_session("download");
    let sender = common::sender_with(
        transport,
        &Arc::new(ChannelRegistry::new()),
        store.clone(),
        sessions.clone(),
    );
    (sender, store, sessions)
}

#[test]
fn test_session_keeps_channel_open_after_builder_failure() {
    let transport = FakeTransport::new();
    let (sender, store, sessions) = session_sender(&transport);

    let err = sender
        .send_and_wait(|_: &[u8], _: &mut RequestBuilder| -> Result<(), BuildError> {
            Err("no profile metadata".into())
        })
        .unwrap_err();
    assert!(matches!(err, PipelineError::BuilderFailed(_)));
    assert_eq!(transport.opens(), 1);
    assert!(transport.closes().is_empty());
    assert!(sender.is_channel_open());
    assert_eq!(store.get_int(&id_key()), Some(1));

    sender.send_and_wait(common::tagged(1, 1)).unwrap();
    assert_eq!(transport.opens(), 1);

    sessions.end_session("download");
    assert_eq!(transport.closes(), vec![ChannelHandle::new(1)]);
}

#[test]
fn test_session_keeps_channel_open_after_error_status() {
    let transport = FakeTransport::new();
    transport.push_response(Response::error((0x6A, 0x88)));
    let (sender, store, _sessions) = session_sender(&transport);

    let err = sender.send_and_wait(common::tagged(1, 1)).unwrap_err();
    assert_eq!(err.status_hex().as_deref(), Some("6A88"));
    assert!(transport.closes().is_empty());
    assert!(sender.is_channel_open());
    assert_eq!(store.get_int(&id_key()), Some(1));

    let payload = sender.send_and_wait(common::tagged(2, 1)).unwrap();
    assert_eq!(payload.as_ref(), &[2, 0]);
    assert_eq!(transport.opens(), 1);
    assert!(
        transport
            .transmitted()
            .iter()
            .all(|command| command.channel() == ChannelHandle::new(1))
    );
}

#[test]
fn test_session_reopens_after_channel_closed_status() {
    let transport = FakeTransport::new();
    transport.push_response(Response::error((0x68, 0x81)));
    let (sender, store, _sessions) = session_sender(&transport);

    let err = sender.send_and_wait(common::tagged(1, 1)).unwrap_err();
    assert_eq!(err.status_hex().as_deref(), Some("6881"));
    assert!(transport.closes().is_empty());
    assert!(!sender.is_channel_open());
    assert!(store.is_empty());

    sender.send_and_wait(common::tagged(2, 1)).unwrap();
    assert_eq!(transport.opens(), 2);
}

#[test]
fn test_close_any_open_channel_recovers_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("channels.json");
    {
        let store = FileStore::open(&path).unwrap();
        store.put_int(&id_key(), 5).unwrap();
        store.put_string(&response_key(), "AQI=").unwrap();
    }

    let transport = FakeTransport::new();
    let store = Arc::new(FileStore::open(&path).unwrap());
    let sender = common::sender_with(
        &transport,
        &Arc::new(ChannelRegistry::new()),
        store,
        Arc::new(NoSessions),
    );

    assert!(sender.close_any_open_channel());
    assert_eq!(transport.events(), vec![Event::Close(ChannelHandle::new(5))]);

    let reopened = FileStore::open(&path).unwrap();
    assert_eq!(reopened.get_int(&id_key()), None);
    assert_eq!(reopened.get_string(&response_key()), None);

    assert!(sender.close_any_open_channel());
    assert_eq!(transport.closes().len(), 1);
}

#[test]
fn test_channel_left_open_by_crash_is_reused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("channels.json");

    // first process: channel kept open for a session, then the process dies
    {
        let transport = FakeTransport::new();
        let sessions = Arc::new(SessionManager::new());
        sessions.start_session("download");
        let sender = common::sender_with(
            &transport,
            &Arc::new(ChannelRegistry::new()),
            Arc::new(FileStore::open(&path).unwrap()),
            sessions,
        );
        sender.send_and_wait(common::tagged(1, 1)).unwrap();
        assert!(transport.closes().is_empty());
    }

    // second process: the applet still owns channel 1
    let transport = FakeTransport::new();
    transport.push_open(OpenChannelResponse::failure(OpenChannelStatus::NoSuchElement));
    let sender = common::sender_with(
        &transport,
        &Arc::new(ChannelRegistry::new()),
        Arc::new(FileStore::open(&path).unwrap()),
        Arc::new(NoSessions),
    );

    let (tx, rx) = crossbeam_channel::bounded(1);
    sender.send_and_wait(capture_select(tx)).unwrap();

    assert_eq!(rx.recv().unwrap(), SELECT_RESPONSE);
    assert_eq!(transport.transmitted()[0].channel(), ChannelHandle::new(1));
    assert_eq!(transport.closes(), vec![ChannelHandle::new(1)]);
    assert_eq!(FileStore::open(&path).unwrap().get_int(&id_key()), None);
}
