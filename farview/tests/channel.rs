use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use farview::{
    connect, proto, ChannelConfig, ChannelError, HostEndpoint, SecureChannel, SessionKind,
};
use proto::{Account, Frame, FrameCodec, SrpGroup, UserStore, SEED_LEN};
use tokio::{
    io::{duplex, split, AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf},
    time::timeout,
};

fn subscribe() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

fn store() -> Arc<UserStore> {
    Arc::new(UserStore::new(
        [Account::enroll("alice", "correct horse", SrpGroup::modp_2048())],
        [9; SEED_LEN],
    ))
}

fn config() -> ChannelConfig {
    let mut config = ChannelConfig::default();
    config.keepalive_interval(None);
    config
}

type Established = (
    Result<SecureChannel, ChannelError>,
    Result<SecureChannel, ChannelError>,
);

async fn establish(store: Arc<UserStore>, username: &str, password: &str) -> Established {
    subscribe();
    let (host_io, client_io) = duplex(1024 * 1024);
    let host = tokio::spawn(SecureChannel::accept(host_io, store, config()));
    let client = SecureChannel::connect(
        client_io,
        username,
        password,
        SessionKind::DesktopManage,
        config(),
    )
    .await;
    (host.await.unwrap(), client)
}

async fn wait_for_count(store: &UserStore, name: &str, expected: u32) {
    timeout(Duration::from_secs(5), async {
        while store.session_count(name) != Some(expected) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session count never settled");
}

#[tokio::test]
async fn messages_round_trip_both_directions() {
    let (host, client) = establish(store(), "alice", "correct horse").await;
    let mut host = host.unwrap();
    let mut client = client.unwrap();

    assert_eq!(host.username(), "alice");
    assert_eq!(host.session_kind(), SessionKind::DesktopManage);

    client.send(Bytes::from_static(b"key press")).await.unwrap();
    assert_eq!(host.recv().await.unwrap(), "key press");

    host.send(Bytes::from_static(b"frame update")).await.unwrap();
    host.send(Bytes::from_static(b"cursor shape")).await.unwrap();
    assert_eq!(client.recv().await.unwrap(), "frame update");
    assert_eq!(client.recv().await.unwrap(), "cursor shape");
}

#[tokio::test]
async fn wrong_password_is_rejected_generically() {
    let (host, client) = establish(store(), "alice", "wrong horse").await;
    match host.unwrap_err() {
        ChannelError::Protocol(proto::Error::ProofMismatch) => {}
        other => panic!("unexpected host error: {other}"),
    }
    match client.unwrap_err() {
        ChannelError::Protocol(proto::Error::Rejected) => {}
        other => panic!("unexpected client error: {other}"),
    }
}

#[tokio::test]
async fn unknown_user_looks_like_wrong_password_to_the_client() {
    let (host, client) = establish(store(), "mallory", "any password").await;
    match host.unwrap_err() {
        ChannelError::Protocol(proto::Error::ProofMismatch) => {}
        other => panic!("unexpected host error: {other}"),
    }
    match client.unwrap_err() {
        ChannelError::Protocol(proto::Error::Rejected) => {}
        other => panic!("unexpected client error: {other}"),
    }
}

/// Byte-level intermediary that can corrupt one sealed frame in flight
async fn forward(
    mut read: ReadHalf<DuplexStream>,
    mut write: WriteHalf<DuplexStream>,
    corrupt: Option<Arc<AtomicBool>>,
) {
    let mut codec = FrameCodec::new(16 * 1024 * 1024);
    let mut chunk = vec![0; 4096];
    loop {
        let n = match read.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        codec.push_bytes(&chunk[..n]);
        loop {
            let frame = match codec.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(_) => return,
            };
            let frame = match &corrupt {
                Some(armed)
                    if !frame.payload.is_empty() && armed.swap(false, Ordering::SeqCst) =>
                {
                    let mut payload = frame.payload.to_vec();
                    payload[0] ^= 0x01;
                    Frame {
                        ty: frame.ty,
                        payload: payload.into(),
                    }
                }
                _ => frame,
            };
            let mut buf = BytesMut::new();
            FrameCodec::encode(&frame, &mut buf);
            if write.write_all(&buf).await.is_err() {
                return;
            }
        }
    }
}

#[tokio::test]
async fn single_tampered_byte_corrupts_the_channel() {
    subscribe();
    let (host_io, proxy_host_io) = duplex(1024 * 1024);
    let (client_io, proxy_client_io) = duplex(1024 * 1024);
    let (proxy_host_read, proxy_host_write) = split(proxy_host_io);
    let (proxy_client_read, proxy_client_write) = split(proxy_client_io);

    // Stays disarmed through the handshake; armed only for the sealed frame
    let armed = Arc::new(AtomicBool::new(false));
    tokio::spawn(forward(
        proxy_host_read,
        proxy_client_write,
        Some(armed.clone()),
    ));
    tokio::spawn(forward(proxy_client_read, proxy_host_write, None));

    let host = tokio::spawn(SecureChannel::accept(host_io, store(), config()));
    let mut client = SecureChannel::connect(
        client_io,
        "alice",
        "correct horse",
        SessionKind::DesktopView,
        config(),
    )
    .await
    .unwrap();
    let host = host.await.unwrap().unwrap();

    armed.store(true, Ordering::SeqCst);
    host.send(Bytes::from_static(b"tamper with me")).await.unwrap();
    match client.recv().await.unwrap_err() {
        ChannelError::Protocol(proto::Error::ChannelCorrupted) => {}
        other => panic!("unexpected error: {other}"),
    }
    // Corruption is terminal, never retried
    match client.recv().await.unwrap_err() {
        ChannelError::Closed => {}
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn session_counts_return_to_baseline() {
    let store = store();
    let mut channels = Vec::new();
    for _ in 0..3 {
        let (host, client) = establish(store.clone(), "alice", "correct horse").await;
        channels.push((host.unwrap(), client.unwrap()));
    }
    assert_eq!(store.session_count("alice"), Some(3));

    for (host, client) in channels.drain(..) {
        host.close();
        drop(host);
        drop(client);
    }
    wait_for_count(&store, "alice", 0).await;
}

#[tokio::test]
async fn session_cap_holds_until_a_slot_frees() {
    let mut account = Account::enroll("alice", "correct horse", SrpGroup::modp_2048());
    account.session_cap = Some(1);
    let store = Arc::new(UserStore::new([account], [9; SEED_LEN]));

    let (host, client) = establish(store.clone(), "alice", "correct horse").await;
    let first_host = host.unwrap();
    let _first_client = client.unwrap();

    let (host, client) = establish(store.clone(), "alice", "correct horse").await;
    match host.unwrap_err() {
        ChannelError::Protocol(proto::Error::SessionLimitExceeded) => {}
        other => panic!("unexpected host error: {other}"),
    }
    client.unwrap_err();

    first_host.close();
    drop(first_host);
    wait_for_count(&store, "alice", 0).await;

    let (host, client) = establish(store, "alice", "correct horse").await;
    host.unwrap();
    client.unwrap();
}

#[tokio::test]
async fn disabling_an_account_is_not_retroactive() {
    let store = store();
    let (host, client) = establish(store.clone(), "alice", "correct horse").await;
    let mut host = host.unwrap();
    let client = client.unwrap();

    assert!(store.set_enabled("alice", false));

    // The established channel keeps working
    client.send(Bytes::from_static(b"still here")).await.unwrap();
    assert_eq!(host.recv().await.unwrap(), "still here");

    // The next handshake does not
    let (host2, client2) = establish(store.clone(), "alice", "correct horse").await;
    host2.unwrap_err();
    client2.unwrap_err();

    assert!(store.set_enabled("alice", true));
    let (host3, client3) = establish(store, "alice", "correct horse").await;
    host3.unwrap();
    client3.unwrap();
}

#[tokio::test(start_paused = true)]
async fn keepalives_flow_without_surfacing_to_the_application() {
    subscribe();
    let (host_io, client_io) = duplex(1024 * 1024);
    let mut keepalive_config = ChannelConfig::default();
    keepalive_config.keepalive_interval(Some(Duration::from_secs(5)));

    let host = tokio::spawn(SecureChannel::accept(
        host_io,
        store(),
        keepalive_config.clone(),
    ));
    let mut client = SecureChannel::connect(
        client_io,
        "alice",
        "correct horse",
        SessionKind::SystemInfo,
        keepalive_config,
    )
    .await
    .unwrap();
    let mut host = host.await.unwrap().unwrap();

    // An hour of idle time: many keepalive rounds, no application events
    assert!(timeout(Duration::from_secs(3600), client.recv()).await.is_err());

    // The channel is still alive afterwards
    client.send(Bytes::from_static(b"ping me not")).await.unwrap();
    assert_eq!(host.recv().await.unwrap(), "ping me not");
}

#[tokio::test]
async fn oversized_frame_closes_the_channel() {
    subscribe();
    let (host_io, client_io) = duplex(1024 * 1024);

    // Host accepts small frames only; the client has no such limit
    let mut small = ChannelConfig::default();
    small.max_frame_size(1024).keepalive_interval(None);

    let host = tokio::spawn(SecureChannel::accept(host_io, store(), small));
    let client = SecureChannel::connect(
        client_io,
        "alice",
        "correct horse",
        SessionKind::FileTransfer,
        config(),
    )
    .await
    .unwrap();
    let mut host = host.await.unwrap().unwrap();

    client.send(Bytes::from(vec![0; 8 * 1024])).await.unwrap();
    match host.recv().await.unwrap_err() {
        ChannelError::Protocol(proto::Error::FrameTooLarge { limit: 1024, .. }) => {}
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn endpoint_accepts_and_authenticates_over_tcp() {
    subscribe();
    let endpoint = HostEndpoint::bind("127.0.0.1:0", store(), config())
        .await
        .unwrap();
    let addr = endpoint.local_addr().unwrap();

    let accept = tokio::spawn(async move {
        let connecting = endpoint.accept().await.unwrap();
        connecting.authenticate().await
    });

    let mut client = connect(
        addr,
        "alice",
        "correct horse",
        SessionKind::DesktopManage,
        config(),
    )
    .await
    .unwrap();
    let mut host = accept.await.unwrap().unwrap();

    client.send(Bytes::from_static(b"over tcp")).await.unwrap();
    assert_eq!(host.recv().await.unwrap(), "over tcp");
    host.send(Bytes::from_static(b"ack")).await.unwrap();
    assert_eq!(client.recv().await.unwrap(), "ack");
}
