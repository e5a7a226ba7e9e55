use crate::*;

use roomdrop_core::{Descriptor, WholeFile};
use roomdrop_core::wire::encode_data;
use roomdrop_core::additive16;
use roomdrop_services::{join_and_send, LocalFile};

fn descriptor(id: &str, size: u64, total: u32) -> WireMessage {
    WireMessage::Descriptor(Descriptor {
        transfer_id: id.into(),
        file_name: "big.bin".into(),
        file_size: size,
        file_type: String::new(),
        total_chunks: total,
    })
}

/// A typo in the room code is refused before any file is sent.
#[tokio::test]
async fn wrong_room_code_is_refused() {
    let mut host = TestHost::start("wrong-room").await.unwrap();
    let wrong = loop {
        let code = RoomCode::generate();
        if code != host.room {
            break code;
        }
    };

    let conn = PeerConnection::connect(host.addr).await.unwrap();
    let mut session = joiner_session("wrong-room-joiner");
    let file = LocalFile::from_bytes("secret.txt", "text/plain", &b"nope"[..]);
    let err = join_and_send(
        conn,
        &wrong,
        "Joiner",
        &encoder(SendMode::WholeFile),
        &[file],
        &mut session,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("wrong room code"), "{err}");

    // The host never saw a connected peer.
    assert!(tokio::time::timeout(Duration::from_millis(200), host.next_event())
        .await
        .is_err());

    host.stop().await.unwrap();
}

/// Room codes typed in lower case with stray spaces still match.
#[tokio::test]
async fn room_code_input_is_normalized() {
    let mut host = TestHost::start("normalize").await.unwrap();
    let typed = RoomCode::parse(&format!("  {}  ", host.room.as_str().to_lowercase())).unwrap();

    let conn = PeerConnection::connect(host.addr).await.unwrap();
    let mut session = joiner_session("normalize-joiner");
    join_and_send(
        conn,
        &typed,
        "Joiner",
        &encoder(SendMode::WholeFile),
        &[LocalFile::from_bytes("a.txt", "text/plain", &b"hi"[..])],
        &mut session,
    )
    .await
    .unwrap();
    host.wait_saved().await.unwrap();

    host.stop().await.unwrap();
}

/// Joining peers learn the host's name and vice versa.
#[tokio::test]
async fn nicknames_are_exchanged() {
    let mut host = TestHost::start("names").await.unwrap();
    let conn = raw_join(&host).await.unwrap();

    match host.next_event().await.unwrap() {
        HostEvent::Connected { .. } => {}
        other => panic!("expected Connected, got {other:?}"),
    }
    match host.next_event().await.unwrap() {
        HostEvent::Session(SessionEvent::PeerNamed(name)) => assert_eq!(name, "Raw"),
        other => panic!("expected PeerNamed, got {other:?}"),
    }

    conn.close().await;
    host.stop().await.unwrap();
}

/// A second peer takes over; the first peer's half-done transfer is discarded.
#[tokio::test]
async fn new_peer_replaces_current_one() {
    let mut host = TestHost::start("replace").await.unwrap();

    let mut first = raw_join(&host).await.unwrap();
    first.send(descriptor("first-1", 4096, 4)).await.unwrap();
    loop {
        if let HostEvent::Session(SessionEvent::Started { transfer_id, .. }) =
            host.next_event().await.unwrap()
        {
            assert_eq!(transfer_id, "first-1");
            break;
        }
    }

    let second = raw_join(&host).await.unwrap();
    assert_eq!(host.wait_disconnected().await.unwrap(), 1);
    match host.next_event().await.unwrap() {
        HostEvent::Connected { .. } => {}
        other => panic!("expected Connected, got {other:?}"),
    }

    // The old connection was closed by the host.
    assert_eq!(first.recv().await, None);

    // The new peer is served normally.
    let data = b"second peer";
    second
        .send(WireMessage::WholeFile(WholeFile {
            transfer_id: "second-1".into(),
            file_name: "hello.txt".into(),
            file_size: data.len() as u64,
            file_type: "text/plain".into(),
            data: encode_data(data),
            checksum: Some(additive16(data)),
        }))
        .await
        .unwrap();
    let path = host.wait_saved().await.unwrap();
    assert_eq!(std::fs::read(path).unwrap(), data);

    second.close().await;
    host.stop().await.unwrap();
}

/// Closing mid-transfer discards the reassembly buffer.
#[tokio::test]
async fn disconnect_discards_partial_transfers() {
    let mut host = TestHost::start("partial").await.unwrap();

    let conn = raw_join(&host).await.unwrap();
    conn.send(descriptor("p-1", 300, 3)).await.unwrap();
    conn.send(descriptor("p-2", 300, 3)).await.unwrap();
    conn.send(WireMessage::Chunk(roomdrop_core::Chunk {
        transfer_id: "p-1".into(),
        index: 0,
        payload: bytes::Bytes::from(vec![7u8; 100]),
    }))
    .await
    .unwrap();
    conn.close().await;

    assert_eq!(host.wait_disconnected().await.unwrap(), 2);
    assert!(std::fs::read_dir(&host.downloads)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true));

    host.stop().await.unwrap();
}
