use crate::*;

use bytes::Bytes;
use roomdrop_core::wire::encode_data;
use roomdrop_core::{additive16, Chunk, Descriptor, EndOfTransfer, WholeFile};

fn whole_file(id: &str, name: &str, data: &[u8]) -> WholeFile {
    WholeFile {
        transfer_id: id.into(),
        file_name: name.into(),
        file_size: data.len() as u64,
        file_type: "application/octet-stream".into(),
        data: encode_data(data),
        checksum: Some(additive16(data)),
    }
}

fn chunk(id: &str, index: u32, payload: &'static [u8]) -> WireMessage {
    WireMessage::Chunk(Chunk {
        transfer_id: id.into(),
        index,
        payload: Bytes::from_static(payload),
    })
}

/// A missing last chunk fails that transfer only; the connection carries on.
#[tokio::test]
async fn missing_chunk_fails_only_that_transfer() {
    let mut host = TestHost::start("missing").await.unwrap();
    let conn = raw_join(&host).await.unwrap();

    conn.send(WireMessage::Descriptor(Descriptor {
        transfer_id: "m-1".into(),
        file_name: "broken.bin".into(),
        file_size: 6,
        file_type: String::new(),
        total_chunks: 3,
    }))
    .await
    .unwrap();
    conn.send(chunk("m-1", 0, b"ab")).await.unwrap();
    conn.send(chunk("m-1", 1, b"cd")).await.unwrap();
    conn.send(WireMessage::End(EndOfTransfer {
        transfer_id: "m-1".into(),
        original_size: 6,
    }))
    .await
    .unwrap();

    match host.wait_rejected().await.unwrap() {
        TransferError::MissingChunks { missing, total, .. } => {
            assert_eq!(missing, vec![2]);
            assert_eq!(total, 3);
        }
        other => panic!("expected MissingChunks, got {other}"),
    }

    // Late chunk for the failed transfer changes nothing.
    conn.send(chunk("m-1", 2, b"ef")).await.unwrap();
    conn.send(WireMessage::WholeFile(whole_file("m-2", "fine.bin", b"still works")))
        .await
        .unwrap();
    let path = host.wait_saved().await.unwrap();
    assert_eq!(path.file_name().unwrap(), "fine.bin");
    assert!(!host.downloads.join("broken.bin").exists());

    conn.close().await;
    host.stop().await.unwrap();
}

/// A chunk for a transfer that never started is ignored.
#[tokio::test]
async fn unknown_chunk_is_ignored() {
    let mut host = TestHost::start("unknown").await.unwrap();
    let conn = raw_join(&host).await.unwrap();

    conn.send(chunk("never-started", 0, b"zz")).await.unwrap();
    conn.send(WireMessage::End(EndOfTransfer {
        transfer_id: "never-started".into(),
        original_size: 2,
    }))
    .await
    .unwrap();
    conn.send(WireMessage::WholeFile(whole_file("u-1", "ok.bin", b"ok")))
        .await
        .unwrap();

    let path = host.wait_saved().await.unwrap();
    assert_eq!(std::fs::read(path).unwrap(), b"ok");

    conn.close().await;
    host.stop().await.unwrap();
}

#[tokio::test]
async fn checksum_mismatch_is_rejected() {
    let mut host = TestHost::start("checksum").await.unwrap();
    let conn = raw_join(&host).await.unwrap();

    let mut message = whole_file("c-1", "tampered.bin", b"hello world");
    message.checksum = message.checksum.map(|c| c.wrapping_add(1));
    conn.send(WireMessage::WholeFile(message)).await.unwrap();

    assert!(matches!(
        host.wait_rejected().await.unwrap(),
        TransferError::ChecksumMismatch { .. }
    ));

    conn.close().await;
    host.stop().await.unwrap();
}

/// fileSize 100 with 99 decoded bytes is a size mismatch.
#[tokio::test]
async fn whole_file_size_mismatch_is_rejected() {
    let mut host = TestHost::start("size").await.unwrap();
    let conn = raw_join(&host).await.unwrap();

    let data = pattern(99);
    let mut message = whole_file("s-1", "short.bin", &data);
    message.file_size = 100;
    conn.send(WireMessage::WholeFile(message)).await.unwrap();

    match host.wait_rejected().await.unwrap() {
        TransferError::SizeMismatch {
            expected, actual, ..
        } => {
            assert_eq!(expected, 100);
            assert_eq!(actual, 99);
        }
        other => panic!("expected SizeMismatch, got {other}"),
    }

    conn.close().await;
    host.stop().await.unwrap();
}

/// A malformed frame drops the connection and its in-flight state.
#[tokio::test]
async fn malformed_frame_drops_connection() {
    use tokio::io::AsyncWriteExt;

    let mut host = TestHost::start("malformed").await.unwrap();

    let mut stream = tokio::net::TcpStream::connect(host.addr).await.unwrap();
    roomdrop_services::transport::write_frame(
        &mut stream,
        &WireMessage::Join {
            room_code: host.room.as_str().into(),
        },
    )
    .await
    .unwrap();
    roomdrop_services::transport::write_frame(
        &mut stream,
        &WireMessage::Descriptor(Descriptor {
            transfer_id: "x-1".into(),
            file_name: "x.bin".into(),
            file_size: 10,
            file_type: String::new(),
            total_chunks: 2,
        }),
    )
    .await
    .unwrap();
    let garbage = b"not json at all";
    stream
        .write_all(&(garbage.len() as u32).to_be_bytes())
        .await
        .unwrap();
    stream.write_all(garbage).await.unwrap();

    assert_eq!(host.wait_disconnected().await.unwrap(), 1);

    host.stop().await.unwrap();
}
