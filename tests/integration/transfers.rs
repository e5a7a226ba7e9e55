use crate::*;

use roomdrop_core::config::DEFAULT_CHUNK_SIZE;
use roomdrop_services::{join_and_send, LocalFile, SendOutcome};

/// 150 KiB in 64 KiB chunks crosses TCP as three chunks and arrives intact.
#[tokio::test]
async fn chunked_transfer_over_tcp() {
    let mut host = TestHost::start("chunked").await.unwrap();
    let content = pattern(150 * 1024);
    let file = LocalFile::from_bytes("photo.jpg", "image/jpeg", content.clone());

    let conn = PeerConnection::connect(host.addr).await.unwrap();
    let mut session = joiner_session("chunked-joiner");
    let reports = join_and_send(
        conn,
        &host.room,
        "Joiner",
        &encoder(SendMode::Chunked {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }),
        &[file],
        &mut session,
    )
    .await
    .unwrap();

    assert!(matches!(
        reports[0].outcome,
        Ok(SendOutcome::Sent {
            chunks: Some(3),
            ..
        })
    ));

    let path = host.wait_saved().await.unwrap();
    assert_eq!(path.file_name().unwrap(), "photo.jpg");
    assert_eq!(std::fs::read(&path).unwrap(), content);

    host.stop().await.unwrap();
}

#[tokio::test]
async fn whole_file_transfer_over_tcp() {
    let mut host = TestHost::start("whole").await.unwrap();
    let content = pattern(20_000);
    let file = LocalFile::from_bytes("notes.txt", "text/plain", content.clone());

    let conn = PeerConnection::connect(host.addr).await.unwrap();
    let mut session = joiner_session("whole-joiner");
    let reports = join_and_send(
        conn,
        &host.room,
        "Joiner",
        &encoder(SendMode::WholeFile),
        &[file],
        &mut session,
    )
    .await
    .unwrap();
    assert!(matches!(
        reports[0].outcome,
        Ok(SendOutcome::Sent { chunks: None, .. })
    ));

    let path = host.wait_saved().await.unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), content);

    host.stop().await.unwrap();
}

/// Auto mode picks per file; both arrive in send order.
#[tokio::test]
async fn auto_mode_sends_mixed_sizes_in_order() {
    let mut host = TestHost::start("auto").await.unwrap();
    let small = pattern(1_000);
    let large = pattern(10_000);
    let files = [
        LocalFile::from_bytes("small.bin", "", small.clone()),
        LocalFile::from_bytes("large.bin", "", large.clone()),
    ];

    let conn = PeerConnection::connect(host.addr).await.unwrap();
    let mut session = joiner_session("auto-joiner");
    let reports = join_and_send(
        conn,
        &host.room,
        "Joiner",
        &encoder(SendMode::Auto {
            chunk_size: 1024,
            whole_file_max: 4096,
        }),
        &files,
        &mut session,
    )
    .await
    .unwrap();

    assert!(matches!(
        reports[0].outcome,
        Ok(SendOutcome::Sent { chunks: None, .. })
    ));
    assert!(matches!(
        reports[1].outcome,
        Ok(SendOutcome::Sent {
            chunks: Some(10),
            ..
        })
    ));

    let first = host.wait_saved().await.unwrap();
    let second = host.wait_saved().await.unwrap();
    assert_eq!(first.file_name().unwrap(), "small.bin");
    assert_eq!(second.file_name().unwrap(), "large.bin");
    assert_eq!(std::fs::read(&first).unwrap(), small);
    assert_eq!(std::fs::read(&second).unwrap(), large);

    host.stop().await.unwrap();
}

/// A file read from disk keeps its name; a second copy does not overwrite it.
#[tokio::test]
async fn disk_file_saved_without_overwriting() {
    let mut host = TestHost::start("disk").await.unwrap();
    let src_dir = temp_dir("disk-src");
    std::fs::create_dir_all(&src_dir).unwrap();
    let src = src_dir.join("report.txt");
    std::fs::write(&src, b"quarterly numbers").unwrap();

    let file = LocalFile::open(&src).await.unwrap();
    assert_eq!(file.content_type, "text/plain");

    for round in 0..2 {
        let conn = PeerConnection::connect(host.addr).await.unwrap();
        let mut session = joiner_session(&format!("disk-joiner-{round}"));
        join_and_send(
            conn,
            &host.room,
            "Joiner",
            &encoder(SendMode::Chunked { chunk_size: 4 }),
            std::slice::from_ref(&file),
            &mut session,
        )
        .await
        .unwrap();
        host.wait_saved().await.unwrap();
    }

    assert_eq!(
        std::fs::read(host.downloads.join("report.txt")).unwrap(),
        b"quarterly numbers"
    );
    assert_eq!(
        std::fs::read(host.downloads.join("report (1).txt")).unwrap(),
        b"quarterly numbers"
    );

    std::fs::remove_dir_all(&src_dir).ok();
    host.stop().await.unwrap();
}

#[tokio::test]
async fn empty_file_round_trips() {
    let mut host = TestHost::start("empty").await.unwrap();
    let file = LocalFile::from_bytes("empty.dat", "", Vec::<u8>::new());

    let conn = PeerConnection::connect(host.addr).await.unwrap();
    let mut session = joiner_session("empty-joiner");
    join_and_send(
        conn,
        &host.room,
        "Joiner",
        &encoder(SendMode::Chunked { chunk_size: 1024 }),
        &[file],
        &mut session,
    )
    .await
    .unwrap();

    let path = host.wait_saved().await.unwrap();
    assert!(std::fs::read(&path).unwrap().is_empty());

    host.stop().await.unwrap();
}
