//! roomdropd: share files with one peer through a short room code.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use roomdrop_core::config::RoomdropConfig;
use roomdrop_core::{random_nickname, RoomCode};
use roomdrop_services::{
    join_and_send, DownloadDir, Host, HostEvent, LocalFile, PeerConnection, PeerSession,
    SendOutcome, SessionEvent, TransferEncoder,
};

fn print_usage() {
    println!("Usage: roomdropd <command>");
    println!();
    println!("Commands:");
    println!("  host [--port <port>] [--out <dir>]    Open a room and receive files");
    println!("  join <addr> <room-code> <file>...     Join a room and send files");
    println!("  help                                  Show this message");
    println!();
    println!("Configuration is read from $ROOMDROP_CONFIG or the user config directory;");
    println!("ROOMDROP_* environment variables override it.");
}

// ── Subcommand handlers ───────────────────────────────────────────────────────

async fn cmd_host(config: RoomdropConfig, nickname: String) -> Result<()> {
    let room = RoomCode::generate();
    let downloads = DownloadDir::new(&config.receive.download_dir);
    let bind = (config.network.bind_addr.as_str(), config.network.port);

    let (events_tx, mut events) = tokio::sync::mpsc::unbounded_channel();
    let host = Host::bind(bind, room.clone(), nickname.as_str(), downloads)
        .await
        .with_context(|| format!("failed to listen on {}:{}", bind.0, bind.1))?
        .with_events(events_tx);
    let addr = host.local_addr()?;

    println!("Room code:  {room}");
    println!("Listening:  {addr}");
    println!("Saving to:  {}", config.receive.download_dir.display());
    println!("You are:    {nickname}");

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    let server = tokio::spawn(host.run(shutdown_tx.subscribe()));

    while let Some(event) = events.recv().await {
        match event {
            HostEvent::Connected { peer } => println!("Peer connected from {peer}"),
            HostEvent::Session(SessionEvent::PeerNamed(name)) => println!("Peer is {name}"),
            HostEvent::Session(SessionEvent::Saved { path, .. }) => {
                println!("Received {}", path.display())
            }
            HostEvent::Session(SessionEvent::Rejected(e)) => eprintln!("Transfer failed: {e}"),
            HostEvent::SaveFailed(e) => eprintln!("Could not save file: {e:#}"),
            HostEvent::Session(_) => {}
            HostEvent::Disconnected { dropped } if dropped > 0 => {
                println!("Peer left; {dropped} incomplete transfer(s) discarded")
            }
            HostEvent::Disconnected { .. } => println!("Peer left"),
        }
    }

    server.await.context("host task panicked")?
}

async fn cmd_join(
    config: RoomdropConfig,
    nickname: String,
    addr: &str,
    code: &str,
    paths: &[&str],
) -> Result<()> {
    let room = RoomCode::parse(code).with_context(|| format!("invalid room code {code:?}"))?;

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let file = LocalFile::open(Path::new(path))
            .await
            .with_context(|| format!("cannot send {path}"))?;
        files.push(file);
    }

    let conn = PeerConnection::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    let encoder = TransferEncoder::from_config(&config);
    let mut session = PeerSession::new(DownloadDir::new(&config.receive.download_dir));

    let reports = tokio::select! {
        result = join_and_send(conn, &room, &nickname, &encoder, &files, &mut session) => result?,
        _ = tokio::signal::ctrl_c() => bail!("interrupted"),
    };

    let mut failed = 0;
    for report in &reports {
        match &report.outcome {
            Ok(SendOutcome::Sent { .. }) => println!("Sent {}", report.name),
            Ok(SendOutcome::Suppressed) => println!("Skipped {} (already sending)", report.name),
            Err(e) => {
                failed += 1;
                eprintln!("Failed {}: {e}", report.name);
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} file(s) failed", reports.len());
    }
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = RoomdropConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = RoomdropConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        RoomdropConfig::default()
    });

    let args: Vec<String> = std::env::args().skip(1).collect();

    // Options apply to `host`; anything else is positional.
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                i += 1;
                config.network.port = args
                    .get(i)
                    .context("--port requires a value")?
                    .parse()
                    .context("--port must be a number")?;
            }
            "--out" => {
                i += 1;
                config.receive.download_dir =
                    PathBuf::from(args.get(i).context("--out requires a directory")?);
            }
            other => remaining.push(other),
        }
        i += 1;
    }

    let nickname = match config.identity.nickname.trim() {
        "" => random_nickname(),
        name => name.to_string(),
    };

    match remaining.as_slice() {
        ["host"] => cmd_host(config, nickname).await,
        ["join", addr, code, paths @ ..] if !paths.is_empty() => {
            cmd_join(config, nickname, addr, code, paths).await
        }
        ["help"] | ["--help"] | ["-h"] | [] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
