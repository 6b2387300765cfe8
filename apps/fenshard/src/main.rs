//! fenshard: the fenmud shard server.
//!
//! One process owns one world. Clients speak JSON-per-line over TCP; a
//! single interval task drives the simulation tick. Everything stateful
//! lives in `fensim`; this binary is config, sockets and wiring.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use fenproto::{decode_command, encode_event, ServerEvent};
use fensim::content::WorldFile;
use fensim::engine::{Engine, Stores};
use fensim::store::{
    MemoryCoinLedger, MemoryDiscoveryStore, MemoryInventoryStore, MemoryPlayerStore,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{info, warn, Level};

const DEFAULT_WORLD: &str = include_str!("../world/default_world.json");

/// How often the in-memory player store is snapshotted to disk.
const SNAPSHOT_INTERVAL_S: u64 = 60;

fn usage_and_exit() -> ! {
    eprintln!(
        "fenshard - fenmud shard server\n\
         \n\
         USAGE:\n  fenshard [--help]\n\
         \n\
         ENV:\n\
         \x20 FENSHARD_BIND          default 0.0.0.0:4000\n\
         \x20 FENSHARD_WORLD         optional; path to a world JSON (default: built-in world)\n\
         \x20 FENSHARD_PLAYERS_PATH  optional; default players.json\n\
         \x20 FENSHARD_SEED          optional; world RNG seed (default: derived from the clock)\n\
         \x20 FENSHARD_TICK_MS       optional; simulation tick interval, default 1000\n"
    );
    std::process::exit(2);
}

#[derive(Clone, Debug)]
struct Config {
    bind: SocketAddr,
    world_path: Option<PathBuf>,
    players_path: PathBuf,
    seed: u64,
    tick_ms: u64,
}

fn parse_args() -> Config {
    if std::env::args().any(|a| a == "--help" || a == "-h") {
        usage_and_exit();
    }

    let bind = std::env::var("FENSHARD_BIND")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| "0.0.0.0:4000".parse().expect("static addr"));
    let world_path = std::env::var("FENSHARD_WORLD").ok().map(PathBuf::from);
    let players_path = std::env::var("FENSHARD_PLAYERS_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("players.json"));
    let seed = std::env::var("FENSHARD_SEED")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(1)
        });
    let tick_ms = std::env::var("FENSHARD_TICK_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1_000)
        .max(50);

    Config {
        bind,
        world_path,
        players_path,
        seed,
        tick_ms,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fenshard=info".into()),
        )
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();

    let cfg = parse_args();

    let world_json = match &cfg.world_path {
        Some(p) => std::fs::read_to_string(p)
            .with_context(|| format!("read world file {}", p.display()))?,
        None => DEFAULT_WORLD.to_string(),
    };
    let wf = WorldFile::from_json(&world_json)?;

    let players = Arc::new(MemoryPlayerStore::load_json(&cfg.players_path));
    let stores = Stores {
        players: players.clone(),
        coins: Arc::new(MemoryCoinLedger::new()),
        inventory: Arc::new(MemoryInventoryStore::new()),
        discovery: Arc::new(MemoryDiscoveryStore::new()),
    };
    let engine = Arc::new(Engine::new(&wf, stores, cfg.seed)?);

    let listener = TcpListener::bind(cfg.bind).await?;
    info!(bind = %cfg.bind, tick_ms = cfg.tick_ms, seed = cfg.seed, "fenshard listening");

    // Exactly one tick driver; successive ticks never overlap.
    {
        let engine = Arc::clone(&engine);
        let tick_ms = cfg.tick_ms;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                engine.tick();
            }
        });
    }

    // Player snapshots happen off the runtime threads; a failed write is a
    // warning, the live world is the truth.
    {
        let players = Arc::clone(&players);
        let path = cfg.players_path.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(SNAPSHOT_INTERVAL_S));
            loop {
                interval.tick().await;
                let players = Arc::clone(&players);
                let path = path.clone();
                let res =
                    tokio::task::spawn_blocking(move || players.save_json(&path)).await;
                match res {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(err = %e, "player snapshot failed"),
                    Err(e) => warn!(err = %e, "player snapshot task died"),
                }
            }
        });
    }

    loop {
        let (stream, peer) = listener.accept().await?;
        info!(peer = %peer, "client connected");
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if let Err(e) = handle_client(engine, stream).await {
                info!(peer = %peer, err = %e, "connection ended");
            }
        });
    }
}

async fn handle_client(engine: Arc<Engine>, stream: TcpStream) -> anyhow::Result<()> {
    let (rd, mut wr) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let sid = engine.connect(tx);

    // Writer half: drains the session outbox until the engine drops it.
    let writer = tokio::spawn(async move {
        while let Some(ev) = rx.recv().await {
            let line = encode_event(&ev);
            if wr.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let res = read_loop(&engine, sid, rd).await;

    // Unregister first so the next tick never sees this session, then let
    // the writer drain whatever is still queued.
    engine.disconnect(sid);
    let _ = writer.await;
    res
}

async fn read_loop(
    engine: &Engine,
    sid: fenproto::SessionId,
    rd: tokio::net::tcp::OwnedReadHalf,
) -> anyhow::Result<()> {
    let mut reader = BufReader::new(rd);
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(());
        }
        if line.len() > fenproto::MAX_COMMAND_LINE {
            // A client shoving unbounded garbage gets cut off, not buffered.
            anyhow::bail!("line too long");
        }
        match decode_command(&line) {
            Ok(cmd) => engine.handle_command(sid, cmd),
            Err(fenproto::DecodeError::Empty) => {}
            Err(e) => {
                if let Some(s) = engine.registry().get(sid) {
                    s.send(ServerEvent::Error {
                        message: e.to_string(),
                    });
                }
            }
        }
    }
}
