//! The agent's watch loop and service driven through a real tunnel client.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use downsync_agent::watch::{hash_file, run_watch_loop, TreeWatcher};
use downsync_agent::{is_system_path, AgentService, ExcludeMatcher};
use downsync_core::{EventType, FileEvent};
use downsync_tunnel::{serve_connection, RpcClient, TunnelConnection, WatchStream, CHUNK_SIZE};
use tempfile::TempDir;
use tokio::io::duplex;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(10);
const SETTLE: Duration = Duration::from_millis(300);

struct Agent {
    _dir: TempDir,
    root: PathBuf,
    client: RpcClient,
    _shutdown: broadcast::Sender<()>,
}

/// Scratch space beside the crate: `/tmp` is on the system deny-list.
fn scratch() -> TempDir {
    let dir = tempfile::Builder::new()
        .prefix(".agent-test-")
        .tempdir_in(env!("CARGO_MANIFEST_DIR"))
        .expect("tempdir");
    assert!(
        !is_system_path(dir.path()),
        "scratch dir {} is on the system deny-list and would never be watched; \
         move the checkout out of /tmp",
        dir.path().display()
    );
    dir
}

fn start_agent(excludes: &[&str]) -> Agent {
    let dir = scratch();
    let root = dir.path().join("src");
    fs::create_dir_all(&root).expect("mkdir");

    let roots = vec![root.clone()];
    let patterns: Vec<String> = excludes.iter().map(|p| p.to_string()).collect();
    let matcher = Arc::new(ExcludeMatcher::new(&roots, &patterns));
    let (mut tree, raw) = TreeWatcher::new(matcher).expect("watcher");
    tree.register_tree(&root).expect("register");

    let (events_tx, _) = broadcast::channel::<FileEvent>(256);
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let service = Arc::new(AgentService::new(events_tx.clone(), roots));
    tokio::spawn(run_watch_loop(tree, raw, events_tx, shutdown_rx));

    let (client_read, server_write) = duplex(64 * 1024);
    let (server_read, client_write) = duplex(64 * 1024);
    tokio::spawn(serve_connection(
        TunnelConnection::new(server_read, server_write),
        service,
        CancellationToken::new(),
    ));
    let client = RpcClient::connect(
        TunnelConnection::new(client_read, client_write),
        CancellationToken::new(),
    );

    Agent {
        _dir: dir,
        root,
        client,
        _shutdown: shutdown_tx,
    }
}

/// Read events until one for `path` arrives, returning everything seen.
async fn events_until(stream: &mut WatchStream, path: &Path) -> Vec<FileEvent> {
    let mut seen = Vec::new();
    timeout(WAIT, async {
        loop {
            let event = stream
                .next()
                .await
                .expect("stream open")
                .expect("event");
            let done = event.path == path;
            seen.push(event);
            if done {
                break;
            }
        }
    })
    .await
    .expect("event for path");
    seen
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn excluded_files_are_silent_and_modify_carries_hash() {
    let agent = start_agent(&["*.tmp"]);
    let mut stream = agent.client.watch(vec![]).await.expect("watch");
    sleep(SETTLE).await;

    fs::write(agent.root.join("a.tmp"), b"scratch").expect("write tmp");
    let target = agent.root.join("a.go");
    fs::write(&target, b"package main\n").expect("write go");

    let seen = events_until(&mut stream, &target).await;
    assert!(seen.iter().all(|e| e.path.extension() != Some(OsStr::new("tmp"))));
    assert!(seen.iter().all(|e| e.event_type == EventType::Modify));

    let last = seen.last().expect("event");
    assert_eq!(last.content_hash, Some(hash_file(&target).expect("hash")));
    assert!(last.sequence >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_excludes_filter_per_subscriber() {
    let agent = start_agent(&[]);
    let mut filtered = agent
        .client
        .watch(vec!["*.log".to_string()])
        .await
        .expect("watch");
    sleep(SETTLE).await;

    fs::write(agent.root.join("debug.log"), b"noise").expect("write log");
    let target = agent.root.join("main.go");
    fs::write(&target, b"package main\n").expect("write go");

    let seen = events_until(&mut filtered, &target).await;
    assert!(seen.iter().all(|e| !e.path.ends_with("debug.log")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn directories_created_later_are_watched() {
    let agent = start_agent(&[]);
    let mut stream = agent.client.watch(vec![]).await.expect("watch");
    sleep(SETTLE).await;

    let nested = agent.root.join("pkg").join("api");
    fs::create_dir_all(&nested).expect("mkdir");
    sleep(SETTLE).await;
    let target = nested.join("handler.go");
    fs::write(&target, b"package api\n").expect("write");

    let seen = events_until(&mut stream, &target).await;
    assert_eq!(
        seen.last().and_then(|e| e.content_hash.clone()),
        Some(hash_file(&target).expect("hash"))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn download_streams_file_in_chunks() {
    let agent = start_agent(&[]);
    let path = agent.root.join("blob.bin");
    let contents: Vec<u8> = (0..100_000u32).map(|i| (i % 253) as u8).collect();
    fs::write(&path, &contents).expect("write");

    let mut stream = agent.client.download_file(&path).await.expect("download");
    let mut chunks = Vec::new();
    while let Some(chunk) = timeout(WAIT, stream.next()).await.expect("chunk in time") {
        chunks.push(chunk.expect("chunk"));
    }

    assert!(chunks.len() >= contents.len() / CHUNK_SIZE + 1);
    assert!(
        chunks.iter().all(|c| !c.is_empty() && c.len() <= CHUNK_SIZE),
        "chunk sizes: {:?}",
        chunks.iter().map(Vec::len).collect::<Vec<_>>()
    );
    assert_eq!(chunks.concat(), contents);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn download_of_missing_file_fails() {
    let agent = start_agent(&[]);
    let result = timeout(
        WAIT,
        agent
            .client
            .download_file(&agent.root.join("nope.go"))
            .await
            .expect("download")
            .collect(),
    )
    .await
    .expect("collect");
    assert!(result.is_err());
}
