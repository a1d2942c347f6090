use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use downsync_core::FileEvent;
use downsync_tunnel::serve_connection;
use tokio::net::UnixListener;
use tokio::process::{Child, Command};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::{io_err, AgentError};
use crate::exclude::ExcludeMatcher;
use crate::service::AgentService;
use crate::watch::{run_watch_loop, RawEvents, TreeWatcher};

const EVENT_BUFFER: usize = 1024;

/// Everything the agent needs from its command line.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Application to supervise, program first.
    pub command: Vec<String>,
    pub targets: Vec<PathBuf>,
    pub excludes: Vec<String>,
    pub socket: PathBuf,
}

/// Start the agent runtime and block the current thread until it exits.
/// Returns the supervised application's exit code.
pub fn start_blocking(options: AgentOptions) -> Result<i32, AgentError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(options))
}

/// Run the agent: watch loop, socket server, supervised application and
/// signal handler, tied together by one shutdown broadcast.
pub async fn run(options: AgentOptions) -> Result<i32, AgentError> {
    if options.command.is_empty() {
        return Err(AgentError::MissingCommand);
    }

    let excludes = Arc::new(ExcludeMatcher::new(&options.targets, &options.excludes));
    let (tree, raw) = watch_targets(&options.targets, excludes)?;
    let listener = bind_socket(&options.socket)?;

    let (events_tx, _) = broadcast::channel::<FileEvent>(EVENT_BUFFER);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let service = Arc::new(AgentService::new(events_tx.clone(), options.targets.clone()));

    let child = match spawn_app(&options.command) {
        Ok(child) => child,
        Err(err) => {
            drop(listener);
            remove_socket(&options.socket);
            return Err(err);
        }
    };
    tracing::info!(
        command = ?options.command,
        targets = ?options.targets,
        excludes = ?options.excludes,
        socket = %options.socket.display(),
        "agent started"
    );

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = run_watch_loop(tree, raw, events_tx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let socket = options.socket.clone();
        tokio::spawn(async move {
            let result = socket_server_task(listener, socket, service, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let app_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = supervise_app(child, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move { signal_task(shutdown, shutdown_rx).await })
    };

    let (watcher_result, socket_result, app_result, signal_result) =
        tokio::join!(watcher_handle, socket_handle, app_handle, signal_handle);

    handle_join("watcher", watcher_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    let code = match app_result {
        Ok(result) => result?,
        Err(err) => {
            return Err(AgentError::Runtime(format!(
                "app supervisor task join failure: {err}"
            )))
        }
    };
    tracing::info!(code, "agent exiting");
    Ok(code)
}

fn watch_targets(
    targets: &[PathBuf],
    excludes: Arc<ExcludeMatcher>,
) -> Result<(TreeWatcher, RawEvents), AgentError> {
    let (mut tree, raw) = TreeWatcher::new(excludes)?;
    for target in targets {
        match tree.register_tree(target) {
            Ok(added) => {
                tracing::info!(target = %target.display(), dirs = added, "watching target")
            }
            Err(err) => {
                tracing::error!(target = %target.display(), error = %err, "failed to watch target")
            }
        }
    }
    Ok((tree, raw))
}

fn spawn_app(command: &[String]) -> Result<Child, AgentError> {
    let Some((program, args)) = command.split_first() else {
        return Err(AgentError::MissingCommand);
    };
    // stdout/stderr are the container's; stdin is never the app's to read.
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| AgentError::Spawn {
            program: program.clone(),
            source,
        })
}

async fn supervise_app(
    mut child: Child,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<i32, AgentError> {
    let status = tokio::select! {
        status = child.wait() => status.map_err(|e| io_err("app", e))?,
        _ = shutdown_rx.recv() => {
            tracing::info!("stopping application");
            if let Err(err) = child.start_kill() {
                tracing::warn!(error = %err, "failed to signal application");
            }
            child.wait().await.map_err(|e| io_err("app", e))?
        }
    };
    let code = exit_code(status);
    tracing::info!(code, "application exited");
    Ok(code)
}

/// The exit status as a shell would report it: the code, or 128 + signal.
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

async fn socket_server_task(
    listener: UnixListener,
    socket: PathBuf,
    service: Arc<AgentService>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    let connections = CancellationToken::new();

    let result = loop {
        let accepted = tokio::select! {
            _ = shutdown_rx.recv() => break Ok(()),
            accepted = listener.accept() => accepted,
        };
        let stream = match accepted {
            Ok((stream, _)) => stream,
            Err(err) => break Err(io_err(&socket, err)),
        };
        tracing::info!("tunnel connected");
        let service = service.clone();
        let shutdown = connections.child_token();
        tokio::spawn(async move {
            match serve_connection(stream, service, shutdown).await {
                Ok(()) => tracing::info!("tunnel disconnected"),
                Err(err) => tracing::warn!(error = %err, "tunnel connection failed"),
            }
        });
    };

    connections.cancel();
    remove_socket(&socket);
    result
}

fn remove_socket(socket: &Path) {
    if let Err(err) = fs::remove_file(socket) {
        if err.kind() != ErrorKind::NotFound {
            tracing::warn!(socket = %socket.display(), error = %err, "failed to remove agent socket");
        }
    }
}

async fn signal_task(
    shutdown: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?;
    tokio::select! {
        _ = shutdown_rx.recv() => Ok(()),
        _ = terminate.recv() => {
            tracing::info!("received SIGTERM, shutting down agent");
            let _ = shutdown.send(());
            Ok(())
        }
        ctrl_c = tokio::signal::ctrl_c() => {
            match ctrl_c {
                Ok(()) => {
                    tracing::info!("received ctrl-c, shutting down agent");
                    let _ = shutdown.send(());
                    Ok(())
                }
                Err(err) => Err(AgentError::Runtime(format!("ctrl-c handler failed: {err}"))),
            }
        }
    }
}

fn bind_socket(socket: &Path) -> Result<UnixListener, AgentError> {
    if let Some(parent) = socket.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
    }
    prepare_socket_for_bind(socket)?;
    let listener = UnixListener::bind(socket).map_err(|e| io_err(socket, e))?;
    set_socket_permissions(socket)?;
    Ok(listener)
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), AgentError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(AgentError::SocketInUse {
                socket: socket.to_path_buf(),
            });
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale agent socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn handle_join(
    task: &str,
    result: Result<Result<(), AgentError>, tokio::task::JoinError>,
) -> Result<(), AgentError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(AgentError::Runtime(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

/// Install the global subscriber. Logs go to stderr: stdout belongs to the
/// tunnel in `connect` and to the application under `agent`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn set_socket_permissions(path: &Path) -> Result<(), AgentError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn stale_socket_is_removed_before_bind() {
        let dir = TempDir::new().expect("tempdir");
        let socket = dir.path().join("agent.sock");
        {
            let _listener = std::os::unix::net::UnixListener::bind(&socket).expect("bind");
        }
        assert!(socket.exists(), "listener drop leaves the socket file");

        prepare_socket_for_bind(&socket).expect("prepare");
        assert!(!socket.exists());
    }

    #[test]
    fn live_socket_is_reported_in_use() {
        let dir = TempDir::new().expect("tempdir");
        let socket = dir.path().join("agent.sock");
        let _listener = std::os::unix::net::UnixListener::bind(&socket).expect("bind");

        let err = prepare_socket_for_bind(&socket).unwrap_err();
        assert!(matches!(err, AgentError::SocketInUse { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn bind_creates_parent_and_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().expect("tempdir");
        let socket = dir.path().join("run").join("agent.sock");
        let _listener = bind_socket(&socket).expect("bind");

        let mode = fs::metadata(&socket).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn exit_code_follows_application() {
        let child = spawn_app(&["sh".into(), "-c".into(), "exit 7".into()]).expect("spawn");
        let (_tx, rx) = broadcast::channel(1);
        assert_eq!(supervise_app(child, rx).await.expect("supervise"), 7);
    }

    #[tokio::test]
    async fn shutdown_kills_application() {
        let child = spawn_app(&["sleep".into(), "30".into()]).expect("spawn");
        let (tx, rx) = broadcast::channel(1);
        let supervisor = tokio::spawn(supervise_app(child, rx));
        tx.send(()).expect("send");

        let code = supervisor.await.expect("join").expect("supervise");
        assert_eq!(code, 128 + 9);
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(matches!(spawn_app(&[]), Err(AgentError::MissingCommand)));
    }

    #[tokio::test]
    async fn run_without_command_fails_before_binding() {
        let dir = TempDir::new().expect("tempdir");
        let socket = dir.path().join("agent.sock");
        let err = run(AgentOptions {
            command: vec![],
            targets: vec![],
            excludes: vec![],
            socket: socket.clone(),
        })
        .await
        .unwrap_err();
        assert!(matches!(err, AgentError::MissingCommand));
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn unspawnable_application_leaves_no_socket() {
        let dir = TempDir::new().expect("tempdir");
        let socket = dir.path().join("agent.sock");
        let err = run(AgentOptions {
            command: vec!["/nonexistent/app".into()],
            targets: vec![],
            excludes: vec![],
            socket: socket.clone(),
        })
        .await
        .unwrap_err();
        assert!(matches!(err, AgentError::Spawn { .. }), "got: {err}");
        assert!(!socket.exists(), "socket removed after failed start");
    }
}
