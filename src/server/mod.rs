//! Server half: configuration builder, worker pool, request dispatch.
//!
//! A [`ServerBuilder`] collects the bind address, handlers, shared state,
//! and operational options, then [`ServerBuilder::bind`] claims the
//! listener, PID file, and log sink. [`Server::run`] drives the worker
//! pool until a termination signal or [`Server::shutdown_token`] fires.
//!
//! ```no_run
//! use wirecall::{Server, Packager};
//!
//! # async fn demo() -> wirecall::Result<()> {
//! let server = Server::builder("127.0.0.1:9000")
//!     .max_workers(4)
//!     .register("echo", |request, response, _state: &()| {
//!         let mut retval = Packager::single();
//!         retval.push_value(request.params().unwrap_or(&wirecall::Value::Null))?;
//!         response.set_retval(retval)
//!     })
//!     .bind()
//!     .await?;
//! server.run().await;
//! # Ok(())
//! # }
//! ```

mod connection;
mod handlers;
mod pool;

pub use handlers::{HandlerFn, HandlerTable};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::envelope::{Request, Response};
use crate::error::{Result, WirecallError};
use crate::logging;
use crate::pidfile::PidFile;
use crate::protocol::DEFAULT_MAX_BODY_LEN;
use crate::transport::{Endpoint, Listener};
use pool::{worker_loop, WorkerPool};

/// Identity stamped into the provider field of every response header.
pub(crate) const SERVER_NAME: &str = concat!("wirecall-server/", env!("CARGO_PKG_VERSION"));

/// Default per-connection idle read/write timeout.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(3);

const MAX_WORKERS: usize = 128;

/// Hook invoked once per worker task before it starts accepting.
pub(crate) type InitFn<S> = dyn Fn(&S) -> Result<()> + Send + Sync;

/// Configuration and state shared by every worker.
pub(crate) struct ServerShared<S> {
    pub(crate) handlers: HandlerTable<S>,
    pub(crate) data: S,
    pub(crate) idle_timeout: Duration,
    pub(crate) max_body_len: u32,
}

/// Builder for [`Server`].
///
/// The type parameter is the shared state passed to every handler; it
/// starts as `()` and is fixed by [`ServerBuilder::data`], which must be
/// called before any handler is registered.
pub struct ServerBuilder<S = ()> {
    destination: String,
    standalone: bool,
    max_workers: usize,
    idle_timeout: Duration,
    max_body_len: u32,
    pid_file: Option<PathBuf>,
    log_file: Option<PathBuf>,
    log_level: Option<String>,
    user: Option<String>,
    group: Option<String>,
    data: S,
    handlers: HandlerTable<S>,
    worker_init: Option<Arc<InitFn<S>>>,
    config_error: Option<String>,
}

impl ServerBuilder<()> {
    /// Start building a server bound to `destination`.
    ///
    /// A leading `/` selects a Unix socket path, otherwise `host:port`.
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            standalone: false,
            max_workers: 0,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_body_len: DEFAULT_MAX_BODY_LEN,
            pid_file: None,
            log_file: None,
            log_level: None,
            user: None,
            group: None,
            data: (),
            handlers: HandlerTable::new(),
            worker_init: None,
            config_error: None,
        }
    }

    /// Attach shared state handed to every handler as its third argument.
    ///
    /// Call before `register` and `worker_init`: both fix the state type,
    /// so changing it here starts a fresh handler table. Handlers or a
    /// hook registered earlier turn into a configuration error at `bind`.
    pub fn data<S2>(self, data: S2) -> ServerBuilder<S2> {
        let config_error = self.config_error.or_else(|| {
            (!self.handlers.is_empty() || self.worker_init.is_some())
                .then(|| "data() must be called before register() and worker_init()".to_string())
        });
        ServerBuilder {
            destination: self.destination,
            standalone: self.standalone,
            max_workers: self.max_workers,
            idle_timeout: self.idle_timeout,
            max_body_len: self.max_body_len,
            pid_file: self.pid_file,
            log_file: self.log_file,
            log_level: self.log_level,
            user: self.user,
            group: self.group,
            data,
            handlers: HandlerTable::new(),
            worker_init: None,
            config_error,
        }
    }
}

impl<S: Send + Sync + 'static> ServerBuilder<S> {
    /// Run a single accept loop regardless of `max_workers`.
    pub fn standalone(mut self, standalone: bool) -> Self {
        self.standalone = standalone;
        self
    }

    /// Number of worker tasks, 0 to 128. Zero means one worker.
    pub fn max_workers(mut self, count: usize) -> Self {
        self.max_workers = count;
        self
    }

    /// Per-connection idle read/write timeout (default 3s).
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Largest accepted request body in bytes (default 64 MiB).
    pub fn max_body_len(mut self, limit: u32) -> Self {
        self.max_body_len = limit;
        self
    }

    /// Write a PID file on startup; startup aborts when it already exists.
    pub fn pid_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pid_file = Some(path.into());
        self
    }

    /// Send log output to a file instead of stderr.
    ///
    /// A target starting with `|` pipes the lines into that command's
    /// stdin instead, e.g. `"|logger -t wirecall"`.
    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Log filter directive, e.g. `"info"` or `"wirecall=debug"`.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    /// Switch to this user after binding (requires root, tolerant).
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Switch to this group after binding (requires root, tolerant).
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Register a hook invoked once per worker before it accepts.
    ///
    /// A failing hook takes its worker down; the supervisor replaces it.
    pub fn worker_init<F>(mut self, hook: F) -> Self
    where
        F: Fn(&S) -> Result<()> + Send + Sync + 'static,
    {
        self.worker_init = Some(Arc::new(hook));
        self
    }

    /// Register a named handler. First registration of a name wins lookup.
    pub fn register<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Request, &mut Response, &S) -> Result<()> + Send + Sync + 'static,
    {
        self.handlers.register(name, handler);
        self
    }

    /// Validate the configuration and claim the listener, PID file, and
    /// log sink.
    ///
    /// Fatal conditions here (invalid option, bind failure, PID file
    /// already present) abort before any worker is spawned.
    pub async fn bind(self) -> Result<Server<S>> {
        if let Some(message) = self.config_error {
            return Err(WirecallError::Config(message));
        }
        if self.max_workers > MAX_WORKERS {
            return Err(WirecallError::Config(
                "number of workers must be between 0 and 128".to_string(),
            ));
        }

        let log_guard = logging::init(self.log_level.as_deref(), self.log_file.as_deref())?;

        let endpoint = Endpoint::parse(&self.destination)?;

        // Claimed before the listener: a duplicate launch must abort here,
        // not after unlinking the running server's socket file.
        let pid_file = match &self.pid_file {
            Some(path) => Some(PidFile::create(path)?),
            None => None,
        };

        let listener = match Listener::bind(&endpoint).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(destination = %self.destination, error = %e, "failed to set up server");
                return Err(e);
            }
        };

        drop_privileges(self.user.as_deref(), self.group.as_deref());

        let workers = if self.standalone || self.max_workers == 0 {
            1
        } else {
            self.max_workers
        };

        Ok(Server {
            listener: Arc::new(listener),
            shared: Arc::new(ServerShared {
                handlers: self.handlers,
                data: self.data,
                idle_timeout: self.idle_timeout,
                max_body_len: self.max_body_len,
            }),
            cancel: CancellationToken::new(),
            workers,
            worker_init: self.worker_init,
            destination: self.destination,
            _pid_file: pid_file,
            _log_guard: log_guard,
        })
    }
}

/// A bound server, ready to serve.
///
/// Holds the listener plus the process-wide resources (PID file, log
/// sink guard); both are released when `run` returns.
pub struct Server<S = ()> {
    listener: Arc<Listener>,
    shared: Arc<ServerShared<S>>,
    cancel: CancellationToken,
    workers: usize,
    worker_init: Option<Arc<InitFn<S>>>,
    destination: String,
    _pid_file: Option<PidFile>,
    _log_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

impl<S> std::fmt::Debug for Server<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("destination", &self.destination)
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

impl Server<()> {
    /// Shorthand for [`ServerBuilder::new`].
    pub fn builder(destination: impl Into<String>) -> ServerBuilder<()> {
        ServerBuilder::new(destination)
    }
}

impl<S: Send + Sync + 'static> Server<S> {
    /// The bound TCP address, useful with port 0. `None` for Unix sockets.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.listener.tcp_addr()
    }

    /// Token that stops the server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Serve until a termination signal or the shutdown token fires.
    pub async fn run(self) {
        let Server {
            listener,
            shared,
            cancel,
            workers,
            worker_init,
            destination,
            _pid_file,
            _log_guard,
        } = self;

        let signal_task = tokio::spawn(shutdown_on_signal(cancel.clone()));

        info!(destination = %destination, workers, "server listening");

        let mut pool = WorkerPool::new(cancel.clone());
        pool.run(workers, move |slot| {
            worker_loop(
                slot,
                Arc::clone(&listener),
                Arc::clone(&shared),
                cancel.clone(),
                worker_init.clone(),
            )
        })
        .await;

        signal_task.abort();
        info!("server stopped");
    }
}

/// Wait for SIGTERM/SIGINT/SIGQUIT and cancel the shutdown token.
async fn shutdown_on_signal(cancel: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let installed = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
        signal(SignalKind::quit()),
    );
    let (Ok(mut term), Ok(mut int), Ok(mut quit)) = installed else {
        error!("failed to install signal handlers");
        return;
    };

    let name = tokio::select! {
        _ = term.recv() => "SIGTERM",
        _ = int.recv() => "SIGINT",
        _ = quit.recv() => "SIGQUIT",
    };
    info!(signal = name, "termination signal received, shutting down");
    cancel.cancel();
}

/// Switch to the configured user/group once the listener is bound.
///
/// Lookup and switch failures log a warning and the server keeps its
/// current credentials. A user without an explicit group implies the
/// user's primary group.
fn drop_privileges(user: Option<&str>, group: Option<&str>) {
    use nix::unistd::{geteuid, setgid, setuid, Gid, Group, Uid, User};

    if user.is_none() && group.is_none() {
        return;
    }
    if !geteuid().is_root() {
        warn!("not running as root, keeping current user and group");
        return;
    }

    let mut target_uid: Option<Uid> = None;
    let mut target_gid: Option<Gid> = None;
    if let Some(name) = user {
        match User::from_name(name) {
            Ok(Some(entry)) => {
                target_uid = Some(entry.uid);
                target_gid = Some(entry.gid);
            }
            Ok(None) => warn!(user = name, "unknown user, keeping current credentials"),
            Err(e) => warn!(user = name, error = %e, "user lookup failed"),
        }
    }
    if let Some(name) = group {
        match Group::from_name(name) {
            Ok(Some(entry)) => target_gid = Some(entry.gid),
            Ok(None) => warn!(group = name, "unknown group, keeping current group"),
            Err(e) => warn!(group = name, error = %e, "group lookup failed"),
        }
    }

    if let Some(gid) = target_gid {
        if let Err(e) = setgid(gid) {
            warn!(%gid, error = %e, "failed to switch group");
        }
    }
    if let Some(uid) = target_uid {
        if let Err(e) = setuid(uid) {
            warn!(%uid, error = %e, "failed to switch user");
        }
    }
}
