use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::net::stream::{NetworkStream, StreamOptions};
use crate::utils::error::NetworkError;

/// Worker task tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskParameters {
    /// Pause between loop iterations. Bounds CPU usage and sets the latency
    /// ceiling of sweep, admission and dispatch.
    pub tick_interval: Duration,
}

impl Default for TaskParameters {
    fn default() -> Self {
        Self { tick_interval: Duration::from_millis(10) }
    }
}

/// Lifecycle and connection events published by a [`TcpServer`].
#[derive(Clone, Debug)]
pub enum ServerEvent {
    /// The worker task is up and the listen socket is bound.
    Enabled,
    /// The worker task has terminated.
    Disabled,
    /// A connection was accepted into the client set.
    ClientConnected(Arc<NetworkStream>),
    /// A closed stream was swept out of the client set.
    ClientDisconnected(Arc<NetworkStream>),
}

/// Per-request dispatch hook of a [`TcpServer`].
///
/// Invoked once per loop iteration for each client stream that currently has
/// readable bytes. The handler should drain only what is already readable
/// and return; a slow handler stalls sweep, admission and dispatch for every
/// other client of that server.
///
/// The handler may call any server operation on the `server` it is given,
/// including [`TcpServer::disable`] and [`TcpServer::enable`]: calls made
/// from inside the handler are deferred and honored by the worker after the
/// handler returns.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle_request(
        &self,
        server: &TcpServer,
        stream: &Arc<NetworkStream>,
    ) -> Result<(), NetworkError>;
}

tokio::task_local! {
    /// Set while the worker runs the request handler; lets server operations
    /// recognize calls that originate from inside their own dispatch.
    static IN_DISPATCH: ();
}

fn in_dispatch() -> bool {
    IN_DISPATCH.try_with(|_| ()).is_ok()
}

#[derive(Clone)]
struct Settings {
    port: u16,
    max_clients: usize,
    task: TaskParameters,
    options: StreamOptions,
}

struct Worker {
    task: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

struct Shared {
    handler: Box<dyn RequestHandler>,
    events: broadcast::Sender<ServerEvent>,
    settings: StdMutex<Settings>,
    /// Accepted client streams in acceptance order.
    clients: StdMutex<Vec<Arc<NetworkStream>>>,
    /// Serializes enable/disable cycles, including the stop handshake.
    lifecycle: Mutex<()>,
    /// Presence of a live worker handle is the authoritative enabled flag.
    worker: StdMutex<Option<Worker>>,
    pending_enable: AtomicBool,
    pending_disable: AtomicBool,
}

/// A single-listener TCP server with a background worker task.
///
/// The worker owns the listen socket and, once per tick, sweeps out closed
/// client streams, admits pending connections up to the client ceiling and
/// dispatches every readable stream to the [`RequestHandler`]. All other
/// operations may be called from any task; operations that originate from
/// inside the request handler itself never block on the worker and are
/// honored after the handler returns.
///
/// Call [`TcpServer::disable`] for deterministic shutdown; it returns only
/// after the worker has fully terminated and every accepted stream has been
/// closed. A server whose handles are all dropped without `disable` is torn
/// down by the worker on its next tick.
pub struct TcpServer {
    shared: Arc<Shared>,
}

impl TcpServer {
    /// Default admission ceiling.
    pub const DEFAULT_MAX_CLIENTS: usize = 1;

    /// Creates a stopped server that will listen on `port` once enabled.
    pub fn new(port: u16, handler: impl RequestHandler) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                handler: Box::new(handler),
                events,
                settings: StdMutex::new(Settings {
                    port,
                    max_clients: Self::DEFAULT_MAX_CLIENTS,
                    task: TaskParameters::default(),
                    options: StreamOptions::default(),
                }),
                clients: StdMutex::new(Vec::new()),
                lifecycle: Mutex::new(()),
                worker: StdMutex::new(None),
                pending_enable: AtomicBool::new(false),
                pending_disable: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribes to [`ServerEvent`]s.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.shared.events.subscribe()
    }

    /// Starts the worker task if not already running. Idempotent.
    ///
    /// Returns once the listen socket is bound, or with the bind/spawn
    /// failure that left the server stopped. From inside the request
    /// handler this only records the request; the worker honors it after
    /// the handler returns.
    pub async fn enable(&self) -> Result<(), NetworkError> {
        if in_dispatch() {
            self.shared.pending_enable.store(true, Ordering::SeqCst);
            return Ok(());
        }
        let _lifecycle = self.shared.lifecycle.lock().await;
        self.spawn_worker().await
    }

    /// Stops the worker task if running. Idempotent.
    ///
    /// Blocks until the worker has fully terminated, then closes and clears
    /// every accepted stream. From inside the request handler this only
    /// records the request (the calling context IS the worker); the worker
    /// tears itself down after the handler returns.
    pub async fn disable(&self) -> Result<(), NetworkError> {
        if in_dispatch() {
            self.shared.pending_disable.store(true, Ordering::SeqCst);
            return Ok(());
        }
        let _lifecycle = self.shared.lifecycle.lock().await;
        self.stop_worker().await
    }

    /// Checks whether the worker task is running.
    pub fn is_enabled(&self) -> bool {
        self.shared
            .worker
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|worker| !worker.task.is_finished())
    }

    /// Gets the listening port.
    pub fn port(&self) -> u16 {
        self.shared.settings.lock().unwrap().port
    }

    /// Sets the listening port.
    ///
    /// A running server is restarted so the change takes effect immediately;
    /// its accepted connections are dropped with the old listen socket.
    pub async fn set_port(&self, port: u16) -> Result<(), NetworkError> {
        self.reconfigure(|settings| settings.port = port).await
    }

    /// Gets the admission ceiling.
    pub fn max_clients(&self) -> usize {
        self.shared.settings.lock().unwrap().max_clients
    }

    /// Sets the admission ceiling.
    ///
    /// The ceiling itself never evicts: a value below the current client
    /// count only stops admission until the count drops. The ceiling also
    /// sizes the listen backlog, so a running server is restarted.
    pub async fn set_max_clients(&self, max_clients: usize) -> Result<(), NetworkError> {
        self.reconfigure(|settings| settings.max_clients = max_clients).await
    }

    /// Gets the worker task parameters.
    pub fn task_parameters(&self) -> TaskParameters {
        self.shared.settings.lock().unwrap().task
    }

    /// Sets the worker task parameters, restarting a running server.
    pub async fn set_task_parameters(
        &self,
        parameters: TaskParameters,
    ) -> Result<(), NetworkError> {
        self.reconfigure(|settings| settings.task = parameters).await
    }

    /// Enables the Nagle algorithm on current and future client streams.
    pub async fn enable_nagle_algorithm(&self) -> Result<(), NetworkError> {
        self.update_stream_options(|options| options.nagle_enabled = true).await
    }

    /// Disables the Nagle algorithm on current and future client streams.
    pub async fn disable_nagle_algorithm(&self) -> Result<(), NetworkError> {
        self.update_stream_options(|options| options.nagle_enabled = false).await
    }

    /// Enables keep-alive probing on current and future client streams.
    pub async fn enable_keep_alive(&self) -> Result<(), NetworkError> {
        self.update_stream_options(|options| options.keep_alive_enabled = true).await
    }

    /// Disables keep-alive probing on current and future client streams.
    pub async fn disable_keep_alive(&self) -> Result<(), NetworkError> {
        self.update_stream_options(|options| options.keep_alive_enabled = false).await
    }

    /// Sets the keep-alive idle time on current and future client streams.
    pub async fn set_keep_alive_idle_time(&self, idle_time: Duration) -> Result<(), NetworkError> {
        self.update_stream_options(|options| options.keep_alive_idle_time = idle_time).await
    }

    /// Sets the keep-alive interval on current and future client streams.
    pub async fn set_keep_alive_interval(&self, interval: Duration) -> Result<(), NetworkError> {
        self.update_stream_options(|options| options.keep_alive_interval = interval).await
    }

    /// Sets the keep-alive probe count on current and future client streams.
    pub async fn set_keep_alive_count(&self, count: u32) -> Result<(), NetworkError> {
        self.update_stream_options(|options| options.keep_alive_count = count).await
    }

    /// Snapshot of the accepted client streams, in acceptance order.
    ///
    /// The snapshot shares ownership with the server; each stream guards its
    /// own I/O, so using it concurrently with the worker is safe.
    pub fn client_streams(&self) -> Vec<Arc<NetworkStream>> {
        self.shared.clients.lock().unwrap().clone()
    }

    /// Applies a bind-time setting. A running server goes through a full
    /// disable/enable cycle; from inside the request handler the restart is
    /// deferred through the pending flags instead.
    async fn reconfigure(&self, update: impl FnOnce(&mut Settings)) -> Result<(), NetworkError> {
        if in_dispatch() {
            update(&mut self.shared.settings.lock().unwrap());
            self.shared.pending_disable.store(true, Ordering::SeqCst);
            self.shared.pending_enable.store(true, Ordering::SeqCst);
            return Ok(());
        }
        let _lifecycle = self.shared.lifecycle.lock().await;
        let running = self.is_enabled();
        if running {
            self.stop_worker().await?;
        }
        update(&mut self.shared.settings.lock().unwrap());
        if running {
            self.spawn_worker().await?;
        }
        Ok(())
    }

    /// Stores the new option set and re-applies it, best-effort, to every
    /// currently accepted stream.
    async fn update_stream_options(
        &self,
        update: impl FnOnce(&mut StreamOptions),
    ) -> Result<(), NetworkError> {
        let options = {
            let mut settings = self.shared.settings.lock().unwrap();
            update(&mut settings.options);
            settings.options.clone()
        };
        let streams = self.client_streams();
        let total = streams.len();
        let mut failed = 0;
        for stream in streams {
            if let Err(e) = stream.apply_options(&options).await {
                debug!(stream = %stream.id(), error = %e, "failed to apply socket options");
                failed += 1;
            }
        }
        if failed == 0 {
            Ok(())
        } else {
            Err(NetworkError::SocketOptions { failed, total })
        }
    }

    /// Caller must hold the lifecycle lock.
    async fn spawn_worker(&self) -> Result<(), NetworkError> {
        {
            let mut worker = self.shared.worker.lock().unwrap();
            if let Some(current) = worker.as_ref() {
                if !current.task.is_finished() {
                    return Ok(());
                }
                // reap a worker that tore itself down from inside dispatch
                worker.take();
            }
        }
        self.shared.pending_enable.store(false, Ordering::SeqCst);
        self.shared.pending_disable.store(false, Ordering::SeqCst);
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(worker_loop(Arc::downgrade(&self.shared), stop.clone(), ready_tx));
        match ready_rx.await {
            Ok(Ok(())) => {
                *self.shared.worker.lock().unwrap() = Some(Worker { task, stop });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = task.await;
                Err(e)
            }
            Err(_) => {
                let _ = task.await;
                Err(NetworkError::Task("worker exited before listening".into()))
            }
        }
    }

    /// Caller must hold the lifecycle lock.
    async fn stop_worker(&self) -> Result<(), NetworkError> {
        let worker = self.shared.worker.lock().unwrap().take();
        let Some(worker) = worker else {
            return Ok(());
        };
        worker.stop.store(true, Ordering::SeqCst);
        worker.task.await.map_err(|e| NetworkError::Task(e.to_string()))?;
        // the worker has fully terminated; close and clear what it accepted
        let streams: Vec<_> = {
            self.shared.clients.lock().unwrap().drain(..).collect()
        };
        for stream in streams {
            let _ = stream.close().await;
        }
        Ok(())
    }
}

/// One listen socket, bound dual-stack with address reuse, backlog sized to
/// the admission ceiling.
fn bind_listener(port: u16, backlog: usize) -> Result<TcpListener, NetworkError> {
    let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_only_v6(false)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    let addr = SocketAddr::from(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0));
    socket.bind(&addr.into())?;
    socket.listen(backlog.max(1) as i32)?;
    Ok(TcpListener::from_std(socket.into())?)
}

async fn worker_loop(
    shared: Weak<Shared>,
    stop: Arc<AtomicBool>,
    ready: oneshot::Sender<Result<(), NetworkError>>,
) {
    let mut listener = {
        let Some(shared) = shared.upgrade() else { return };
        let (port, backlog) = {
            let settings = shared.settings.lock().unwrap();
            (settings.port, settings.max_clients)
        };
        match bind_listener(port, backlog) {
            Ok(listener) => {
                let _ = ready.send(Ok(()));
                let _ = shared.events.send(ServerEvent::Enabled);
                info!(port, "tcp server listening");
                listener
            }
            Err(e) => {
                warn!(port, error = %e, "tcp server failed to listen");
                let _ = ready.send(Err(e));
                return;
            }
        }
    };

    loop {
        // The strong reference lives for one iteration only; once the last
        // external server handle is gone, the worker tears itself down.
        let Some(shared) = shared.upgrade() else { return };

        if stop.load(Ordering::SeqCst) {
            let _ = shared.events.send(ServerEvent::Disabled);
            info!("tcp server stopped");
            return;
        }

        sweep(&shared).await;
        admit(&shared, &listener).await;
        dispatch(&shared).await;

        // Disable/enable requested from inside the request handler
        if shared.pending_disable.swap(false, Ordering::SeqCst) {
            let reenable = shared.pending_enable.swap(false, Ordering::SeqCst);
            teardown_clients(&shared).await;
            drop(listener);
            if reenable {
                let (port, backlog) = {
                    let settings = shared.settings.lock().unwrap();
                    (settings.port, settings.max_clients)
                };
                match bind_listener(port, backlog) {
                    Ok(new_listener) => {
                        listener = new_listener;
                        let _ = shared.events.send(ServerEvent::Enabled);
                        info!(port, "tcp server relistening");
                    }
                    Err(e) => {
                        warn!(port, error = %e, "tcp server failed to relisten");
                        shared.worker.lock().unwrap().take();
                        let _ = shared.events.send(ServerEvent::Disabled);
                        return;
                    }
                }
            } else {
                shared.worker.lock().unwrap().take();
                let _ = shared.events.send(ServerEvent::Disabled);
                info!("tcp server stopped");
                return;
            }
        } else {
            // an enable without a paired disable is a no-op on a running
            // server; drop the stale flag
            shared.pending_enable.store(false, Ordering::SeqCst);
        }

        let tick = shared.settings.lock().unwrap().task.tick_interval;
        drop(shared);
        tokio::time::sleep(tick).await;
    }
}

/// Removes every stream whose socket has already closed, reporting each
/// disconnect exactly once. Runs before admission so a freed slot is
/// available in the same iteration.
async fn sweep(shared: &Arc<Shared>) {
    let current = shared.clients.lock().unwrap().clone();
    let mut closed = Vec::new();
    for stream in current {
        if !stream.is_open().await {
            closed.push(stream);
        }
    }
    if closed.is_empty() {
        return;
    }
    {
        let mut clients = shared.clients.lock().unwrap();
        clients.retain(|stream| closed.iter().all(|gone| gone.id() != stream.id()));
    }
    for stream in closed {
        debug!(stream = %stream.id(), "client disconnected");
        let _ = shared.events.send(ServerEvent::ClientDisconnected(stream));
    }
}

/// Accepts pending connections until the client set is full or one empty
/// poll reports nothing pending; past-ceiling connections stay queued in the
/// OS backlog.
async fn admit(shared: &Arc<Shared>, listener: &TcpListener) {
    loop {
        let (max_clients, options) = {
            let settings = shared.settings.lock().unwrap();
            (settings.max_clients, settings.options.clone())
        };
        if shared.clients.lock().unwrap().len() >= max_clients {
            return;
        }
        match listener.accept().now_or_never() {
            Some(Ok((socket, _))) => {
                let stream = Arc::new(NetworkStream::new(socket));
                if let Err(e) = stream.apply_options(&options).await {
                    debug!(stream = %stream.id(), error = %e, "failed to apply socket options at accept");
                }
                debug!(stream = %stream.id(), "client connected");
                shared.clients.lock().unwrap().push(stream.clone());
                let _ = shared.events.send(ServerEvent::ClientConnected(stream));
            }
            Some(Err(e)) => {
                debug!(error = %e, "accept failed");
                return;
            }
            None => return,
        }
    }
}

/// Invokes the request handler once for each stream that currently has
/// readable bytes. The readable probe doubles as lazy close detection, so a
/// peer that disconnected is picked up by the next sweep.
async fn dispatch(shared: &Arc<Shared>) {
    let streams = shared.clients.lock().unwrap().clone();
    if streams.is_empty() {
        return;
    }
    let server = TcpServer { shared: Arc::clone(shared) };
    for stream in streams {
        if stream.readable_size().await == 0 {
            continue;
        }
        let request = shared.handler.handle_request(&server, &stream);
        if let Err(e) = IN_DISPATCH.scope((), request).await {
            debug!(stream = %stream.id(), error = %e, "request handler failed");
        }
    }
}

async fn teardown_clients(shared: &Arc<Shared>) {
    let streams: Vec<_> = {
        shared.clients.lock().unwrap().drain(..).collect()
    };
    for stream in streams {
        let _ = stream.close().await;
    }
}
