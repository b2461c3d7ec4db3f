//! Listener lifecycle: `fire` binds and serves, `finish` drains and stops.

use crate::app::{Bonfire, Core};
use crate::blow::Blowing;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::http::{Method, Request, Response};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::fs::File;
use std::future::Future;
use std::io::{self, BufReader as StdBufReader};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex, Semaphore};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Where an instance is in its life. `Stopped` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Listening,
    Draining,
    Stopped,
}

/// PEM certificate chain and private key for HTTPS.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    cert_file: PathBuf,
    key_file: PathBuf,
}

impl TlsConfig {
    pub fn new<P: AsRef<Path>>(cert_file: P, key_file: P) -> Self {
        Self {
            cert_file: cert_file.as_ref().to_path_buf(),
            key_file: key_file.as_ref().to_path_buf(),
        }
    }

    fn load_certs(&self) -> Result<Vec<CertificateDer<'static>>> {
        let mut reader = StdBufReader::new(open(&self.cert_file)?);
        let certs = rustls_pemfile::certs(&mut reader)
            .collect::<io::Result<Vec<_>>>()
            .map_err(|e| Error::Tls(format!("{}: {e}", self.cert_file.display())))?;
        if certs.is_empty() {
            return Err(Error::Tls(format!("no certificate found in {}", self.cert_file.display())));
        }
        Ok(certs)
    }

    fn load_key(&self) -> Result<PrivateKeyDer<'static>> {
        let mut reader = StdBufReader::new(open(&self.key_file)?);
        rustls_pemfile::private_key(&mut reader)
            .map_err(|e| Error::Tls(format!("{}: {e}", self.key_file.display())))?
            .ok_or_else(|| Error::Tls(format!("no private key found in {}", self.key_file.display())))
    }

    pub(crate) fn acceptor(&self) -> Result<TlsAcceptor> {
        let certs = self.load_certs()?;
        let key = self.load_key()?;
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| Error::Tls(e.to_string()))?;
        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| Error::Tls(format!("{}: {e}", path.display())))
}

/// Turns `"8080"` and `":8080"` into `"0.0.0.0:8080"`; `host:port` is kept.
pub(crate) fn normalize_addr(addr: &str) -> Result<String> {
    let addr = addr.trim();
    let (host, port) = addr.rsplit_once(':').unwrap_or(("", addr));
    if port.parse::<u16>().is_err() {
        return Err(Error::InvalidAddress(addr.to_string()));
    }
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    Ok(format!("{host}:{port}"))
}

pub(crate) struct Lifecycle {
    slot: Mutex<Option<Listening>>,
    state: watch::Sender<State>,
    local_addr: OnceLock<SocketAddr>,
    /// Whether the latest `fire` gave up before its listener opened.
    failed: watch::Sender<bool>,
    /// Parent of every background task token; cancelled once stopped.
    token: CancellationToken,
}

/// The open listener and what `finish` needs to wind it down.
struct Listening {
    /// Stops accepting and closes idle connections.
    shutdown: CancellationToken,
    /// Drops connections still open after the grace period.
    force: CancellationToken,
    tracker: TaskTracker,
    blowing: Blowing,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            state: watch::Sender::new(State::Idle),
            local_addr: OnceLock::new(),
            failed: watch::Sender::new(false),
            token: CancellationToken::new(),
        }
    }
}

impl<B: Send + Sync + 'static> Bonfire<B> {
    /// Binds `addr` and serves until [`Bonfire::finish`] closes the listener.
    ///
    /// `addr` is `"host:port"`, `":port"` or a bare `"port"`; the last two
    /// listen on every interface, and port `0` picks a free one (see
    /// [`Bonfire::local_addr`]). Start triggers and cron tasks begin once the
    /// socket is bound.
    ///
    /// Firing an instance that is already listening does not bind again: the
    /// call just waits for the listener to close. Firing a finished instance
    /// fails with [`Error::Stopped`].
    pub async fn fire(&self, addr: &str) -> Result<()> {
        let mut slot = self.lifecycle.slot.lock().await;
        if let Some(listening) = slot.as_ref() {
            let closed = listening.shutdown.clone();
            drop(slot);
            tracing::debug!(addr, "already listening, waiting for the listener to close");
            closed.cancelled().await;
            return Ok(());
        }
        if self.state() == State::Stopped {
            return Err(Error::Stopped);
        }

        self.lifecycle.failed.send_replace(false);
        let (listener, tls, local_addr) = match self.bind(addr).await {
            Ok(bound) => bound,
            Err(err) => {
                self.lifecycle.failed.send_replace(true);
                return Err(err);
            }
        };
        let _ = self.lifecycle.local_addr.set(local_addr);

        let blowing = self.core.blow.start(&self.core.env, &self.lifecycle.token);

        let shutdown = CancellationToken::new();
        let force = CancellationToken::new();
        let tracker = TaskTracker::new();
        let acceptor = Acceptor {
            core: Arc::clone(&self.core),
            listener,
            tls,
            limit: Arc::new(Semaphore::new(self.core.config.max_connections)),
            shutdown: shutdown.clone(),
            force: force.clone(),
            tracker: tracker.clone(),
        };
        let accepting = tracker.spawn(acceptor.run());

        tracing::info!(
            addr = %local_addr,
            tls = self.core.tls.is_some(),
            max_connections = self.core.config.max_connections,
            "listening"
        );
        *slot = Some(Listening {
            shutdown,
            force,
            tracker,
            blowing,
        });
        self.lifecycle.state.send_replace(State::Listening);
        drop(slot);

        accepting.await.map_err(io::Error::other)?;
        Ok(())
    }

    async fn bind(&self, addr: &str) -> Result<(TcpListener, Option<TlsAcceptor>, SocketAddr)> {
        let addr = normalize_addr(addr)?;
        let tls = self.core.tls.as_ref().map(TlsConfig::acceptor).transpose()?;
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| Error::Bind { addr: addr.clone(), source })?;
        let local_addr = listener.local_addr()?;
        Ok((listener, tls, local_addr))
    }

    /// Stops the server.
    ///
    /// The listener closes and idle connections are dropped at once; requests
    /// in flight get until `grace` completes to finish. Connections still open
    /// then are closed and the call reports [`Error::ShutdownTimeout`], after
    /// the remaining steps have run anyway. Stop triggers run to completion
    /// before this returns.
    pub async fn finish<F: Future>(&self, grace: F) -> Result<()> {
        let mut slot = self.lifecycle.slot.lock().await;
        let Some(listening) = slot.take() else {
            return Err(Error::NotListening);
        };
        self.lifecycle.state.send_replace(State::Draining);
        tracing::info!("shutting down");

        listening.shutdown.cancel();
        listening.tracker.close();
        let drained = tokio::select! {
            _ = listening.tracker.wait() => true,
            _ = grace => false,
        };
        if !drained {
            tracing::warn!(
                remaining = listening.tracker.len(),
                "grace period over, closing open connections"
            );
            listening.force.cancel();
            listening.tracker.wait().await;
        }

        self.core
            .blow
            .stop(listening.blowing, &self.core.env, &self.lifecycle.token)
            .await;
        self.lifecycle.token.cancel();
        self.lifecycle.state.send_replace(State::Stopped);
        drop(slot);
        tracing::info!("server stopped");

        if drained {
            Ok(())
        } else {
            Err(Error::ShutdownTimeout)
        }
    }

    /// [`Bonfire::finish`] with a fixed grace period.
    pub async fn finish_within(&self, grace: Duration) -> Result<()> {
        self.finish(tokio::time::sleep(grace)).await
    }

    pub fn state(&self) -> State {
        *self.lifecycle.state.borrow()
    }

    /// The bound socket address, once `fire` has bound it.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle.local_addr.get().copied()
    }

    /// Waits until `fire` has bound the listener and returns its address.
    ///
    /// Fails with [`Error::NotListening`] if the server is already shutting
    /// down or stopped, or if the latest `fire` failed before binding (bad
    /// address, TLS files, port in use). `fire` itself returns the cause.
    pub async fn listening(&self) -> Result<SocketAddr> {
        let mut state = self.lifecycle.state.subscribe();
        let mut failed = self.lifecycle.failed.subscribe();
        let reached = tokio::select! {
            reached = state.wait_for(|state| *state != State::Idle) => {
                reached.map(|state| *state).map_err(|_| Error::NotListening)?
            }
            _ = failed.wait_for(|failed| *failed) => return Err(Error::NotListening),
        };
        match (reached, self.local_addr()) {
            (State::Listening, Some(addr)) => Ok(addr),
            _ => Err(Error::NotListening),
        }
    }
}

struct Acceptor<B> {
    core: Arc<Core<B>>,
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    limit: Arc<Semaphore>,
    shutdown: CancellationToken,
    force: CancellationToken,
    tracker: TaskTracker,
}

impl<B: Send + Sync + 'static> Acceptor<B> {
    async fn run(self) {
        loop {
            let permit = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                permit = Arc::clone(&self.limit).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let (stream, peer) = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        tracing::warn!(error = %err, "accept failed");
                        continue;
                    }
                },
            };

            let core = Arc::clone(&self.core);
            let tls = self.tls.clone();
            let shutdown = self.shutdown.clone();
            let force = self.force.clone();
            self.tracker.spawn(async move {
                let _permit = permit;
                tracing::debug!(%peer, "connection opened");
                tokio::select! {
                    _ = force.cancelled() => {
                        tracing::debug!(%peer, "connection force-closed");
                    }
                    result = connect(core, stream, tls, shutdown) => {
                        if let Err(err) = result {
                            tracing::debug!(%peer, error = %err, "connection error");
                        }
                    }
                }
            });
        }
        tracing::debug!("listener closed");
    }
}

async fn connect<B: Send + Sync + 'static>(
    core: Arc<Core<B>>,
    stream: TcpStream,
    tls: Option<TlsAcceptor>,
    shutdown: CancellationToken,
) -> io::Result<()> {
    match tls {
        Some(acceptor) => {
            let stream = acceptor.accept(stream).await?;
            serve_connection(core, stream, shutdown).await
        }
        None => serve_connection(core, stream, shutdown).await,
    }
}

enum Incoming {
    Request(Request),
    Closed,
    Rejected(u16),
}

/// Serves requests off one connection until the client or the keep-alive
/// timer closes it, or draining starts while it is idle.
async fn serve_connection<B, S>(core: Arc<Core<B>>, stream: S, shutdown: CancellationToken) -> io::Result<()>
where
    B: Send + Sync + 'static,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let keep_alive = core.config.keep_alive;
    let mut reader = BufReader::new(stream);

    loop {
        // the idle timer covers the wait for a request, not its transfer
        let arrived = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            waited = tokio::time::timeout(keep_alive, async {
                reader.fill_buf().await.map(|buf| !buf.is_empty())
            }) => match waited {
                Ok(arrived) => arrived?,
                Err(_) => return Ok(()),
            },
        };
        if !arrived {
            return Ok(());
        }

        let request = match read_request(&mut reader, &core.config).await? {
            Incoming::Request(request) => request,
            Incoming::Closed => return Ok(()),
            Incoming::Rejected(status) => {
                tracing::debug!(status, "request rejected");
                write_response(reader.get_mut(), &Response::new(status), false, true).await?;
                linger(&mut reader).await;
                return Ok(());
            }
        };

        let wants_keep_alive = request.keep_alive();
        let with_body = request.method() != Method::HEAD.as_str();
        let core = Arc::clone(&core);
        // a detached task: the handler outlives a force-closed connection
        let response = match tokio::spawn(async move { core.dispatch(request).await }).await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(error = %err, "dispatch task failed");
                Response::new(500)
            }
        };

        let keep_alive = wants_keep_alive && !shutdown.is_cancelled();
        write_response(reader.get_mut(), &response, keep_alive, with_body).await?;
        if !keep_alive {
            return Ok(());
        }
    }
}

async fn write_response<S: AsyncWrite + Unpin>(
    stream: &mut S,
    response: &Response,
    keep_alive: bool,
    with_body: bool,
) -> io::Result<()> {
    stream.write_all(&response.to_bytes(keep_alive, with_body)).await?;
    stream.flush().await
}

/// Half-closes the connection, then drains what the client is still sending
/// so the reply is not discarded by a reset.
async fn linger<S: AsyncRead + AsyncWrite + Unpin>(reader: &mut BufReader<S>) {
    let _ = reader.get_mut().shutdown().await;
    let mut sink = [0u8; 4096];
    let _ = tokio::time::timeout(LINGER, async {
        while matches!(reader.read(&mut sink).await, Ok(n) if n > 0) {}
    })
    .await;
}

const LINGER: Duration = Duration::from_secs(1);

/// Reads one request head and body.
///
/// The head is bounded by `max_header_size` and `max_headers` (431 beyond
/// either). `Transfer-Encoding` bodies are refused with 501 since only
/// `Content-Length` framing is understood.
async fn read_request<R: AsyncBufRead + Unpin>(reader: &mut R, config: &Config) -> io::Result<Incoming> {
    let mut budget = config.max_header_size;
    let mut request_line = String::new();
    match read_head_line(reader, &mut budget, &mut request_line).await? {
        None => return Ok(Incoming::Rejected(431)),
        Some(0) => return Ok(Incoming::Closed),
        Some(_) => {}
    }
    // tolerate a stray CRLF left after the previous request
    if request_line.trim().is_empty() {
        request_line.clear();
        match read_head_line(reader, &mut budget, &mut request_line).await? {
            None => return Ok(Incoming::Rejected(431)),
            Some(0) => return Ok(Incoming::Closed),
            Some(_) => {}
        }
    }

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Ok(Incoming::Rejected(400));
    };
    let mut request = Request::new(method, target);

    let mut fields = 0;
    loop {
        let mut line = String::new();
        match read_head_line(reader, &mut budget, &mut line).await? {
            None => return Ok(Incoming::Rejected(431)),
            Some(0) => return Ok(Incoming::Closed),
            Some(_) => {}
        }
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        fields += 1;
        if fields > config.max_headers {
            return Ok(Incoming::Rejected(431));
        }
        if let Some((key, value)) = line.split_once(':') {
            request.headers.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }

    if request.get_header("transfer-encoding").is_some() {
        return Ok(Incoming::Rejected(501));
    }
    let content_length = match request.get_header("content-length") {
        None => 0,
        Some(length) => match length.parse::<usize>() {
            Ok(length) => length,
            Err(_) => return Ok(Incoming::Rejected(400)),
        },
    };
    if content_length > config.max_body_size {
        return Ok(Incoming::Rejected(413));
    }
    if content_length > 0 {
        let mut body = vec![0; content_length];
        reader.read_exact(&mut body).await?;
        request.body = body;
    }
    Ok(Incoming::Request(request))
}

/// Reads one head line into `line`, charging it against `budget`.
///
/// `None` means the line does not fit in what is left of the budget.
async fn read_head_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    budget: &mut usize,
    line: &mut String,
) -> io::Result<Option<usize>> {
    if *budget == 0 {
        return Ok(None);
    }
    let read = (&mut *reader).take(*budget as u64).read_line(line).await?;
    *budget -= read;
    if *budget == 0 && !line.ends_with('\n') {
        return Ok(None);
    }
    Ok(Some(read))
}
