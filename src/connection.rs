//! The connection orchestrator.
//!
//! Owns the socket, runs the read loop, and coordinates the lifecycle of
//! `Unconnected -> Handshaking -> Ready -> Terminated`.

use std::{collections::HashMap, panic::AssertUnwindSafe, sync::Arc};

use futures_util::StreamExt;
use tokio::{
    io::{split, AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::{oneshot, Mutex as AsyncMutex},
    task::AbortHandle,
};
use tokio_util::codec::FramedRead;

use crate::{
    auth::Password,
    cancel::CancellationToken,
    codec::{self, decode::Identifier, Message},
    config::RelayConfig,
    error::{RelayError, Result},
    events,
    framing::WeechatCodec,
    registry::Registry,
    value::Value,
    writequeue::{WriteEntry, WriteQueue},
};

/// `Unconnected -> Handshaking -> Ready -> Terminated`. See the
/// connection orchestrator design notes for the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Handshaking,
    Ready,
    Terminated,
}

/// A handler for one recognized server-push event. Must not block (it
/// runs inline on the read loop) and is not expected to return a result:
/// a handler that panics is caught and logged, matching the "errors
/// within a single event handler are logged and swallowed" rule, without
/// tearing the connection down.
pub type EventHandler = Box<dyn Fn(&Message) + Send + Sync>;

struct Shared<S> {
    config: RelayConfig,
    registry: Registry,
    write_queue: WriteQueue,
    writer: AsyncMutex<WriteHalf<S>>,
    pending_read_half: std::sync::Mutex<Option<ReadHalf<S>>>,
    read_task: std::sync::Mutex<Option<AbortHandle>>,
    state: std::sync::Mutex<ConnectionState>,
    handlers: std::sync::Mutex<HashMap<String, EventHandler>>,
    password: std::sync::Mutex<Option<Password>>,
}

/// A WeeChat relay connection over an already-established duplex byte
/// stream. Socket and TLS establishment are the caller's responsibility;
/// `S` is typically a `tokio::net::TcpStream`.
pub struct Relay<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for Relay<S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<S> std::fmt::Debug for Relay<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<S> Relay<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Attaches `stream` as the connection's transport. The connection
    /// starts `Unconnected`; the read loop does not start until
    /// [`Relay::init`] is called.
    pub fn new(stream: S, config: RelayConfig) -> Self {
        let (read_half, write_half) = split(stream);

        let shared = Arc::new(Shared {
            config,
            registry: Registry::new(),
            write_queue: WriteQueue::new(),
            writer: AsyncMutex::new(write_half),
            // The read loop doesn't start until `init`; until then the
            // read half just waits here.
            pending_read_half: std::sync::Mutex::new(Some(read_half)),
            read_task: std::sync::Mutex::new(None),
            state: std::sync::Mutex::new(ConnectionState::Unconnected),
            handlers: std::sync::Mutex::new(HashMap::new()),
            password: std::sync::Mutex::new(None),
        });

        Self { shared }
    }

    pub fn set_password(&self, password: &str) {
        *self.shared.password.lock().unwrap() = Some(Password::new(password));
    }

    pub fn register_event_handler(
        &self,
        event_id: &str,
        handler: impl Fn(&Message) + Send + Sync + 'static,
    ) {
        self.shared
            .handlers
            .lock()
            .unwrap()
            .insert(event_id.to_string(), Box::new(handler));
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock().unwrap()
    }

    /// Drives `Unconnected -> Handshaking -> Ready`: starts the read
    /// loop, enqueues `init [password=...]`, then enqueues a `ping` and
    /// waits for its `_pong`.
    pub async fn init(&self, cancel: Option<CancellationToken>) -> Result<()> {
        {
            let mut state = self.shared.state.lock().unwrap();
            if *state != ConnectionState::Unconnected {
                return Err(RelayError::InvalidData(
                    "init called outside of the Unconnected state".into(),
                ));
            }
            *state = ConnectionState::Handshaking;
        }

        let read_half = self
            .shared
            .pending_read_half
            .lock()
            .unwrap()
            .take()
            .expect("init called more than once");
        Self::spawn_read_loop(self.shared.clone(), read_half);

        let password = self
            .shared
            .password
            .lock()
            .unwrap()
            .as_ref()
            .map(|p| p.as_str().to_string());
        let init_cmd = codec::InitCommand {
            password: password.as_deref(),
        };
        self.enqueue_write(codec::encode_to_vec(&init_cmd), None)
            .await;

        match self.ping(None, cancel).await {
            Ok(_) => {
                *self.shared.state.lock().unwrap() = ConnectionState::Ready;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Sends a `ping`, optionally carrying `text`, and returns the
    /// echoed text (empty if none was sent).
    pub async fn ping(
        &self,
        text: Option<&str>,
        cancel: Option<CancellationToken>,
    ) -> Result<String> {
        if self.state() == ConnectionState::Terminated {
            return Err(RelayError::Cancelled);
        }

        let (tx, rx) = oneshot::channel();
        let id = self.shared.registry.register(tx);

        let ping_cmd = codec::PingCommand { id, text };
        self.enqueue_write(codec::encode_to_vec(&ping_cmd), cancel.clone())
            .await;

        let resolved = if let Some(cancel) = cancel {
            tokio::select! {
                res = rx => res.map_err(|_| RelayError::Cancelled),
                _ = cancel.cancelled() => {
                    self.shared.registry.remove(id);
                    Err(RelayError::Cancelled)
                }
            }
        } else {
            rx.await.map_err(|_| RelayError::Cancelled)
        };

        resolved?
    }

    /// Idempotently tears the connection down.
    pub async fn close(&self) {
        self.teardown(None).await;
    }

    async fn enqueue_write(&self, data: Vec<u8>, cancel: Option<CancellationToken>) {
        let entry = match cancel {
            Some(cancel) => WriteEntry::with_cancellation(data, cancel),
            None => WriteEntry::new(data),
        };

        let should_drive = self.shared.write_queue.enqueue(entry).await;
        if should_drive {
            let shared = self.shared.clone();
            tokio::spawn(async move {
                let result = {
                    let mut writer = shared.writer.lock().await;
                    shared.write_queue.run(&mut *writer).await
                };
                if let Err(err) = result {
                    log::error!("write loop failed: {err}");
                    Shared::teardown_shared(&shared, Some(err)).await;
                }
            });
        }
    }

    async fn teardown(&self, cause: Option<RelayError>) {
        Shared::teardown_shared(&self.shared, cause).await;
    }

    /// Spawns the read loop and stashes its [`AbortHandle`] so teardown can
    /// force it to unblock even while parked inside `framed.next()`.
    fn spawn_read_loop(shared: Arc<Shared<S>>, read_half: ReadHalf<S>) {
        let task_shared = shared.clone();
        let handle = tokio::spawn(async move {
            let mut framed = FramedRead::with_capacity(
                read_half,
                WeechatCodec::new(task_shared.config.max_frame_len),
                task_shared.config.initial_buffer_capacity,
            );

            loop {
                match framed.next().await {
                    Some(Ok(payload)) => {
                        if let Err(err) = Shared::dispatch(&task_shared, &payload) {
                            log::error!("decode failed, terminating connection: {err}");
                            Shared::teardown_shared(&task_shared, Some(err)).await;
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        log::error!("framing failed, terminating connection: {err}");
                        Shared::teardown_shared(&task_shared, Some(err)).await;
                        break;
                    }
                    None => {
                        Shared::teardown_shared(
                            &task_shared,
                            Some(RelayError::Io(std::io::Error::new(
                                std::io::ErrorKind::UnexpectedEof,
                                "relay closed the connection",
                            ))),
                        )
                        .await;
                        break;
                    }
                }
            }
        });

        *shared.read_task.lock().unwrap() = Some(handle.abort_handle());
    }
}

impl<S> Shared<S> {
    /// Idempotent. Besides cancelling pending commands and draining the
    /// write queue, this shuts the write half down and aborts the read
    /// loop task so a read parked in `framed.next()` cannot block the
    /// connection open forever.
    async fn teardown_shared(shared: &Arc<Shared<S>>, cause: Option<RelayError>)
    where
        S: AsyncWrite + Unpin,
    {
        {
            let mut state = shared.state.lock().unwrap();
            if *state == ConnectionState::Terminated {
                return;
            }
            *state = ConnectionState::Terminated;
        }

        if let Some(err) = &cause {
            log::error!("connection terminated: {err}");
        }

        shared.registry.cancel_all();
        shared.write_queue.cancel_all().await;

        if let Some(handle) = shared.read_task.lock().unwrap().take() {
            handle.abort();
        }

        let mut writer = shared.writer.lock().await;
        if let Err(err) = writer.shutdown().await {
            log::warn!("failed to shut down write half during teardown: {err}");
        }
    }

    fn dispatch(shared: &Arc<Shared<S>>, payload: &[u8]) -> Result<()> {
        let message = codec::decode_message(payload)?;

        match &message.identifier {
            Identifier::None => {
                log::trace!("message with no identifier and {} value(s)", message.values.len());
            }
            Identifier::Event(name) => Self::dispatch_event(shared, name, &message),
            Identifier::Correlation(text) => Self::dispatch_correlation(shared, text, &message),
        }

        Ok(())
    }

    fn dispatch_event(shared: &Arc<Shared<S>>, name: &str, message: &Message) {
        if name == events::PONG {
            Self::handle_pong(shared, message);
            return;
        }

        let handlers = shared.handlers.lock().unwrap();
        let Some(handler) = handlers.get(name) else {
            log::trace!("no handler registered for event {name:?}");
            return;
        };

        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| handler(message)));
        if outcome.is_err() {
            log::warn!("event handler for {name:?} panicked; event dropped");
        }
    }

    /// The mandatory `_pong` handler: payload is a single `str` of the
    /// form `"<hex-id>"` or `"<hex-id> <text>"`. A miss is logged and
    /// discarded, not fatal -- a stale or duplicate pong must not tear
    /// the connection down.
    fn handle_pong(shared: &Arc<Shared<S>>, message: &Message) {
        let Some(Value::String(Some(bytes))) = message.values.first() else {
            log::warn!("received _pong with an unexpected payload shape, ignoring");
            return;
        };

        let Ok(text) = std::str::from_utf8(bytes) else {
            log::warn!("received _pong with non-utf8 payload, ignoring");
            return;
        };

        let (hex_id, rest) = match text.split_once(' ') {
            Some((id, rest)) => (id, Some(rest.to_string())),
            None => (text, None),
        };

        let Ok(id) = u32::from_str_radix(hex_id, 16) else {
            log::warn!("received _pong with malformed id {hex_id:?}, ignoring");
            return;
        };

        if !shared.registry.resolve(id, Ok(rest.unwrap_or_default())) {
            log::warn!("received _pong for unknown or already-resolved command {id:x}, ignoring");
        }
    }

    fn dispatch_correlation(shared: &Arc<Shared<S>>, text: &str, message: &Message) {
        let Ok(id) = u32::from_str_radix(text, 16) else {
            log::warn!("correlation identifier {text:?} is not valid hex, ignoring");
            return;
        };

        let result = message
            .values
            .first()
            .map(|value| value.to_string())
            .unwrap_or_default();

        if !shared.registry.resolve(id, Ok(result)) {
            log::warn!("reply for unknown or already-resolved command {id:x}, ignoring");
        }
    }
}
