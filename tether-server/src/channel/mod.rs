//! Command channel to the downstream peer
//!
//! Owns the single live peer connection and multiplexes command/reply pairs
//! over it. Attaching a new connection closes the previous one: the newest
//! peer is authoritative and calls pending on the old one fail with
//! [`ChannelError::ChannelClosed`] instead of being retried elsewhere.
//!
//! At most one command is outstanding per connection. Callers queue on an
//! async gate, and replies pair with the outstanding command in FIFO order.

pub mod connection;

pub use connection::{PeerConnection, PeerEnd, PeerFrame, FRAME_QUEUE_DEPTH};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use base64::Engine as _;
use parking_lot::Mutex;
use tether_protocol::{PeerCommand, PeerReply};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Command channel errors
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// No peer is attached
    #[error("No browser peer connected. Connect the browser extension and retry")]
    NoConnection,

    /// The connection was replaced, closed or dropped before a reply arrived
    #[error("Peer connection closed before a reply arrived")]
    ChannelClosed,

    /// The peer did not reply in time
    #[error("No reply from peer within {0:?}")]
    Timeout(Duration),

    /// The peer answered with an error
    #[error("Peer reported an error: {0}")]
    Peer(String),

    /// The command could not be serialized
    #[error("Failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

type ReplySlot = oneshot::Sender<Result<serde_json::Value, ChannelError>>;
type ReplyWait = oneshot::Receiver<Result<serde_json::Value, ChannelError>>;

/// The one in-flight command on a link
struct PendingCall {
    id: Uuid,
    command: String,
    reply_tx: ReplySlot,
}

impl PendingCall {
    fn resolve(self, outcome: Result<serde_json::Value, ChannelError>) {
        // The waiter may have given up (timeout); nothing to do then
        let _ = self.reply_tx.send(outcome);
    }
}

/// An attached connection as seen by the channel
struct Link {
    id: Uuid,
    label: String,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    pending: Mutex<Option<PendingCall>>,
}

impl Link {
    fn new(label: String, outbound: mpsc::Sender<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label,
            outbound: Mutex::new(Some(outbound)),
            pending: Mutex::new(None),
        }
    }

    fn is_open(&self) -> bool {
        self.outbound.lock().is_some()
    }

    /// Install the pending call for a command about to be written
    fn register(&self, id: Uuid, command: &str) -> Result<ReplyWait, ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::ChannelClosed);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let previous = self.pending.lock().replace(PendingCall {
            id,
            command: command.to_string(),
            reply_tx,
        });
        if let Some(stale) = previous {
            // Unreachable while the gate is held; fail it rather than leak it
            warn!(link = %self.id, command = %stale.command, "Replacing an unresolved pending call");
            stale.resolve(Err(ChannelError::ChannelClosed));
        }
        Ok(reply_rx)
    }

    /// Drop the pending call with the given id without resolving it
    fn abandon(&self, id: Uuid) {
        let mut pending = self.pending.lock();
        if pending.as_ref().is_some_and(|call| call.id == id) {
            pending.take();
        }
    }

    async fn write(&self, frame: String) -> Result<(), ChannelError> {
        let sender = self
            .outbound
            .lock()
            .clone()
            .ok_or(ChannelError::ChannelClosed)?;

        sender
            .send(frame)
            .await
            .map_err(|_| ChannelError::ChannelClosed)
    }

    /// Hand a reply to the outstanding call
    fn deliver(&self, reply: PeerReply) {
        let mut pending = self.pending.lock();
        match pending.take() {
            None => {
                warn!(peer = %self.label, "Discarding peer reply with no outstanding command");
            }
            Some(call) if !reply.answers(&call.id) => {
                warn!(
                    peer = %self.label,
                    command = %call.command,
                    reply_id = ?reply.id,
                    "Discarding stale peer reply"
                );
                *pending = Some(call);
            }
            Some(call) => {
                debug!(peer = %self.label, command = %call.command, "Peer reply received");
                call.resolve(reply.outcome.map_err(ChannelError::Peer));
            }
        }
    }

    /// Close the link; the pending call, if any, fails with `ChannelClosed`
    fn close(&self) {
        self.outbound.lock().take();
        if let Some(call) = self.pending.lock().take() {
            debug!(peer = %self.label, command = %call.command, "Failing pending call on closed link");
            call.resolve(Err(ChannelError::ChannelClosed));
        }
    }
}

/// Slot contents: the link and the task reading its inbound frames
struct Attached {
    link: Arc<Link>,
    reader: JoinHandle<()>,
}

impl Attached {
    fn close(self) {
        self.reader.abort();
        self.link.close();
    }
}

struct Shared {
    slot: Mutex<Option<Attached>>,
    closed: AtomicBool,
}

impl Shared {
    /// Remove the attached link if it is still `link`
    fn detach_if_current(&self, link: &Arc<Link>) -> Option<Attached> {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|a| Arc::ptr_eq(&a.link, link)) {
            slot.take()
        } else {
            None
        }
    }
}

/// Guard for the command awaiting its reply
///
/// Dropped while still armed (the caller's future was cancelled, or the reply
/// timed out) it abandons the pending call and drops the link, so a late
/// reply can never resolve a later command.
struct InFlight<'a> {
    shared: &'a Shared,
    link: Arc<Link>,
    call: Uuid,
    armed: bool,
}

impl<'a> InFlight<'a> {
    fn new(shared: &'a Shared, link: Arc<Link>, call: Uuid) -> Self {
        Self {
            shared,
            link,
            call,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.link.abandon(self.call);
        if let Some(attached) = self.shared.detach_if_current(&self.link) {
            warn!(peer = %self.link.label, call = %self.call, "Command abandoned before its reply, dropping connection");
            attached.close();
        }
    }
}

/// The single-slot command channel
pub struct CommandChannel {
    shared: Arc<Shared>,
    gate: tokio::sync::Mutex<()>,
    response_timeout: Option<Duration>,
}

impl CommandChannel {
    /// Create a channel; `None` waits for replies indefinitely
    pub fn new(response_timeout: Option<Duration>) -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
            gate: tokio::sync::Mutex::new(()),
            response_timeout,
        }
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout
    }

    /// Attach a connection, closing the one currently attached
    ///
    /// Must be called from within a Tokio runtime.
    pub fn attach(&self, connection: PeerConnection) {
        if self.shared.closed.load(Ordering::SeqCst) {
            info!(peer = %connection.label(), "Channel closed, refusing peer connection");
            return;
        }

        let PeerConnection {
            label,
            outbound,
            inbound,
        } = connection;

        let link = Arc::new(Link::new(label, outbound));
        let reader = tokio::spawn(read_loop(
            Arc::downgrade(&self.shared),
            Arc::clone(&link),
            inbound,
        ));

        let previous = {
            let mut slot = self.shared.slot.lock();
            // Re-check under the lock so a racing close() never leaves a link behind
            if self.shared.closed.load(Ordering::SeqCst) {
                drop(slot);
                reader.abort();
                link.close();
                return;
            }
            slot.replace(Attached {
                link: Arc::clone(&link),
                reader,
            })
        };

        info!(peer = %link.label, link = %link.id, "Peer attached");

        if let Some(previous) = previous {
            info!(
                peer = %previous.link.label,
                link = %previous.link.id,
                "Closing previous peer connection"
            );
            previous.close();
        }
    }

    /// Whether a connection is currently attached
    pub fn is_attached(&self) -> bool {
        self.shared.slot.lock().is_some()
    }

    /// Label of the attached connection, if any
    pub fn peer_label(&self) -> Option<String> {
        self.shared
            .slot
            .lock()
            .as_ref()
            .map(|a| a.link.label.clone())
    }

    fn current_link(&self) -> Option<Arc<Link>> {
        self.shared
            .slot
            .lock()
            .as_ref()
            .map(|a| Arc::clone(&a.link))
    }

    /// Send a command and wait for its reply
    pub async fn send(
        &self,
        command: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, ChannelError> {
        let _turn = self.gate.lock().await;

        let link = self.current_link().ok_or(ChannelError::NoConnection)?;

        let cmd = PeerCommand::new(command, args);
        let frame = cmd.encode()?;
        let reply_rx = link.register(cmd.id, command)?;

        debug!(peer = %link.label, command = %command, call = %cmd.id, "Sending command to peer");

        // Held until the reply arrives; cancelling this future drops the link
        let in_flight = InFlight::new(&self.shared, Arc::clone(&link), cmd.id);

        if let Err(e) = link.write(frame).await {
            in_flight.disarm();
            link.abandon(cmd.id);
            return Err(e);
        }

        let outcome = match self.response_timeout {
            Some(limit) => match tokio::time::timeout(limit, reply_rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        peer = %link.label,
                        command = %command,
                        timeout = ?limit,
                        "Peer did not reply in time, dropping connection"
                    );
                    drop(in_flight);
                    return Err(ChannelError::Timeout(limit));
                }
            },
            None => reply_rx.await,
        };

        in_flight.disarm();
        outcome.unwrap_or(Err(ChannelError::ChannelClosed))
    }

    /// Close the attached connection and refuse new ones
    ///
    /// Idempotent.
    pub fn close(&self) {
        let was_closed = self.shared.closed.swap(true, Ordering::SeqCst);
        let attached = self.shared.slot.lock().take();

        if let Some(attached) = attached {
            info!(peer = %attached.link.label, "Closing peer connection");
            attached.close();
        } else if !was_closed {
            debug!("Command channel closed with no peer attached");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl Drop for CommandChannel {
    fn drop(&mut self) {
        if let Some(attached) = self.shared.slot.lock().take() {
            attached.close();
        }
    }
}

/// Read inbound frames of one link until the peer goes away
async fn read_loop(shared: Weak<Shared>, link: Arc<Link>, mut inbound: mpsc::Receiver<PeerFrame>) {
    while let Some(frame) = inbound.recv().await {
        let reply = match frame {
            PeerFrame::Text(text) => PeerReply::decode(&text),
            PeerFrame::Binary(bytes) => PeerReply::payload(serde_json::Value::String(
                base64::engine::general_purpose::STANDARD.encode(bytes),
            )),
        };
        link.deliver(reply);
    }

    info!(peer = %link.label, link = %link.id, "Peer disconnected");

    if let Some(shared) = shared.upgrade() {
        // This task is finishing on its own; drop the handle instead of aborting
        if let Some(attached) = shared.detach_if_current(&link) {
            drop(attached.reader);
        }
    }
    link.close();
}
