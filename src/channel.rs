//! A communication channel used to send/receive messages to/from other parties.

use std::{fmt, future::Future, time::Duration};

use serde::{Serialize, de::DeserializeOwned};
use tokio::{
    sync::{
        Mutex,
        mpsc::{Receiver, Sender, channel, error::SendError},
    },
    time::timeout,
};
use tracing::trace;

/// Errors related to sending / receiving / (de-)serializing messages.
#[derive(Debug, thiserror::Error)]
#[error("channel error during {phase}: {reason}")]
pub struct Error {
    /// The protocol phase during which the error occurred.
    pub phase: String,
    /// The specific error that was raised.
    pub reason: ErrorKind,
}

/// The specific error that occurred when trying to send / receive a message.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// The (serialized) message could not be received over the channel.
    #[error("could not receive message: {0}")]
    RecvError(String),
    /// The (serialized) message could not be sent over the channel.
    #[error("could not send message: {0}")]
    SendError(String),
    /// The message could not be (de-)serialized.
    #[error("could not (de-)serialize message: {0}")]
    SerdeError(String),
    /// The message is a Vec, but not of the expected length.
    #[error("expected {expected} elements, got {actual}")]
    InvalidLength {
        /// The number of elements the protocol expects.
        expected: usize,
        /// The number of elements actually received.
        actual: usize,
    },
}

/// Information about a message that is about to be sent.
#[derive(Debug, Clone)]
pub struct SendInfo {
    phase: String,
    len: usize,
}

impl SendInfo {
    /// The protocol phase the message belongs to.
    pub fn phase(&self) -> &str {
        &self.phase
    }

    /// The number of serialized bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the serialized message is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Information about a message that is about to be received.
#[derive(Debug, Clone)]
pub struct RecvInfo {
    phase: String,
}

impl RecvInfo {
    /// The protocol phase the expected message belongs to.
    pub fn phase(&self) -> &str {
        &self.phase
    }
}

/// A communication channel used to send/receive messages to/from another party.
///
/// Both methods take `&self` so that messages to and from different parties can be in flight
/// at the same time.
pub trait Channel {
    /// The error that can occur sending messages over the channel.
    type SendError: fmt::Debug;
    /// The error that can occur receiving messages over the channel.
    type RecvError: fmt::Debug;

    /// Sends a message to the party with the given index (must be between `0..parties`).
    fn send_bytes_to(
        &self,
        party: usize,
        msg: Vec<u8>,
        info: SendInfo,
    ) -> impl Future<Output = Result<(), Self::SendError>> + Send;

    /// Awaits a message from the party with the given index (must be between `0..parties`).
    fn recv_bytes_from(
        &self,
        party: usize,
        info: RecvInfo,
    ) -> impl Future<Output = Result<Vec<u8>, Self::RecvError>> + Send;
}

/// Serializes and sends a message to the other party.
pub(crate) async fn send_to<S: Serialize>(
    channel: &impl Channel,
    party: usize,
    phase: &str,
    msg: &[S],
) -> Result<(), Error> {
    let msg = bincode::serialize(msg).map_err(|e| Error {
        phase: format!("sending {phase}"),
        reason: ErrorKind::SerdeError(format!("{e:?}")),
    })?;
    let info = SendInfo {
        phase: phase.to_string(),
        len: msg.len(),
    };
    channel
        .send_bytes_to(party, msg, info)
        .await
        .map_err(|e| Error {
            phase: phase.to_string(),
            reason: ErrorKind::SendError(format!("{e:?}")),
        })
}

/// Receives and deserializes a message from the other party.
pub(crate) async fn recv_from<T: DeserializeOwned>(
    channel: &impl Channel,
    party: usize,
    phase: &str,
) -> Result<Vec<T>, Error> {
    let info = RecvInfo {
        phase: phase.to_string(),
    };
    let msg = channel
        .recv_bytes_from(party, info)
        .await
        .map_err(|e| Error {
            phase: phase.to_string(),
            reason: ErrorKind::RecvError(format!("{e:?}")),
        })?;
    bincode::deserialize(&msg).map_err(|e| Error {
        phase: format!("receiving {phase}"),
        reason: ErrorKind::SerdeError(format!("{e:?}")),
    })
}

/// Receives and deserializes a Vec from the other party (while checking the length).
pub(crate) async fn recv_vec_from<T: DeserializeOwned>(
    channel: &impl Channel,
    party: usize,
    phase: &str,
    len: usize,
) -> Result<Vec<T>, Error> {
    let v: Vec<T> = recv_from(channel, party, phase).await?;
    if v.len() == len {
        Ok(v)
    } else {
        Err(Error {
            phase: phase.to_string(),
            reason: ErrorKind::InvalidLength {
                expected: len,
                actual: v.len(),
            },
        })
    }
}

/// The default time a [`SimpleChannel`] waits for a message before giving up.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// A simple in-memory channel using tokio's [`Sender`] and [`Receiver`].
#[derive(Debug)]
pub struct SimpleChannel {
    s: Vec<Option<Sender<Vec<u8>>>>,
    r: Vec<Option<Mutex<Receiver<Vec<u8>>>>>,
    recv_timeout: Duration,
}

impl SimpleChannel {
    /// Creates channels for N parties to communicate with each other.
    pub fn channels(parties: usize) -> Vec<Self> {
        Self::channels_with_timeout(parties, DEFAULT_RECV_TIMEOUT)
    }

    /// Creates channels for N parties, giving up on a `recv` after `recv_timeout`.
    pub fn channels_with_timeout(parties: usize, recv_timeout: Duration) -> Vec<Self> {
        let buffer_capacity = 1024;
        let mut channels = vec![];
        for _ in 0..parties {
            let mut s = vec![];
            let mut r = vec![];
            for _ in 0..parties {
                s.push(None);
                r.push(None);
            }
            channels.push(SimpleChannel {
                s,
                r,
                recv_timeout,
            });
        }
        for a in 0..parties {
            for b in 0..parties {
                if a == b {
                    continue;
                }
                let (send_a_to_b, recv_a_to_b) = channel(buffer_capacity);
                channels[a].s[b] = Some(send_a_to_b);
                channels[b].r[a] = Some(Mutex::new(recv_a_to_b));
            }
        }
        channels
    }
}

/// The error raised by `recv` calls of a [`SimpleChannel`].
#[derive(Debug)]
pub enum AsyncRecvError {
    /// There is no channel to the specified party.
    NoSuchParty(usize),
    /// The channel has been closed.
    Closed,
    /// No message was received before the timeout.
    TimeoutElapsed,
}

/// The error raised by `send` calls of a [`SimpleChannel`].
#[derive(Debug)]
pub enum AsyncSendError {
    /// There is no channel to the specified party.
    NoSuchParty(usize),
    /// The receiving half has been dropped.
    Closed(SendError<Vec<u8>>),
}

impl Channel for SimpleChannel {
    type SendError = AsyncSendError;
    type RecvError = AsyncRecvError;

    async fn send_bytes_to(
        &self,
        p: usize,
        msg: Vec<u8>,
        info: SendInfo,
    ) -> Result<(), AsyncSendError> {
        trace!(party = p, bytes = info.len(), phase = info.phase(), "sending msg");
        let Some(sender) = self.s.get(p).and_then(Option::as_ref) else {
            return Err(AsyncSendError::NoSuchParty(p));
        };
        sender.send(msg).await.map_err(AsyncSendError::Closed)
    }

    async fn recv_bytes_from(&self, p: usize, info: RecvInfo) -> Result<Vec<u8>, AsyncRecvError> {
        trace!(party = p, phase = info.phase(), "receiving msg");
        let Some(receiver) = self.r.get(p).and_then(Option::as_ref) else {
            return Err(AsyncRecvError::NoSuchParty(p));
        };
        let mut receiver = receiver.lock().await;
        match timeout(self.recv_timeout, receiver.recv()).await {
            Ok(Some(bytes)) => Ok(bytes),
            Ok(None) => Err(AsyncRecvError::Closed),
            Err(_) => Err(AsyncRecvError::TimeoutElapsed),
        }
    }
}
