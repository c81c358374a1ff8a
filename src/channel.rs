//! Module that owns the two TCP channels of a process: the one accepted from the predecessor
//! and the one connected to the successor.

use crate::{
    error::{Result, RingError},
    log,
    message::{Frame, Message, MessageCodec},
    ring::ProcessId,
};
use color_print::cformat;
use futures::{SinkExt, StreamExt};
use std::{io, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    time::sleep,
};
use tokio_util::codec::Framed;

/// Function that opens the listener the predecessor connects to.
pub async fn bind(process: ProcessId, address: &str) -> Result<TcpListener> {
    TcpListener::bind(address)
        .await
        .map_err(|source| RingError::ChannelSetup {
            process,
            operation: "bind inbound listener",
            source,
        })
}

/// Function that accepts the one connection of the predecessor.
pub async fn accept(process: ProcessId, listener: &TcpListener) -> Result<InboundChannel<TcpStream>> {
    let (stream, address) = listener
        .accept()
        .await
        .map_err(|source| RingError::ChannelSetup {
            process,
            operation: "accept predecessor",
            source,
        })?;

    log::info(&cformat!(
        "proc_id: <bold>{process}</bold>, accepted the previous peer's <bold>connection</bold> from <bold>{address}</bold>."
    ));
    Ok(InboundChannel::new(stream))
}

/// Function that connects to the successor, trying up to `attempts` times `retry_delay` apart
/// since its listener may not be up yet.
pub async fn connect(
    process: ProcessId,
    address: &str,
    attempts: u32,
    retry_delay: Duration,
) -> Result<TcpStream> {
    let mut attempt = 1;
    loop {
        match TcpStream::connect(address).await {
            Ok(stream) => {
                stream
                    .set_nodelay(true)
                    .map_err(|source| RingError::ChannelSetup {
                        process,
                        operation: "configure successor connection",
                        source,
                    })?;
                log::info(&cformat!(
                    "proc_id: <bold>{process}</bold>, connected to the next peer at <bold>{address}</bold>."
                ));
                return Ok(stream);
            }
            Err(e) if attempt < attempts => {
                log::warn(&cformat!(
                    "proc_id: <bold>{process}</bold>, couldn't connect to the next peer at <bold>{address}</bold> (attempt {attempt}/{attempts}): {e}"
                ));
                attempt += 1;
                sleep(retry_delay).await;
            }
            Err(source) => {
                return Err(RingError::ChannelSetup {
                    process,
                    operation: "connect to successor",
                    source,
                })
            }
        }
    }
}

/// Receiving end of the channel from the predecessor.
pub struct InboundChannel<T> {
    frames: Framed<T, MessageCodec>,
}

impl<T: AsyncRead + AsyncWrite + Unpin> InboundChannel<T> {
    pub fn new(stream: T) -> Self {
        Self {
            frames: Framed::new(stream, MessageCodec::new()),
        }
    }

    /// Function that waits for the next frame. Returns `None` once the predecessor hung up.
    pub async fn next(&mut self) -> Option<io::Result<Frame>> {
        self.frames.next().await
    }
}

/// Sending end of the channel to the successor.
pub struct OutboundChannel<T> {
    process: ProcessId,
    frames: Framed<T, MessageCodec>,
    attempts: u32,
    retry_delay: Duration,
}

impl<T: AsyncRead + AsyncWrite + Unpin> OutboundChannel<T> {
    pub fn new(process: ProcessId, stream: T, attempts: u32, retry_delay: Duration) -> Self {
        Self {
            process,
            frames: Framed::new(stream, MessageCodec::new()),
            attempts: attempts.max(1),
            retry_delay,
        }
    }

    /// Function that hands `message` to the transport.
    ///
    /// The message is encoded into the write buffer once; only the flush is retried, so a
    /// retry never puts a second copy of a token on the wire.
    pub async fn send(&mut self, message: Message) -> Result<()> {
        let operation = match message {
            Message::Token { .. } => "forward token",
            Message::Marker { .. } => "forward marker",
        };

        let mut buffered = false;
        let mut attempt = 1;
        loop {
            let result = if buffered {
                SinkExt::<Message>::flush(&mut self.frames).await
            } else {
                match self.frames.feed(message.clone()).await {
                    Ok(()) => {
                        buffered = true;
                        SinkExt::<Message>::flush(&mut self.frames).await
                    }
                    Err(e) => Err(e),
                }
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.attempts => {
                    log::warn(&cformat!(
                        "proc_id: <bold>{}</bold>, couldn't {operation} (attempt {attempt}/{}): {e}",
                        self.process,
                        self.attempts
                    ));
                    attempt += 1;
                    sleep(self.retry_delay).await;
                }
                Err(e) => {
                    return Err(RingError::ChannelUnavailable {
                        process: self.process,
                        operation,
                        reason: e.to_string(),
                    })
                }
            }
        }
    }
}
