use std::sync::Arc;

use crate::{
    messages::{CanId, CanMessage},
    traits::{AsyncCanReceiver, AsyncCanSender},
};
use snafu::{ResultExt, Snafu};
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, Frame, ShouldRetry, Socket};
use tokio::io::{unix::AsyncFd, Interest};

/// Convert a received socketcan frame into a management-plane message
///
/// Returns None for traffic the management protocol does not carry:
/// extended-ID frames, remote frames, and bus error frames.
fn frame_to_message(frame: socketcan::CanFrame) -> Option<CanMessage> {
    let id = match frame.can_id() {
        socketcan::CanId::Standard(id) => CanId::std(id.as_raw()),
        socketcan::CanId::Extended(_) => {
            log::debug!("Ignoring extended-ID frame");
            return None;
        }
    };

    match frame {
        CanFrame::Data(frame) => Some(CanMessage::new(id, frame.data())),
        CanFrame::Remote(_) => {
            log::debug!("Ignoring remote frame for {id}");
            None
        }
        CanFrame::Error(frame) => {
            log::debug!("Ignoring bus error frame: {:08X}", frame.error_bits());
            None
        }
    }
}

fn message_to_frame(msg: CanMessage) -> socketcan::CanFrame {
    // CanId enforces the 11-bit range, so StandardId::new cannot fail
    let id = socketcan::StandardId::new(msg.id().raw()).unwrap();
    socketcan::CanFrame::new(id, msg.data()).unwrap()
}

/// Errors from the receiving half of the bus port
#[derive(Debug, Snafu)]
pub enum ReceiveError {
    /// The underlying socket read failed
    Io {
        /// Error reported by the socket
        source: socketcan::IoError,
    },
}

/// Receiving half of a socketcan bus port
///
/// Both halves share one non-blocking socket registered with the tokio
/// reactor, so the receiver never sees frames sent by its own sender.
#[derive(Debug, Clone)]
pub struct SocketCanReceiver {
    socket: Arc<AsyncFd<CanSocket>>,
}

impl AsyncCanReceiver for SocketCanReceiver {
    type Error = ReceiveError;

    fn try_recv(&mut self) -> Option<CanMessage> {
        match self.socket.get_ref().read_frame() {
            Ok(frame) => frame_to_message(frame),
            _ => None,
        }
    }

    async fn recv(&mut self) -> Result<CanMessage, ReceiveError> {
        loop {
            let read = self
                .socket
                .async_io(Interest::READABLE, |socket| socket.read_frame())
                .await;
            match read {
                Ok(frame) => {
                    // Non-management traffic is filtered here, so the
                    // engine only ever wakes for frames it can carry
                    if let Some(msg) = frame_to_message(frame) {
                        return Ok(msg);
                    }
                }
                Err(e) => {
                    if !e.should_retry() {
                        return Err(e).context(IoSnafu);
                    }
                }
            }
        }
    }
}

/// Sending half of a socketcan bus port
#[derive(Debug, Clone)]
pub struct SocketCanSender {
    socket: Arc<AsyncFd<CanSocket>>,
}

/// Error from sending on a socketcan bus port
#[derive(Debug, Snafu)]
#[snafu(display("Failed to queue frame: {source}"))]
pub struct SendError {
    source: std::io::Error,
}

impl AsyncCanSender for SocketCanSender {
    type Error = SendError;

    async fn send(&mut self, msg: CanMessage) -> Result<(), SendError> {
        let frame = message_to_frame(msg);
        self.socket
            .async_io(Interest::WRITABLE, |socket| socket.write_frame(&frame))
            .await
            .context(SendSnafu)
    }
}

/// Open a socketcan device and split it into sender and receiver halves
///
/// # Arguments
/// * `device` - The name of the socketcan device to open, e.g. "vcan0", or "can0"
///
/// Both halves share a single socket, so the receiver does not see frames
/// sent by the sender.
pub fn open_bus<S: AsRef<str>>(
    device: S,
) -> Result<(SocketCanSender, SocketCanReceiver), std::io::Error> {
    let socket = CanSocket::open(device.as_ref())?;
    socket.set_nonblocking(true)?;
    let socket = Arc::new(AsyncFd::new(socket)?);
    let receiver = SocketCanReceiver {
        socket: socket.clone(),
    };
    let sender = SocketCanSender { socket };
    Ok((sender, receiver))
}
