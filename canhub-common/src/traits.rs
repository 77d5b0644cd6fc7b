//! Common traits

use crate::messages::CanMessage;

/// An async CAN sender trait
///
/// The bus is best-effort: callers log send errors and move on; nothing at
/// this layer retries.
pub trait AsyncCanSender: Send {
    /// Error type returned by send
    type Error: core::fmt::Debug + Send;

    /// Send a message to the bus
    fn send(
        &mut self,
        msg: CanMessage,
    ) -> impl core::future::Future<Output = Result<(), Self::Error>> + Send;
}

/// An async CAN receiver trait
pub trait AsyncCanReceiver: Send {
    /// The error type returned by recv
    type Error: core::fmt::Debug + Send;

    /// Receive an available message immediately, if one is queued
    fn try_recv(&mut self) -> Option<CanMessage>;

    /// A blocking receive
    fn recv(
        &mut self,
    ) -> impl core::future::Future<Output = Result<CanMessage, Self::Error>> + Send;

    /// Remove any pending messages from the receiver
    fn flush(&mut self) {
        while self.try_recv().is_some() {}
    }
}
