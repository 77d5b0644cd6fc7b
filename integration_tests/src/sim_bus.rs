use std::sync::{Arc, Mutex};

use canhub_common::messages::CanMessage;
use canhub_common::traits::{AsyncCanReceiver, AsyncCanSender};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// An in-process bus: every sender broadcasts to every subscribed receiver
#[derive(Clone, Default)]
pub struct SimBus {
    channels: Arc<Mutex<Vec<UnboundedSender<CanMessage>>>>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a receiver to everything sent on the bus
    pub fn new_receiver(&mut self) -> SimBusReceiver {
        let (tx, rx) = unbounded_channel();
        self.channels.lock().unwrap().push(tx);
        SimBusReceiver { channel_rx: rx }
    }

    pub fn new_sender(&mut self) -> SimBusSender {
        SimBusSender {
            channels: self.channels.clone(),
        }
    }
}

pub struct SimBusSender {
    channels: Arc<Mutex<Vec<UnboundedSender<CanMessage>>>>,
}

impl AsyncCanSender for SimBusSender {
    type Error = core::convert::Infallible;

    async fn send(&mut self, msg: CanMessage) -> Result<(), Self::Error> {
        // Dead receivers just miss the frame; the bus itself cannot fail
        for tx in self.channels.lock().unwrap().iter() {
            tx.send(msg).ok();
        }
        Ok(())
    }
}

pub struct SimBusReceiver {
    channel_rx: UnboundedReceiver<CanMessage>,
}

impl AsyncCanReceiver for SimBusReceiver {
    type Error = ();

    async fn recv(&mut self) -> Result<CanMessage, Self::Error> {
        self.channel_rx.recv().await.ok_or(())
    }

    fn try_recv(&mut self) -> Option<CanMessage> {
        self.channel_rx.try_recv().ok()
    }
}
