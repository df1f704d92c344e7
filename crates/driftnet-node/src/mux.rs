//! UDP transport multiplexer.
//!
//! Owns the broadcast-capable gossip socket. One task drains the
//! outgoing envelope queue, one task receives datagrams, decodes them,
//! and fans each good envelope out to every subscriber channel. The
//! fan-out never blocks: a full subscriber queue drops the envelope
//! with a log line so a slow actor cannot stall the receive loop.
//!
//! Losing the socket on the receive side is fatal: `run` returns and
//! the caller escalates to node shutdown. Individual send failures
//! are logged and the send loop keeps going.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};

use driftnet_protocol::{Envelope, Message};

/// Bound of the outgoing envelope queue. Producers await when full;
/// senders are periodic and tolerate the backpressure.
const OUTGOING_QUEUE: usize = 32;

/// Bound of each subscriber's queue.
const SUBSCRIBER_QUEUE: usize = 32;

/// Large enough for a maximal HELLO or LIST datagram.
const RECEIVE_BUFFER_SIZE: usize = 8192;

/// Cheap handle for queueing outgoing traffic.
#[derive(Clone)]
pub struct MuxHandle {
    outgoing_tx: mpsc::Sender<Envelope>,
    broadcast_addr: SocketAddr,
}

impl MuxHandle {
    /// Queue a directed envelope.
    pub async fn send(&self, env: Envelope) {
        if self.outgoing_tx.send(env).await.is_err() {
            tracing::warn!("mux: outgoing queue closed, envelope dropped");
        }
    }

    /// Queue a message for the broadcast address.
    pub async fn broadcast(&self, msg: Message) {
        let addr = self.broadcast_addr;
        self.send(Envelope::new(addr, msg)).await;
    }
}

/// The multiplexer itself: socket plus subscriber registry.
pub struct MuxDemux {
    socket: UdpSocket,
    outgoing_rx: mpsc::Receiver<Envelope>,
    handle: MuxHandle,
    subscribers: Vec<mpsc::Sender<Envelope>>,
}

impl MuxDemux {
    pub async fn bind(bind: SocketAddr, broadcast_addr: SocketAddr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(bind).await?;
        socket.set_broadcast(true)?;
        let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_QUEUE);
        Ok(Self {
            socket,
            outgoing_rx,
            handle: MuxHandle {
                outgoing_tx,
                broadcast_addr,
            },
            subscribers: Vec::new(),
        })
    }

    pub fn handle(&self) -> MuxHandle {
        self.handle.clone()
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Register a subscriber. Every decoded envelope is offered to
    /// every subscriber, in registration order.
    pub fn subscribe(&mut self) -> mpsc::Receiver<Envelope> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        self.subscribers.push(tx);
        rx
    }

    /// Run both loops until shutdown or until the socket fails on the
    /// receive side.
    pub async fn run(self, shutdown: broadcast::Receiver<()>) {
        let MuxDemux {
            socket,
            outgoing_rx,
            handle: _,
            subscribers,
        } = self;
        let socket = Arc::new(socket);

        let sender = tokio::spawn(run_send_loop(
            socket.clone(),
            outgoing_rx,
            shutdown.resubscribe(),
        ));
        run_receive_loop(socket, subscribers, shutdown).await;
        sender.abort();
    }
}

async fn run_send_loop(
    socket: Arc<UdpSocket>,
    mut outgoing_rx: mpsc::Receiver<Envelope>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            env = outgoing_rx.recv() => {
                let Some(env) = env else {
                    return;
                };
                let wire = match env.msg.encode() {
                    Ok(wire) => wire,
                    Err(e) => {
                        tracing::warn!("mux: refusing to send invalid message: {e}");
                        continue;
                    }
                };
                if let Err(e) = socket.send_to(wire.as_bytes(), env.addr).await {
                    tracing::warn!(addr = %env.addr, "mux: send failed: {e}");
                }
            }
            _ = shutdown.recv() => {
                return;
            }
        }
    }
}

async fn run_receive_loop(
    socket: Arc<UdpSocket>,
    subscribers: Vec<mpsc::Sender<Envelope>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];
    loop {
        tokio::select! {
            recv = socket.recv_from(&mut buf) => {
                match recv {
                    Ok((len, addr)) => dispatch(&buf[..len], addr, &subscribers),
                    Err(e) => {
                        tracing::error!("mux: socket receive failed: {e}");
                        return;
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("mux shutting down");
                return;
            }
        }
    }
}

fn dispatch(payload: &[u8], addr: SocketAddr, subscribers: &[mpsc::Sender<Envelope>]) {
    let msg = match Message::decode_datagram(payload) {
        Ok(msg) => msg,
        Err(e) => {
            let raw = String::from_utf8_lossy(payload);
            tracing::warn!(%addr, %raw, "mux: undecodable datagram discarded: {e}");
            return;
        }
    };
    tracing::trace!(%addr, kind = msg.kind(), "mux: received");

    let env = Envelope::new(addr, msg);
    for sub in subscribers {
        match sub.try_send(env.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(%addr, "mux: subscriber queue full, envelope dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // subscriber already shut down
            }
        }
    }
}
