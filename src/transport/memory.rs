//! In-process datagram pair for tests and simulations.
//!
//! Datagrams are delivered through unbounded channels, in order, unless a
//! fault model interferes. Held datagrams go out one per later send, so
//! they arrive late and out of order. A closed peer behaves like a silent
//! host.

use super::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Decides per outgoing datagram whether it is lost (`true` = drop).
pub type DropFilter = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// What happens to one outgoing datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Deliver,
    Drop,
    /// Delivered now and again after the next datagram
    Duplicate,
    /// Held back until after the next datagram
    Delay,
}

/// Decides the fate of each outgoing datagram.
pub type FaultModel = Box<dyn FnMut(&[u8]) -> Fault + Send>;

type Datagram = (Bytes, SocketAddr);

struct Faults {
    model: FaultModel,
    held: VecDeque<Bytes>,
}

impl Faults {
    /// Datagrams to put on the wire now, in order.
    fn shape(&mut self, datagram: Bytes) -> Vec<Bytes> {
        let mut out = Vec::with_capacity(2);
        let late = match (self.model)(&datagram) {
            Fault::Deliver => {
                out.push(datagram);
                None
            }
            Fault::Drop => None,
            Fault::Duplicate => {
                out.push(datagram.clone());
                Some(datagram)
            }
            Fault::Delay => Some(datagram),
        };
        out.extend(self.held.pop_front());
        self.held.extend(late);
        out
    }
}

pub struct MemoryTransport {
    addr: SocketAddr,
    peer: SocketAddr,
    tx: mpsc::UnboundedSender<Datagram>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
    faults: Option<Mutex<Faults>>,
    sent: Arc<AtomicUsize>,
}

impl MemoryTransport {
    /// Create two connected endpoints with the given addresses.
    pub fn pair(a: SocketAddr, b: SocketAddr) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self::new(a, b, a_tx, a_rx),
            Self::new(b, a, b_tx, b_rx),
        )
    }

    fn new(
        addr: SocketAddr,
        peer: SocketAddr,
        tx: mpsc::UnboundedSender<Datagram>,
        rx: mpsc::UnboundedReceiver<Datagram>,
    ) -> Self {
        Self {
            addr,
            peer,
            tx,
            rx: tokio::sync::Mutex::new(rx),
            faults: None,
            sent: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Install a loss model applied to everything this endpoint sends.
    pub fn with_drop_filter(self, mut filter: DropFilter) -> Self {
        self.with_fault_model(Box::new(move |buf: &[u8]| {
            if filter(buf) {
                Fault::Drop
            } else {
                Fault::Deliver
            }
        }))
    }

    /// Install a fault model applied to everything this endpoint sends.
    pub fn with_fault_model(mut self, model: FaultModel) -> Self {
        self.faults = Some(Mutex::new(Faults {
            model,
            held: VecDeque::new(),
        }));
        self
    }

    /// Number of datagrams handed to `send_to`, lost or not.
    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    /// Shared counter behind [`MemoryTransport::sent`].
    pub fn sent_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.sent)
    }

    fn shape(&self, datagram: Bytes) -> Vec<Bytes> {
        match &self.faults {
            Some(faults) => match faults.lock() {
                Ok(mut faults) => faults.shape(datagram),
                Err(_) => vec![datagram],
            },
            None => vec![datagram],
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        if target != self.peer {
            return Ok(buf.len());
        }
        for datagram in self.shape(Bytes::copy_from_slice(buf)) {
            // A closed peer just loses the datagram
            let _ = self.tx.send((datagram, self.addr));
        }
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some((data, from)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok((n, from))
            }
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}
