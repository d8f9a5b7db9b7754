//! In-process connections.
//!
//! [`pair`] returns the server half ([`MemoryConnection`], which implements
//! [`Connection`]) and the client half ([`MemoryPeer`]) of one duplex
//! channel. The peer can push frames, inject a read failure, hang up, or
//! break the write direction, which makes it the natural way to exercise
//! session teardown paths without sockets.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, watch};

use crate::{Connection, ConnectionId, TransportError};

/// Memory connection IDs count down from the top of the range so they
/// never collide with socket-based connection IDs in logs.
static NEXT_MEMORY_ID: AtomicU64 = AtomicU64::new(u64::MAX);

type Inbound = Result<Vec<u8>, TransportError>;

/// Creates a connected server/client pair.
pub fn pair() -> (MemoryConnection, MemoryPeer) {
    let id = ConnectionId::new(NEXT_MEMORY_ID.fetch_sub(1, Ordering::Relaxed));
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = watch::channel(false);

    let conn = MemoryConnection {
        id,
        inbound: tokio::sync::Mutex::new(in_rx),
        outbound: Mutex::new(Some(out_tx)),
        closed: closed_tx,
    };
    let peer = MemoryPeer {
        inbound: Some(in_tx),
        outbound: out_rx,
        closed: closed_rx,
    };
    (conn, peer)
}

/// Server side of an in-memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    closed: watch::Sender<bool>,
}

impl MemoryConnection {
    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

impl Connection for MemoryConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed(
                "closed locally".into(),
            ));
        }
        let outbound = self
            .outbound
            .lock()
            .map_err(|_| TransportError::Shutdown)?;
        match outbound.as_ref() {
            Some(tx) => tx.send(data.to_vec()).map_err(|_| {
                TransportError::ConnectionClosed("peer stopped reading".into())
            }),
            None => Err(TransportError::ConnectionClosed(
                "closed locally".into(),
            )),
        }
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Ok(None);
        }
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            _ = closed.changed() => Ok(None),
            frame = inbound.recv() => match frame {
                Some(Ok(data)) => Ok(Some(data)),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            },
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.closed.send_replace(true);
        if let Ok(mut outbound) = self.outbound.lock() {
            outbound.take();
        }
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Client side of an in-memory connection.
pub struct MemoryPeer {
    inbound: Option<mpsc::UnboundedSender<Inbound>>,
    outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    closed: watch::Receiver<bool>,
}

impl MemoryPeer {
    /// Delivers a frame to the server side. Returns `false` once the
    /// peer has hung up or the server side is gone.
    pub fn send(&self, data: impl Into<Vec<u8>>) -> bool {
        match &self.inbound {
            Some(tx) => tx.send(Ok(data.into())).is_ok(),
            None => false,
        }
    }

    /// Makes the server's next `recv` fail with the given reason.
    pub fn fail(&self, reason: &str) -> bool {
        match &self.inbound {
            Some(tx) => tx.send(Err(TransportError::receive(reason.to_string()))).is_ok(),
            None => false,
        }
    }

    /// Hangs up cleanly: the server's `recv` returns `Ok(None)` once the
    /// frames already sent are consumed.
    pub fn hang_up(&mut self) {
        self.inbound.take();
    }

    /// Stops reading. Subsequent server-side `send` calls fail.
    pub fn stop_reading(&mut self) {
        self.outbound.close();
    }

    /// Waits for the next frame written by the server. Returns `None`
    /// once the server side has closed and every written frame is read.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.outbound.recv().await
    }

    /// Returns a frame that has already been written, if any.
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.outbound.try_recv().ok()
    }

    /// Returns `true` once the server side has called `close`.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Waits until the server side closes the connection.
    pub async fn closed(&mut self) {
        while !*self.closed.borrow_and_update() {
            if self.closed.changed().await.is_err() {
                return;
            }
        }
    }
}
