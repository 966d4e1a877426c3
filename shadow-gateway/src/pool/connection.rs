// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::rc::{Rc, Weak};

use bytes::{Bytes, BytesMut};
use thrift_shadow::upstream::{ClientConnection, CloseType, ConnectionEvent, UpstreamCallbacks};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const READ_BUFFER_SIZE: usize = 8 * 1024;

enum Command {
    Write(Bytes),
    Shutdown,
}

/// Upstream TCP connection driven by two local tasks.
///
/// Writes are queued to a writer task so that `write` never blocks the
/// caller. The reader task hands every chunk it receives to the callbacks
/// currently attached, along with the bytes they left unconsumed.
pub struct TcpClientConnection {
    peer: SocketAddr,
    tx: mpsc::UnboundedSender<Command>,
    closed: Cell<bool>,
    callbacks: RefCell<Option<Weak<dyn UpstreamCallbacks>>>,
    reader: RefCell<Option<JoinHandle<()>>>,
    writer: RefCell<Option<JoinHandle<()>>>,
}

impl TcpClientConnection {
    /// Take over `stream`. Must be called from within a `LocalSet`.
    pub fn spawn(stream: TcpStream) -> std::io::Result<Rc<Self>> {
        let peer = stream.peer_addr()?;
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();

        let connection = Rc::new(Self {
            peer,
            tx,
            closed: Cell::new(false),
            callbacks: RefCell::new(None),
            reader: RefCell::new(None),
            writer: RefCell::new(None),
        });

        let writer = tokio::task::spawn_local(write_loop(write_half, rx, peer));
        let reader = tokio::task::spawn_local(read_loop(read_half, Rc::downgrade(&connection)));
        *connection.writer.borrow_mut() = Some(writer);
        *connection.reader.borrow_mut() = Some(reader);

        Ok(connection)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    pub fn set_callbacks(&self, callbacks: Weak<dyn UpstreamCallbacks>) {
        *self.callbacks.borrow_mut() = Some(callbacks);
    }

    pub fn clear_callbacks(&self) {
        self.callbacks.borrow_mut().take();
    }

    fn callbacks(&self) -> Option<Rc<dyn UpstreamCallbacks>> {
        self.callbacks.borrow().as_ref().and_then(Weak::upgrade)
    }

    fn on_data(&self, buf: &mut BytesMut, end_stream: bool) {
        match self.callbacks() {
            Some(callbacks) => callbacks.on_upstream_data(buf, end_stream),
            None => {
                if !buf.is_empty() {
                    tracing::debug!(peer = %self.peer, bytes = buf.len(), "discarding data on idle connection");
                }
                buf.clear();
            }
        }
    }

    fn on_remote_close(&self) {
        if self.closed.replace(true) {
            return;
        }
        tracing::debug!(peer = %self.peer, "upstream closed connection");
        if let Some(callbacks) = self.callbacks() {
            callbacks.on_event(ConnectionEvent::RemoteClose);
        }
    }
}

impl ClientConnection for TcpClientConnection {
    fn write(&self, data: &mut BytesMut, _end_stream: bool) {
        if self.closed.get() {
            tracing::debug!(peer = %self.peer, bytes = data.len(), "dropping write on closed connection");
            data.clear();
            return;
        }
        if self.tx.send(Command::Write(data.split().freeze())).is_err() {
            tracing::debug!(peer = %self.peer, "connection writer is gone");
        }
    }

    fn close(&self, close_type: CloseType) {
        if self.closed.replace(true) {
            return;
        }

        if let Some(reader) = self.reader.borrow_mut().take() {
            reader.abort();
        }
        match close_type {
            CloseType::FlushWrite => {
                let _ = self.tx.send(Command::Shutdown);
            }
            CloseType::NoFlush => {
                if let Some(writer) = self.writer.borrow_mut().take() {
                    writer.abort();
                }
            }
        }

        tracing::debug!(peer = %self.peer, close_type = ?close_type, "closed upstream connection");
        if let Some(callbacks) = self.callbacks() {
            callbacks.on_event(ConnectionEvent::LocalClose);
        }
    }
}

impl Drop for TcpClientConnection {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

async fn read_loop(mut read_half: OwnedReadHalf, connection: Weak<TcpClientConnection>) {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    loop {
        let result = read_half.read_buf(&mut buf).await;
        let Some(conn) = connection.upgrade() else {
            return;
        };
        match result {
            Ok(0) => {
                conn.on_data(&mut buf, true);
                conn.on_remote_close();
                return;
            }
            Ok(_) => conn.on_data(&mut buf, false),
            Err(e) => {
                tracing::debug!(peer = %conn.peer, error = %e, "upstream read failed");
                conn.on_remote_close();
                return;
            }
        }
        buf.reserve(READ_BUFFER_SIZE);
    }
}

async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Command>,
    peer: SocketAddr,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Write(data) => {
                if let Err(e) = write_half.write_all(&data).await {
                    tracing::debug!(peer = %peer, error = %e, "upstream write failed");
                    return;
                }
            }
            Command::Shutdown => break,
        }
    }
    let _ = write_half.shutdown().await;
}
