//! Per-connection state machine.
//!
//! A connection is always in one of three states: `Read` (collecting
//! request bytes), `Write` (draining a pending reply) or `End` (scheduled
//! for teardown). The task awaits socket readiness, then performs only
//! nonblocking I/O: `WouldBlock` hands control back to the scheduler,
//! `Interrupted` retries in place, anything else ends the connection.
//!
//! Requests and replies are strictly half-duplex: at most one request is
//! in flight, and the next one is only parsed after the previous reply has
//! been written out completely.

use crate::client::ClientHandler;
use crate::engine::store::StoreHandler;
use minkv_types::client::ConnectedClient;
use minkv_types::protocol::{self, HEADER_SIZE, MAX_MSG_SIZE};
use std::cell::RefCell;
use std::io::ErrorKind;
use std::rc::Rc;
use tokio::io::Interest;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const READ_BUF_CAPACITY: usize = HEADER_SIZE + MAX_MSG_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Read,
    Write,
    End,
}

enum Wake {
    Ready,
    Cancelled,
    Failed(std::io::Error),
}

pub(crate) struct ServerTask {
    stream: TcpStream,
    store_handler: Rc<RefCell<StoreHandler>>,
    client_handler: Rc<ClientHandler>,
    connected_client: ConnectedClient,
    state: ConnState,
    read_buf: Box<[u8; READ_BUF_CAPACITY]>,
    read_len: usize,
    write_buf: Vec<u8>,
    write_sent: usize,
}

impl ServerTask {
    pub(crate) fn new(
        stream: TcpStream,
        connected_client: ConnectedClient,
        store_handler: Rc<RefCell<StoreHandler>>,
        client_handler: Rc<ClientHandler>,
    ) -> Self {
        ServerTask {
            stream,
            store_handler,
            client_handler,
            connected_client,
            state: ConnState::Read,
            read_buf: Box::new([0u8; READ_BUF_CAPACITY]),
            read_len: 0,
            write_buf: Vec::new(),
            write_sent: 0,
        }
    }

    /// Drives the connection until it reaches `End` or the server shuts
    /// down.
    pub(crate) async fn process(mut self, cancellation_token: CancellationToken) {
        loop {
            let interest = match self.state {
                ConnState::Read => Interest::READABLE,
                ConnState::Write => Interest::WRITABLE,
                ConnState::End => break,
            };
            match self.wait_ready(interest, &cancellation_token).await {
                Wake::Cancelled => self.state = ConnState::End,
                Wake::Failed(err) => {
                    error!(client = %self.connected_client.address, %err, "socket wait failed");
                    self.state = ConnState::End;
                }
                Wake::Ready => match self.state {
                    ConnState::Read => self.fill_read_buffer(),
                    ConnState::Write => {
                        self.flush_write_buffer();
                        if self.state == ConnState::Read {
                            // frames that piled up while the reply was
                            // stalled will not re-arm read readiness
                            while self.try_one_request() {}
                        }
                    }
                    ConnState::End => {}
                },
            }
        }
        debug!(client = %self.connected_client.address, "connection closed");
    }

    async fn wait_ready(&self, interest: Interest, cancellation_token: &CancellationToken) -> Wake {
        tokio::select! {
            biased;

            _ = cancellation_token.cancelled() => Wake::Cancelled,
            ready = self.stream.ready(interest) => match ready {
                Ok(_) => Wake::Ready,
                Err(err) => Wake::Failed(err),
            },
        }
    }

    /// Reads until the socket would block, the peer closes, or a drained
    /// request leaves the connection in another state. After every
    /// successful read, as many complete frames as possible are consumed.
    fn fill_read_buffer(&mut self) {
        // a reply that stalled mid-write can leave complete frames behind;
        // consume those before asking the socket for more
        while self.try_one_request() {}
        if self.state != ConnState::Read {
            return;
        }
        loop {
            if self.read_len == self.read_buf.len() {
                return;
            }
            match self.stream.try_read(&mut self.read_buf[self.read_len..]) {
                Ok(0) => {
                    debug!(client = %self.connected_client.address, "peer closed connection");
                    self.state = ConnState::End;
                    return;
                }
                Ok(n) => {
                    self.read_len += n;
                    while self.try_one_request() {}
                    if self.state != ConnState::Read {
                        return;
                    }
                }
                Err(ref err) if err.kind() == ErrorKind::WouldBlock => return,
                Err(ref err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!(client = %self.connected_client.address, %err, "read failed");
                    self.state = ConnState::End;
                    return;
                }
            }
        }
    }

    /// Consumes one complete frame from the head of the read buffer, if
    /// present: dispatch, splice the reply into the write buffer, compact
    /// the remainder, then try to flush immediately. Returns whether
    /// another frame may be consumable right away.
    fn try_one_request(&mut self) -> bool {
        if self.read_len < HEADER_SIZE {
            return false;
        }
        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&self.read_buf[..HEADER_SIZE]);
        let declared = u32::from_le_bytes(header) as usize;
        if declared > MAX_MSG_SIZE {
            warn!(
                client = %self.connected_client.address,
                declared,
                limit = MAX_MSG_SIZE,
                "oversize request frame"
            );
            self.state = ConnState::End;
            return false;
        }
        if HEADER_SIZE + declared > self.read_len {
            return false;
        }
        let args = match protocol::parse_request(&self.read_buf[HEADER_SIZE..HEADER_SIZE + declared])
        {
            Ok(args) => args,
            Err(err) => {
                error!(client = %self.connected_client.address, %err, "bad request frame");
                self.state = ConnState::End;
                return false;
            }
        };
        if let Some(first) = args.first() {
            debug!(
                client = %self.connected_client.address,
                command = %String::from_utf8_lossy(first),
                argc = args.len(),
                "dispatching request"
            );
        }
        let reply = self.store_handler.borrow_mut().execute(args);
        self.write_buf = reply.encode_frame();
        self.write_sent = 0;

        let consumed = HEADER_SIZE + declared;
        self.read_buf.copy_within(consumed..self.read_len, 0);
        self.read_len -= consumed;

        self.state = ConnState::Write;
        self.flush_write_buffer();
        self.state == ConnState::Read
    }

    /// Writes until the reply is fully sent (back to `Read`) or the socket
    /// would block (stay in `Write` and wait for writability).
    fn flush_write_buffer(&mut self) {
        loop {
            let remain = self.write_buf.len() - self.write_sent;
            if remain == 0 {
                self.write_buf.clear();
                self.write_sent = 0;
                self.state = ConnState::Read;
                return;
            }
            match self.stream.try_write(&self.write_buf[self.write_sent..]) {
                Ok(n) => self.write_sent += n,
                Err(ref err) if err.kind() == ErrorKind::WouldBlock => return,
                Err(ref err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!(client = %self.connected_client.address, %err, "write failed");
                    self.state = ConnState::End;
                    return;
                }
            }
        }
    }
}

impl Drop for ServerTask {
    fn drop(&mut self) {
        self.client_handler.disconnect(&self.connected_client);
    }
}
