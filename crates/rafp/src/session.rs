//! DSI session: one socket, one reader task, replies correlated by request id.
//!
//! Every command against the same session flows through a single stream; the
//! session keeps an exchange table keyed by request id and wakes the waiting
//! caller when the matching reply frame arrives. Server initiated frames
//! (tickles, attentions, close) are handled inline by the reader task.

use {
    crate::{
        dsi::{self, DsiCommand, DsiHeader, FLAG_REPLY, HEADER_LEN, MAX_FRAME_LEN},
        error::{Error, TransportError},
        utils::Result,
        wire::Reader,
    },
    futures::StreamExt,
    num_traits::FromPrimitive,
    log::{debug, info, warn},
    std::{
        collections::HashMap,
        net::SocketAddr,
        sync::{
            Arc, Mutex as StdMutex,
            atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering},
        },
    },
    tokio::{
        io::AsyncWriteExt,
        net::{TcpStream, tcp::OwnedWriteHalf},
        sync::{Mutex, oneshot},
        task::JoinHandle,
    },
};

/// Reply quantum assumed until DSIOpenSession negotiates a real one.
pub const DEFAULT_QUANTUM: u32 = 128 * 1024;

/// Attention quantum we advertise in the DSIOpenSession option block.
const ATTENTION_QUANTUM: u32 = 1024;

/// DSIOpenSession option: server request quanta.
const OPTION_SERVER_QUANTUM: u8 = 0x00;
/// DSIOpenSession option: attention quantum.
const OPTION_ATTENTION_QUANTUM: u8 = 0x01;

/// A correlated reply frame: the DSI header plus the payload after it,
/// already clamped to the negotiated quantum.
#[derive(Clone, Debug)]
pub struct Reply {
    pub header: DsiHeader,
    pub body: Vec<u8>,
}

impl Reply {
    /// The server's AFP result code for this exchange.
    pub fn result(&self) -> i32 {
        self.header.error_code()
    }

    /// Fail on any non-zero result code.
    pub fn check(self) -> Result<Reply> {
        match self.result() {
            0 => Ok(self),
            code => Err(Error::Afp(code)),
        }
    }
}

type PendingMap = StdMutex<HashMap<u16, oneshot::Sender<Result<Reply>>>>;

#[derive(Debug)]
struct Inner {
    peer: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
    pending: PendingMap,
    next_id: AtomicU16,
    rx_quantum: AtomicU32,
    alive: AtomicBool,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

impl Inner {
    /// Resolve every pending exchange with a transport error.
    fn fail_all(&self, mk: impl Fn() -> TransportError) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain().collect()
        };
        for (_, tx) in drained {
            let _ = tx.send(Err(Error::Transport(mk())));
        }
    }
}

/// An in-flight request awaiting its reply.
pub struct Exchange {
    id: u16,
    rx: oneshot::Receiver<Result<Reply>>,
}

impl Exchange {
    pub fn request_id(&self) -> u16 {
        self.id
    }

    pub async fn wait(self) -> Result<Reply> {
        match self.rx.await {
            Ok(reply) => reply,
            Err(_) => Err(Error::Transport(TransportError::Closed)),
        }
    }
}

/// A live DSI session over one TCP socket.
#[derive(Clone, Debug)]
pub struct DsiSession {
    inner: Arc<Inner>,
}

impl DsiSession {
    /// Connect the socket and start the reader task. No DSI handshake is
    /// performed; `GetStatus` probes work on a bare connection, everything
    /// else wants `open_session` first.
    pub async fn connect(addr: SocketAddr) -> Result<DsiSession> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();

        let inner = Arc::new(Inner {
            peer: addr,
            writer: Mutex::new(write_half),
            pending: StdMutex::new(HashMap::new()),
            next_id: AtomicU16::new(0),
            rx_quantum: AtomicU32::new(DEFAULT_QUANTUM),
            alive: AtomicBool::new(true),
            reader: StdMutex::new(None),
        });

        let handle = tokio::spawn(reader_loop(inner.clone(), read_half));
        *inner.reader.lock().unwrap() = Some(handle);

        Ok(DsiSession { inner })
    }

    pub fn peer(&self) -> SocketAddr {
        self.inner.peer
    }

    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::SeqCst)
    }

    /// The maximum reply payload the server promised to send per frame.
    pub fn rx_quantum(&self) -> u32 {
        self.inner.rx_quantum.load(Ordering::SeqCst)
    }

    /// Queue a request without waiting for its reply. The reply is still
    /// tracked by request id and delivered through the returned exchange.
    pub async fn submit(
        &self,
        command: DsiCommand,
        data_offset: u32,
        payload: &[u8],
    ) -> Result<Exchange> {
        if !self.is_alive() {
            return Err(Error::Transport(TransportError::Closed));
        }
        if payload.len() > MAX_FRAME_LEN - HEADER_LEN {
            return Err(Error::Allocation {
                requested: payload.len(),
                limit: MAX_FRAME_LEN - HEADER_LEN,
            });
        }

        let (tx, rx) = oneshot::channel();
        let id = {
            let mut pending = self.inner.pending.lock().unwrap();
            let mut id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
            // The 16 bit id space wraps; a slot may still be busy with a
            // reply that never came. Never overwrite a waiter.
            while pending.contains_key(&id) {
                id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
            }
            pending.insert(id, tx);
            id
        };

        let header = DsiHeader::request(command, id, payload.len() as u32, data_offset);
        let frame = dsi::build_frame(&header, payload);

        let sent = {
            let mut writer = self.inner.writer.lock().await;
            writer.write_all(&frame).await
        };
        if let Err(e) = sent {
            self.inner.pending.lock().unwrap().remove(&id);
            return Err(e.into());
        }

        debug!("→ dsi {:?} id={} len={}", command, id, payload.len());
        Ok(Exchange { id, rx })
    }

    /// Send a request and block until the matching reply arrives.
    pub async fn call(
        &self,
        command: DsiCommand,
        data_offset: u32,
        payload: &[u8],
    ) -> Result<Reply> {
        self.submit(command, data_offset, payload).await?.wait().await
    }

    /// An AFP command carried in a DSICommand frame.
    pub async fn command(&self, payload: &[u8]) -> Result<Reply> {
        self.call(DsiCommand::Command, 0, payload).await
    }

    /// An AFP write carried in a DSIWrite frame; `data_offset` points at the
    /// first byte of bulk data within the frame.
    pub async fn write_command(&self, payload: &[u8], data_offset: u32) -> Result<Reply> {
        self.call(DsiCommand::Write, data_offset, payload).await
    }

    /// The unauthenticated status probe (FPGetSrvrInfo rides in the reply).
    pub async fn get_status(&self) -> Result<Reply> {
        self.call(DsiCommand::GetStatus, 0, &[]).await
    }

    /// DSIOpenSession: advertise our attention quantum, learn the server's
    /// request quanta from the reply option block.
    pub async fn open_session(&self) -> Result<()> {
        let mut payload = crate::wire::Writer::with_capacity(6);
        payload
            .u8(OPTION_ATTENTION_QUANTUM)
            .u8(4)
            .u32(ATTENTION_QUANTUM);

        let reply = self
            .call(DsiCommand::OpenSession, 0, &payload.into_vec())
            .await?
            .check()?;

        let mut r = Reader::new(&reply.body);
        while r.remaining() >= 2 {
            let typ = r.u8()?;
            let len = r.u8()? as usize;
            let value = r.bytes(len)?;
            if typ == OPTION_SERVER_QUANTUM && len == 4 {
                let quantum = u32::from_be_bytes([value[0], value[1], value[2], value[3]]);
                if quantum > 0 {
                    self.inner.rx_quantum.store(quantum, Ordering::SeqCst);
                }
            }
        }
        debug!("session to {} open, quantum {}", self.peer(), self.rx_quantum());
        Ok(())
    }

    /// Tear the session down: best-effort DSICloseSession, then shut the
    /// socket and fail every pending exchange.
    pub async fn close(&self) {
        if !self.inner.alive.swap(false, Ordering::SeqCst) {
            return;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let header = DsiHeader::request(DsiCommand::CloseSession, id, 0, 0);
        let frame = dsi::build_frame(&header, &[]);
        {
            let mut writer = self.inner.writer.lock().await;
            let _ = writer.write_all(&frame).await;
            let _ = writer.shutdown().await;
        }

        if let Some(handle) = self.inner.reader.lock().unwrap().take() {
            handle.abort();
        }
        self.inner.fail_all(|| TransportError::Closed);
    }
}

async fn reader_loop(inner: Arc<Inner>, read_half: tokio::net::tcp::OwnedReadHalf) {
    let mut frames = dsi::frame_codec().new_read(read_half);

    loop {
        match frames.next().await {
            Some(Ok(bytes)) => {
                if !handle_frame(&inner, &bytes).await {
                    break;
                }
            }
            Some(Err(e)) => {
                warn!("session {}: read error: {}", inner.peer, e);
                inner.fail_all(|| TransportError::Eof);
                break;
            }
            None => {
                inner.fail_all(|| TransportError::Eof);
                break;
            }
        }
    }
    inner.alive.store(false, Ordering::SeqCst);
}

/// Dispatch one inbound frame. Returns false when the session must stop.
async fn handle_frame(inner: &Arc<Inner>, bytes: &[u8]) -> bool {
    let header = match DsiHeader::decode(bytes) {
        Ok(header) => header,
        Err(e) => {
            // The codec only surfaces whole frames, so this means the peer
            // lied in the length field. Nothing can be correlated; drop it.
            warn!("session {}: unparsable frame: {}", inner.peer, e);
            return true;
        }
    };

    let quantum = inner.rx_quantum.load(Ordering::SeqCst) as usize;
    let mut body = bytes[HEADER_LEN..].to_vec();
    if body.len() > quantum {
        warn!(
            "session {}: reply id {} exceeds quantum, dropping {} bytes",
            inner.peer,
            header.request_id,
            body.len() - quantum
        );
        body.truncate(quantum);
    }

    if header.flags == FLAG_REPLY {
        let waiter = inner.pending.lock().unwrap().remove(&header.request_id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(Ok(Reply { header, body }));
            }
            None => warn!(
                "session {}: reply for unknown request id {}",
                inner.peer, header.request_id
            ),
        }
        return true;
    }

    // Server initiated traffic.
    match DsiCommand::from_u8(header.command) {
        Some(DsiCommand::Tickle) => {
            let mut reply = DsiHeader::request(DsiCommand::Tickle, header.request_id, 0, 0);
            reply.flags = FLAG_REPLY;
            let frame = dsi::build_frame(&reply, &[]);
            let mut writer = inner.writer.lock().await;
            let _ = writer.write_all(&frame).await;
            true
        }
        Some(DsiCommand::Attention) => {
            info!("session {}: attention from server", inner.peer);
            true
        }
        Some(DsiCommand::CloseSession) => {
            info!("session {}: server closed the session", inner.peer);
            inner.fail_all(|| TransportError::Closed);
            false
        }
        _ => {
            debug!(
                "session {}: ignoring server request command {}",
                inner.peer, header.command
            );
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Read one request frame from the stub side of the stream.
    async fn read_request(
        frames: &mut tokio_util::codec::FramedRead<
            tokio::net::TcpStream,
            tokio_util::codec::LengthDelimitedCodec,
        >,
    ) -> (DsiHeader, Vec<u8>) {
        let bytes = frames.next().await.unwrap().unwrap();
        let header = DsiHeader::decode(&bytes).unwrap();
        (header, bytes[HEADER_LEN..].to_vec())
    }

    fn reply_frame(request: &DsiHeader, code: i32, body: &[u8]) -> bytes::BytesMut {
        let header = DsiHeader {
            flags: FLAG_REPLY,
            command: request.command,
            request_id: request.request_id,
            err_offset: code as u32,
            length: body.len() as u32,
            reserved: 0,
        };
        dsi::build_frame(&header, body)
    }

    #[tokio::test]
    async fn open_session_negotiates_quantum() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let stub = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut frames = dsi::frame_codec().new_read(stream);
            let (header, body) = read_request(&mut frames).await;
            assert_eq!(header.command, DsiCommand::OpenSession as u8);
            // Client advertises its attention quantum.
            assert_eq!(body[0], 0x01);

            let mut option = Vec::new();
            option.extend_from_slice(&[0x00, 0x04]);
            option.extend_from_slice(&0x0004_0000u32.to_be_bytes());
            let frame = reply_frame(&header, 0, &option);
            frames.get_mut().write_all(&frame).await.unwrap();

            // Hold the socket open until the client is done.
            let _ = frames.next().await;
        });

        let session = DsiSession::connect(addr).await.unwrap();
        session.open_session().await.unwrap();
        assert_eq!(session.rx_quantum(), 0x0004_0000);
        session.close().await;
        stub.await.unwrap();
    }

    #[tokio::test]
    async fn oversized_reply_is_clamped_to_quantum() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let stub = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut frames = dsi::frame_codec().new_read(stream);

            let (header, _) = read_request(&mut frames).await;
            let mut option = Vec::new();
            option.extend_from_slice(&[0x00, 0x04]);
            option.extend_from_slice(&16u32.to_be_bytes());
            let frame = reply_frame(&header, 0, &option);
            frames.get_mut().write_all(&frame).await.unwrap();

            let (header, _) = read_request(&mut frames).await;
            // 64 bytes against a 16 byte quantum.
            let frame = reply_frame(&header, 0, &vec![0xab; 64]);
            frames.get_mut().write_all(&frame).await.unwrap();
            let _ = frames.next().await;
        });

        let session = DsiSession::connect(addr).await.unwrap();
        session.open_session().await.unwrap();
        assert_eq!(session.rx_quantum(), 16);

        let reply = session.command(&[0u8; 2]).await.unwrap();
        assert_eq!(reply.body.len(), 16);
        session.close().await;
        stub.await.unwrap();
    }

    #[tokio::test]
    async fn eof_fails_pending_exchanges() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let stub = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut frames = dsi::frame_codec().new_read(stream);
            let _ = read_request(&mut frames).await;
            // Drop the connection with the exchange still pending.
        });

        let session = DsiSession::connect(addr).await.unwrap();
        let err = session.command(&[0u8; 2]).await.unwrap_err();
        match err {
            Error::Transport(TransportError::Eof) => {}
            other => panic!("unexpected error: {:?}", other),
        }
        stub.await.unwrap();
    }

    #[tokio::test]
    async fn request_id_allocation_skips_a_busy_slot() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let stub = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut frames = dsi::frame_codec().new_read(stream);
            let (header, _) = read_request(&mut frames).await;
            let frame = reply_frame(&header, 0, b"ok");
            frames.get_mut().write_all(&frame).await.unwrap();
            let _ = frames.next().await;
        });

        let session = DsiSession::connect(addr).await.unwrap();
        // Park a waiter on the id the counter is about to hand out, the way
        // a wrapped counter finds one after 65536 exchanges.
        let (tx, parked) = oneshot::channel();
        session.inner.pending.lock().unwrap().insert(0, tx);

        let exchange = session.submit(DsiCommand::Command, 0, b"x").await.unwrap();
        assert_ne!(exchange.request_id(), 0);
        assert_eq!(exchange.wait().await.unwrap().body, b"ok");

        // The parked waiter was never clobbered; teardown resolves it.
        session.close().await;
        assert!(matches!(
            parked.await.unwrap(),
            Err(Error::Transport(TransportError::Closed))
        ));
        stub.await.unwrap();
    }

    #[tokio::test]
    async fn submit_then_wait_preserves_correlation() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let stub = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut frames = dsi::frame_codec().new_read(stream);
            let (first, _) = read_request(&mut frames).await;
            let (second, _) = read_request(&mut frames).await;
            // Answer in reverse order; correlation is by id, not arrival.
            let frame = reply_frame(&second, 0, b"second");
            frames.get_mut().write_all(&frame).await.unwrap();
            let frame = reply_frame(&first, 0, b"first");
            frames.get_mut().write_all(&frame).await.unwrap();
            let _ = frames.next().await;
        });

        let session = DsiSession::connect(addr).await.unwrap();
        let a = session.submit(DsiCommand::Command, 0, b"a").await.unwrap();
        let b = session.submit(DsiCommand::Command, 0, b"b").await.unwrap();
        assert_ne!(a.request_id(), b.request_id());

        assert_eq!(a.wait().await.unwrap().body, b"first");
        assert_eq!(b.wait().await.unwrap().body, b"second");
        session.close().await;
        stub.await.unwrap();
    }
}
