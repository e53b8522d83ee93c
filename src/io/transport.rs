//! Transport layer - raw message exchange over a byte stream
//!
//! A transport writes text and reads raw byte chunks, and knows nothing
//! about framing or JSON-RPC. Inbound bytes are handed on untouched; chunk
//! boundaries may fall anywhere, including inside a UTF-8 sequence. [`StreamTransport`] works over any async byte stream
//! pair: child process stdio, TCP socket halves, or in-memory duplex pipes.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, trace};

// ============================================================================
// Constants
// ============================================================================

/// Size of the read buffer for inbound reads
const READ_BUFFER_SIZE: usize = 4096;

/// Core transport trait for bidirectional message exchange
#[async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send a message (raw string)
    async fn send(&mut self, message: &str) -> Result<(), Self::Error>;

    /// Receive the next chunk of bytes, exactly as read
    async fn receive(&mut self) -> Result<Vec<u8>, Self::Error>;

    /// Close the transport
    async fn close(&mut self) -> Result<(), Self::Error>;

    /// Check if transport is still active
    fn is_connected(&self) -> bool;
}

// ============================================================================
// Stream Transport Implementation
// ============================================================================

/// Error types for stream transport
#[derive(Debug, thiserror::Error)]
pub enum StreamTransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport is disconnected")]
    Disconnected,

    #[error("Channel error: {0}")]
    Channel(String),
}

/// Transport over an arbitrary reader/writer pair
///
/// Writes are funnelled through a single writer task so that two envelopes
/// can never interleave on the wire, regardless of how many callers send.
#[derive(Debug)]
pub struct StreamTransport {
    /// Channel feeding the writer task
    outbound: Option<mpsc::UnboundedSender<String>>,

    /// Channel fed by the reader task
    inbound: Option<mpsc::UnboundedReceiver<Vec<u8>>>,

    /// Connection status
    connected: bool,
}

impl StreamTransport {
    /// Create a transport from a reader and writer, spawning one task for each
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_sender, outbound_receiver) = mpsc::unbounded_channel();
        let (inbound_sender, inbound_receiver) = mpsc::unbounded_channel();

        tokio::spawn(Self::writer_task(writer, outbound_receiver));
        tokio::spawn(Self::reader_task(reader, inbound_sender));

        Self {
            outbound: Some(outbound_sender),
            inbound: Some(inbound_receiver),
            connected: true,
        }
    }

    /// Writes queued messages in order, flushing after each one
    async fn writer_task<W>(mut writer: W, mut receiver: mpsc::UnboundedReceiver<String>)
    where
        W: AsyncWrite + Unpin,
    {
        while let Some(message) = receiver.recv().await {
            trace!("StreamTransport: writing {} bytes", message.len());

            if let Err(e) = writer.write_all(message.as_bytes()).await {
                error!("Failed to write to stream: {}", e);
                break;
            }

            if let Err(e) = writer.flush().await {
                error!("Failed to flush stream: {}", e);
                break;
            }
        }

        let _ = writer.shutdown().await;
        trace!("StreamTransport: writer task finished");
    }

    async fn reader_task<R>(reader: R, sender: mpsc::UnboundedSender<Vec<u8>>)
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut read_buffer = Box::new([0u8; READ_BUFFER_SIZE]);

        loop {
            match reader.read(read_buffer.as_mut()).await {
                Ok(0) => {
                    trace!("StreamTransport: reader reached EOF");
                    break;
                }
                Ok(n) => {
                    if sender.send(read_buffer[..n].to_vec()).is_err() {
                        trace!("StreamTransport: inbound receiver dropped");
                        return;
                    }
                }
                Err(e) => {
                    error!("Failed to read from stream: {}", e);
                    break;
                }
            }
        }

        trace!("StreamTransport: reader task finished");
    }
}

#[async_trait]
impl Transport for StreamTransport {
    type Error = StreamTransportError;

    async fn send(&mut self, message: &str) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(StreamTransportError::Disconnected);
        }

        let sender = self
            .outbound
            .as_ref()
            .ok_or(StreamTransportError::Disconnected)?;

        sender
            .send(message.to_string())
            .map_err(|e| StreamTransportError::Channel(e.to_string()))
    }

    async fn receive(&mut self) -> Result<Vec<u8>, Self::Error> {
        if !self.connected {
            return Err(StreamTransportError::Disconnected);
        }

        let receiver = self
            .inbound
            .as_mut()
            .ok_or(StreamTransportError::Disconnected)?;

        match receiver.recv().await {
            Some(data) => Ok(data),
            None => {
                self.connected = false;
                Err(StreamTransportError::Disconnected)
            }
        }
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.connected = false;
        self.outbound.take();
        self.inbound.take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ============================================================================
// Mock Transport Implementation
// ============================================================================

/// Error type for mock transport
#[derive(Debug, thiserror::Error)]
pub enum MockTransportError {
    #[error("Transport is disconnected")]
    Disconnected,
    #[error("No more responses available")]
    NoMoreResponses,
}

/// Scripted transport for tests: records what was sent, replays canned input
#[derive(Clone)]
pub struct MockTransport {
    sent_messages: Arc<Mutex<Vec<String>>>,
    responses: Arc<Mutex<VecDeque<Vec<u8>>>>,
    connected: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            sent_messages: Arc::new(Mutex::new(Vec::new())),
            responses: Arc::new(Mutex::new(VecDeque::new())),
            connected: true,
        }
    }

    /// Create a mock transport that replays `responses` in order
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self::with_chunks(responses.into_iter().map(String::into_bytes).collect())
    }

    /// Like [`MockTransport::with_responses`], for chunks that need not be UTF-8
    pub fn with_chunks(chunks: Vec<Vec<u8>>) -> Self {
        let transport = Self::new();
        if let Ok(mut queue) = transport.responses.lock() {
            queue.extend(chunks);
        }
        transport
    }

    /// All messages sent through this transport (shared across clones)
    pub fn sent_messages(&self) -> Vec<String> {
        self.sent_messages
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn send(&mut self, message: &str) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(MockTransportError::Disconnected);
        }

        if let Ok(mut sent) = self.sent_messages.lock() {
            sent.push(message.to_string());
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>, Self::Error> {
        if !self.connected {
            return Err(MockTransportError::Disconnected);
        }

        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut responses| responses.pop_front());
        next.ok_or(MockTransportError::NoMoreResponses)
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ============================================================================
// Tests
// ============================================================================
