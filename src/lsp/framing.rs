//! LSP message framing layer
//!
//! Wraps a [`Transport`] with `Content-Length` header framing:
//!
//! ```text
//! Content-Length: <length>\r\n\r\n<content>
//! ```
//!
//! Lengths count bytes, so frames are cut from the raw byte stream and each
//! body is checked for UTF-8 on its own. Header blocks without a usable
//! `Content-Length`, and bodies that are not UTF-8, are logged and skipped so
//! stray output from a backend never takes the connection down.

use crate::io::transport::Transport;
use std::collections::VecDeque;
use tracing::{trace, warn};

/// Error types for LSP framing
#[derive(Debug, thiserror::Error)]
pub enum LspFramingError<T: std::error::Error + Send + Sync + 'static> {
    #[error("Transport error: {0}")]
    Transport(T),

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Maximum message size to prevent memory exhaustion
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16MB

const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";

/// Outcome of scanning one header block
enum HeaderScan {
    Length(usize),
    Unusable(String),
}

/// LSP message framing wrapper
pub struct LspFraming<T: Transport> {
    transport: T,

    /// Accumulates partial messages across reads
    receive_buffer: Vec<u8>,

    /// Complete messages not yet handed out
    message_queue: VecDeque<String>,

    /// Number of header blocks and bodies discarded as garbage
    skipped: usize,
}

impl<T: Transport> LspFraming<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            receive_buffer: Vec::new(),
            message_queue: VecDeque::new(),
            skipped: 0,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Number of unusable frames dropped so far
    pub fn skipped_frames(&self) -> usize {
        self.skipped
    }

    /// Frame a message body for the wire
    pub fn frame(message: &str) -> String {
        format!("Content-Length: {}\r\n\r\n{}", message.len(), message)
    }

    /// Try to cut one message off the front of the receive buffer
    ///
    /// Returns `Ok(None)` when more data is needed.
    fn try_parse_message(&mut self) -> Result<Option<String>, LspFramingError<T::Error>> {
        loop {
            let Some(header_end) = self
                .receive_buffer
                .windows(HEADER_SEPARATOR.len())
                .position(|window| window == HEADER_SEPARATOR)
            else {
                return Ok(None);
            };
            let content_start = header_end + HEADER_SEPARATOR.len();

            let scan = Self::scan_header(&String::from_utf8_lossy(&self.receive_buffer[..header_end]));
            let content_length = match scan {
                HeaderScan::Length(length) => length,
                HeaderScan::Unusable(reason) => {
                    warn!("LspFraming: skipping header block: {}", reason);
                    self.receive_buffer.drain(..content_start);
                    self.skipped += 1;
                    continue;
                }
            };

            if content_length > MAX_MESSAGE_SIZE {
                return Err(LspFramingError::MessageTooLarge {
                    size: content_length,
                    max: MAX_MESSAGE_SIZE,
                });
            }

            let available = self.receive_buffer.len() - content_start;
            if available < content_length {
                trace!(
                    "LspFraming: incomplete message - need {} more bytes",
                    content_length - available
                );
                return Ok(None);
            }

            let content_end = content_start + content_length;
            let body: Vec<u8> = self.receive_buffer.drain(..content_end).skip(content_start).collect();

            match String::from_utf8(body) {
                Ok(message) => {
                    trace!("LspFraming: parsed complete message ({} bytes)", content_length);
                    return Ok(Some(message));
                }
                Err(e) => {
                    warn!(
                        "LspFraming: dropping {}-byte body that is not UTF-8: {}",
                        content_length,
                        e.utf8_error()
                    );
                    self.skipped += 1;
                }
            }
        }
    }

    /// Find `Content-Length` among the header lines, ignoring anything else
    fn scan_header(header: &str) -> HeaderScan {
        for line in header.lines() {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            if !name.trim().eq_ignore_ascii_case("Content-Length") {
                continue;
            }
            let value = value.trim();
            return match value.parse::<usize>() {
                Ok(length) => HeaderScan::Length(length),
                Err(_) => HeaderScan::Unusable(format!("invalid Content-Length '{value}'")),
            };
        }

        HeaderScan::Unusable(format!(
            "missing Content-Length in {:?}",
            header.chars().take(80).collect::<String>()
        ))
    }

    async fn process_transport_data(&mut self) -> Result<(), LspFramingError<T::Error>> {
        let new_data = self
            .transport
            .receive()
            .await
            .map_err(LspFramingError::Transport)?;

        self.receive_buffer.extend_from_slice(&new_data);

        while let Some(message) = self.try_parse_message()? {
            self.message_queue.push_back(message);
        }

        Ok(())
    }

    /// Send one message body with its header
    pub async fn send(&mut self, message: &str) -> Result<(), LspFramingError<T::Error>> {
        trace!("LspFraming: sending framed message ({} bytes)", message.len());

        self.transport
            .send(&Self::frame(message))
            .await
            .map_err(LspFramingError::Transport)
    }

    /// Next complete message body
    ///
    /// Cancel safe: a dropped call loses no buffered data
    pub async fn receive(&mut self) -> Result<String, LspFramingError<T::Error>> {
        loop {
            if let Some(message) = self.message_queue.pop_front() {
                return Ok(message);
            }
            self.process_transport_data().await?;
        }
    }

    pub async fn close(&mut self) -> Result<(), LspFramingError<T::Error>> {
        self.transport
            .close()
            .await
            .map_err(LspFramingError::Transport)
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }
}
