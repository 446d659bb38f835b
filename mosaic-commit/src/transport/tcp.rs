//! TCP transport used by the binaries.
//!
//! Each protocol message travels on its own short-lived connection as one
//! envelope frame:
//!
//! ```text
//! +--------------------+------------------+-----------+--------------+
//! | frame len (u32 BE) | src len (u16 BE) | src bytes | message body |
//! +--------------------+------------------+-----------+--------------+
//! ```
//!
//! The frame length covers everything after itself and is validated against
//! [`MAX_FRAME_BYTES`] before any allocation. Outbound sends are
//! fire-and-forget: connection failures are logged and the frame counts as
//! lost, which the protocol's timers already handle.

use super::{MessageHandler, Transport};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Upper bound on a single envelope frame.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Outbound TCP transport with a static address book.
pub struct TcpTransport {
    local_id: String,
    routes: RwLock<HashMap<String, String>>,
}

impl TcpTransport {
    /// Create a transport sending as `local_id`, with `routes` mapping
    /// destination addresses to `host:port` socket addresses.
    #[must_use]
    pub fn new(local_id: impl Into<String>, routes: HashMap<String, String>) -> Arc<Self> {
        Arc::new(Self {
            local_id: local_id.into(),
            routes: RwLock::new(routes),
        })
    }

    /// Add or replace a route.
    pub fn add_route(&self, dest: impl Into<String>, addr: impl Into<String>) {
        self.routes.write().insert(dest.into(), addr.into());
    }
}

impl Transport for TcpTransport {
    fn send(&self, dest: &str, frame: Bytes) {
        let addr = match self.routes.read().get(dest) {
            Some(addr) => addr.clone(),
            None => {
                tracing::warn!(%dest, "no route for destination; dropping frame");
                return;
            }
        };

        let src = self.local_id.clone();
        let dest = dest.to_string();
        tokio::spawn(async move {
            if let Err(e) = send_frame(&addr, &src, &frame).await {
                // Lost frame; retransmission timers recover if it mattered.
                tracing::debug!(%dest, %addr, error = %e, "send failed");
            }
        });
    }
}

async fn send_frame(addr: &str, src: &str, body: &[u8]) -> std::io::Result<()> {
    let mut envelope = Vec::with_capacity(4 + 2 + src.len() + body.len());
    let frame_len = (2 + src.len() + body.len()) as u32;
    envelope.extend_from_slice(&frame_len.to_be_bytes());
    envelope.extend_from_slice(&(src.len() as u16).to_be_bytes());
    envelope.extend_from_slice(src.as_bytes());
    envelope.extend_from_slice(body);

    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(&envelope).await?;
    stream.shutdown().await
}

/// Accept loop feeding inbound frames into a node's handler.
///
/// Runs until the listener fails fatally; individual connection errors are
/// logged and do not stop the loop.
pub async fn serve(listener: TcpListener, handler: Arc<dyn MessageHandler>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    if let Err(e) = read_connection(stream, handler).await {
                        tracing::debug!(%peer, error = %e, "connection ended with error");
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
            }
        }
    }
}

async fn read_connection(
    mut stream: TcpStream,
    handler: Arc<dyn MessageHandler>,
) -> std::io::Result<()> {
    loop {
        let frame_len = match stream.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        };

        // Validate before allocating.
        if frame_len < 2 || frame_len > MAX_FRAME_BYTES {
            tracing::debug!(frame_len, "rejecting envelope with bad length");
            return Ok(());
        }

        let mut frame = vec![0u8; frame_len];
        stream.read_exact(&mut frame).await?;

        let src_len = u16::from_be_bytes([frame[0], frame[1]]) as usize;
        if 2 + src_len > frame.len() {
            tracing::debug!(src_len, "rejecting envelope with bad source length");
            return Ok(());
        }

        let src = match std::str::from_utf8(&frame[2..2 + src_len]) {
            Ok(src) => src.to_string(),
            Err(_) => {
                tracing::debug!("rejecting envelope with non-utf8 source id");
                return Ok(());
            }
        };

        let body = &frame[2 + src_len..];
        if !handler.on_message(&src, body) {
            tracing::debug!(%src, "handler declined frame; dropping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        frames: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl MessageHandler for Recorder {
        fn on_message(&self, src: &str, frame: &[u8]) -> bool {
            self.frames.lock().push((src.to_string(), frame.to_vec()));
            true
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn frames_arrive_with_sender_identity() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();

        let recorder = Arc::new(Recorder {
            frames: Mutex::new(Vec::new()),
        });
        tokio::spawn(serve(listener, recorder.clone()));

        let routes = HashMap::from([("peer".to_string(), addr)]);
        let transport = TcpTransport::new("node-a", routes);
        transport.send("peer", Bytes::from_static(&[1, 2, 3]));

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            {
                let frames = recorder.frames.lock();
                if !frames.is_empty() {
                    assert_eq!(frames[0], ("node-a".to_string(), vec![1, 2, 3]));
                    break;
                }
            }
            assert!(std::time::Instant::now() < deadline, "frame never arrived");
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unroutable_destination_is_dropped() {
        let transport = TcpTransport::new("node-a", HashMap::new());
        // Must not panic or block.
        transport.send("ghost", Bytes::from_static(b"x"));
    }
}
