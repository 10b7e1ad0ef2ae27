//! # Radio Channel Backends
//!
//! The transport talks to the radio through [`RadioChannel`], a capability
//! interface with one implementation per backend:
//!
//! - [`SerialRadio`]: a transparent UART radio module (LoRa-class). Frames are
//!   delimited on the UART with a sync byte and a length byte.
//! - [`UdpRadio`]: datagrams between two hosts, for bench testing without
//!   radio hardware.
//!
//! Receiving is poll-based: `poll_receive` never waits for data, it returns
//! `Ok(None)` when no complete frame is available yet.

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::error::{RcLinkError, Result};
use crate::packet::protocol::MAX_FRAME_SIZE;

/// UART frame sync byte
pub const UART_SYNC_BYTE: u8 = 0x7E;

/// Capability interface of a half-duplex packet radio.
#[async_trait]
pub trait RadioChannel: Send {
    /// Brings the radio up. Called once before any send/receive.
    async fn begin(&mut self) -> Result<()>;

    /// Transmits one complete frame.
    async fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Returns the next complete frame if one has arrived, without waiting.
    async fn poll_receive(&mut self) -> Result<Option<Vec<u8>>>;

    /// Largest frame this channel carries.
    fn max_frame_size(&self) -> usize {
        MAX_FRAME_SIZE
    }

    /// Signal strength of the last received frame in dBm (display only).
    fn signal_strength(&self) -> i32 {
        0
    }

    /// Signal-to-noise ratio of the last received frame in dB (display only).
    fn noise(&self) -> f32 {
        0.0
    }
}

// ==================== UART framing ====================

/// Wraps a frame for the UART: sync byte, length byte, frame bytes.
///
/// # Errors
///
/// Returns [`RcLinkError::FrameTooLarge`] if the frame does not fit a length byte.
pub fn frame_for_uart(frame: &[u8]) -> Result<Vec<u8>> {
    if frame.len() > MAX_FRAME_SIZE {
        return Err(RcLinkError::FrameTooLarge {
            size: frame.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let mut wire = Vec::with_capacity(frame.len() + 2);
    wire.push(UART_SYNC_BYTE);
    wire.push(frame.len() as u8);
    wire.extend_from_slice(frame);
    Ok(wire)
}

/// Extracts the next complete frame from the UART receive buffer.
///
/// Bytes before a sync byte are discarded. Returns `None` while the frame at
/// the head of the buffer is still incomplete.
pub fn take_uart_frame(buffer: &mut BytesMut) -> Option<Vec<u8>> {
    loop {
        match buffer.iter().position(|&b| b == UART_SYNC_BYTE) {
            Some(0) => {}
            Some(skip) => {
                debug!("Discarding {} bytes before UART sync", skip);
                buffer.advance(skip);
            }
            None => {
                buffer.clear();
                return None;
            }
        }

        if buffer.len() < 2 {
            return None;
        }

        let length = buffer[1] as usize;
        if length == 0 {
            // Not a frame start, resynchronize on the next sync byte
            buffer.advance(1);
            continue;
        }
        if buffer.len() < 2 + length {
            return None;
        }

        buffer.advance(2);
        return Some(buffer.split_to(length).to_vec());
    }
}

// ==================== Serial backend ====================

/// Transparent UART radio module.
///
/// Generic over the port so tests can run it on an in-memory duplex stream.
pub struct SerialRadio<P> {
    port: P,
    device_path: String,
    rx_buffer: BytesMut,
}

impl<P> std::fmt::Debug for SerialRadio<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialRadio")
            .field("device_path", &self.device_path)
            .field("buffered", &self.rx_buffer.len())
            .finish_non_exhaustive()
    }
}

impl SerialRadio<tokio_serial::SerialStream> {
    /// Opens the radio module's UART with 8N1 framing.
    ///
    /// # Errors
    ///
    /// Returns [`RcLinkError::Serial`] if the port cannot be opened.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| RcLinkError::Serial(format!("Failed to open {}: {}", path, e)))?;

        info!("Opened radio module at {} ({} baud)", path, baud_rate);
        Ok(Self::from_port(port, path))
    }
}

impl<P> SerialRadio<P>
where
    P: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps an already opened port.
    pub fn from_port(port: P, device_path: &str) -> Self {
        Self {
            port,
            device_path: device_path.to_string(),
            rx_buffer: BytesMut::with_capacity(2 * MAX_FRAME_SIZE),
        }
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

#[async_trait]
impl<P> RadioChannel for SerialRadio<P>
where
    P: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn begin(&mut self) -> Result<()> {
        self.rx_buffer.clear();
        Ok(())
    }

    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        let wire = frame_for_uart(frame)?;

        self.port
            .write_all(&wire)
            .await
            .map_err(|e| RcLinkError::Serial(format!("Failed to write frame: {}", e)))?;

        self.port
            .flush()
            .await
            .map_err(|e| RcLinkError::Serial(format!("Failed to flush serial port: {}", e)))?;

        debug!("Sent frame ({} bytes) on {}", frame.len(), self.device_path);
        Ok(())
    }

    async fn poll_receive(&mut self) -> Result<Option<Vec<u8>>> {
        if let Some(frame) = take_uart_frame(&mut self.rx_buffer) {
            return Ok(Some(frame));
        }

        let mut chunk = [0u8; MAX_FRAME_SIZE];
        // A zero timeout polls the read exactly once
        match tokio::time::timeout(Duration::ZERO, self.port.read(&mut chunk)).await {
            Ok(Ok(0)) => {
                return Err(RcLinkError::Serial(format!(
                    "{} closed",
                    self.device_path
                )))
            }
            Ok(Ok(n)) => self.rx_buffer.extend_from_slice(&chunk[..n]),
            Ok(Err(e)) => {
                return Err(RcLinkError::Serial(format!("Failed to read: {}", e)));
            }
            Err(_) => {}
        }

        Ok(take_uart_frame(&mut self.rx_buffer))
    }
}

// ==================== UDP backend ====================

/// Datagram link between two hosts, one frame per datagram.
#[derive(Debug)]
pub struct UdpRadio {
    bind_addr: SocketAddr,
    peer_addr: SocketAddr,
    socket: Option<UdpSocket>,
}

impl UdpRadio {
    #[must_use]
    pub fn new(bind_addr: SocketAddr, peer_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            peer_addr,
            socket: None,
        }
    }

    /// Local address once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    fn socket(&self) -> Result<&UdpSocket> {
        self.socket
            .as_ref()
            .ok_or_else(|| RcLinkError::Channel("UDP radio used before begin()".to_string()))
    }
}

#[async_trait]
impl RadioChannel for UdpRadio {
    async fn begin(&mut self) -> Result<()> {
        let socket = UdpSocket::bind(self.bind_addr).await?;
        socket.connect(self.peer_addr).await?;
        info!(
            "UDP radio bound to {} (peer {})",
            socket.local_addr()?,
            self.peer_addr
        );
        self.socket = Some(socket);
        Ok(())
    }

    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(RcLinkError::FrameTooLarge {
                size: frame.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        match self.socket()?.send(frame).await {
            Ok(_) => Ok(()),
            // Nobody listening yet on the peer side: the frame is lost, like on air
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                debug!("Peer {} not listening, frame dropped", self.peer_addr);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn poll_receive(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        match self.socket()?.try_recv(&mut buf) {
            Ok(n) => Ok(Some(buf[..n].to_vec())),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                warn!("UDP peer {} unreachable", self.peer_addr);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// In-memory channel; frames sent on one end of a pair arrive at the other.
    #[derive(Clone)]
    pub struct LoopbackChannel {
        inbox: Arc<Mutex<VecDeque<Vec<u8>>>>,
        outbox: Arc<Mutex<VecDeque<Vec<u8>>>>,
        pub sent: Arc<Mutex<Vec<Vec<u8>>>>,
        pub rssi: i32,
    }

    impl LoopbackChannel {
        pub fn pair() -> (Self, Self) {
            let a_to_b = Arc::new(Mutex::new(VecDeque::new()));
            let b_to_a = Arc::new(Mutex::new(VecDeque::new()));
            let a = Self {
                inbox: b_to_a.clone(),
                outbox: a_to_b.clone(),
                sent: Arc::new(Mutex::new(Vec::new())),
                rssi: -60,
            };
            let b = Self {
                inbox: a_to_b,
                outbox: b_to_a,
                sent: Arc::new(Mutex::new(Vec::new())),
                rssi: -60,
            };
            (a, b)
        }

        /// Places a raw frame in this end's inbox.
        pub fn inject(&self, frame: Vec<u8>) {
            self.inbox.lock().unwrap().push_back(frame);
        }

        /// Drops everything waiting in this end's inbox.
        pub fn drain_inbox(&self) -> Vec<Vec<u8>> {
            self.inbox.lock().unwrap().drain(..).collect()
        }

        pub fn sent_frames(&self) -> Vec<Vec<u8>> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RadioChannel for LoopbackChannel {
        async fn begin(&mut self) -> Result<()> {
            Ok(())
        }

        async fn send(&mut self, frame: &[u8]) -> Result<()> {
            self.sent.lock().unwrap().push(frame.to_vec());
            self.outbox.lock().unwrap().push_back(frame.to_vec());
            Ok(())
        }

        async fn poll_receive(&mut self) -> Result<Option<Vec<u8>>> {
            Ok(self.inbox.lock().unwrap().pop_front())
        }

        fn signal_strength(&self) -> i32 {
            self.rssi
        }

        fn noise(&self) -> f32 {
            9.5
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== UART framing ====================

    #[test]
    fn test_frame_for_uart() {
        let wire = frame_for_uart(&[1, 2, 3]).unwrap();
        assert_eq!(wire, vec![UART_SYNC_BYTE, 3, 1, 2, 3]);
    }

    #[test]
    fn test_frame_for_uart_too_large() {
        let result = frame_for_uart(&[0u8; MAX_FRAME_SIZE + 1]);
        assert!(matches!(result, Err(RcLinkError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_take_uart_frame_complete() {
        let mut buffer = BytesMut::from(&[UART_SYNC_BYTE, 2, 0xAA, 0xBB][..]);
        assert_eq!(take_uart_frame(&mut buffer), Some(vec![0xAA, 0xBB]));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_take_uart_frame_incomplete() {
        let mut buffer = BytesMut::from(&[UART_SYNC_BYTE, 4, 0xAA][..]);
        assert_eq!(take_uart_frame(&mut buffer), None);
        assert_eq!(buffer.len(), 3); // kept for the next read

        buffer.extend_from_slice(&[0xBB, 0xCC, 0xDD]);
        assert_eq!(take_uart_frame(&mut buffer), Some(vec![0xAA, 0xBB, 0xCC, 0xDD]));
    }

    #[test]
    fn test_take_uart_frame_skips_garbage() {
        let mut buffer = BytesMut::from(&[0x00, 0x13, UART_SYNC_BYTE, 1, 0x55][..]);
        assert_eq!(take_uart_frame(&mut buffer), Some(vec![0x55]));
    }

    #[test]
    fn test_take_uart_frame_no_sync_clears_buffer() {
        let mut buffer = BytesMut::from(&[0x01, 0x02, 0x03][..]);
        assert_eq!(take_uart_frame(&mut buffer), None);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_take_uart_frame_two_frames() {
        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&frame_for_uart(&[1]).unwrap());
        buffer.extend_from_slice(&frame_for_uart(&[2, 2]).unwrap());

        assert_eq!(take_uart_frame(&mut buffer), Some(vec![1]));
        assert_eq!(take_uart_frame(&mut buffer), Some(vec![2, 2]));
        assert_eq!(take_uart_frame(&mut buffer), None);
    }

    // ==================== Serial backend ====================

    #[tokio::test]
    async fn test_serial_radio_over_duplex() {
        let (a, b) = tokio::io::duplex(1024);
        let mut tx = SerialRadio::from_port(a, "duplex-a");
        let mut rx = SerialRadio::from_port(b, "duplex-b");
        tx.begin().await.unwrap();
        rx.begin().await.unwrap();

        assert_eq!(rx.poll_receive().await.unwrap(), None);

        tx.send(&[0xA0, 0xB0, 0x01]).await.unwrap();
        tx.send(&[0xA0, 0xB0, 0x00]).await.unwrap();

        assert_eq!(rx.poll_receive().await.unwrap(), Some(vec![0xA0, 0xB0, 0x01]));
        assert_eq!(rx.poll_receive().await.unwrap(), Some(vec![0xA0, 0xB0, 0x00]));
        assert_eq!(rx.poll_receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_serial_radio_reports_closed_port() {
        let (a, b) = tokio::io::duplex(64);
        let mut rx = SerialRadio::from_port(b, "duplex-b");
        drop(a);

        let result = rx.poll_receive().await;
        assert!(matches!(result, Err(RcLinkError::Serial(_))));
    }

    #[test]
    fn test_open_serial_with_invalid_path_returns_error() {
        let result = SerialRadio::open("/dev/nonexistent_radio_12345", 115_200);

        match result {
            Err(RcLinkError::Serial(msg)) => {
                assert!(msg.contains("/dev/nonexistent_radio_12345"));
                assert!(msg.contains("Failed to open"));
            }
            other => panic!("Expected Serial error, got: {:?}", other),
        }
    }

    // ==================== UDP backend ====================

    #[tokio::test]
    async fn test_udp_radio_requires_begin() {
        let mut radio = UdpRadio::new(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:9".parse().unwrap(),
        );
        assert!(matches!(
            radio.poll_receive().await,
            Err(RcLinkError::Channel(_))
        ));
    }

    #[tokio::test]
    async fn test_udp_radio_pair() {
        // Bind the receiver first to learn its port
        let receiver_socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let receiver_addr = receiver_socket.local_addr().unwrap();
        let sender_socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let sender_addr = sender_socket.local_addr().unwrap();
        drop(receiver_socket);
        drop(sender_socket);

        let mut sender = UdpRadio::new(sender_addr, receiver_addr);
        let mut receiver = UdpRadio::new(receiver_addr, sender_addr);
        receiver.begin().await.unwrap();
        sender.begin().await.unwrap();

        sender.send(&[1, 2, 3, 4]).await.unwrap();

        let mut frame = None;
        for _ in 0..100 {
            frame = receiver.poll_receive().await.unwrap();
            if frame.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(frame, Some(vec![1, 2, 3, 4]));
        assert_eq!(receiver.poll_receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_loopback_pair() {
        let (mut a, mut b) = mocks::LoopbackChannel::pair();
        a.send(&[7]).await.unwrap();

        assert_eq!(b.poll_receive().await.unwrap(), Some(vec![7]));
        assert_eq!(b.poll_receive().await.unwrap(), None);
        assert_eq!(a.sent_frames(), vec![vec![7]]);
    }
}
