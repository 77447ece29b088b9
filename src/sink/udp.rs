use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use super::{PixelOrder, Sink, SinkError, Submission};

/// Default datagram payload limit, chosen to stay under a typical MTU.
pub const DEFAULT_MTU: usize = 1400;

const HEADER_LEN: usize = 8;

/// Sends frames as UDP datagrams.
///
/// Each datagram is `u32le seq | u16le offset_in_frame_bytes |
/// u16le payload_len | payload`; a frame larger than the MTU is split
/// into several datagrams that the receiver reassembles by sequence
/// number.
pub struct UdpSink {
    target: String,
    resolved: Option<SocketAddr>,
    socket: Option<UdpSocket>,
    mtu: usize,
    bytes_per_pixel: usize,
}

impl UdpSink {
    pub fn new(target: impl Into<String>, mtu: usize) -> Self {
        Self {
            target: target.into(),
            resolved: None,
            socket: None,
            mtu: mtu.max(64),
            bytes_per_pixel: 3,
        }
    }

    fn ensure_socket(&mut self) -> Result<(&UdpSocket, SocketAddr), SinkError> {
        if self.resolved.is_none() {
            let addr = self
                .target
                .to_socket_addrs()
                .map_err(|e| SinkError::Transient(format!("resolving {}: {e}", self.target)))?
                .next()
                .ok_or_else(|| {
                    SinkError::Fatal(format!("{} resolves to no address", self.target))
                })?;
            self.resolved = Some(addr);
        }
        if self.socket.is_none() {
            let socket = UdpSocket::bind("0.0.0.0:0")
                .map_err(|e| SinkError::Transient(format!("binding UDP sink socket: {e}")))?;
            self.socket = Some(socket);
        }
        Ok((
            self.socket.as_ref().expect("socket bound above"),
            self.resolved.expect("address resolved above"),
        ))
    }
}

/// Split one range of frame bytes into datagrams.
pub fn fragment(
    seq: u32,
    byte_offset: usize,
    bytes: &[u8],
    mtu: usize,
) -> Vec<Vec<u8>> {
    let mut datagrams = Vec::new();
    let mut cursor = 0;
    while cursor < bytes.len() {
        let chunk = (bytes.len() - cursor).min(mtu);
        let mut datagram = Vec::with_capacity(HEADER_LEN + chunk);
        datagram.extend_from_slice(&seq.to_le_bytes());
        datagram.extend_from_slice(&((byte_offset + cursor) as u16).to_le_bytes());
        datagram.extend_from_slice(&(chunk as u16).to_le_bytes());
        datagram.extend_from_slice(&bytes[cursor..cursor + chunk]);
        datagrams.push(datagram);
        cursor += chunk;
    }
    datagrams
}

impl Sink for UdpSink {
    fn configure(&mut self, order: PixelOrder, _led_count: usize) -> Result<(), SinkError> {
        self.bytes_per_pixel = order.bytes_per_pixel();
        Ok(())
    }

    fn submit(&mut self, submission: &Submission) -> Result<(), SinkError> {
        let bpp = self.bytes_per_pixel;
        let mtu = self.mtu;
        let mut datagrams = Vec::new();
        for range in &submission.ranges {
            datagrams.extend(fragment(
                submission.seq,
                range.offset_px * bpp,
                &range.bytes,
                mtu,
            ));
        }
        let (socket, addr) = self.ensure_socket()?;
        for datagram in &datagrams {
            socket
                .send_to(datagram, addr)
                .map_err(|e| SinkError::Transient(format!("sending to {addr}: {e}")))?;
        }
        Ok(())
    }
}
