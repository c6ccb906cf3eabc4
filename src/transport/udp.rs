use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use log::{debug, trace};
use socket2::{Domain, Protocol, SockAddr, Type};

use super::{LineChannel, resolve};
use crate::error::{Error, ErrorCode, Result, fmt_error, socket_error};
use crate::protocol::Buffer;

pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 1400;
const DEFAULT_MULTICAST_TTL: u32 = 2;

#[derive(Debug, Clone)]
pub struct UdpSettings {
    /// Local interface to send from; selects the multicast interface for
    /// multicast destinations.
    pub interface: Option<Ipv4Addr>,
    pub multicast_ttl: u32,
    pub max_datagram_size: usize,
}

impl Default for UdpSettings {
    fn default() -> Self {
        Self {
            interface: None,
            multicast_ttl: DEFAULT_MULTICAST_TTL,
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
        }
    }
}

/// Sends rows as datagrams, never splitting a row across two of them.
///
/// Delivery is fire-and-forget; a failed send is not retried.
pub struct UdpChannel {
    addr: SocketAddr,
    socket: Option<socket2::Socket>,
    max_datagram_size: usize,
}

impl UdpChannel {
    pub fn connect(host: &str, port: u16, settings: UdpSettings) -> Result<Self> {
        let addr = resolve(host, port)?;
        if settings.max_datagram_size == 0 {
            return Err(Error::new(
                ErrorCode::ConfigError,
                "max_datagram_size must be positive",
            ));
        }
        let socket = open(addr, &settings)
            .map_err(|err| socket_error(&format!("Could not open UDP socket for {addr}"), err))?;
        debug!(
            "udp channel to {addr} [multicast={}, max_datagram_size={}]",
            addr.ip().is_multicast(),
            settings.max_datagram_size
        );
        Ok(Self {
            addr,
            socket: Some(socket),
            max_datagram_size: settings.max_datagram_size,
        })
    }
}

fn open(addr: SocketAddr, settings: &UdpSettings) -> std::io::Result<socket2::Socket> {
    let socket = socket2::Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    match (addr.ip(), settings.interface) {
        (IpAddr::V4(ip), interface) if ip.is_multicast() => {
            socket.set_multicast_if_v4(&interface.unwrap_or(Ipv4Addr::UNSPECIFIED))?;
            socket.set_multicast_ttl_v4(settings.multicast_ttl)?;
        }
        (_, Some(interface)) => {
            socket.bind(&SockAddr::from(SocketAddr::new(IpAddr::V4(interface), 0)))?;
        }
        (_, None) => {}
    }
    Ok(socket)
}

/// Groups consecutive rows into ranges of at most `max` bytes.
pub(crate) fn datagrams(row_ends: &[usize], max: usize) -> Result<Vec<(usize, usize)>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut last_end = 0;
    for &end in row_ends {
        if end - last_end > max {
            return Err(fmt_error!(
                InvalidApiCall,
                "row of {} bytes does not fit into a datagram [max_datagram_size={max}]",
                end - last_end
            ));
        }
        if end - start > max {
            out.push((start, last_end));
            start = last_end;
        }
        last_end = end;
    }
    if last_end > start {
        out.push((start, last_end));
    }
    Ok(out)
}

impl LineChannel for UdpChannel {
    fn send(&mut self, buffer: &Buffer) -> Result<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| Error::new(ErrorCode::SocketError, "UDP channel is closed"))?;
        let target = SockAddr::from(self.addr);
        let bytes = buffer.as_bytes();
        for (start, end) in datagrams(buffer.row_ends(), self.max_datagram_size)? {
            trace!("sending datagram of {} bytes to {}", end - start, self.addr);
            socket
                .send_to(&bytes[start..end], &target)
                .map_err(|err| socket_error("Could not send datagram", err).with_retryable(false))?;
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!("closed udp channel to {}", self.addr);
        }
    }

    fn describe(&self) -> String {
        format!("udp://{}", self.addr)
    }
}

#[cfg(test)]
mod tests {
    use std::net::UdpSocket;
    use std::time::Duration;

    use super::*;
    use crate::protocol::{ProtocolVersion, TimeUnit};

    #[test]
    fn groups_rows_without_splitting_them() {
        assert_eq!(datagrams(&[10, 20, 30], 25).unwrap(), vec![(0, 20), (20, 30)]);
        assert_eq!(datagrams(&[10, 20, 30], 30).unwrap(), vec![(0, 30)]);
        assert_eq!(datagrams(&[10, 20, 30], 10).unwrap(), vec![(0, 10), (10, 20), (20, 30)]);
        assert!(datagrams(&[], 10).unwrap().is_empty());
    }

    #[test]
    fn oversized_row_is_rejected() {
        let err = datagrams(&[10, 50], 20).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidApiCall);
        assert!(err.msg().contains("does not fit into a datagram"));
    }

    #[test]
    fn sends_one_datagram_per_group() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let port = server.local_addr().unwrap().port();

        let mut buffer = Buffer::new(ProtocolVersion::V1);
        for i in 0..3 {
            buffer.table("t").unwrap().column_i64("x", i).unwrap();
            buffer.at(1, TimeUnit::Micros).unwrap();
        }
        let row_len = buffer.row_ends()[0];

        let settings = UdpSettings {
            max_datagram_size: row_len * 2,
            ..UdpSettings::default()
        };
        let mut channel = UdpChannel::connect("127.0.0.1", port, settings).unwrap();
        channel.send(&buffer).unwrap();

        let mut buf = [0u8; 1500];
        let n = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"t x=0i 1000\nt x=1i 1000\n");
        let n = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"t x=2i 1000\n");

        channel.close();
        let err = channel.send(&buffer).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SocketError);
    }

    #[test]
    fn zero_datagram_size_is_a_config_error() {
        let settings = UdpSettings {
            max_datagram_size: 0,
            ..UdpSettings::default()
        };
        let err = UdpChannel::connect("127.0.0.1", 9009, settings).err().unwrap();
        assert_eq!(err.code(), ErrorCode::ConfigError);
    }
}
