// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP datagram link.
//!
//! One connected, non-blocking datagram socket per remote peer. Each packet
//! goes out as a single vectored send, so the link never reports a partial
//! write: a datagram is either accepted whole or refused with
//! `WouldBlock`/`ENOBUFS` (backpressure).
//!
//! `relink()` rebuilds the socket with the same configuration, which clears
//! a pending ICMP error (e.g. `ECONNREFUSED` after the peer restarted).

use std::io::{self, IoSlice};
use std::net::SocketAddr;

use parking_lot::RwLock;
use socket2::{Domain, Protocol, Socket, Type};

use super::link::{RelinkStatus, TransportLink};

/// Socket options for a [`UdpLink`].
#[derive(Clone, Debug)]
pub struct UdpLinkConfig {
    /// Local address (port 0 = ephemeral)
    pub bind_addr: SocketAddr,

    /// Peer address
    pub remote_addr: SocketAddr,

    /// Enable SO_REUSEADDR
    pub reuse_address: bool,

    /// SO_SNDBUF size (None = OS default)
    pub send_buffer_size: Option<usize>,

    /// Unicast TTL (None = OS default)
    pub ttl: Option<u32>,
}

impl UdpLinkConfig {
    /// Link to `remote_addr` from an ephemeral local port.
    pub fn new(remote_addr: SocketAddr) -> Self {
        let bind_addr = match remote_addr {
            SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
            SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
        };
        Self {
            bind_addr,
            remote_addr,
            reuse_address: true,
            send_buffer_size: None,
            ttl: None,
        }
    }

    /// Builder: set local bind address
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Builder: set SO_SNDBUF
    pub fn with_send_buffer_size(mut self, size: usize) -> Self {
        self.send_buffer_size = Some(size);
        self
    }

    /// Builder: set unicast TTL
    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.remote_addr.port() == 0 {
            return Err("remote_addr must carry a port");
        }
        if self.bind_addr.is_ipv4() != self.remote_addr.is_ipv4() {
            return Err("bind_addr and remote_addr must share an address family");
        }
        if self.send_buffer_size == Some(0) {
            return Err("send_buffer_size must be > 0");
        }
        Ok(())
    }
}

/// [`TransportLink`] over a connected UDP socket.
#[derive(Debug)]
pub struct UdpLink {
    config: UdpLinkConfig,
    socket: RwLock<Socket>,
}

impl UdpLink {
    pub fn new(config: UdpLinkConfig) -> io::Result<Self> {
        config
            .validate()
            .map_err(|msg| io::Error::new(io::ErrorKind::InvalidInput, msg))?;
        let socket = open_socket(&config)?;
        log::debug!(
            "[udp] link {} -> {}",
            socket
                .local_addr()
                .ok()
                .and_then(|a| a.as_socket())
                .map_or_else(|| "?".to_string(), |a| a.to_string()),
            config.remote_addr
        );
        Ok(Self {
            config,
            socket: RwLock::new(socket),
        })
    }

    pub fn config(&self) -> &UdpLinkConfig {
        &self.config
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.config.remote_addr
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket
            .read()
            .local_addr()?
            .as_socket()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "not an inet socket"))
    }
}

impl TransportLink for UdpLink {
    fn send_bytes(&self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        match self.socket.read().send_vectored(bufs) {
            // Connected datagram sockets surface earlier ICMP errors here.
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                log::debug!("[udp] peer {} refused datagram", self.config.remote_addr);
                Ok(0)
            }
            other => other,
        }
    }

    fn relink(&self, _do_suspend: bool) -> RelinkStatus {
        match open_socket(&self.config) {
            Ok(socket) => {
                *self.socket.write() = socket;
                log::info!("[udp] relinked to {}", self.config.remote_addr);
                RelinkStatus::Restored
            }
            Err(e) => {
                log::warn!("[udp] relink to {} failed: {}", self.config.remote_addr, e);
                RelinkStatus::Failed
            }
        }
    }
}

fn open_socket(config: &UdpLinkConfig) -> io::Result<Socket> {
    let domain = if config.remote_addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    if config.reuse_address {
        socket.set_reuse_address(true)?;
    }
    if let Some(size) = config.send_buffer_size {
        socket.set_send_buffer_size(size)?;
    }
    if let Some(ttl) = config.ttl {
        socket.set_ttl(ttl)?;
    }
    socket.bind(&config.bind_addr.into())?;
    socket.connect(&config.remote_addr.into())?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::time::Duration;

    fn receiver() -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    fn local_config(remote: SocketAddr) -> UdpLinkConfig {
        UdpLinkConfig::new(remote).with_bind_addr("127.0.0.1:0".parse().unwrap())
    }

    #[test]
    fn test_config_validation() {
        let remote: SocketAddr = "127.0.0.1:7400".parse().unwrap();
        assert!(UdpLinkConfig::new(remote).validate().is_ok());
        assert!(UdpLinkConfig::new("127.0.0.1:0".parse().unwrap())
            .validate()
            .is_err());
        assert!(UdpLinkConfig::new(remote)
            .with_bind_addr("[::1]:0".parse().unwrap())
            .validate()
            .is_err());
        assert!(UdpLinkConfig::new(remote)
            .with_send_buffer_size(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_vectored_send_is_one_datagram() {
        let (rx, addr) = receiver();
        let link = UdpLink::new(local_config(addr)).unwrap();
        let sent = link
            .send_bytes(&[IoSlice::new(b"head"), IoSlice::new(b"-"), IoSlice::new(b"tail")])
            .unwrap();
        assert_eq!(sent, 9);

        let mut buf = [0u8; 64];
        let (n, from) = rx.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"head-tail");
        assert_eq!(from, link.local_addr().unwrap());
    }

    #[test]
    fn test_relink_rebuilds_socket() {
        let (rx, addr) = receiver();
        let link = UdpLink::new(local_config(addr)).unwrap();
        assert_eq!(link.relink(false), RelinkStatus::Restored);
        link.send_bytes(&[IoSlice::new(b"again")]).unwrap();
        let mut buf = [0u8; 16];
        let (n, _) = rx.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"again");
    }
}
