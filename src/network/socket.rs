//! Nonblocking TCP primitives over `Buffer` views and writers.
//!
//! Would-block is never an error here: it ends a drain loop and the caller
//! waits for the next edge. Interrupted syscalls are retried.

use std::io::{self, Read, Write};
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};

use mio::net::{TcpListener, TcpStream};
use tracing::debug;

use crate::core::{View, Writer};
use crate::error::{Error, Result};

/// Result of one `recv` drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Transfer {
    /// Bytes appended to the writer.
    pub bytes: usize,
    /// The peer shut down its sending side.
    pub closed: bool,
}

/// Resolves a numeric `service` (port) on `host`. The result is never empty.
///
/// `passive` resolves for a listening socket: an empty host then means
/// every local address.
pub fn resolve(host: &str, service: &str, passive: bool) -> Result<Vec<SocketAddr>> {
    let resolve_err = |source: io::Error| Error::Resolve {
        host: host.to_string(),
        service: service.to_string(),
        source,
    };

    let port: u16 = service
        .parse()
        .map_err(|_| resolve_err(io::Error::new(io::ErrorKind::InvalidInput, "service is not a port number")))?;

    if host.is_empty() {
        if !passive {
            return Err(resolve_err(io::Error::new(io::ErrorKind::InvalidInput, "empty host")));
        }
        return Ok(vec![
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
        ]);
    }

    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs().map_err(resolve_err)?.collect();
    if addrs.is_empty() {
        return Err(resolve_err(io::Error::new(
            io::ErrorKind::NotFound,
            "no addresses found",
        )));
    }
    Ok(addrs)
}

/// Stream socket with `SO_REUSEADDR`, bound to `addr` and listening with
/// `backlog`. The returned listener is nonblocking and close-on-exec.
pub fn bind_and_listen(addr: SocketAddr, backlog: i32) -> Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        libc::AF_INET
    } else {
        libc::AF_INET6
    };

    let raw_fd = unsafe { libc::socket(domain, libc::SOCK_STREAM, 0) };
    if raw_fd < 0 {
        return Err(io::Error::last_os_error().into());
    }
    // Closed on every early return below.
    let fd = unsafe { OwnedFd::from_raw_fd(raw_fd) };

    unsafe {
        if libc::fcntl(raw_fd, libc::F_SETFD, libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error().into());
        }

        let optval: libc::c_int = 1;
        if libc::setsockopt(
            raw_fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &optval as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        ) < 0
        {
            return Err(io::Error::last_os_error().into());
        }

        let mut storage: libc::sockaddr_storage = mem::zeroed();
        let len = fill_sockaddr_storage(&mut storage, &addr);
        if libc::bind(raw_fd, &storage as *const _ as *const libc::sockaddr, len) < 0 {
            return Err(io::Error::last_os_error().into());
        }

        if libc::listen(raw_fd, backlog) < 0 {
            return Err(io::Error::last_os_error().into());
        }
    }

    let listener = std::net::TcpListener::from(fd);
    listener.set_nonblocking(true)?;
    debug!(%addr, backlog, fd = listener.as_raw_fd(), "listening");

    Ok(TcpListener::from_std(listener))
}

/// Accepts one pending connection. `None` when the queue is empty.
pub fn accept(listener: &TcpListener) -> Result<Option<(TcpStream, SocketAddr)>> {
    loop {
        match listener.accept() {
            Ok(pair) => return Ok(Some(pair)),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Reads into `writer` until it is full, the source would block or the
/// peer closes.
pub fn recv<R: Read>(source: &mut R, writer: &mut Writer<'_>) -> Result<Transfer> {
    let mut transfer = Transfer::default();

    while !writer.is_full() {
        match source.read(writer.spare_mut()) {
            Ok(0) => {
                transfer.closed = true;
                break;
            }
            Ok(n) => {
                writer.advance(n);
                transfer.bytes += n;
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(transfer)
}

/// Writes from the front of `view` until it is empty or the sink would
/// block. `view` is advanced past everything sent.
pub fn send<W: Write>(sink: &mut W, view: &mut View<'_>) -> Result<usize> {
    let mut sent = 0;

    while !view.is_empty() {
        match sink.write(view.as_bytes()) {
            Ok(0) => break,
            Ok(n) => {
                *view = view.slice_from(n);
                sent += n;
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(sent)
}

fn fill_sockaddr_storage(storage: &mut libc::sockaddr_storage, addr: &SocketAddr) -> libc::socklen_t {
    match addr {
        SocketAddr::V4(v4) => {
            let sa = storage as *mut _ as *mut libc::sockaddr_in;
            unsafe {
                (*sa).sin_family = libc::AF_INET as libc::sa_family_t;
                (*sa).sin_port = v4.port().to_be();
                (*sa).sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            }
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t
        }
        SocketAddr::V6(v6) => {
            let sa = storage as *mut _ as *mut libc::sockaddr_in6;
            unsafe {
                (*sa).sin6_family = libc::AF_INET6 as libc::sa_family_t;
                (*sa).sin6_port = v6.port().to_be();
                (*sa).sin6_flowinfo = v6.flowinfo();
                (*sa).sin6_addr.s6_addr = v6.ip().octets();
                (*sa).sin6_scope_id = v6.scope_id();
            }
            mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Buffer;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_resolve_numeric() {
        let addrs = resolve("127.0.0.1", "8080", false).unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:8080".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_resolve_passive_wildcard() {
        let addrs = resolve("", "80", true).unwrap();
        assert_eq!(addrs[0], "0.0.0.0:80".parse::<SocketAddr>().unwrap());
        assert!(addrs[1].ip().is_unspecified());
        assert!(resolve("", "80", false).is_err());
    }

    #[test]
    fn test_resolve_rejects_named_service() {
        let err = resolve("127.0.0.1", "http-alt", false).unwrap_err();
        assert!(matches!(err, Error::Resolve { ref service, .. } if service == "http-alt"));
    }

    #[test]
    fn test_bind_and_accept_nothing_pending() {
        let listener = bind_and_listen("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert!(accept(&listener).unwrap().is_none());
    }

    #[test]
    fn test_recv_stops_when_full() {
        let (mut local, mut peer) = UnixStream::pair().unwrap();
        local.set_nonblocking(true).unwrap();
        peer.write_all(b"hello world").unwrap();

        let mut buffer = Buffer::new(5);
        let mut writer = buffer.writer();
        let transfer = recv(&mut local, &mut writer).unwrap();
        assert_eq!(transfer, Transfer { bytes: 5, closed: false });
        assert_eq!(writer.to_view(), "hello");
    }

    #[test]
    fn test_recv_reports_close() {
        let (mut local, mut peer) = UnixStream::pair().unwrap();
        local.set_nonblocking(true).unwrap();
        peer.write_all(b"bye").unwrap();
        drop(peer);

        let mut buffer = Buffer::new(64);
        let mut writer = buffer.writer();
        let transfer = recv(&mut local, &mut writer).unwrap();
        assert_eq!(transfer, Transfer { bytes: 3, closed: true });
    }

    #[test]
    fn test_recv_would_block_is_not_an_error() {
        let (mut local, _peer) = UnixStream::pair().unwrap();
        local.set_nonblocking(true).unwrap();

        let mut buffer = Buffer::new(8);
        let mut writer = buffer.writer();
        assert_eq!(recv(&mut local, &mut writer).unwrap(), Transfer::default());
    }

    #[test]
    fn test_send_advances_view() {
        let (mut local, mut peer) = UnixStream::pair().unwrap();
        local.set_nonblocking(true).unwrap();

        let payload = b"response bytes";
        let mut view = View::new(payload);
        assert_eq!(send(&mut local, &mut view).unwrap(), payload.len());
        assert!(view.is_empty());

        let mut received = [0u8; 14];
        peer.read_exact(&mut received).unwrap();
        assert_eq!(&received, payload);
    }
}
