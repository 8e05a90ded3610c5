//! Transparent-redirect OS plumbing
//!
//! Contract to the rest of the crate: given an accepted connection, return
//! the original (pre-NAT) destination. Linux netfilter REDIRECT keeps it in
//! `SO_ORIGINAL_DST`; TPROXY leaves it as the socket's local address; macOS
//! PF answers a `DIOCNATLOOK` ioctl.

use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};

#[cfg(target_os = "linux")]
pub fn original_dst(stream: &TcpStream, ipv6: bool) -> io::Result<SocketAddr> {
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
    use std::os::unix::io::AsRawFd;

    // linux/include/uapi/linux/netfilter_ipv4.h; the IPv6 getsockopt shares
    // the number.
    const SO_ORIGINAL_DST: libc::c_int = 80;

    let fd = stream.as_raw_fd();
    unsafe {
        if ipv6 {
            let mut addr: libc::sockaddr_in6 = std::mem::zeroed();
            let mut len = std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
            if libc::getsockopt(
                fd,
                libc::SOL_IPV6,
                SO_ORIGINAL_DST,
                &mut addr as *mut _ as *mut libc::c_void,
                &mut len,
            ) != 0
            {
                return Err(io::Error::last_os_error());
            }
            let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
            Ok(SocketAddr::new(IpAddr::V6(ip), u16::from_be(addr.sin6_port)))
        } else {
            let mut addr: libc::sockaddr_in = std::mem::zeroed();
            let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
            if libc::getsockopt(
                fd,
                libc::SOL_IP,
                SO_ORIGINAL_DST,
                &mut addr as *mut _ as *mut libc::c_void,
                &mut len,
            ) != 0
            {
                return Err(io::Error::last_os_error());
            }
            let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
            Ok(SocketAddr::new(IpAddr::V4(ip), u16::from_be(addr.sin_port)))
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn original_dst(_stream: &TcpStream, _ipv6: bool) -> io::Result<SocketAddr> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "netfilter redirect requires Linux",
    ))
}

/// Bind a TCP listener with `IP_TRANSPARENT` set, for TPROXY rules.
#[cfg(target_os = "linux")]
pub fn tproxy_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    use socket2::{Domain, Protocol, Socket, Type};

    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;
    socket.set_ip_transparent(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    TcpListener::from_std(socket.into())
}

#[cfg(not(target_os = "linux"))]
pub fn tproxy_listener(_addr: SocketAddr) -> io::Result<TcpListener> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "TPROXY requires Linux",
    ))
}

/// Ask PF for the pre-NAT destination of a diverted connection.
#[cfg(target_os = "macos")]
pub fn nat_lookup(stream: &TcpStream) -> io::Result<SocketAddr> {
    use std::net::{IpAddr, Ipv4Addr};
    use std::os::unix::io::RawFd;

    const PF_OUT: u8 = 2;
    const LEN: u64 = 4 * 16 + 4 * 4 + 4;
    // _IOWR('D', 23, struct pfioc_natlook)
    const DIOCNATLOOK: libc::c_ulong =
        (0x80000000 | 0x40000000 | ((LEN & 0x1FFF) << 16) | (('D' as u64) << 8) | 23)
            as libc::c_ulong;

    #[repr(C)]
    struct PfiocNatlook {
        saddr: [u8; 16],
        daddr: [u8; 16],
        rsaddr: [u8; 16],
        rdaddr: [u8; 16],
        sxport: [u8; 4],
        dxport: [u8; 4],
        rsxport: [u8; 4],
        rdxport: [u8; 4],
        af: u8,
        proto: u8,
        proto_variant: u8,
        direction: u8,
    }

    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    let (IpAddr::V4(saddr), IpAddr::V4(daddr)) = (peer.ip(), local.ip()) else {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "PF lookup supports IPv4 only",
        ));
    };

    let mut nl: PfiocNatlook = unsafe { std::mem::zeroed() };
    nl.af = libc::AF_INET as u8;
    nl.proto = libc::IPPROTO_TCP as u8;
    nl.direction = PF_OUT;
    nl.saddr[..4].copy_from_slice(&saddr.octets());
    nl.daddr[..4].copy_from_slice(&daddr.octets());
    nl.sxport[..2].copy_from_slice(&peer.port().to_be_bytes());
    nl.dxport[..2].copy_from_slice(&local.port().to_be_bytes());

    let fd: RawFd = unsafe { libc::open(b"/dev/pf\0".as_ptr() as *const _, libc::O_RDONLY) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::ioctl(fd, DIOCNATLOOK, &mut nl) };
    unsafe { libc::close(fd) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    let mut ip = [0u8; 4];
    ip.copy_from_slice(&nl.rdaddr[..4]);
    let port = u16::from_be_bytes([nl.rdxport[0], nl.rdxport[1]]);
    Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(ip)), port))
}

#[cfg(not(target_os = "macos"))]
pub fn nat_lookup(_stream: &TcpStream) -> io::Result<SocketAddr> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "PF NAT lookup requires macOS",
    ))
}
