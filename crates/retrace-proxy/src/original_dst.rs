//! Resolution of the kernel-rewritten original destination for a TCP
//! connection that arrived via netfilter DNAT, using `SO_ORIGINAL_DST`.
//! Linux-only; the surrounding network-namespace/iptables plumbing that
//! makes this socket option meaningful is out of scope here (spec §1).

#![cfg(target_os = "linux")]

use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::unix::io::AsRawFd;

use tokio::net::TcpStream;

const SO_ORIGINAL_DST: libc::c_int = 80;

/// `getsockopt(fd, SOL_IP, SO_ORIGINAL_DST, ...)`, returning the address the
/// client originally dialed before DNAT rewrote it to point at us.
pub fn original_dst(stream: &TcpStream) -> io::Result<SocketAddr> {
    let fd = stream.as_raw_fd();
    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;

    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_IP,
            SO_ORIGINAL_DST,
            &mut addr as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
    let port = u16::from_be(addr.sin_port);
    Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
}
