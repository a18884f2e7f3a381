use std::{
    io::{self, Read},
    os::fd::AsRawFd,
};

use mio::event::Source;
use tracing::debug;

/// Capability trait over a client descriptor, per `spec.md` §9 Design Notes
/// ("Polymorphism over the descriptor"). `Source` is required so any
/// `ClientHandle` can be registered directly with a [`crate::PollHandle`].
///
/// The sink never closes a handle — `ClientHandle` intentionally has no
/// `close`/`shutdown` method. Ownership of the underlying descriptor stays
/// with the embedder.
pub trait ClientHandle: Source + Send {
    /// Non-blocking write. Sockets use `send` with the no-signal flag so a
    /// write to a peer that reset the connection doesn't raise `SIGPIPE`;
    /// generic handles fall back to `write`.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Bytes currently available to read without blocking (`ioctl
    /// FIONREAD` or equivalent).
    fn read_available(&self) -> io::Result<usize>;

    /// Drains and discards up to `max` bytes. Returns the number of bytes
    /// discarded; `Ok(0)` means the peer closed the connection.
    fn read_discard(&mut self, max: usize) -> io::Result<usize>;

    /// Applies a DSCP/traffic-class value (0-63) to the descriptor, if it is
    /// a socket. No-op (`Ok(())`) for handles where this makes no sense.
    fn set_dscp(&mut self, dscp: u8) -> io::Result<()>;

    /// Applies a `SO_SNDBUF`/`SO_RCVBUF` size to the descriptor, if it is a
    /// socket. No-op (`Ok(())`) for handles where this makes no sense.
    fn set_buf_size(&mut self, size: usize) -> io::Result<()>;

    /// Whether this handle is a socket (selects `send`-with-no-signal over
    /// plain `write`, and whether DSCP/buffer-size knobs apply).
    fn is_socket(&self) -> bool;

    /// Cheap liveness probe used by the dispatch loop's `EBADF` recovery
    /// path (`spec.md` §4.5 step 4): `fcntl(F_GETFL)` or equivalent.
    fn is_valid(&self) -> bool;

    /// Stable identity for duplicate-handle detection in `add_full`
    /// (`spec.md` §4.7: "if the handle already exists in the index, set
    /// status=DUPLICATE"). Sockets use the raw descriptor, which is unique
    /// for the lifetime of the connection.
    fn identity(&self) -> u64;
}

impl ClientHandle for mio::net::TcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        send_no_signal(self.as_raw_fd(), buf)
    }

    fn read_available(&self) -> io::Result<usize> {
        fionread(self.as_raw_fd())
    }

    fn read_discard(&mut self, max: usize) -> io::Result<usize> {
        let mut scratch = [0_u8; 512];
        let want = max.min(scratch.len());
        match self.read(&mut scratch[..want]) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(want),
            Err(e) => Err(e),
        }
    }

    fn set_dscp(&mut self, dscp: u8) -> io::Result<()> {
        set_dscp_fd(self.as_raw_fd(), dscp)
    }

    fn set_buf_size(&mut self, size: usize) -> io::Result<()> {
        set_socket_buf_size(self, size);
        Ok(())
    }

    fn is_socket(&self) -> bool {
        true
    }

    fn is_valid(&self) -> bool {
        fd_is_valid(self.as_raw_fd())
    }

    fn identity(&self) -> u64 {
        self.as_raw_fd() as u64
    }
}

/// Kernel `SO_SNDBUF`/`SO_RCVBUF`, grounded on
/// `flux-network::tcp::stream::set_socket_buf_size`.
pub fn set_socket_buf_size(stream: &mio::net::TcpStream, size: usize) {
    let fd = stream.as_raw_fd();
    let size = size as libc::c_int;
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_SNDBUF,
            std::ptr::from_ref(&size).cast(),
            core::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            std::ptr::from_ref(&size).cast(),
            core::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }
}

fn send_no_signal(fd: std::os::fd::RawFd, buf: &[u8]) -> io::Result<usize> {
    let n = unsafe {
        libc::send(fd, buf.as_ptr().cast(), buf.len(), libc::MSG_NOSIGNAL)
    };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

fn fionread(fd: std::os::fd::RawFd) -> io::Result<usize> {
    let mut avail: libc::c_int = 0;
    let res = unsafe { libc::ioctl(fd, libc::FIONREAD, &mut avail) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(avail.max(0) as usize)
}

fn set_dscp_fd(fd: std::os::fd::RawFd, dscp: u8) -> io::Result<()> {
    // DSCP occupies the top 6 bits of the IPv4 TOS byte.
    let tos: libc::c_int = (dscp as libc::c_int) << 2;
    let res = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_IP,
            libc::IP_TOS,
            std::ptr::from_ref(&tos).cast(),
            core::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if res < 0 {
        let err = io::Error::last_os_error();
        debug!(?err, "couldn't set DSCP");
        return Err(err);
    }
    Ok(())
}

fn fd_is_valid(fd: std::os::fd::RawFd) -> bool {
    unsafe { libc::fcntl(fd, libc::F_GETFL) != -1 }
}
