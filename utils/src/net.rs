//! Port discovery.

use std::io;
use std::net::{Ipv4Addr, TcpListener};

/// Ask the OS for a currently unused TCP port on the loopback interface.
///
/// The port is released before returning, so another process may grab it
/// first; callers binding it should handle `AddrInUse`.
pub fn find_free_port() -> io::Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_port_is_bindable() {
        let port = find_free_port().unwrap();
        assert_ne!(port, 0);
        TcpListener::bind((Ipv4Addr::LOCALHOST, port)).unwrap();
    }
}
