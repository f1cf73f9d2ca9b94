use get_if_addrs::get_if_addrs;
use std::net::{TcpListener, UdpSocket};

/// Guesses the primary local IP address of this machine.
///
/// Binds a UDP socket and "connects" it towards a public DNS server, then
/// asks the OS which local address would be used for that route. No packet
/// is ever sent (UDP connect is route selection only). Falls back to
/// `127.0.0.1` when no interface is usable.
///
/// This is the address players on the local network are told to stream
/// from, so it must be the one facing the LAN, not a loopback or container
/// bridge address.
pub fn guess_local_ip() -> String {
    match UdpSocket::bind("0.0.0.0:0") {
        Ok(socket) => {
            if socket.connect("8.8.8.8:80").is_ok() {
                if let Ok(local_addr) = socket.local_addr() {
                    return local_addr.ip().to_string();
                }
            }
            "127.0.0.1".to_string()
        }
        Err(_) => "127.0.0.1".to_string(),
    }
}

/// Lists all non-loopback IPv4 addresses of this machine.
///
/// Used to offer alternatives for the `publish_ip` configuration entry in
/// multi-NIC setups. IPv6 addresses are ignored: the players this server
/// targets (DLNA renderers, cast devices) are v4-only in practice.
pub fn list_all_ips() -> Vec<String> {
    let mut result = Vec::new();

    if let Ok(interfaces) = get_if_addrs() {
        for iface in interfaces {
            let ip = iface.ip();
            if ip.is_loopback() || !ip.is_ipv4() {
                continue;
            }
            result.push(ip.to_string());
        }
    }

    result
}

/// Selects a free TCP port in `[range_start, range_end)`.
///
/// Tries to bind each candidate on all interfaces and returns the first one
/// that succeeds. Returns `None` when the whole range is occupied.
pub fn select_free_port(range_start: u16, range_end: u16) -> Option<u16> {
    for port in range_start..range_end {
        if TcpListener::bind(("0.0.0.0", port)).is_ok() {
            return Some(port);
        }
    }
    None
}
