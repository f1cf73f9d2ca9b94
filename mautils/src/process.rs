use netstat2::{AddressFamilyFlags, ProtocolFlags, ProtocolSocketInfo, get_sockets_info};
use sysinfo::{Pid, System};

/// Information about a process listening on a TCP port.
///
/// Surfaced in the log when the stream server cannot bind its configured
/// port, so the operator knows what is squatting on it.
#[derive(Debug, Clone)]
pub struct ProcessPortInfo {
    pub pid: u32,
    pub process_name: String,
    pub owner: String,
    pub port: u16,
}

/// Tries to find the process that is listening on TCP `port`.
///
/// Returns `None` when the socket table cannot be read or no listener on
/// that port could be matched to a live process.
pub fn find_process_using_port(port: u16) -> Option<ProcessPortInfo> {
    let sockets = get_sockets_info(
        AddressFamilyFlags::IPV4 | AddressFamilyFlags::IPV6,
        ProtocolFlags::TCP,
    )
    .ok()?;

    let mut system = System::new_all();
    system.refresh_all();

    for socket in sockets {
        if let ProtocolSocketInfo::Tcp(ref tcp_info) = socket.protocol_socket_info {
            if tcp_info.local_port != port {
                continue;
            }
            if let Some(info) = build_process_info(&system, port, socket.associated_pids.first()) {
                return Some(info);
            }
        }
    }

    None
}

fn build_process_info(system: &System, port: u16, pid_opt: Option<&u32>) -> Option<ProcessPortInfo> {
    let pid = *pid_opt?;
    let process = system.process(Pid::from_u32(pid))?;
    let process_name = process.name().to_string();

    let owner = process
        .user_id()
        .and_then(|uid| {
            users::get_user_by_uid(**uid).map(|user| user.name().to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "unknown".to_string());

    Some(ProcessPortInfo {
        pid,
        process_name,
        owner,
        port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_find_process_on_unused_port_returns_none() {
        // Bind then immediately drop to get a port that is very likely free.
        let port = {
            let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
            listener.local_addr().unwrap().port()
        };
        let info = find_process_using_port(port);
        if let Some(info) = info {
            // Another process may have grabbed the port in between; at least
            // the report must be about the port we asked for.
            assert_eq!(info.port, port);
        }
    }

    #[test]
    fn test_find_own_listener() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        // The socket table scan needs elevated rights on some systems, so a
        // None result is acceptable; a Some must point at this process.
        if let Some(info) = find_process_using_port(port) {
            assert_eq!(info.pid, std::process::id());
        }
    }
}
