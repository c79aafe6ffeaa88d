//! Network interface discovery
//!
//! Enumerates the host's IPv4 addresses via `getifaddrs(3)`. Loopback
//! addresses are excluded outright; link-local addresses are listed but
//! flagged, and the selection engine refuses them at selection time.

use std::ffi::CStr;
use std::io;
use std::net::Ipv4Addr;

use tracing::debug;

/// One IPv4 address found on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredInterface {
    /// OS interface label
    pub name: String,
    /// IPv4 address assigned to the interface
    pub ip: Ipv4Addr,
    /// Whether the address is link-local (169.254.0.0/16)
    pub link_local: bool,
}

impl std::fmt::Display for DiscoveredInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.link_local {
            write!(f, "{} ({}) (limited connectivity)", self.name, self.ip)
        } else {
            write!(f, "{} ({})", self.name, self.ip)
        }
    }
}

/// Enumerate all non-loopback IPv4 addresses on the host
///
/// # Errors
///
/// Returns the underlying OS error if `getifaddrs(3)` fails.
pub fn discover_interfaces() -> io::Result<Vec<DiscoveredInterface>> {
    let mut addrs: *mut libc::ifaddrs = std::ptr::null_mut();

    // SAFETY: getifaddrs allocates a linked list into `addrs` on success;
    // the list is owned by us and released with freeifaddrs below.
    let ret = unsafe { libc::getifaddrs(&mut addrs) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }

    let mut discovered = Vec::new();
    let mut cursor = addrs;

    while !cursor.is_null() {
        // SAFETY: cursor is a valid node of the list returned by getifaddrs.
        let entry = unsafe { &*cursor };
        cursor = entry.ifa_next;

        if entry.ifa_addr.is_null() {
            continue;
        }

        // SAFETY: ifa_addr is non-null and points at a sockaddr.
        let family = unsafe { (*entry.ifa_addr).sa_family };
        if i32::from(family) != libc::AF_INET {
            continue;
        }

        // SAFETY: AF_INET entries store a sockaddr_in.
        let sin = unsafe { &*entry.ifa_addr.cast::<libc::sockaddr_in>() };
        let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));

        if ip.is_loopback() {
            continue;
        }

        // SAFETY: ifa_name is a NUL-terminated interface label.
        let name = unsafe { CStr::from_ptr(entry.ifa_name) }
            .to_string_lossy()
            .into_owned();

        discovered.push(DiscoveredInterface {
            name,
            ip,
            link_local: ip.is_link_local(),
        });
    }

    // SAFETY: addrs came from getifaddrs and has not been freed.
    unsafe { libc::freeifaddrs(addrs) };

    debug!("Discovered {} IPv4 interface addresses", discovered.len());

    Ok(discovered)
}
