//! Type definitions for the session module.

use std::fmt;

use crate::session::error::{SessionError, SessionResult};

/// Small integer naming a registered session across the host boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionHandle(pub(crate) i32);

impl SessionHandle {
    /// The raw value handed to the host.
    pub fn as_raw(self) -> i32 {
        self.0
    }

    /// Reinterpret a raw value received from the host. Negative values
    /// never name a session.
    pub fn from_raw(raw: i32) -> Option<Self> {
        (raw >= 0).then_some(SessionHandle(raw))
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// IP address family a socket or interface endpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::Ipv4 => f.write_str("v4"),
            AddressFamily::Ipv6 => f.write_str("v6"),
        }
    }
}

/// OS-level identifier of a network interface (a LUID on Windows, an
/// ifindex elsewhere).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// One interface endpoint that must attach before a session counts as up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentDescriptor {
    pub link: LinkId,
    pub family: AddressFamily,
}

impl AttachmentDescriptor {
    /// The IPv4 and IPv6 endpoints of `link`.
    pub fn both_families(link: LinkId) -> [AttachmentDescriptor; 2] {
        [
            AttachmentDescriptor {
                link,
                family: AddressFamily::Ipv4,
            },
            AttachmentDescriptor {
                link,
                family: AddressFamily::Ipv6,
            },
        ]
    }
}

/// Everything the host supplies to bring a session up.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Name the interface must end up with
    pub interface_name: String,
    /// Interface MTU
    pub mtu: u32,
    /// Configuration text in the engine's get/set protocol
    pub settings: String,
}

impl SessionRequest {
    pub fn new(interface_name: impl Into<String>, mtu: u32, settings: impl Into<String>) -> Self {
        SessionRequest {
            interface_name: interface_name.into(),
            mtu,
            settings: settings.into(),
        }
    }

    /// Validate the request before anything is allocated.
    pub fn validate(&self) -> SessionResult<()> {
        if self.interface_name.is_empty() {
            return Err(SessionError::InvalidArgument(
                "interface name is empty".to_string(),
            ));
        }
        if self.interface_name.contains('\0') {
            return Err(SessionError::InvalidArgument(
                "interface name contains a NUL byte".to_string(),
            ));
        }
        if self.mtu == 0 {
            return Err(SessionError::InvalidArgument(
                "MTU must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
