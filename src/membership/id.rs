//! Server identity types
//!
//! A server is identified by a `(index, generation)` pair. The index is a
//! position in the coordinator's server list; the generation counts how many
//! times that position has been handed out. Index 0 is reserved and never
//! issued, so a zero id can act as "no server".

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

/// Identifier for one incarnation of a server.
///
/// Two ids are equal only if both index and generation match; a server that
/// re-enlists at the same index receives a higher generation, so stale
/// references to the old incarnation can never alias the new one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerId {
    index: u32,
    generation: u32,
}

impl ServerId {
    pub fn new(index: u32, generation: u32) -> Self {
        ServerId { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Packed wire form: generation in the high 32 bits, index in the low.
    pub fn as_u64(&self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub fn from_u64(packed: u64) -> Self {
        ServerId {
            index: (packed & 0xffff_ffff) as u32,
            generation: (packed >> 32) as u32,
        }
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

impl fmt::Debug for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// Set of services a server runs, stored as a bitmask.
#[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceMask(u32);

impl ServiceMask {
    pub const MASTER: ServiceMask = ServiceMask(1);
    pub const BACKUP: ServiceMask = ServiceMask(1 << 1);
    pub const MEMBERSHIP: ServiceMask = ServiceMask(1 << 2);
    pub const PING: ServiceMask = ServiceMask(1 << 3);

    pub fn empty() -> Self {
        ServiceMask(0)
    }

    pub fn has(&self, services: ServiceMask) -> bool {
        self.0 & services.0 == services.0 && services.0 != 0
    }

    /// True if this mask shares at least one service with `other`.
    pub fn intersects(&self, other: ServiceMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Self {
        ServiceMask(bits)
    }

    /// Parse a mask from lowercase service names ("master", "backup",
    /// "membership", "ping"), as accepted by the admin API.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> crate::Result<Self> {
        let mut mask = ServiceMask::empty();
        for name in names {
            mask = mask
                | match name.as_ref() {
                    "master" => ServiceMask::MASTER,
                    "backup" => ServiceMask::BACKUP,
                    "membership" => ServiceMask::MEMBERSHIP,
                    "ping" => ServiceMask::PING,
                    other => {
                        return Err(crate::Error::InvalidConfig(format!(
                            "unknown service name: {}",
                            other
                        )))
                    }
                };
        }
        Ok(mask)
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.has(ServiceMask::MASTER) {
            names.push("master");
        }
        if self.has(ServiceMask::BACKUP) {
            names.push("backup");
        }
        if self.has(ServiceMask::MEMBERSHIP) {
            names.push("membership");
        }
        if self.has(ServiceMask::PING) {
            names.push("ping");
        }
        names
    }
}

impl BitOr for ServiceMask {
    type Output = ServiceMask;

    fn bitor(self, rhs: ServiceMask) -> ServiceMask {
        ServiceMask(self.0 | rhs.0)
    }
}

impl fmt::Display for ServiceMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "none");
        }
        write!(f, "{}", self.names().join("|"))
    }
}

impl fmt::Debug for ServiceMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// Health of a server as tracked by the coordinator.
///
/// Transitions only ever move forward: `Up` → `Crashed` → `Down`. A `Down`
/// entry is erased from the list once its removal has been disseminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Up,
    Crashed,
    Down,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerStatus::Up => write!(f, "up"),
            ServerStatus::Crashed => write!(f, "crashed"),
            ServerStatus::Down => write!(f, "down"),
        }
    }
}
