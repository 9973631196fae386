//! Wrap-safe 1-byte version counter and the two-slot versioned link that
//! gives the store its crash-safe swap: readers pick the newer slot whose
//! referenced page still validates, writers fill the empty slot first and
//! only then start expiring the older side.

use byteorder::{ByteOrder, LittleEndian};

use crate::types::{NO_PAGE, PageId};

/// Serialized size of a versioned link: two slots of version(1) + pid(4).
pub const LINK_SIZE: usize = 10;

/// Half-open comparison window; differences past this mean the counter has
/// wrapped and the byte order inverts.
const WRAP_WINDOW: u8 = 63;

/// Monotonic counter stored as a single byte, incremented modulo 256.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionTag(u8);

impl VersionTag {
    #[must_use]
    pub const fn new(v: u8) -> Self {
        Self(v)
    }

    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Wrap-safe ordering: within the window the natural byte order holds;
    /// beyond it the smaller byte is the one that wrapped past 255 and is
    /// therefore newer. Equal tags never occur inside a live link.
    #[must_use]
    pub fn is_newer_than(self, other: Self) -> bool {
        if self.0 == other.0 {
            return false;
        }
        let (hi, lo) = if self.0 > other.0 { (self.0, other.0) } else { (other.0, self.0) };
        if hi - lo <= WRAP_WINDOW {
            self.0 == hi
        } else {
            self.0 == lo
        }
    }
}

/// One half of a versioned link. Empty iff the pid is negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSlot {
    pub pid: PageId,
    pub version: VersionTag,
}

impl LinkSlot {
    #[must_use]
    pub const fn empty() -> Self {
        Self { pid: NO_PAGE, version: VersionTag::new(0) }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.pid < 0
    }
}

/// Pair of (pid, version) slots selecting newest/oldest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionedLink {
    slots: [LinkSlot; 2],
}

impl VersionedLink {
    #[must_use]
    pub const fn empty() -> Self {
        Self { slots: [LinkSlot::empty(), LinkSlot::empty()] }
    }

    /// A link whose first slot points at `pid` with version 0; used when
    /// wiring the initial metadata chains.
    #[must_use]
    pub const fn to_page(pid: PageId) -> Self {
        Self {
            slots: [LinkSlot { pid, version: VersionTag::new(0) }, LinkSlot::empty()],
        }
    }

    /// Index of the newest live slot, if any.
    fn newest(&self) -> Option<usize> {
        match (self.slots[0].is_empty(), self.slots[1].is_empty()) {
            (true, true) => None,
            (false, true) => Some(0),
            (true, false) => Some(1),
            (false, false) => {
                if self.slots[0].version.is_newer_than(self.slots[1].version) {
                    Some(0)
                } else {
                    Some(1)
                }
            }
        }
    }

    /// Revision 0 is the newest live slot, revision 1 the previous one.
    #[must_use]
    pub fn try_get(&self, revision: u8) -> Option<PageId> {
        let newest = self.newest()?;
        let slot = match revision {
            0 => self.slots[newest],
            1 => self.slots[1 - newest],
            _ => return None,
        };
        if slot.is_empty() { None } else { Some(slot.pid) }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.newest().is_none()
    }

    /// Record a new target page. Fills slot A at version 0, then slot B at
    /// A+1; once both are live the older slot is overwritten at newest+1
    /// and its pid is returned as expired.
    pub fn write_new(&mut self, pid: PageId) -> PageId {
        if self.slots[0].is_empty() {
            self.slots[0] = LinkSlot { pid, version: VersionTag::new(0) };
            return NO_PAGE;
        }
        if self.slots[1].is_empty() {
            self.slots[1] = LinkSlot { pid, version: self.slots[0].version.next() };
            return NO_PAGE;
        }
        let newest = if self.slots[0].version.is_newer_than(self.slots[1].version) { 0 } else { 1 };
        let older = 1 - newest;
        let expired = self.slots[older].pid;
        self.slots[older] = LinkSlot { pid, version: self.slots[newest].version.next() };
        expired
    }

    /// Serialize into 10 bytes: version A, pid A, version B, pid B.
    pub fn write_bytes(&self, out: &mut [u8]) {
        out[0] = self.slots[0].version.value();
        LittleEndian::write_i32(&mut out[1..5], self.slots[0].pid);
        out[5] = self.slots[1].version.value();
        LittleEndian::write_i32(&mut out[6..10], self.slots[1].pid);
    }

    #[must_use]
    pub fn read_bytes(buf: &[u8]) -> Self {
        Self {
            slots: [
                LinkSlot {
                    version: VersionTag::new(buf[0]),
                    pid: LittleEndian::read_i32(&buf[1..5]),
                },
                LinkSlot {
                    version: VersionTag::new(buf[5]),
                    pid: LittleEndian::read_i32(&buf[6..10]),
                },
            ],
        }
    }
}

impl Default for VersionedLink {
    fn default() -> Self {
        Self::empty()
    }
}
