//! Host port allocation.
//!
//! Allocation is a pure function over the requested mappings and the set
//! of ports already in use; the reconciler recomputes the in-use set from
//! the committed executions map on every tick rather than tracking it
//! separately.

use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;
use thiserror::Error;

use crate::job::PortMapping;

/// Errors that can occur during port allocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortAllocationError {
    /// A statically requested port is already taken.
    #[error("static port {port} requested for \"{name}\" is already in use")]
    Conflict {
        /// The port mapping name.
        name: String,
        /// The conflicting port.
        port: u16,
    },

    /// No free port remains in the configured range.
    #[error("no free port in range {start}..{end} for \"{name}\"")]
    Exhausted {
        /// The port mapping name.
        name: String,
        /// Inclusive start of the range.
        start: u16,
        /// Exclusive end of the range.
        end: u16,
    },
}

/// Chooses concrete host ports for a job's port mappings.
pub trait PortAllocator: Send {
    /// Allocate one host port per requested mapping.
    ///
    /// Statically requested ports are returned verbatim; dynamic mappings
    /// receive a port that is neither in `in_use` nor chosen earlier in
    /// the same call. Pure: no side effects.
    ///
    /// # Errors
    ///
    /// Returns [`PortAllocationError::Conflict`] if a static port is
    /// taken, or [`PortAllocationError::Exhausted`] if the range has no
    /// free port left for a dynamic mapping.
    fn allocate(
        &self,
        requested: &BTreeMap<String, PortMapping>,
        in_use: &BTreeSet<u16>,
    ) -> Result<BTreeMap<String, u16>, PortAllocationError>;
}

/// [`PortAllocator`] drawing dynamic ports from a half-open range.
///
/// Dynamic allocation starts at a random offset within the range and scans
/// forward with wrap-around, so consecutive agents on one host do not pile
/// onto the same low ports.
#[derive(Debug, Clone, Copy)]
pub struct RangePortAllocator {
    start: u16,
    end: u16,
}

impl RangePortAllocator {
    /// Create an allocator over the half-open range `start..end`.
    #[must_use]
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }
}

impl Default for RangePortAllocator {
    fn default() -> Self {
        Self::new(20000, 32768)
    }
}

impl PortAllocator for RangePortAllocator {
    fn allocate(
        &self,
        requested: &BTreeMap<String, PortMapping>,
        in_use: &BTreeSet<u16>,
    ) -> Result<BTreeMap<String, u16>, PortAllocationError> {
        let mut allocation = BTreeMap::new();
        let mut taken = in_use.clone();

        // Static ports first: they are non-negotiable.
        for (name, mapping) in requested {
            if let Some(port) = mapping.external_port {
                if !taken.insert(port) {
                    return Err(PortAllocationError::Conflict {
                        name: name.clone(),
                        port,
                    });
                }
                allocation.insert(name.clone(), port);
            }
        }

        let span = u32::from(self.end.saturating_sub(self.start));
        for (name, mapping) in requested {
            if mapping.external_port.is_some() {
                continue;
            }
            let port = self
                .scan_free(span, &taken)
                .ok_or_else(|| PortAllocationError::Exhausted {
                    name: name.clone(),
                    start: self.start,
                    end: self.end,
                })?;
            taken.insert(port);
            allocation.insert(name.clone(), port);
        }

        Ok(allocation)
    }
}

impl RangePortAllocator {
    /// Scan the range from a random offset for a port not in `taken`.
    fn scan_free(&self, span: u32, taken: &BTreeSet<u16>) -> Option<u16> {
        if span == 0 {
            return None;
        }
        let offset = rand::thread_rng().gen_range(0..span);
        for i in 0..span {
            #[allow(clippy::cast_possible_truncation)] // (offset + i) % span < span <= u16::MAX
            let port = self.start + ((offset + i) % span) as u16;
            if !taken.contains(&port) {
                return Some(port);
            }
        }
        None
    }
}
