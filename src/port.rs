//! Port allocation for sandbox instances.
//!
//! A [`PortAllocator`] is constructed once by the harness and shared by
//! reference. Ports are handed out in strictly increasing order from the
//! start of the range and are never reused.

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::debug;

use crate::error::ConfigError;

/// First port of the default administrative range.
pub const DEFAULT_PORT_START: u16 = 4000;
/// Last port of the default administrative range.
pub const DEFAULT_PORT_END: u16 = 4999;

/// Inclusive range of ports sandbox instances may bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: DEFAULT_PORT_START,
            end: DEFAULT_PORT_END,
        }
    }
}

impl PortRange {
    /// Creates a range, swapping the bounds if given in reverse.
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            start: start.min(end),
            end: start.max(end),
        }
    }

    /// First port of the range.
    pub fn start(&self) -> u16 {
        self.start
    }

    /// Last port of the range.
    pub fn end(&self) -> u16 {
        self.end
    }

    /// Returns true if `port` lies within the range.
    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    /// Fails with [`ConfigError::PortOutOfRange`] unless `port` is in range.
    pub fn validate(&self, port: u16) -> Result<u16, ConfigError> {
        if self.contains(port) {
            Ok(port)
        } else {
            Err(ConfigError::PortOutOfRange {
                port,
                start: self.start,
                end: self.end,
            })
        }
    }
}

/// Issues unique, range-bounded ports.
#[derive(Debug)]
pub struct PortAllocator {
    range: PortRange,
    // u32 so the counter can step past u16::MAX without wrapping.
    next: AtomicU32,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(PortRange::default())
    }
}

impl PortAllocator {
    /// Creates an allocator starting at the beginning of `range`.
    pub fn new(range: PortRange) -> Self {
        Self {
            range,
            next: AtomicU32::new(u32::from(range.start())),
        }
    }

    /// The range this allocator hands ports out of.
    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Allocates the next port.
    pub fn allocate(&self) -> Result<u16, ConfigError> {
        let candidate = self.next.fetch_add(1, Ordering::SeqCst);
        match u16::try_from(candidate) {
            Ok(port) if port <= self.range.end() => {
                debug!("Allocated port {}", port);
                Ok(port)
            }
            _ => Err(ConfigError::PortsExhausted {
                start: self.range.start(),
                end: self.range.end(),
            }),
        }
    }
}
