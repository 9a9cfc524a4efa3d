//! Capability bitmask advertised by every remote source.

use bitflags::bitflags;

bitflags! {
    /// What a source can do, so callers can pick a strategy without knowing
    /// the concrete protocol.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Actions: u32 {
        /// Whole-object download (`get_into`).
        const DOWNLOAD = 1 << 0;
        /// Objects can be handed to the installer.
        const INSTALL = 1 << 1;
        /// Archives on this source can be opened by the archive adapter.
        const EXTRACT = 1 << 2;
        /// `open_raw`/`read_raw`/`close_raw` keep one handle across reads.
        const RAW_READ = 1 << 3;
        /// Independent byte-range reads (`read_range`, `read_range_into`).
        const RANGED_READ = 1 << 4;
    }
}

impl Actions {
    /// True if the bridge can serve ranges straight from this source.
    pub fn supports_direct(self) -> bool {
        self.contains(Actions::RANGED_READ)
    }
}
