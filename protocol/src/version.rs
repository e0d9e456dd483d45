//! Overlay protocol versions.

/// Overlay version this build speaks.
pub const OVERLAY_PROTOCOL_VERSION: u32 = 3;

/// Oldest overlay version this build still accepts.
pub const OVERLAY_PROTOCOL_MIN_VERSION: u32 = 1;

/// Both sides must be at least this version to negotiate byte-mode flow control.
pub const FIRST_VERSION_SUPPORTING_FLOW_CONTROL_IN_BYTES: u32 = 2;

/// Whether a remote `[remote_min, remote_max]` range is usable against ours.
///
/// An inverted remote range never overlaps.
pub fn versions_overlap(remote_min: u32, remote_max: u32, our_min: u32, our_max: u32) -> bool {
    remote_min <= remote_max && remote_max >= our_min && remote_min <= our_max
}
