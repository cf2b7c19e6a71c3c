/// Drive-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FddError {
    /// Drive geometry out of range, or a disk the drive cannot take.
    #[error("invalid drive geometry")]
    Geom,
    /// Write to a protected disk.
    #[error("disk is write protected")]
    RdOnly,
}
