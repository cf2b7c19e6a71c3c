//! Disk engine error codes.

/// Messages indexed by [`DiskError::code`]; index 0 is success and the last
/// entry is what out-of-range codes clamp to.
const MESSAGES: [&str; 11] = [
    "OK",
    "Feature not implemented",
    "Out of memory",
    "Unsupported disk geometry",
    "Cannot open disk image",
    "Unsupported file feature",
    "Read only disk",
    "Cannot close file",
    "Cannot write disk image",
    "Partially written file",
    "Unknown error code",
];

/// Failure of a disk image operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DiskError {
    /// The image uses a feature this engine recognises but does not implement.
    #[error("Feature not implemented")]
    Impl,
    #[error("Out of memory")]
    Mem,
    /// Geometry out of bounds, or a layout the target format cannot hold.
    #[error("Unsupported disk geometry")]
    Geom,
    /// File I/O or format parse failure while reading.
    #[error("Cannot open disk image")]
    Open,
    #[error("Unsupported file feature")]
    Unsup,
    #[error("Read only disk")]
    RdOnly,
    #[error("Cannot close file")]
    Close,
    #[error("Cannot write disk image")]
    WrFile,
    #[error("Partially written file")]
    WrPart,
}

impl DiskError {
    /// Stable numeric code; 0 is reserved for success.
    #[must_use]
    pub const fn code(self) -> usize {
        match self {
            DiskError::Impl => 1,
            DiskError::Mem => 2,
            DiskError::Geom => 3,
            DiskError::Open => 4,
            DiskError::Unsup => 5,
            DiskError::RdOnly => 6,
            DiskError::Close => 7,
            DiskError::WrFile => 8,
            DiskError::WrPart => 9,
        }
    }
}

/// Human-readable message for a numeric disk error code.
#[must_use]
pub fn strerror(code: usize) -> &'static str {
    MESSAGES[code.min(MESSAGES.len() - 1)]
}

/// Failure of a raw track emission primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TrackError {
    /// The field does not fit in the remaining bytes of the track.
    #[error("track overflow")]
    Overflow,
    /// The image ran out of sector data and no fill byte was allowed.
    #[error("sector data truncated")]
    ShortData,
}

impl From<TrackError> for DiskError {
    fn from(e: TrackError) -> Self {
        match e {
            TrackError::Overflow => DiskError::Geom,
            TrackError::ShortData => DiskError::Open,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [DiskError; 9] = [
        DiskError::Impl,
        DiskError::Mem,
        DiskError::Geom,
        DiskError::Open,
        DiskError::Unsup,
        DiskError::RdOnly,
        DiskError::Close,
        DiskError::WrFile,
        DiskError::WrPart,
    ];

    #[test]
    fn display_matches_message_table() {
        for e in ALL {
            assert_eq!(e.to_string(), strerror(e.code()), "{e:?}");
        }
        assert_eq!(strerror(0), "OK");
    }

    #[test]
    fn out_of_range_codes_clamp() {
        assert_eq!(strerror(10), "Unknown error code");
        assert_eq!(strerror(999), "Unknown error code");
        assert_eq!(strerror(usize::MAX), "Unknown error code");
    }

    #[test]
    fn track_errors_map_to_disk_errors() {
        assert_eq!(DiskError::from(TrackError::Overflow), DiskError::Geom);
        assert_eq!(DiskError::from(TrackError::ShortData), DiskError::Open);
    }
}
