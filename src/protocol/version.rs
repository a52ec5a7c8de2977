use std::fmt;

/// Protocol revisions understood by this client, oldest first.
///
/// Ordering follows release order, so row codecs gate optional fields with
/// plain comparisons such as `version >= ProtocolVersion::V1_1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    V1_0,
    /// Adds per-server monitoring flags.
    V1_1,
    /// Adds server load figures; retires the server farm column.
    V1_2,
}

impl ProtocolVersion {
    /// Newest version this client speaks; offered during the handshake.
    pub const CURRENT: ProtocolVersion = ProtocolVersion::V1_2;

    pub const ALL: [ProtocolVersion; 3] = [
        ProtocolVersion::V1_0,
        ProtocolVersion::V1_1,
        ProtocolVersion::V1_2,
    ];

    /// Stable wire code.
    pub fn code(self) -> u32 {
        match self {
            ProtocolVersion::V1_0 => 100,
            ProtocolVersion::V1_1 => 101,
            ProtocolVersion::V1_2 => 102,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.code() == code)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.code();
        write!(f, "{}.{}", code / 100, code % 100)
    }
}
