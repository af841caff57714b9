use std::fmt;

use uuid::Uuid;

/// Identifier for one stream session.
///
/// Bumped on every accepted submission so late transport events and poll
/// results from an earlier session can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SessionGeneration(pub u64);

impl SessionGeneration {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SessionGeneration {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#{}", self.0)
    }
}

/// Client-side message id used until (or unless) the server assigns one.
pub fn local_message_id() -> String {
    Uuid::now_v7().to_string()
}
