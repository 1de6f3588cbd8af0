//! Session Correlation Handle
//!
//! A UUID identifying one connection/session for logging and metrics —
//! the same role a file descriptor or connection ID plays elsewhere.

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(Uuid);

impl Handle {
    /// Create a new handle (generates UUIDv4).
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Short form for logging (first 8 chars).
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
