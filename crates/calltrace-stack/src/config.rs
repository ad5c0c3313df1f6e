/// Knobs shared by every thread stack of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Cross-check that a leaving function id matches the frame on top.
    pub verify_leaves: bool,
    /// Upper bound on the notices a thread stack keeps; older ones are dropped.
    pub max_notices: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            verify_leaves: true,
            max_notices: 1024,
        }
    }
}
