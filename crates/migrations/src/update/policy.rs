//! Batch admission policy.

/// How many commands may share one round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPolicy {
    /// At most one command per batch
    Single,
    /// Limits imposed by the store protocol
    Bounded {
        max_commands: usize,
        max_parameters: usize,
    },
    Unlimited,
}

impl BatchPolicy {
    /// Whether a batch currently holding `len` commands may take one more
    pub fn admits(&self, len: usize) -> bool {
        match self {
            BatchPolicy::Single => len == 0,
            BatchPolicy::Bounded { max_commands, .. } => len < (*max_commands).max(1),
            BatchPolicy::Unlimited => true,
        }
    }

    /// Parameter ceiling, if any
    pub fn max_parameters(&self) -> Option<usize> {
        match self {
            BatchPolicy::Bounded { max_parameters, .. } => Some(*max_parameters),
            BatchPolicy::Single | BatchPolicy::Unlimited => None,
        }
    }
}
