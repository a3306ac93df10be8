//! Load pipeline tiers.

use std::fmt;

/// One stage of the load pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    Memory,
    Disk,
    Network,
}

impl Tier {
    /// All tiers, in promotion order.
    pub const ALL: [Tier; 3] = [Tier::Memory, Tier::Disk, Tier::Network];

    /// Tier a miss or failure is promoted to, if any.
    pub fn next(self) -> Option<Tier> {
        match self {
            Tier::Memory => Some(Tier::Disk),
            Tier::Disk => Some(Tier::Network),
            Tier::Network => None,
        }
    }

    /// Position in [`Tier::ALL`].
    pub fn index(self) -> usize {
        match self {
            Tier::Memory => 0,
            Tier::Disk => 1,
            Tier::Network => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Memory => "memory",
            Tier::Disk => "disk",
            Tier::Network => "network",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promotion_order() {
        assert_eq!(Tier::Memory.next(), Some(Tier::Disk));
        assert_eq!(Tier::Disk.next(), Some(Tier::Network));
        assert_eq!(Tier::Network.next(), None);
    }

    #[test]
    fn test_index_matches_all() {
        for (i, tier) in Tier::ALL.iter().enumerate() {
            assert_eq!(tier.index(), i);
        }
    }
}
