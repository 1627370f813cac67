//! Button identities, edge policies and events

/// Logical buttons; a node wires up any subset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ButtonId {
    Pair,
    User,
    Start,
    Stop,
}

impl ButtonId {
    pub const COUNT: usize = 4;
    pub const ALL: [ButtonId; Self::COUNT] = [ButtonId::Pair, ButtonId::User, ButtonId::Start, ButtonId::Stop];

    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Which edges of a button are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EdgePolicy {
    Rising,
    Falling,
    Both,
}

impl EdgePolicy {
    pub const fn accepts(self, edge: Edge) -> bool {
        matches!(
            (self, edge),
            (EdgePolicy::Both, _) | (EdgePolicy::Rising, Edge::Press) | (EdgePolicy::Falling, Edge::Release)
        )
    }
}

/// Edge type handed to button actions (press = 1, release = 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Edge {
    Release = 0,
    Press = 1,
}

impl Edge {
    /// Active-low input: a low level means pressed
    pub const fn from_active_low(level_high: bool) -> Self {
        if level_high {
            Edge::Release
        } else {
            Edge::Press
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ButtonConfig {
    pub id: ButtonId,
    pub policy: EdgePolicy,
    pub debounce_ms: u16,
}

impl ButtonConfig {
    pub const fn new(id: ButtonId, policy: EdgePolicy, debounce_ms: u16) -> Self {
        Self {
            id,
            policy,
            debounce_ms,
        }
    }
}

/// A debounced, qualifying edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ButtonEvent {
    pub id: ButtonId,
    pub edge: Edge,
    pub at_ms: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_policy() {
        assert!(EdgePolicy::Rising.accepts(Edge::Press));
        assert!(!EdgePolicy::Rising.accepts(Edge::Release));
        assert!(EdgePolicy::Falling.accepts(Edge::Release));
        assert!(!EdgePolicy::Falling.accepts(Edge::Press));
        assert!(EdgePolicy::Both.accepts(Edge::Press));
        assert!(EdgePolicy::Both.accepts(Edge::Release));
    }

    #[test]
    fn test_edge_values() {
        assert_eq!(Edge::Press as u8, 1);
        assert_eq!(Edge::Release as u8, 0);
        assert_eq!(Edge::from_active_low(false), Edge::Press);
    }

    #[test]
    fn test_indices_are_dense() {
        for (i, id) in ButtonId::ALL.iter().enumerate() {
            assert_eq!(id.index(), i);
        }
    }
}
