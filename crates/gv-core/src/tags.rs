//! Per-mesh visual state tags.

/// Visual state flags attached to a mesh.
///
/// The flags are independent, but their visual effect is ordered:
/// highlighted > selected > isolated > colored > default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VisualTags {
    pub selected: bool,
    pub isolated: bool,
    pub highlighted: bool,
    pub colored: bool,
}

impl VisualTags {
    /// Returns true if no tag is set.
    pub fn is_empty(&self) -> bool {
        !(self.selected || self.isolated || self.highlighted || self.colored)
    }

    /// Decodes tags from a bitmask (bit 0 selected, 1 isolated, 2 highlighted, 3 colored).
    pub fn from_bits(bits: u8) -> Self {
        Self {
            selected: bits & 0b0001 != 0,
            isolated: bits & 0b0010 != 0,
            highlighted: bits & 0b0100 != 0,
            colored: bits & 0b1000 != 0,
        }
    }

    /// The dominant visual state under the priority order.
    pub fn dominant(&self) -> DominantState {
        if self.highlighted {
            DominantState::Highlighted
        } else if self.selected {
            DominantState::Selected
        } else if self.isolated {
            DominantState::Isolated
        } else if self.colored {
            DominantState::Colored
        } else {
            DominantState::Default
        }
    }
}

/// Visual state that wins the priority chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DominantState {
    Highlighted,
    Selected,
    Isolated,
    Colored,
    Default,
}
