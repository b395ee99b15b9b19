//! Stimulus deck draws and choice-layout placement.
//!
//! Deck contents are part of the durable progress so a resumed session
//! keeps its within-block balance; placement history is process-local by
//! design and starts empty on every launch.

use pairlab_core::{ChoiceLayout, Side, SideDecks, StimulusLabel, DECK_TEMPLATE};
use rand::seq::SliceRandom;
use rand::Rng;

/// Draws stimulus labels from per-side decks and picks choice layouts
/// under the placement constraint.
///
/// Layout picks are not remembered until [`record_layout`] is called, so a
/// trio that aborts mid-flight leaves the history exactly as it was.
///
/// [`record_layout`]: StimulusScheduler::record_layout
pub struct StimulusScheduler<R: Rng> {
    rng: R,
    placement: PlacementHistory,
}

impl<R: Rng> StimulusScheduler<R> {
    pub fn new(rng: R) -> Self {
        Self {
            rng,
            placement: PlacementHistory::default(),
        }
    }

    /// Draws the next stimulus label for one side, refilling and shuffling
    /// that side's deck from the template when it runs out.
    pub fn next_label(&mut self, decks: &mut SideDecks, side: Side) -> StimulusLabel {
        let deck = decks.side_mut(side);
        loop {
            if let Some(label) = deck.pop() {
                return label;
            }
            deck.extend_from_slice(&DECK_TEMPLATE);
            deck.shuffle(&mut self.rng);
        }
    }

    /// Picks a choice layout for one side. A layout that has already run
    /// twice in a row on that side is excluded so no side ever sees the
    /// same arrangement three trials running.
    pub fn choose_layout(&mut self, side: Side) -> ChoiceLayout {
        match self.placement.run_of_two(side) {
            Some(ChoiceLayout::LargeLeft) => ChoiceLayout::LargeRight,
            Some(ChoiceLayout::LargeRight) => ChoiceLayout::LargeLeft,
            None => {
                if self.rng.gen_bool(0.5) {
                    ChoiceLayout::LargeLeft
                } else {
                    ChoiceLayout::LargeRight
                }
            }
        }
    }

    /// Commits a layout that was actually shown through a completed trio.
    /// Aborted trios never call this.
    pub fn record_layout(&mut self, side: Side, layout: ChoiceLayout) {
        self.placement.push(side, layout);
    }
}

/// Last two committed layouts per side, most recent last.
#[derive(Debug, Default)]
struct PlacementHistory {
    left: [Option<ChoiceLayout>; 2],
    right: [Option<ChoiceLayout>; 2],
}

impl PlacementHistory {
    fn slots(&mut self, side: Side) -> &mut [Option<ChoiceLayout>; 2] {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    fn push(&mut self, side: Side, layout: ChoiceLayout) {
        let slots = self.slots(side);
        slots[0] = slots[1];
        slots[1] = Some(layout);
    }

    fn run_of_two(&self, side: Side) -> Option<ChoiceLayout> {
        let slots = match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        };
        match slots {
            [Some(older), Some(newer)] if older == newer => Some(*newer),
            _ => None,
        }
    }
}
