//! Trigger arbitration
//!
//! Decides which enabled phrase triggers activate for a newly started phrase.
//! Solo-Global candidates compete across every open show, Solo-Show
//! candidates compete within their show, and Blend candidates always win.
//! Each competition is a weighted random draw.

use crate::show::{ShowId, TriggerId};
use crate::trigger::{Exclusivity, Weight};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};

/// Source of uniform draws in `[0, total)`
pub trait DrawSource: Send {
    fn draw(&mut self, total: u32) -> u32;
}

/// Draws from a `StdRng`
pub struct RandomDraw {
    rng: StdRng,
}

impl RandomDraw {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Reproducible draws
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomDraw {
    fn default() -> Self {
        Self::new()
    }
}

impl DrawSource for RandomDraw {
    fn draw(&mut self, total: u32) -> u32 {
        if total == 0 {
            return 0;
        }
        self.rng.random_range(0..total)
    }
}

/// Replays a fixed list of draws, cycling when exhausted
#[derive(Debug, Clone)]
pub struct SequenceDraw {
    values: Vec<u32>,
    next: usize,
}

impl SequenceDraw {
    pub fn new(values: impl Into<Vec<u32>>) -> Self {
        Self {
            values: values.into(),
            next: 0,
        }
    }
}

impl DrawSource for SequenceDraw {
    fn draw(&mut self, total: u32) -> u32 {
        if self.values.is_empty() || total == 0 {
            return 0;
        }
        let value = self.values[self.next % self.values.len()];
        self.next += 1;
        value % total
    }
}

/// An enabled trigger competing for a phrase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub show: ShowId,
    pub trigger: TriggerId,
    pub exclusivity: Exclusivity,
    pub weight: Weight,
}

/// Outcome of arbitration for one phrase on one player
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationPlan {
    /// Winner across all shows
    pub solo_global: Option<TriggerId>,
    /// Winner per open show; `None` when the show had no Solo-Show winner,
    /// including when it owns the Solo-Global winner
    pub solo_show: BTreeMap<ShowId, Option<TriggerId>>,
    pub blend: BTreeSet<TriggerId>,
}

impl ActivationPlan {
    /// Every activated trigger, in ascending id order
    pub fn activated(&self) -> BTreeSet<TriggerId> {
        let mut activated: BTreeSet<TriggerId> = self.blend.clone();
        activated.extend(self.solo_global);
        activated.extend(self.solo_show.values().flatten().copied());
        activated
    }

    pub fn contains(&self, trigger: TriggerId) -> bool {
        self.solo_global == Some(trigger)
            || self.blend.contains(&trigger)
            || self.solo_show.values().any(|w| *w == Some(trigger))
    }

    pub fn is_empty(&self) -> bool {
        self.solo_global.is_none()
            && self.blend.is_empty()
            && self.solo_show.values().all(Option::is_none)
    }
}

/// Pick one candidate with probability proportional to its weight.
///
/// Candidates are taken in the order given; the first whose cumulative weight
/// exceeds the draw wins.
pub fn weighted_pick<'a>(
    candidates: &[&'a Candidate],
    draw: &mut dyn DrawSource,
) -> Option<&'a Candidate> {
    let total: u32 = candidates.iter().map(|c| c.weight.get()).sum();
    if total == 0 {
        return None;
    }
    let roll = draw.draw(total).min(total - 1);
    let mut cumulative = 0;
    for candidate in candidates {
        cumulative += candidate.weight.get();
        if roll < cumulative {
            return Some(*candidate);
        }
    }
    None
}

/// Run arbitration over the enabled candidates for one phrase.
///
/// `shows` lists every open show so each gets a Solo-Show entry.
pub fn arbitrate(
    candidates: &[Candidate],
    shows: &[ShowId],
    draw: &mut dyn DrawSource,
) -> ActivationPlan {
    let mut sorted: Vec<&Candidate> = candidates.iter().collect();
    sorted.sort_by_key(|c| (c.show, c.trigger));

    let mut plan = ActivationPlan::default();

    let global: Vec<&Candidate> = sorted
        .iter()
        .copied()
        .filter(|c| c.exclusivity == Exclusivity::SoloGlobal)
        .collect();
    let global_winner = weighted_pick(&global, draw);
    plan.solo_global = global_winner.map(|c| c.trigger);

    for show in shows {
        let winner = if global_winner.is_some_and(|w| w.show == *show) {
            None
        } else {
            let local: Vec<&Candidate> = sorted
                .iter()
                .copied()
                .filter(|c| c.show == *show && c.exclusivity == Exclusivity::SoloShow)
                .collect();
            weighted_pick(&local, draw).map(|c| c.trigger)
        };
        plan.solo_show.insert(*show, winner);
    }

    plan.blend = sorted
        .iter()
        .filter(|c| c.exclusivity == Exclusivity::Blend)
        .map(|c| c.trigger)
        .collect();

    plan
}

/// Shared arbitration entry point with its draw source
pub struct Arbiter {
    draw: Mutex<Box<dyn DrawSource>>,
}

impl Arbiter {
    pub fn new(draw: Box<dyn DrawSource>) -> Self {
        Self {
            draw: Mutex::new(draw),
        }
    }

    pub fn arbitrate(&self, candidates: &[Candidate], shows: &[ShowId]) -> ActivationPlan {
        let mut draw = self.draw.lock();
        arbitrate(candidates, shows, &mut **draw)
    }
}

impl Default for Arbiter {
    fn default() -> Self {
        Self::new(Box::new(RandomDraw::new()))
    }
}

impl std::fmt::Debug for Arbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arbiter").finish_non_exhaustive()
    }
}
