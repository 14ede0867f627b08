//! Phrase triggers
//!
//! A phrase trigger is a reusable cue canvas that competes for newly started
//! phrases. Whether it takes part, and with what weight, is decided by its
//! [`EnablementRule`].

use crate::canvas::SectionLayout;
use crate::cue::Cue;
use crate::error::{Result, ShowError};
use crate::observation::{PhraseInfo, PhraseType, PlayerId, TrackBank};
use crate::show::{CueId, ShowId, TriggerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, warn};

/// Exclusivity tier a trigger competes in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exclusivity {
    /// At most one across all open shows
    SoloGlobal,
    /// At most one per show
    SoloShow,
    /// Always activates when enabled
    Blend,
}

/// Selection weight in `1..=1000`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Weight(u32);

impl Weight {
    pub const MIN: u32 = 1;
    pub const MAX: u32 = 1000;
    pub const ONE: Weight = Weight(1);

    pub fn new(value: u32) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ShowError::InvalidWeight(value))
        }
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl Default for Weight {
    fn default() -> Self {
        Self::ONE
    }
}

impl TryFrom<u32> for Weight {
    type Error = ShowError;

    fn try_from(value: u32) -> Result<Self> {
        Weight::new(value)
    }
}

impl From<Weight> for u32 {
    fn from(weight: Weight) -> Self {
        weight.0
    }
}

/// Outcome of evaluating an enablement rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enablement {
    Disabled,
    Enabled(Weight),
}

impl Enablement {
    /// Enabled with a checked weight
    pub fn weight(value: u32) -> Result<Self> {
        Ok(Self::Enabled(Weight::new(value)?))
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }
}

impl From<bool> for Enablement {
    fn from(enabled: bool) -> Self {
        if enabled {
            Self::Enabled(Weight::ONE)
        } else {
            Self::Disabled
        }
    }
}

/// What an enablement rule gets to look at
#[derive(Debug, Clone, Copy)]
pub struct TriggerContext<'a> {
    pub show: ShowId,
    pub trigger: TriggerId,
    pub player: PlayerId,
    pub phrase: &'a PhraseInfo,
    pub track: Option<&'a str>,
    pub tempo: Option<f64>,
}

/// Declarative filter over phrase type, bank, length and tempo.
///
/// Empty sets and missing bounds match anything.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PhraseFilter {
    #[serde(default)]
    pub phrase_types: BTreeSet<PhraseType>,
    #[serde(default)]
    pub banks: BTreeSet<TrackBank>,
    #[serde(default)]
    pub min_bars: Option<u32>,
    #[serde(default)]
    pub max_bars: Option<u32>,
    #[serde(default)]
    pub min_bpm: Option<f64>,
    #[serde(default)]
    pub max_bpm: Option<f64>,
    #[serde(default)]
    pub weight: Weight,
}

impl PhraseFilter {
    /// Filter that matches every phrase
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_types(mut self, types: impl IntoIterator<Item = PhraseType>) -> Self {
        self.phrase_types = types.into_iter().collect();
        self
    }

    pub fn with_weight(mut self, weight: Weight) -> Self {
        self.weight = weight;
        self
    }

    pub fn matches(&self, ctx: &TriggerContext<'_>) -> bool {
        let phrase = ctx.phrase;
        if !self.phrase_types.is_empty() && !self.phrase_types.contains(&phrase.phrase_type) {
            return false;
        }
        if !self.banks.is_empty() && !self.banks.contains(&phrase.bank) {
            return false;
        }
        let bars = phrase.bars();
        if self.min_bars.is_some_and(|min| bars < min) || self.max_bars.is_some_and(|max| bars > max)
        {
            return false;
        }
        if self.min_bpm.is_some() || self.max_bpm.is_some() {
            // Tempo bounds need a known tempo
            let Some(tempo) = ctx.tempo else {
                return false;
            };
            if self.min_bpm.is_some_and(|min| tempo < min)
                || self.max_bpm.is_some_and(|max| tempo > max)
            {
                return false;
            }
        }
        true
    }
}

/// Signature of user-supplied enablement code
pub type CustomRuleFn = dyn Fn(&TriggerContext<'_>) -> anyhow::Result<Enablement> + Send + Sync;

/// User-supplied enablement code
#[derive(Clone)]
pub struct CustomRule(Arc<CustomRuleFn>);

impl fmt::Debug for CustomRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomRule(..)")
    }
}

/// How a trigger decides whether it wants a phrase
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnablementRule {
    Declarative(PhraseFilter),
    /// Code-only; cannot be saved to a show file
    #[serde(skip)]
    Custom(CustomRule),
}

impl Default for EnablementRule {
    fn default() -> Self {
        Self::Declarative(PhraseFilter::any())
    }
}

impl EnablementRule {
    pub fn custom<F>(rule: F) -> Self
    where
        F: Fn(&TriggerContext<'_>) -> anyhow::Result<Enablement> + Send + Sync + 'static,
    {
        Self::Custom(CustomRule(Arc::new(rule)))
    }

    /// Evaluate the rule. Errors and panics in custom code count as disabled.
    pub fn evaluate(&self, ctx: &TriggerContext<'_>) -> Enablement {
        match self {
            Self::Declarative(filter) => {
                if filter.matches(ctx) {
                    Enablement::Enabled(filter.weight)
                } else {
                    Enablement::Disabled
                }
            }
            Self::Custom(CustomRule(rule)) => {
                match catch_unwind(AssertUnwindSafe(|| rule(ctx))) {
                    Ok(Ok(enablement)) => enablement,
                    Ok(Err(e)) => {
                        warn!(
                            show = ctx.show,
                            trigger = ctx.trigger,
                            player = ctx.player,
                            error = %e,
                            "Enablement rule failed, treating trigger as disabled"
                        );
                        Enablement::Disabled
                    }
                    Err(_) => {
                        error!(
                            show = ctx.show,
                            trigger = ctx.trigger,
                            player = ctx.player,
                            "Enablement rule panicked, treating trigger as disabled"
                        );
                        Enablement::Disabled
                    }
                }
            }
        }
    }
}

fn default_true() -> bool {
    true
}

/// A cue canvas matched against playing phrases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhraseTrigger {
    pub id: TriggerId,
    pub name: String,
    /// Owning show; set when the trigger is added to a show
    #[serde(default)]
    pub show: ShowId,
    pub exclusivity: Exclusivity,
    #[serde(default)]
    pub rule: EnablementRule,
    pub layout: SectionLayout,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub cues: Vec<Cue>,
}

impl PhraseTrigger {
    pub fn new(
        id: TriggerId,
        name: impl Into<String>,
        exclusivity: Exclusivity,
        layout: SectionLayout,
    ) -> Result<Self> {
        layout.validate()?;
        Ok(Self {
            id,
            name: name.into(),
            show: 0,
            exclusivity,
            rule: EnablementRule::default(),
            layout,
            enabled: true,
            cues: Vec::new(),
        })
    }

    pub fn with_rule(mut self, rule: EnablementRule) -> Self {
        self.rule = rule;
        self
    }

    /// Add a cue, rejecting ids in use and ranges off the canvas
    pub fn add_cue(&mut self, cue: Cue) -> Result<()> {
        self.check_cue(&cue)?;
        self.cues.push(cue);
        Ok(())
    }

    pub fn with_cue(mut self, cue: Cue) -> Result<Self> {
        self.add_cue(cue)?;
        Ok(self)
    }

    pub fn cue(&self, id: CueId) -> Option<&Cue> {
        self.cues.iter().find(|c| c.id == id)
    }

    pub(crate) fn take_cue(&mut self, id: CueId) -> Option<Cue> {
        let index = self.cues.iter().position(|c| c.id == id)?;
        Some(self.cues.remove(index))
    }

    pub(crate) fn check_cue(&self, cue: &Cue) -> Result<()> {
        if self.cue(cue.id).is_some() {
            return Err(ShowError::DuplicateId(format!(
                "cue {} on trigger {}",
                cue.id, self.id
            )));
        }
        if !self.layout.contains_range(&cue.range) {
            return Err(ShowError::CueOutsideCanvas {
                trigger: self.id,
                cue: cue.id,
                start: cue.range.start(),
                end: cue.range.end(),
            });
        }
        cue.messages.validate()
    }

    /// Validate a trigger loaded from a file
    pub fn validate(&self) -> Result<()> {
        self.layout.validate()?;
        let mut seen = BTreeSet::new();
        for cue in &self.cues {
            if !seen.insert(cue.id) {
                return Err(ShowError::DuplicateId(format!(
                    "cue {} on trigger {}",
                    cue.id, self.id
                )));
            }
            if !self.layout.contains_range(&cue.range) {
                return Err(ShowError::CueOutsideCanvas {
                    trigger: self.id,
                    cue: cue.id,
                    start: cue.range.start(),
                    end: cue.range.end(),
                });
            }
            cue.messages.validate()?;
        }
        Ok(())
    }

    /// Enablement for a phrase; a disabled trigger never competes
    pub fn evaluate(&self, ctx: &TriggerContext<'_>) -> Enablement {
        if !self.enabled {
            return Enablement::Disabled;
        }
        self.rule.evaluate(ctx)
    }
}
