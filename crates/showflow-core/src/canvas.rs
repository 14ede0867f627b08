//! Phrase Canvas Mapper
//!
//! A phrase trigger draws its cues on a canvas made of four sections laid
//! out back to back: Start, Loop, End and Fill. When a real phrase plays, the
//! canvas is fitted onto it:
//!
//! - the Loop section repeats to absorb whatever the phrase has beyond
//!   Start + End,
//! - a phrase shorter than Start + End drops the Loop, then cuts End from its
//!   tail, then cuts Start from its tail,
//! - the Fill section is anchored to the analyzed fill, when both exist.
//!
//! Everything here is a pure function of the layout and the phrase.

use crate::cue::BeatRange;
use crate::error::{Result, ShowError};
use crate::observation::PhraseInfo;
use serde::{Deserialize, Serialize};

pub const BEATS_PER_BAR: u32 = 4;

/// Bar counts of each canvas section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectionLayout {
    pub start_bars: u32,
    /// Always at least one bar
    pub loop_bars: u32,
    pub end_bars: u32,
    /// Zero when the trigger has no fill section
    #[serde(default)]
    pub fill_bars: u32,
    /// Phrases shorter than this never activate the trigger
    #[serde(default)]
    pub min_phrase_bars: u32,
}

impl Default for SectionLayout {
    fn default() -> Self {
        Self {
            start_bars: 1,
            loop_bars: 1,
            end_bars: 1,
            fill_bars: 0,
            min_phrase_bars: 0,
        }
    }
}

impl SectionLayout {
    pub fn new(start_bars: u32, loop_bars: u32, end_bars: u32, fill_bars: u32) -> Result<Self> {
        let layout = Self {
            start_bars,
            loop_bars,
            end_bars,
            fill_bars,
            min_phrase_bars: 0,
        };
        layout.validate()?;
        Ok(layout)
    }

    pub fn with_min_phrase_bars(mut self, bars: u32) -> Self {
        self.min_phrase_bars = bars;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.loop_bars == 0 {
            return Err(ShowError::InvalidLayout(
                "loop section needs at least one bar".to_string(),
            ));
        }
        if self.checked_canvas_beats().is_none() {
            return Err(ShowError::InvalidLayout(format!(
                "{}+{}+{}+{} bars exceed the beat range",
                self.start_bars, self.loop_bars, self.end_bars, self.fill_bars
            )));
        }
        Ok(())
    }

    /// Canvas length in beats, `None` unless the canvas and its end bound fit in `u32`
    fn checked_canvas_beats(&self) -> Option<u32> {
        let beats = self
            .start_bars
            .checked_add(self.loop_bars)?
            .checked_add(self.end_bars)?
            .checked_add(self.fill_bars)?
            .checked_mul(BEATS_PER_BAR)?;
        beats.checked_add(1).map(|_| beats)
    }

    pub fn has_fill(&self) -> bool {
        self.fill_bars > 0
    }

    pub fn total_bars(&self) -> u32 {
        self.start_bars
            .saturating_add(self.loop_bars)
            .saturating_add(self.end_bars)
            .saturating_add(self.fill_bars)
    }

    /// Beats spanned by the whole canvas
    pub fn canvas_beats(&self) -> u32 {
        self.checked_canvas_beats().unwrap_or(0)
    }

    /// The whole canvas, in canvas beats starting at 1
    pub fn canvas_range(&self) -> BeatRange {
        BeatRange::spanning(1, self.canvas_beats())
    }

    /// Check that a canvas range fits on this canvas
    pub fn contains_range(&self, range: &BeatRange) -> bool {
        let canvas = self.canvas_range();
        range.start() >= canvas.start() && range.end() <= canvas.end()
    }
}

/// How one layout was fitted onto one phrase.
///
/// Built once per phrase start; never reused for another phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasMap {
    phrase_start: u32,
    phrase_end: u32,
    /// First beat of the fill when the fill section is anchored to it
    fill_start: Option<u32>,
    start_beats: u32,
    loop_span: u32,
    end_beats: u32,
    canvas_loop_offset: u32,
    canvas_loop_beats: u32,
    canvas_end_offset: u32,
    canvas_fill_offset: u32,
    canvas_fill_beats: u32,
}

/// Fit a layout onto a phrase.
///
/// Returns `None` when the trigger cannot apply: the phrase is empty or
/// shorter than the layout's minimum.
pub fn map_phrase(layout: &SectionLayout, phrase: &PhraseInfo) -> Option<CanvasMap> {
    if !phrase.is_valid() || layout.validate().is_err() {
        return None;
    }
    if phrase.bars() < layout.min_phrase_bars {
        return None;
    }

    let fill_start = if layout.has_fill() {
        phrase.fill_start()
    } else {
        None
    };
    let body_end = fill_start.unwrap_or(phrase.end_beat);
    let actual = body_end - phrase.start_beat;

    let start = layout.start_bars * BEATS_PER_BAR;
    let loop_beats = layout.loop_bars * BEATS_PER_BAR;
    let end = layout.end_bars * BEATS_PER_BAR;

    let (start_beats, loop_span, end_beats) = if actual >= start + end {
        (start, actual - start - end, end)
    } else if actual >= start {
        // Loop eliminated, End cut from its tail
        (start, 0, actual - start)
    } else {
        // End eliminated too, Start cut from its tail
        (actual, 0, 0)
    };

    Some(CanvasMap {
        phrase_start: phrase.start_beat,
        phrase_end: phrase.end_beat,
        fill_start,
        start_beats,
        loop_span,
        end_beats,
        canvas_loop_offset: start,
        canvas_loop_beats: loop_beats,
        canvas_end_offset: start + loop_beats,
        canvas_fill_offset: start + loop_beats + end,
        canvas_fill_beats: layout.fill_bars * BEATS_PER_BAR,
    })
}

impl CanvasMap {
    /// Translate a track beat into a canvas beat.
    ///
    /// `None` when the beat is outside the phrase, or falls in part of the
    /// fill the canvas has no room for.
    pub fn position(&self, track_beat: u32) -> Option<u32> {
        if track_beat < self.phrase_start || track_beat >= self.phrase_end {
            return None;
        }

        if let Some(fill_start) = self.fill_start {
            if track_beat >= fill_start {
                let offset = track_beat - fill_start;
                return (offset < self.canvas_fill_beats)
                    .then(|| 1 + self.canvas_fill_offset + offset);
            }
        }

        let mut offset = track_beat - self.phrase_start;
        if offset < self.start_beats {
            return Some(1 + offset);
        }
        offset -= self.start_beats;
        if offset < self.loop_span {
            return Some(1 + self.canvas_loop_offset + offset % self.canvas_loop_beats);
        }
        offset -= self.loop_span;
        (offset < self.end_beats).then(|| 1 + self.canvas_end_offset + offset)
    }

    /// Phrase-relative beat (1 = first beat of the phrase)
    pub fn phrase_beat(&self, track_beat: u32) -> Option<u32> {
        (track_beat >= self.phrase_start && track_beat < self.phrase_end)
            .then(|| 1 + track_beat - self.phrase_start)
    }

    /// How many times the Loop section plays, counting a partial pass
    pub fn loop_passes(&self) -> u32 {
        self.loop_span.div_ceil(self.canvas_loop_beats)
    }

    /// Whether the Loop section was dropped to fit a short phrase
    pub fn loop_eliminated(&self) -> bool {
        self.loop_span == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::PhraseType;

    fn layout(start: u32, looped: u32, end: u32) -> SectionLayout {
        SectionLayout::new(start, looped, end, 0).unwrap()
    }

    fn phrase(bars: u32) -> PhraseInfo {
        PhraseInfo::new(PhraseType::Chorus, 101, 101 + bars * BEATS_PER_BAR)
    }

    #[test]
    fn test_layout_requires_loop() {
        assert!(SectionLayout::new(1, 0, 1, 0).is_err());
        let layout = layout(2, 4, 2);
        assert_eq!(layout.canvas_beats(), 32);
        assert_eq!(layout.canvas_range(), BeatRange::new(1, 33).unwrap());
        assert!(layout.contains_range(&BeatRange::new(9, 33).unwrap()));
        assert!(!layout.contains_range(&BeatRange::new(9, 34).unwrap()));
    }

    #[test]
    fn test_oversized_layout_rejected() {
        assert!(matches!(
            SectionLayout::new(u32::MAX / 2, 1, 1, 0),
            Err(ShowError::InvalidLayout(_))
        ));
        assert!(SectionLayout::new(1, u32::MAX / 4, 0, 0).is_err());
        assert!(SectionLayout::new(u32::MAX, u32::MAX, 1, 1).is_err());

        // Built by hand, an oversized layout maps nothing instead of overflowing
        let layout = SectionLayout {
            start_bars: u32::MAX / 2,
            ..SectionLayout::default()
        };
        assert_eq!(layout.canvas_beats(), 0);
        assert!(map_phrase(&layout, &phrase(8)).is_none());
    }

    #[test]
    fn test_exact_fit_is_identity() {
        let map = map_phrase(&layout(1, 2, 1), &phrase(4)).unwrap();
        for offset in 0..16 {
            assert_eq!(map.position(101 + offset), Some(1 + offset));
        }
        assert_eq!(map.position(100), None);
        assert_eq!(map.position(117), None);
        assert_eq!(map.loop_passes(), 1);
    }

    #[test]
    fn test_loop_repeats_to_fill_long_phrase() {
        // Start=1, Loop=2, End=1 over 6 bars: the loop plays twice
        let map = map_phrase(&layout(1, 2, 1), &phrase(6)).unwrap();
        assert_eq!(map.loop_passes(), 2);

        let canvas: Vec<u32> = (101..125).map(|b| map.position(b).unwrap()).collect();
        let expected: Vec<u32> = (1..=4) // start bar
            .chain(5..=12) // loop, first pass
            .chain(5..=12) // loop, second pass
            .chain(13..=16) // end bar
            .collect();
        assert_eq!(canvas, expected);
    }

    #[test]
    fn test_partial_loop_pass() {
        // 5 bars: one full loop pass, then one bar of the second pass
        let map = map_phrase(&layout(1, 2, 1), &phrase(5)).unwrap();
        assert_eq!(map.loop_passes(), 2);
        assert_eq!(map.position(101 + 12), Some(5));
        assert_eq!(map.position(101 + 16), Some(13));
    }

    #[test]
    fn test_short_phrase_drops_loop_then_end_tail() {
        // Start=2, Loop=2, End=2 over 3 bars: no loop, one bar of End
        let map = map_phrase(&layout(2, 2, 2), &phrase(3)).unwrap();
        assert!(map.loop_eliminated());
        assert_eq!(map.position(101), Some(1));
        assert_eq!(map.position(108), Some(8));
        // End section starts at canvas beat 17
        assert_eq!(map.position(109), Some(17));
        assert_eq!(map.position(112), Some(20));
        assert_eq!(map.position(113), None);
    }

    #[test]
    fn test_very_short_phrase_cuts_start_tail() {
        let map = map_phrase(&layout(2, 1, 1), &phrase(1)).unwrap();
        assert_eq!(map.position(101), Some(1));
        assert_eq!(map.position(104), Some(4));
        assert_eq!(map.position(105), None);
    }

    #[test]
    fn test_fill_anchors_to_analyzed_fill() {
        let layout = SectionLayout::new(1, 1, 1, 1).unwrap();
        // 8 bar phrase whose last bar is a fill
        let info = phrase(8).with_fill(101 + 28);
        let map = map_phrase(&layout, &info).unwrap();
        // Body is 7 bars: start 1, loop 5, end 1
        assert_eq!(map.position(101 + 24), Some(9));
        assert_eq!(map.position(101 + 28), Some(13));
        assert_eq!(map.position(101 + 31), Some(16));

        // Without a fill section the fill is just part of the body
        let no_fill = map_phrase(&SectionLayout::new(1, 1, 1, 0).unwrap(), &info).unwrap();
        assert_eq!(no_fill.position(101 + 28), Some(9));
    }

    #[test]
    fn test_long_fill_overflows_section() {
        let layout = SectionLayout::new(1, 1, 1, 1).unwrap();
        let info = phrase(8).with_fill(101 + 24);
        let map = map_phrase(&layout, &info).unwrap();
        assert_eq!(map.position(101 + 27), Some(16));
        assert_eq!(map.position(101 + 28), None);
    }

    #[test]
    fn test_minimum_phrase_length() {
        let layout = layout(1, 1, 1).with_min_phrase_bars(8);
        assert!(map_phrase(&layout, &phrase(4)).is_none());
        assert!(map_phrase(&layout, &phrase(8)).is_some());
    }

    #[test]
    fn test_phrase_beat() {
        let map = map_phrase(&layout(1, 1, 1), &phrase(4)).unwrap();
        assert_eq!(map.phrase_beat(101), Some(1));
        assert_eq!(map.phrase_beat(116), Some(16));
        assert_eq!(map.phrase_beat(117), None);
    }
}
