use std::iter;

use itertools::Itertools;

use crate::{
    error::{SessionError, SessionResult},
    item::Chapter,
    ticks::Ticks,
};

/// Half open `[start, end)` range in whole seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterRange {
    pub name: String,
    pub start: i64,
    pub end: i64,
}

impl ChapterRange {
    pub fn new(name: impl Into<String>, start: i64, end: i64) -> Self {
        Self {
            name: name.into(),
            start,
            end,
        }
    }

    pub fn contains(&self, seconds: i64) -> bool {
        self.start <= seconds && seconds < self.end
    }
}

/// Sorted, gapless chapter ranges covering `[0, duration)`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChapterMap {
    ranges: Vec<ChapterRange>,
}

fn invalid(msg: String) -> SessionError {
    SessionError::InvalidChapterData(msg)
}

impl ChapterMap {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Derives the ranges from chapter start offsets, the last one ending at
    /// `duration`.
    pub fn from_chapters(chapters: &[Chapter], duration: Ticks) -> SessionResult<Self> {
        if chapters.is_empty() {
            return Ok(Self::empty());
        }

        let ends = chapters
            .iter()
            .skip(1)
            .map(|c| c.start.seconds())
            .chain(iter::once(duration.seconds()));

        let ranges = chapters
            .iter()
            .zip(ends)
            .map(|(c, end)| ChapterRange::new(c.name.clone(), c.start.seconds(), end))
            .collect();

        Self::from_ranges(ranges)
    }

    pub fn from_ranges(ranges: Vec<ChapterRange>) -> SessionResult<Self> {
        let Some(first) = ranges.first() else {
            return Ok(Self::empty());
        };

        if first.start != 0 {
            return Err(invalid(format!(
                "first chapter '{}' starts at {}s instead of 0",
                first.name, first.start
            )));
        }

        if let Some(r) = ranges.iter().find(|r| r.start >= r.end) {
            return Err(invalid(format!(
                "chapter '{}' is empty or reversed: [{}, {})",
                r.name, r.start, r.end
            )));
        }

        if let Some((a, b)) = ranges.iter().tuple_windows().find(|(a, b)| a.end != b.start) {
            return Err(invalid(format!(
                "chapters '{}' and '{}' are not contiguous: {} != {}",
                a.name, b.name, a.end, b.start
            )));
        }

        Ok(Self { ranges })
    }

    pub fn ranges(&self) -> &[ChapterRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    fn duration_seconds(&self) -> i64 {
        self.ranges.last().map(|r| r.end).unwrap_or(0)
    }

    pub fn at_seconds(&self, seconds: i64) -> Option<&ChapterRange> {
        self.ranges
            .iter()
            .find(|r| r.contains(seconds))
            .or_else(|| self.ranges.last())
    }

    /// `fraction` is clamped to `[0, 1]`. Anything past the end lands in the
    /// last chapter.
    pub fn locate(&self, fraction: f64) -> Option<&ChapterRange> {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        let seconds = (fraction * self.duration_seconds() as f64).floor() as i64;
        self.at_seconds(seconds)
    }
}
