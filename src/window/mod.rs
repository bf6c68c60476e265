//! Bounded render window over a filtered list.
//!
//! Only `end - start` rows are materialized at any time. When the viewport
//! nears either edge of the materialized rows the window shifts by one page,
//! and the line offset is compensated by the height of the rows that entered
//! or left above the viewport so the row under the cursor stays put.

use serde::{Deserialize, Serialize};

/// Height of a row in terminal lines, keyed by position in the filtered list.
pub trait RowMeasure {
    fn row_height(&self, position: usize) -> u16;
}

impl<F> RowMeasure for F
where
    F: Fn(usize) -> u16,
{
    fn row_height(&self, position: usize) -> u16 {
        self(position)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderWindow {
    pub start: usize,
    pub end: usize,
}

impl RenderWindow {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, position: usize) -> bool {
        position >= self.start && position < self.end
    }
}

/// A materialized row: `position` in the filtered list, `slot` within the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowDescriptor {
    pub position: usize,
    pub slot: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPhase {
    Empty,
    Windowed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftDirection {
    Forward,
    Backward,
    Jump,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowShift {
    pub direction: ShiftDirection,
    pub previous: RenderWindow,
    pub current: RenderWindow,
    /// Signed change applied to the line offset.
    pub compensation: i64,
}

#[derive(Debug, Clone)]
pub struct WindowedList {
    page_size: usize,
    cap: usize,
    sentinel_margin: u16,
    len: usize,
    window: RenderWindow,
    scroll_offset: u32,
    shift_in_progress: bool,
}

impl WindowedList {
    pub fn new(page_size: usize, max_pages: usize, sentinel_margin: u16) -> Self {
        let page_size = page_size.max(1);
        Self {
            page_size,
            cap: page_size * max_pages.max(1),
            sentinel_margin,
            len: 0,
            window: RenderWindow::default(),
            scroll_offset: 0,
            shift_in_progress: false,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn window(&self) -> RenderWindow {
        self.window
    }

    pub fn scroll_offset(&self) -> u32 {
        self.scroll_offset
    }

    pub fn phase(&self) -> WindowPhase {
        if self.window.is_empty() {
            WindowPhase::Empty
        } else {
            WindowPhase::Windowed
        }
    }

    pub fn is_shift_in_progress(&self) -> bool {
        self.shift_in_progress
    }

    /// Re-enters the window for a new filtered list of `len` rows.
    pub fn reset(&mut self, len: usize) {
        self.len = len;
        self.window = RenderWindow {
            start: 0,
            end: len.min(self.cap),
        };
        self.scroll_offset = 0;
        self.shift_in_progress = false;
    }

    /// Restores a saved window. Bounds that no longer fit `len` fall back to [`reset`](Self::reset).
    /// The offset is taken as saved; callers clamp it with [`clamp_scroll`](Self::clamp_scroll)
    /// once row heights are known.
    pub fn restore(&mut self, len: usize, window: RenderWindow, scroll_offset: u32) -> bool {
        let valid = window.start <= window.end
            && window.end <= len
            && window.len() <= self.cap
            && (window.len() > 0 || len == 0);
        if !valid {
            self.reset(len);
            return false;
        }
        self.len = len;
        self.window = window;
        self.scroll_offset = scroll_offset;
        self.shift_in_progress = false;
        true
    }

    pub fn rows(&self) -> impl Iterator<Item = RowDescriptor> + '_ {
        (self.window.start..self.window.end)
            .enumerate()
            .map(|(slot, position)| RowDescriptor { position, slot })
    }

    pub fn content_height<M: RowMeasure + ?Sized>(&self, measure: &M) -> u32 {
        height_of(measure, self.window.start, self.window.end)
    }

    /// Line offset of `position` from the top of the window, if materialized.
    pub fn offset_of<M: RowMeasure + ?Sized>(&self, position: usize, measure: &M) -> Option<u32> {
        self.window
            .contains(position)
            .then(|| height_of(measure, self.window.start, position))
    }

    /// First materialized row at or below the current line offset.
    pub fn top_visible<M: RowMeasure + ?Sized>(&self, measure: &M) -> Option<usize> {
        let mut acc = 0u32;
        for position in self.window.start..self.window.end {
            let height = u32::from(measure.row_height(position));
            if acc + height > self.scroll_offset {
                return Some(position);
            }
            acc += height;
        }
        self.window.end.checked_sub(1).filter(|_| !self.window.is_empty())
    }

    /// Called once the UI has drawn the rows of the latest shift.
    pub fn finish_render(&mut self) {
        self.shift_in_progress = false;
    }

    pub fn grow_forward<M: RowMeasure + ?Sized>(&mut self, measure: &M) -> Option<WindowShift> {
        if self.shift_in_progress || self.window.end >= self.len {
            return None;
        }
        let new_end = self.len.min(self.window.end + self.page_size);
        let new_start = new_end.saturating_sub(self.cap);
        Some(self.shift_to(
            ShiftDirection::Forward,
            RenderWindow {
                start: new_start,
                end: new_end,
            },
            measure,
        ))
    }

    pub fn grow_backward<M: RowMeasure + ?Sized>(&mut self, measure: &M) -> Option<WindowShift> {
        if self.shift_in_progress || self.window.start == 0 {
            return None;
        }
        let new_end = self
            .len
            .min(self.page_size.max(self.window.end.saturating_sub(self.page_size)));
        let new_start = new_end.saturating_sub(self.cap);
        Some(self.shift_to(
            ShiftDirection::Backward,
            RenderWindow {
                start: new_start,
                end: new_end,
            },
            measure,
        ))
    }

    /// Sentinel check after the line offset changed.
    pub fn on_scroll<M: RowMeasure + ?Sized>(
        &mut self,
        viewport_height: u16,
        measure: &M,
    ) -> Option<WindowShift> {
        if self.shift_in_progress || self.window.is_empty() {
            return None;
        }
        self.clamp_scroll(viewport_height, measure);
        let margin = u32::from(self.sentinel_margin);
        let content = self.content_height(measure);
        // Rows that already fit on screen leave no sentinel to reach. Zero
        // heights are unmeasured and still shift.
        if content > 0 && content <= u32::from(viewport_height) {
            return None;
        }
        let bottom = self.scroll_offset + u32::from(viewport_height);
        if self.window.end < self.len && bottom + margin >= content {
            return self.grow_forward(measure);
        }
        if self.window.start > 0 && self.scroll_offset <= margin {
            return self.grow_backward(measure);
        }
        None
    }

    /// Pulls the line offset back inside the materialized rows, e.g. after
    /// row heights shrank or the viewport grew.
    pub fn clamp_scroll<M: RowMeasure + ?Sized>(&mut self, viewport_height: u16, measure: &M) {
        let max_offset = self
            .content_height(measure)
            .saturating_sub(u32::from(viewport_height));
        self.scroll_offset = self.scroll_offset.min(max_offset);
    }

    /// Scrolls by `delta` lines within the materialized rows, then checks the sentinels.
    pub fn scroll_by<M: RowMeasure + ?Sized>(
        &mut self,
        delta: i32,
        viewport_height: u16,
        measure: &M,
    ) -> Option<WindowShift> {
        let max_offset = self
            .content_height(measure)
            .saturating_sub(u32::from(viewport_height));
        let target = i64::from(self.scroll_offset) + i64::from(delta);
        self.scroll_offset = target.clamp(0, i64::from(max_offset)) as u32;
        self.on_scroll(viewport_height, measure)
    }

    /// Adjusts the line offset so `position` is fully on screen.
    ///
    /// A position outside the window re-centres the window on its page; this
    /// is the only shift allowed while a previous shift is still being drawn.
    pub fn ensure_visible<M: RowMeasure + ?Sized>(
        &mut self,
        position: usize,
        viewport_height: u16,
        measure: &M,
    ) -> Option<WindowShift> {
        if position >= self.len {
            return None;
        }
        let mut jumped = None;
        if !self.window.contains(position) {
            jumped = Some(self.jump_to(position, measure));
        }
        let Some(top) = self.offset_of(position, measure) else {
            return jumped;
        };
        let height = u32::from(measure.row_height(position));
        let viewport = u32::from(viewport_height);
        if top < self.scroll_offset {
            self.scroll_offset = top;
        } else if top + height > self.scroll_offset + viewport {
            self.scroll_offset = (top + height).saturating_sub(viewport);
        }
        if jumped.is_some() {
            return jumped;
        }
        self.on_scroll(viewport_height, measure)
    }

    fn jump_to<M: RowMeasure + ?Sized>(&mut self, position: usize, measure: &M) -> WindowShift {
        let page_start = (position / self.page_size) * self.page_size;
        let pages_before = (self.cap / self.page_size - 1) / 2;
        let start = page_start.saturating_sub(pages_before * self.page_size);
        let end = self.len.min(start + self.cap);
        let start = end.saturating_sub(self.cap);
        let previous = self.window;
        self.window = RenderWindow { start, end };
        let before = self.scroll_offset;
        self.scroll_offset = height_of(measure, start, position);
        self.shift_in_progress = true;
        tracing::trace!(?previous, current = ?self.window, "window jump");
        WindowShift {
            direction: ShiftDirection::Jump,
            previous,
            current: self.window,
            compensation: i64::from(self.scroll_offset) - i64::from(before),
        }
    }

    fn shift_to<M: RowMeasure + ?Sized>(
        &mut self,
        direction: ShiftDirection,
        next: RenderWindow,
        measure: &M,
    ) -> WindowShift {
        let previous = self.window;
        let added_above = i64::from(height_of(measure, next.start, previous.start.max(next.start)));
        let removed_above = i64::from(height_of(measure, previous.start, next.start.max(previous.start)));
        let compensation = added_above - removed_above;
        let target = i64::from(self.scroll_offset) + compensation;
        self.scroll_offset = target.clamp(0, i64::from(u32::MAX)) as u32;
        self.window = next;
        self.shift_in_progress = true;
        tracing::trace!(?direction, ?previous, current = ?next, compensation, "window shift");
        WindowShift {
            direction,
            previous,
            current: next,
            compensation,
        }
    }
}

fn height_of<M: RowMeasure + ?Sized>(measure: &M, from: usize, to: usize) -> u32 {
    (from..to).map(|position| u32::from(measure.row_height(position))).sum()
}
