use std::collections::VecDeque;

use crate::drawing::DEFAULT_STROKE_COLOR;
use crate::model::{RoomPatch, StrokeSegment};

#[derive(Debug, Clone, PartialEq)]
pub struct Brush {
    pub color: String,
    pub width: f32,
    pub erase: bool,
}

impl Default for Brush {
    fn default() -> Self {
        Self {
            color: DEFAULT_STROKE_COLOR.to_string(),
            width: 4.0,
            erase: false,
        }
    }
}

/// How the local canvas must change after a snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum StrokeReplay {
    Unchanged,
    /// Draw these on top of what is there
    Append(Vec<StrokeSegment>),
    /// Clear the canvas, then draw these
    Reset(Vec<StrokeSegment>),
}

#[derive(Debug)]
struct ActiveStroke {
    x: f32,
    y: f32,
    brush: Brush,
}

/// Append-only ink log shared through the room's `strokes` field.
///
/// Local segments are drawn at once, buffered in `pending` and flushed as one
/// append per interval. Segments flushed but not yet seen in a snapshot sit in
/// `in_flight` so their echo is not drawn twice.
#[derive(Debug, Default)]
pub struct StrokeLog {
    confirmed: Vec<StrokeSegment>,
    pending: Vec<StrokeSegment>,
    in_flight: VecDeque<StrokeSegment>,
    active: Option<ActiveStroke>,
}

impl StrokeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn confirmed(&self) -> &[StrokeSegment] {
        &self.confirmed
    }

    pub fn pending(&self) -> &[StrokeSegment] {
        &self.pending
    }

    pub fn is_drawing(&self) -> bool {
        self.active.is_some()
    }

    pub fn begin_stroke(&mut self, x: f32, y: f32, brush: Brush) {
        self.active = Some(ActiveStroke { x, y, brush });
    }

    /// Segment from the last point to `(x, y)`, already queued for the next flush
    pub fn extend_stroke(&mut self, x: f32, y: f32) -> Option<StrokeSegment> {
        let active = self.active.as_mut()?;
        let segment = StrokeSegment {
            x0: active.x,
            y0: active.y,
            x1: x,
            y1: y,
            color: active.brush.color.clone(),
            width: active.brush.width,
            erase: active.brush.erase,
        };
        active.x = x;
        active.y = y;
        self.pending.push(segment.clone());
        Some(segment)
    }

    pub fn end_stroke(&mut self) {
        self.active = None;
    }

    /// Everything drawn since the last flush as one append write
    pub fn take_batch(&mut self) -> Option<RoomPatch> {
        if self.pending.is_empty() {
            return None;
        }
        let batch = std::mem::take(&mut self.pending);
        self.in_flight.extend(batch.iter().cloned());
        Some(RoomPatch::append_strokes(batch))
    }

    /// Wipe the board for everyone
    pub fn clear(&mut self) -> RoomPatch {
        self.confirmed.clear();
        self.pending.clear();
        self.in_flight.clear();
        RoomPatch::clear_strokes()
    }

    /// Fold in the room's stroke sequence
    pub fn apply_remote(&mut self, remote: &[StrokeSegment]) -> StrokeReplay {
        if remote.is_empty() {
            if self.confirmed.is_empty() {
                return StrokeReplay::Unchanged;
            }
            // Someone cleared the board
            self.confirmed.clear();
            self.pending.clear();
            self.in_flight.clear();
            return StrokeReplay::Reset(Vec::new());
        }

        if remote.len() >= self.confirmed.len() && remote[..self.confirmed.len()] == self.confirmed[..] {
            let suffix = &remote[self.confirmed.len()..];
            if suffix.is_empty() {
                return StrokeReplay::Unchanged;
            }
            let mut fresh = Vec::new();
            for segment in suffix {
                if self.in_flight.front() == Some(segment) {
                    // Own echo, already on the canvas
                    self.in_flight.pop_front();
                } else {
                    fresh.push(segment.clone());
                }
            }
            self.confirmed.extend_from_slice(suffix);
            return if fresh.is_empty() {
                StrokeReplay::Unchanged
            } else {
                StrokeReplay::Append(fresh)
            };
        }

        // Shorter or diverging: rebuild from the remote log, keeping local ink
        self.confirmed = remote.to_vec();
        self.in_flight.retain(|segment| !remote.contains(segment));
        let mut redraw = self.confirmed.clone();
        redraw.extend(self.in_flight.iter().cloned());
        redraw.extend(self.pending.iter().cloned());
        StrokeReplay::Reset(redraw)
    }
}
