use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use crate::{
    error::IndexError,
    types::{FragmentBox, RequestId},
};

/// Bytes of one fragment, or of one piece of a subdivided fragment, waiting
/// to be appended to the media sink.
#[derive(Clone, Debug, PartialEq)]
pub struct AppendChunk {
    pub request_id: RequestId,
    pub quality: usize,
    pub start: f64,
    pub duration: f64,
    /// Received byte spans, contiguous in presentation time.
    pub spans: Vec<Bytes>,
    /// Position of this piece within its fragment.
    pub subdivision: u32,
    /// No further spans will be added.
    pub complete: bool,
}

impl AppendChunk {
    pub fn new(request_id: RequestId, quality: usize, start: f64) -> Self {
        Self {
            request_id,
            quality,
            start,
            duration: 0.0,
            spans: Vec::new(),
            subdivision: 0,
            complete: false,
        }
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    pub fn byte_len(&self) -> usize {
        self.spans.iter().map(Bytes::len).sum()
    }

    /// All spans as one contiguous buffer.
    pub fn concat(&self) -> Bytes {
        match self.spans.as_slice() {
            [] => Bytes::new(),
            [single] => single.clone(),
            spans => {
                let mut out = BytesMut::with_capacity(self.byte_len());
                for span in spans {
                    out.extend_from_slice(span);
                }
                out.freeze()
            }
        }
    }
}

/// Split a fully received fragment into appendable pieces.
///
/// Consecutive boxes are grouped until adding the next one would exceed
/// `threshold` seconds. Without box information the whole body becomes one
/// piece spanning `[start, start + duration)`.
pub fn split_fragment(
    request_id: RequestId,
    quality: usize,
    body: &Bytes,
    boxes: &[FragmentBox],
    start: f64,
    duration: f64,
    threshold: f64,
) -> Vec<AppendChunk> {
    let usable: Vec<&FragmentBox> = boxes.iter().filter(|b| b.end() <= body.len()).collect();
    if usable.is_empty() {
        return vec![AppendChunk {
            duration,
            spans: vec![body.clone()],
            complete: true,
            ..AppendChunk::new(request_id, quality, start)
        }];
    }

    let mut pieces: Vec<AppendChunk> = Vec::new();
    let mut current: Option<AppendChunk> = None;
    for fragment_box in usable {
        if let Some(chunk) = current.take_if(|c| {
            threshold > 0.0 && c.duration > 0.0 && c.duration + fragment_box.duration > threshold
        }) {
            pieces.push(chunk);
        }
        let chunk = current.get_or_insert_with(|| AppendChunk {
            subdivision: u32::try_from(pieces.len()).unwrap_or(u32::MAX),
            complete: true,
            ..AppendChunk::new(request_id, quality, fragment_box.time)
        });
        chunk.duration += fragment_box.duration;
        chunk
            .spans
            .push(body.slice(fragment_box.offset..fragment_box.end()));
    }
    pieces.extend(current);
    pieces
}

/// Accumulates progressively received bytes and releases whole boxes.
#[derive(Debug)]
pub struct ProgressiveAssembler {
    buffer: BytesMut,
    emitted: bool,
}

impl Default for ProgressiveAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressiveAssembler {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            emitted: false,
        }
    }

    /// Add received bytes; returns every box that is now complete.
    ///
    /// # Errors
    ///
    /// Propagates parser failures.
    pub fn push<P>(&mut self, chunk: &[u8], parse: P) -> Result<Vec<(FragmentBox, Bytes)>, IndexError>
    where
        P: FnOnce(&[u8]) -> Result<Vec<FragmentBox>, IndexError>,
    {
        self.buffer.extend_from_slice(chunk);
        let len = self.buffer.len();
        let ready: Vec<FragmentBox> = parse(&self.buffer)?
            .into_iter()
            .filter(|b| b.end() <= len)
            .collect();
        let Some(consumed) = ready.iter().map(FragmentBox::end).max() else {
            return Ok(Vec::new());
        };
        let data = self.buffer.split_to(consumed).freeze();
        self.emitted = true;
        Ok(ready
            .into_iter()
            .map(|b| {
                let bytes = data.slice(b.offset..b.end());
                (b, bytes)
            })
            .collect())
    }

    /// Bytes left over at the end of the transfer.
    ///
    /// Returns the whole body when the parser never recognised a box, so the
    /// fragment can still be appended in one piece.
    pub fn finish(self) -> Option<Bytes> {
        if self.emitted || self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer.freeze())
        }
    }
}

/// Append queue of one buffer controller, ordered by start time.
#[derive(Debug, Default)]
pub struct AppendQueue {
    entries: VecDeque<AppendChunk>,
}

impl AppendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn head(&self) -> Option<&AppendChunk> {
        self.entries.front()
    }

    pub fn pop_head(&mut self) -> Option<AppendChunk> {
        self.entries.pop_front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AppendChunk> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Insert keeping start-time order; equal starts keep arrival order.
    pub fn push(&mut self, chunk: AppendChunk) {
        let at = self.entries.partition_point(|c| c.start <= chunk.start);
        self.entries.insert(at, chunk);
    }

    /// Add one progressively received box to the open piece of `request_id`.
    ///
    /// The open piece is closed and a new subdivision started once it would
    /// grow past `threshold` seconds.
    pub fn push_span(
        &mut self,
        request_id: RequestId,
        quality: usize,
        fragment_box: &FragmentBox,
        span: Bytes,
        threshold: f64,
    ) {
        let next_subdivision = self
            .entries
            .iter()
            .filter(|c| c.request_id == request_id)
            .map(|c| c.subdivision + 1)
            .max()
            .unwrap_or(0);
        if let Some(open) = self
            .entries
            .iter_mut()
            .find(|c| c.request_id == request_id && !c.complete)
        {
            let fits = threshold <= 0.0
                || open.duration <= 0.0
                || open.duration + fragment_box.duration <= threshold;
            if fits {
                open.duration += fragment_box.duration;
                open.spans.push(span);
                return;
            }
            open.complete = true;
        }
        self.push(AppendChunk {
            duration: fragment_box.duration,
            spans: vec![span],
            subdivision: next_subdivision,
            ..AppendChunk::new(request_id, quality, fragment_box.time)
        });
    }

    /// Close every piece of `request_id`.
    pub fn finish_request(&mut self, request_id: RequestId) {
        for chunk in self.entries.iter_mut().filter(|c| c.request_id == request_id) {
            chunk.complete = true;
        }
    }

    /// Drop every piece of `request_id`.
    pub fn remove_request(&mut self, request_id: RequestId) {
        self.entries.retain(|c| c.request_id != request_id);
    }

    /// Whether media starting at `start` is already queued.
    pub fn contains(&self, start: f64, quality: usize, tolerance: f64) -> bool {
        self.entries.iter().any(|c| {
            let delta = (c.start - start).abs();
            (c.quality == quality && delta < f64::EPSILON) || delta < tolerance
        })
    }

    /// End time of the last queued piece.
    pub fn queued_end(&self) -> Option<f64> {
        self.entries.iter().map(AppendChunk::end).reduce(f64::max)
    }
}
