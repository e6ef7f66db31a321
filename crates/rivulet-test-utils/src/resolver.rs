//! Fixed-duration fragment index.

use bytes::{BufMut, Bytes, BytesMut};
use rivulet_core::MediaType;
use rivulet_stream::{FragmentBox, IndexError, IndexResolver, Representation, SegmentRequest};
use url::Url;

/// Box header: size including the header, start and duration in milliseconds,
/// all big-endian `u32`.
const BOX_HEADER: usize = 12;

/// [`IndexResolver`] for a template of equally long fragments at
/// `{representation id}/{index}.m4s`, with the init segment at
/// `{representation id}/init.mp4`.
#[derive(Clone, Debug)]
pub struct FakeResolver {
    media: MediaType,
    fragment_duration: f64,
    fragment_count: Option<u64>,
    earliest_index: u64,
    live_edge_index: Option<u64>,
    boxes: Option<(usize, usize)>,
}

impl FakeResolver {
    pub fn new(media: MediaType, fragment_duration: f64) -> Self {
        Self {
            media,
            fragment_duration,
            fragment_count: None,
            earliest_index: 0,
            live_edge_index: None,
            boxes: None,
        }
    }

    /// Bounded presentation: index `count` resolves to the end-of-stream sentinel.
    #[must_use]
    pub fn with_fragment_count(mut self, count: u64) -> Self {
        self.fragment_count = Some(count);
        self
    }

    /// Fragments before `index` have left the availability window.
    #[must_use]
    pub fn with_earliest_index(mut self, index: u64) -> Self {
        self.earliest_index = index;
        self
    }

    /// Fragments after `index` are not produced yet.
    #[must_use]
    pub fn with_live_edge_index(mut self, index: u64) -> Self {
        self.live_edge_index = Some(index);
        self
    }

    /// Fragments are made of `per_fragment` boxes of `box_size` bytes that
    /// [`IndexResolver::parse_fragment`] understands. Bodies come from
    /// [`fragment_body`](Self::fragment_body).
    #[must_use]
    pub fn with_boxes(mut self, per_fragment: usize, box_size: usize) -> Self {
        self.boxes = Some((per_fragment.max(1), box_size.max(BOX_HEADER)));
        self
    }

    /// Body of the media fragment addressed by `url`, `None` for anything
    /// else or without [`with_boxes`](Self::with_boxes).
    pub fn fragment_body(&self, url: &Url) -> Option<Bytes> {
        let (per_fragment, box_size) = self.boxes?;
        let index: u64 = url
            .path_segments()?
            .next_back()?
            .strip_suffix(".m4s")?
            .parse()
            .ok()?;
        let box_ms = (self.fragment_duration * 1000.0 / per_fragment as f64).round() as u32;
        let start_ms = (self.fragment_start(index) * 1000.0).round() as u32;
        let mut body = BytesMut::with_capacity(per_fragment * box_size);
        for i in 0..per_fragment {
            body.put_u32(box_size as u32);
            body.put_u32(start_ms + i as u32 * box_ms);
            body.put_u32(box_ms);
            body.put_bytes(0, box_size - BOX_HEADER);
        }
        Some(body.freeze())
    }

    pub fn fragment_start(&self, index: u64) -> f64 {
        index as f64 * self.fragment_duration
    }

    fn index_at(&self, time: f64) -> u64 {
        (time.max(0.0) / self.fragment_duration + 1e-9).floor() as u64
    }

    fn request_at(&self, representation: &Representation, index: u64) -> Result<SegmentRequest, IndexError> {
        let start = self.fragment_start(index);
        if self.fragment_count.is_some_and(|count| index >= count) {
            return Ok(SegmentRequest::complete(representation, self.media, index, start));
        }
        if index < self.earliest_index {
            return Err(IndexError::BeforeAvailable {
                earliest: self.fragment_start(self.earliest_index),
            });
        }
        if self.live_edge_index.is_some_and(|edge| index > edge) {
            return Err(IndexError::NotAvailable { time: start });
        }
        Ok(SegmentRequest::media(
            representation,
            self.media,
            index,
            start,
            self.fragment_duration,
            format!("{}/{index}.m4s", representation.id),
        ))
    }
}

impl IndexResolver for FakeResolver {
    fn init_request(&self, representation: &Representation) -> Result<SegmentRequest, IndexError> {
        Ok(SegmentRequest::init(
            representation,
            self.media,
            format!("{}/init.mp4", representation.id),
        ))
    }

    fn request_for_time(
        &self,
        representation: &Representation,
        time: f64,
    ) -> Result<SegmentRequest, IndexError> {
        self.request_at(representation, self.index_at(time))
    }

    fn next_request(
        &self,
        representation: &Representation,
        previous: &SegmentRequest,
    ) -> Result<SegmentRequest, IndexError> {
        self.request_at(representation, previous.index + 1)
    }

    fn segment_count_for_duration(&self, _: &Representation, wanted: f64, _: f64) -> usize {
        if wanted <= 0.0 {
            0
        } else {
            (wanted / self.fragment_duration).ceil() as usize
        }
    }

    /// Boxes whose header is available; the last one may be truncated.
    fn parse_fragment(&self, bytes: &[u8], _: u32) -> Result<Vec<FragmentBox>, IndexError> {
        if self.boxes.is_none() {
            return Ok(Vec::new());
        }
        let field = |at: usize| u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let mut found = Vec::new();
        let mut offset = 0;
        while offset + BOX_HEADER <= bytes.len() {
            let size = field(offset) as usize;
            if size < BOX_HEADER {
                return Err(IndexError::Malformed(format!("box of {size} bytes at {offset}")));
            }
            found.push(FragmentBox {
                offset,
                size,
                time: f64::from(field(offset + 4)) / 1000.0,
                duration: f64::from(field(offset + 8)) / 1000.0,
            });
            offset += size;
        }
        Ok(found)
    }
}
