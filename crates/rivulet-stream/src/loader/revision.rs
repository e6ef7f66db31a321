use crate::types::SegmentRequest;

/// Bytes that shared the link with `completed` while it was transferring.
///
/// Adds to the completed size the share of `previous` delivered during the
/// overlap of the two transfers (pro-rated over the previous transfer time),
/// plus whatever `next` has received so far.
pub(crate) fn revised_bytes(
    completed: &SegmentRequest,
    previous: Option<&SegmentRequest>,
    next: Option<&SegmentRequest>,
) -> u64 {
    let mut bytes = completed.bytes_loaded;

    if let (Some(prev), Some(start)) = (previous, completed.timing.started) {
        if let (Some(prev_start), Some(prev_finish)) = (prev.timing.started, prev.timing.finished) {
            let total = prev_finish.saturating_duration_since(prev_start).as_secs_f64();
            let overlap = prev_finish
                .saturating_duration_since(start.max(prev_start))
                .as_secs_f64();
            if total > 0.0 && overlap > 0.0 {
                #[expect(
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss,
                    clippy::cast_precision_loss,
                    reason = "pro-rated byte count is non-negative and below prev.bytes_loaded"
                )]
                let share = (prev.bytes_loaded as f64 * (overlap / total)).round() as u64;
                bytes += share;
            }
        }
    }

    if let Some(next) = next {
        bytes += next.bytes_loaded;
    }
    bytes
}
