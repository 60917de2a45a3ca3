use crate::api::LogPortion;
use crate::marker::Marker;
use chrono::{DateTime, Timelike, Utc};

/// Pick the marker the next live fetch starts from.
///
/// A reported marker other than `"0"` is a real offset and is trusted. A `"0"`
/// that came with data is a false end of segment: the previous marker is
/// advanced by the data length instead. A `"0"` with no data is only trusted
/// once `settle_minutes` have passed in the hour, because the upstream rotation
/// job runs in that window and reports premature ends of segment.
pub fn decide_next_marker(
    previous: &Marker,
    response: Option<&LogPortion>,
    now: DateTime<Utc>,
    settle_minutes: u32,
) -> Marker {
    let Some((response, reported)) = response.and_then(|r| r.marker.as_ref().map(|m| (r, m)))
    else {
        return previous.clone();
    };

    if !reported.is_end_of_segment() {
        return reported.clone();
    }

    let data = response.data();
    if !data.is_empty() {
        return match previous.add(data.len() as u64) {
            Ok(next) => next,
            Err(e) => {
                tracing::warn!(previous = %previous, error = %e, "Cannot advance marker, falling back to end of segment");
                Marker::end_of_segment()
            }
        };
    }

    if now.minute() > settle_minutes {
        reported.clone()
    } else {
        tracing::debug!(
            previous = %previous,
            minute = now.minute(),
            "Ignoring end-of-segment marker inside rotation window"
        );
        previous.clone()
    }
}
