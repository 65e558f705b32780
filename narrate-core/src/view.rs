use chrono::{FixedOffset, NaiveDate};

use crate::summary::{PlaybackQueue, Summary, SummaryCollection};

/// Calendar day of a summary in the reference offset, if it has a date.
pub fn publish_day(summary: &Summary, offset: &FixedOffset) -> Option<NaiveDate> {
    summary
        .article
        .publish_date
        .map(|published| published.with_timezone(offset).date_naive())
}

/// Summaries published on `date`, newest first.
///
/// Equal timestamps keep the collection's iteration order. Summaries without
/// a publish date never match.
pub fn build_view(
    collection: &SummaryCollection,
    date: NaiveDate,
    offset: &FixedOffset,
) -> PlaybackQueue {
    let mut queue: PlaybackQueue = collection
        .values()
        .filter(|summary| publish_day(summary, offset) == Some(date))
        .cloned()
        .collect();
    // sort_by is stable
    queue.sort_by(|a, b| b.article.publish_date.cmp(&a.article.publish_date));
    queue
}
