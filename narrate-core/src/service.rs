use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate};
use tracing::{debug, info};

use crate::api::SummarySource;
use crate::cache::FetchCache;
use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::error::FetchError;
use crate::poller::{spawn_poller, PollConfig, PollerHandle};
use crate::settings::Voice;
use crate::summary::{PlaybackQueue, SummaryCollection};
use crate::view::build_view;

pub const SUMMARIES_KEY: &str = "summaries";

pub fn voices_key(provider: &str) -> String {
    format!("voices/{provider}")
}

/// Cached, deduplicated access to the remote summaries and the date views
/// built from them. Cheap to clone; clones share caches.
#[derive(Clone)]
pub struct SummaryService {
    source: Arc<dyn SummarySource>,
    summaries: FetchCache<SummaryCollection>,
    voices: FetchCache<Vec<Voice>>,
    poll: PollConfig,
    offset: FixedOffset,
}

impl SummaryService {
    pub fn new(source: Arc<dyn SummarySource>, config: &ClientConfig) -> Self {
        Self::with_clock(source, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        source: Arc<dyn SummarySource>,
        config: &ClientConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            summaries: FetchCache::from_config(&config.cache, Arc::clone(&clock)),
            voices: FetchCache::from_config(&config.cache, clock),
            poll: PollConfig::from(&config.polling),
            offset: config.view.offset(),
        }
    }

    pub async fn summaries(&self) -> Result<SummaryCollection, FetchError> {
        let source = Arc::clone(&self.source);
        self.summaries
            .get(SUMMARIES_KEY, move || async move { source.fetch_summaries().await })
            .await
    }

    pub async fn voices(&self, provider: &str) -> Result<Vec<Voice>, FetchError> {
        let source = Arc::clone(&self.source);
        let owned = provider.to_owned();
        self.voices
            .get(&voices_key(provider), move || async move {
                source.fetch_voices(&owned).await
            })
            .await
    }

    /// Summaries published on `date`, newest first.
    pub async fn current_view(&self, date: NaiveDate) -> Result<PlaybackQueue, FetchError> {
        let collection = self.summaries().await?;
        Ok(build_view(&collection, date, &self.offset))
    }

    /// Polls the summaries and hands the view for `date` to `on_view` after
    /// every successful read, until the returned handle is cancelled.
    pub fn subscribe<F>(&self, date: NaiveDate, mut on_view: F) -> PollerHandle
    where
        F: FnMut(PlaybackQueue) + Send + 'static,
    {
        let service = self.clone();
        let offset = self.offset;
        info!(%date, interval_ms = self.poll.interval.as_millis() as u64, "subscribing to summaries");
        spawn_poller(
            move || {
                let service = service.clone();
                async move { service.summaries().await }
            },
            move |collection| on_view(build_view(&collection, date, &offset)),
            self.poll,
        )
    }
}

/// One logical subscriber following a selected date.
///
/// Switching the date cancels the previous subscription before the new one
/// starts, so two pollers never feed the same subscriber.
pub struct ViewSubscriber {
    service: SummaryService,
    on_view: Arc<dyn Fn(NaiveDate, PlaybackQueue) + Send + Sync>,
    active: Option<(NaiveDate, PollerHandle)>,
}

impl ViewSubscriber {
    pub fn new<F>(service: SummaryService, on_view: F) -> Self
    where
        F: Fn(NaiveDate, PlaybackQueue) + Send + Sync + 'static,
    {
        Self {
            service,
            on_view: Arc::new(on_view),
            active: None,
        }
    }

    pub fn selected_date(&self) -> Option<NaiveDate> {
        self.active.as_ref().map(|(date, _)| *date)
    }

    pub fn select_date(&mut self, date: NaiveDate) {
        if let Some((current, handle)) = &self.active {
            if *current == date && handle.is_active() {
                return;
            }
        }
        self.unsubscribe();
        let on_view = Arc::clone(&self.on_view);
        let handle = self
            .service
            .subscribe(date, move |queue| on_view(date, queue));
        self.active = Some((date, handle));
    }

    pub fn unsubscribe(&mut self) {
        if let Some((date, handle)) = self.active.take() {
            handle.cancel();
            debug!(%date, "view subscription cancelled");
        }
    }
}

impl Drop for ViewSubscriber {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
