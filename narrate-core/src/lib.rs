pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod playback;
pub mod poller;
pub mod service;
pub mod settings;
pub mod summary;
pub mod view;

pub use api::{ApiClient, SummarySource};
pub use cache::FetchCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ClientConfig;
pub use error::{AudioError, ConfigError, FetchError, PlaybackError, PollError};
pub use playback::{
    AudioOutput, PlaybackEvent, PlaybackScheduler, PlaybackSnapshot, PlaybackStatus,
};
pub use poller::{spawn_poller, PollConfig, PollerHandle};
pub use service::{SummaryService, ViewSubscriber};
pub use settings::{Settings, SettingsPatch, Voice};
pub use summary::{Article, ArticleCollection, PlaybackQueue, Summary, SummaryCollection};
pub use view::build_view;
