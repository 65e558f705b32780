use serde::{Deserialize, Serialize};

fn default_process_interval() -> u64 {
    300
}

/// Server-side processing settings (`GET`/`POST /settings`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub tts_provider: String,
    pub voice: String,
    pub neet_model: String,
    pub summarizer_model: String,
    pub rss_feeds: Vec<String>,
    pub auto_play: bool,
    #[serde(default = "default_process_interval")]
    pub process_interval: u64,
}

/// A voice offered by a TTS provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct Voice {
    pub id: String,
    pub name: String,
}

impl From<(String, String)> for Voice {
    fn from((id, name): (String, String)) -> Self {
        Self { id, name }
    }
}

impl From<Voice> for (String, String) {
    fn from(voice: Voice) -> Self {
        (voice.id, voice.name)
    }
}

/// Partial update applied on top of the current settings.
///
/// The backend answers with the settings it actually stored, which callers
/// must treat as authoritative instead of their local copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsPatch {
    pub tts_provider: Option<String>,
    pub voice: Option<String>,
    pub neet_model: Option<String>,
    pub summarizer_model: Option<String>,
    pub rss_feeds: Option<Vec<String>>,
    pub auto_play: Option<bool>,
    pub process_interval: Option<u64>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, base: &Settings) -> Settings {
        let mut next = base.clone();
        if let Some(v) = &self.tts_provider {
            next.tts_provider = v.clone();
        }
        if let Some(v) = &self.voice {
            next.voice = v.clone();
        }
        if let Some(v) = &self.neet_model {
            next.neet_model = v.clone();
        }
        if let Some(v) = &self.summarizer_model {
            next.summarizer_model = v.clone();
        }
        if let Some(v) = &self.rss_feeds {
            next.rss_feeds = v.clone();
        }
        if let Some(v) = self.auto_play {
            next.auto_play = v;
        }
        if let Some(v) = self.process_interval {
            next.process_interval = v;
        }
        next
    }
}
