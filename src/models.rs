use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::warn;

// ── Wire formats ───────────────────────────────────────────────────────

/// One entry from the tuner's `/lineup.json` response.
#[derive(Debug, Clone, Deserialize)]
pub struct LineupEntry {
    #[serde(rename = "GuideNumber")]
    pub guide_number: String,
    #[serde(rename = "GuideName")]
    pub guide_name: Option<String>,
}

/// Per-channel record from the cloud guide API, one per channel per window.
/// This is also the cache payload shape (a window is `Vec<GuideChannelRecord>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuideChannelRecord {
    #[serde(rename = "GuideNumber")]
    pub guide_number: String,
    #[serde(rename = "ImageURL", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(rename = "Guide", default)]
    pub guide: Vec<GuideProgrammeRecord>,
}

/// Raw programme entry inside a guide record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuideProgrammeRecord {
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "StartTime")]
    pub start_time: i64,
    #[serde(rename = "EndTime")]
    pub end_time: i64,
    #[serde(rename = "EpisodeTitle", skip_serializing_if = "Option::is_none")]
    pub episode_title: Option<String>,
    #[serde(rename = "Synopsis", skip_serializing_if = "Option::is_none")]
    pub synopsis: Option<String>,
    #[serde(rename = "Filter", default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(rename = "ImageURL", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(rename = "EpisodeNumber", skip_serializing_if = "Option::is_none")]
    pub episode_number: Option<String>,
    #[serde(rename = "OriginalAirdate", skip_serializing_if = "Option::is_none")]
    pub original_airdate: Option<i64>,
    #[serde(rename = "First", skip_serializing_if = "Option::is_none")]
    pub first: Option<bool>,
}

// ── Domain records ─────────────────────────────────────────────────────

/// A tuned channel as it appears in the merged guide. Created once per fetch
/// from the lineup, icon enriched from the first guide window mentioning it.
#[derive(Debug, Clone)]
pub struct Channel {
    pub guide_number: String,
    pub display_name: String,
    pub icon_url: Option<String>,
}

/// A merged programme, tagged with the guide number of its channel.
/// Invariant: `end_time > start_time` (enforced at the adapt step).
#[derive(Debug, Clone)]
pub struct Programme {
    pub guide_number: String,
    pub start_time: i64,
    pub end_time: i64,
    pub title: String,
    pub episode_title: Option<String>,
    pub synopsis: Option<String>,
    pub categories: Vec<String>,
    pub icon_url: Option<String>,
    pub episode_number: Option<String>,
    pub original_airdate: Option<i64>,
    pub first_run: bool,
}

impl Programme {
    /// Adapt a raw guide entry into a typed programme. Returns `None` when the
    /// record violates `end_time > start_time`.
    pub fn from_record(guide_number: &str, rec: GuideProgrammeRecord) -> Option<Self> {
        if rec.end_time <= rec.start_time {
            warn!(
                channel = %guide_number,
                title = %rec.title,
                start = rec.start_time,
                end = rec.end_time,
                "skipping programme with non-positive duration"
            );
            return None;
        }
        Some(Self {
            guide_number: guide_number.to_string(),
            start_time: rec.start_time,
            end_time: rec.end_time,
            title: rec.title,
            episode_title: rec.episode_title,
            synopsis: rec.synopsis,
            categories: rec.categories,
            icon_url: rec.image_url,
            episode_number: rec.episode_number,
            original_airdate: rec.original_airdate,
            first_run: rec.first.unwrap_or(false),
        })
    }
}

/// The merged output of one guide assembly: tuned channels actually seen in
/// the guide plus deduplicated programmes. `windows_merged` may be less than
/// `windows_expected` when an upstream failure cut the iteration short.
#[derive(Debug, Default)]
pub struct GuideSet {
    pub channels: Vec<Channel>,
    pub programmes: Vec<Programme>,
    pub windows_expected: u32,
    pub windows_merged: u32,
}

impl GuideSet {
    pub fn is_complete(&self) -> bool {
        self.windows_merged == self.windows_expected
    }
}

/// One row of cache status, ascending by `start_time`.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ChunkStatus {
    pub start_time: i64,
    pub end_time: i64,
    pub size_bytes: i64,
    pub fetched_at: i64,
}
