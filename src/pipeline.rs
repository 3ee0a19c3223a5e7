use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::cache;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::models::{Channel, GuideSet, Programme};

/// Truncate a timestamp down to the nearest multiple of the window size.
/// Alignment keeps cache keys stable across requests issued at different
/// times inside the same bucket — without it, two requests minutes apart
/// would never share a cache row.
pub fn align_to_grid(timestamp: i64, hours: u32) -> i64 {
    let window = i64::from(hours) * 3600;
    timestamp - timestamp.rem_euclid(window)
}

/// Assemble the merged guide for `days` days at `hours`-hour window
/// granularity. Pass `pool` as `None` to bypass the cache entirely.
///
/// Discovery and lineup failures propagate; a window fetch failure stops the
/// iteration early and returns whatever merged so far (check
/// `GuideSet::is_complete` for the all-or-nothing view).
pub async fn assemble_guide(
    gateway: &mut Gateway,
    pool: Option<&SqlitePool>,
    days: u32,
    hours: u32,
    ttl: Duration,
) -> Result<GuideSet, GatewayError> {
    assemble_guide_from(gateway, pool, Utc::now().timestamp(), days, hours, ttl).await
}

/// Window iteration anchored at an explicit wall-clock instant.
pub async fn assemble_guide_from(
    gateway: &mut Gateway,
    pool: Option<&SqlitePool>,
    now: i64,
    days: u32,
    hours: u32,
    ttl: Duration,
) -> Result<GuideSet, GatewayError> {
    gateway.ensure_authenticated().await?;
    let lineup = gateway.list_channels().await?;

    // Tuned channels by guide number; anything else in the guide is noise.
    let tuned: HashMap<&str, &crate::models::LineupEntry> =
        lineup.iter().map(|entry| (entry.guide_number.as_str(), entry)).collect();

    let window_secs = i64::from(hours) * 3600;
    let aligned_start = align_to_grid(now, hours);
    let stop = aligned_start + i64::from(days) * 86400;

    let mut result = GuideSet::default();
    let mut cursor = aligned_start;
    while cursor < stop {
        result.windows_expected += 1;
        cursor += window_secs;
    }

    info!(
        start = aligned_start,
        windows = result.windows_expected,
        window_hours = hours,
        "assembling guide"
    );

    let mut seen_channels: HashSet<String> = HashSet::new();
    let mut seen_programmes: HashSet<(String, i64, String)> = HashSet::new();

    let mut cursor = aligned_start;
    while cursor < stop {
        let window_end = cursor + window_secs;

        let cached = match pool {
            Some(pool) => cache::get_chunk(pool, cursor, ttl).await,
            None => None,
        };

        let records = match cached {
            Some(records) => records,
            None => {
                debug!(start = cursor, "cache miss or disabled, fetching window from API");
                match gateway.fetch_window(cursor).await {
                    Ok(fetched) => {
                        if let Some(pool) = pool {
                            cache::save_chunk(pool, cursor, window_end, &fetched).await;
                        }
                        fetched
                    }
                    Err(e) => {
                        // Best-effort contract: keep what merged so far instead
                        // of failing the whole request over one window.
                        warn!(
                            start = cursor,
                            merged = result.windows_merged,
                            expected = result.windows_expected,
                            error = %e,
                            "window fetch failed, returning partial guide"
                        );
                        return Ok(result);
                    }
                }
            }
        };

        for record in records {
            let Some(lineup_entry) = tuned.get(record.guide_number.as_str()) else {
                debug!(channel = %record.guide_number, "skipping untuned channel");
                continue;
            };

            if seen_channels.insert(record.guide_number.clone()) {
                let display_name = lineup_entry
                    .guide_name
                    .clone()
                    .unwrap_or_else(|| record.guide_number.clone());
                result.channels.push(Channel {
                    guide_number: record.guide_number.clone(),
                    display_name,
                    icon_url: record.image_url.clone(),
                });
            }

            for entry in record.guide {
                let key = (record.guide_number.clone(), entry.start_time, entry.title.clone());
                if seen_programmes.contains(&key) {
                    continue;
                }
                if let Some(programme) = Programme::from_record(&record.guide_number, entry) {
                    seen_programmes.insert(key);
                    result.programmes.push(programme);
                }
            }
        }

        result.windows_merged += 1;
        cursor = window_end;
    }

    info!(
        channels = result.channels.len(),
        programmes = result.programmes.len(),
        windows = result.windows_merged,
        "guide assembled"
    );
    Ok(result)
}
