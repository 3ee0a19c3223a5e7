use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use quick_xml::escape::escape;

use crate::models::{Channel, GuideSet, Programme};

const GENERATOR_NAME: &str = concat!("hdhomerun-epg/", env!("CARGO_PKG_VERSION"));

/// Render a merged guide as XMLTV. Pure: no network or cache access.
/// Channel elements precede programme elements; timestamps are rendered in
/// the given timezone as `YYYYMMDDHHMMSS ±HHMM`.
pub fn render(guide: &GuideSet, tz: Tz) -> String {
    let mut out = String::with_capacity(4096 + guide.programmes.len() * 512);
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(&format!(
        "<tv source-info-name=\"HDHomeRun\" generator-info-name=\"{}\">\n",
        escape(GENERATOR_NAME)
    ));

    for channel in &guide.channels {
        write_channel(&mut out, channel);
    }
    for programme in &guide.programmes {
        write_programme(&mut out, programme, tz);
    }

    out.push_str("</tv>\n");
    out
}

fn write_channel(out: &mut String, channel: &Channel) {
    out.push_str(&format!("  <channel id=\"{}\">\n", escape(&channel.guide_number)));
    out.push_str(&format!(
        "    <display-name>{}</display-name>\n",
        escape(&channel.display_name)
    ));
    if let Some(ref icon) = channel.icon_url
        && !icon.is_empty()
    {
        out.push_str(&format!("    <icon src=\"{}\"/>\n", escape(icon)));
    }
    out.push_str("  </channel>\n");
}

fn write_programme(out: &mut String, programme: &Programme, tz: Tz) {
    let start = in_tz(programme.start_time, tz);
    let stop = in_tz(programme.end_time, tz);

    out.push_str(&format!(
        "  <programme start=\"{}\" stop=\"{}\" channel=\"{}\">\n",
        start.format("%Y%m%d%H%M%S %z"),
        stop.format("%Y%m%d%H%M%S %z"),
        escape(&programme.guide_number)
    ));

    out.push_str(&format!("    <title lang=\"en\">{}</title>\n", escape(&programme.title)));

    if let Some(ref episode_title) = programme.episode_title {
        out.push_str(&format!(
            "    <sub-title lang=\"en\">{}</sub-title>\n",
            escape(episode_title)
        ));
    }
    if let Some(ref synopsis) = programme.synopsis {
        out.push_str(&format!("    <desc lang=\"en\">{}</desc>\n", escape(synopsis)));
    }
    for category in &programme.categories {
        out.push_str(&format!("    <category lang=\"en\">{}</category>\n", escape(category)));
    }
    if let Some(ref icon) = programme.icon_url {
        out.push_str(&format!("    <icon src=\"{}\"/>\n", escape(icon)));
    }
    if let Some(ref episode_number) = programme.episode_number {
        out.push_str(&format!(
            "    <episode-num system=\"onscreen\">{}</episode-num>\n",
            escape(episode_number)
        ));
        if let Some((series, episode)) = parse_onscreen_episode(episode_number) {
            out.push_str(&format!(
                "    <episode-num system=\"xmltv_ns\">{series}.{episode}.0/0</episode-num>\n"
            ));
        }
    }

    write_airing_marker(out, programme, start, tz);

    out.push_str("  </programme>\n");
}

/// Emit the `new` / `previously-shown` marker.
///
/// With an original airdate: a different calendar day than the start day
/// means a rerun (with the air date); the same day means `new` only when the
/// programme is flagged first-run. Without an airdate the conservative
/// default is a bare `previously-shown` — never `new`.
fn write_airing_marker(out: &mut String, programme: &Programme, start: DateTime<Tz>, tz: Tz) {
    match programme.original_airdate {
        Some(airdate_ts) => {
            let airdate = in_tz(airdate_ts, tz);
            if airdate.date_naive() != start.date_naive() {
                out.push_str(&format!(
                    "    <previously-shown start=\"{}\"/>\n",
                    airdate.format("%Y%m%d%H%M%S")
                ));
            } else if programme.first_run {
                out.push_str("    <new/>\n");
            } else {
                out.push_str("    <previously-shown/>\n");
            }
        }
        None => {
            out.push_str("    <previously-shown/>\n");
        }
    }
}

/// Parse an onscreen `SxxExx` episode string into zero-based xmltv_ns parts.
fn parse_onscreen_episode(episode_number: &str) -> Option<(u32, u32)> {
    let rest = episode_number.strip_prefix('S')?;
    let (series_str, episode_str) = rest.split_once('E')?;
    let series: u32 = series_str.parse().ok()?;
    let episode: u32 = episode_str.parse().ok()?;
    Some((series.checked_sub(1)?, episode.checked_sub(1)?))
}

fn in_tz(epoch: i64, tz: Tz) -> DateTime<Tz> {
    Utc.timestamp_opt(epoch, 0)
        .single()
        .unwrap_or_else(Utc::now)
        .with_timezone(&tz)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn programme(title: &str, start: i64) -> Programme {
        Programme {
            guide_number: "1.1".to_string(),
            start_time: start,
            end_time: start + 3600,
            title: title.to_string(),
            episode_title: None,
            synopsis: None,
            categories: Vec::new(),
            icon_url: None,
            episode_number: None,
            original_airdate: None,
            first_run: false,
        }
    }

    fn guide_with(programmes: Vec<Programme>) -> GuideSet {
        GuideSet {
            channels: vec![Channel {
                guide_number: "1.1".to_string(),
                display_name: "Channel One".to_string(),
                icon_url: Some("http://img/1.png".to_string()),
            }],
            programmes,
            windows_expected: 1,
            windows_merged: 1,
        }
    }

    #[test]
    fn renders_channel_and_programme_shape() {
        let mut p = programme("News & Views", 1_700_000_000);
        p.episode_title = Some("Morning Update".to_string());
        p.synopsis = Some("News synopsis".to_string());
        p.categories = vec!["News".to_string(), "Local".to_string()];
        p.icon_url = Some("http://img/prog.png".to_string());

        let xml = render(&guide_with(vec![p]), chrono_tz::UTC);

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("source-info-name=\"HDHomeRun\""));
        assert!(xml.contains("<channel id=\"1.1\">"));
        assert!(xml.contains("<display-name>Channel One</display-name>"));
        assert!(xml.contains("<icon src=\"http://img/1.png\"/>"));
        assert!(xml.contains("channel=\"1.1\""));
        assert!(xml.contains("start=\"20231114221320 +0000\""));
        assert!(xml.contains("stop=\"20231114231320 +0000\""));
        // Title is escaped
        assert!(xml.contains("<title lang=\"en\">News &amp; Views</title>"));
        assert!(xml.contains("<sub-title lang=\"en\">Morning Update</sub-title>"));
        assert!(xml.contains("<desc lang=\"en\">News synopsis</desc>"));
        assert!(xml.contains("<category lang=\"en\">News</category>"));
        assert!(xml.contains("<category lang=\"en\">Local</category>"));
        assert!(xml.contains("<icon src=\"http://img/prog.png\"/>"));
        // Channels precede programmes
        assert!(xml.find("<channel").unwrap() < xml.find("<programme").unwrap());
        assert!(xml.trim_end().ends_with("</tv>"));
    }

    #[test]
    fn first_run_same_day_airdate_is_new() {
        let mut p = programme("Premiere", 1_700_000_000);
        p.original_airdate = Some(1_700_000_000);
        p.first_run = true;

        let xml = render(&guide_with(vec![p]), chrono_tz::UTC);
        assert!(xml.contains("<new/>"));
        assert!(!xml.contains("previously-shown"));
    }

    #[test]
    fn old_airdate_is_previously_shown_with_date() {
        let mut p = programme("Rerun", 1_700_000_000);
        p.original_airdate = Some(1_700_000_000 - 100 * 86400);
        p.first_run = true;

        let xml = render(&guide_with(vec![p]), chrono_tz::UTC);
        assert!(xml.contains("<previously-shown start=\"20230806221320\"/>"));
        assert!(!xml.contains("<new/>"));
    }

    #[test]
    fn same_day_not_first_run_is_bare_previously_shown() {
        let mut p = programme("Repeat", 1_700_000_000);
        p.original_airdate = Some(1_700_000_000 - 600);
        p.first_run = false;

        let xml = render(&guide_with(vec![p]), chrono_tz::UTC);
        assert!(xml.contains("<previously-shown/>"));
        assert!(!xml.contains("<new/>"));
    }

    #[test]
    fn missing_airdate_is_never_new() {
        let mut p = programme("Unknown Origin", 1_700_000_000);
        p.first_run = true; // even flagged first-run

        let xml = render(&guide_with(vec![p]), chrono_tz::UTC);
        assert!(xml.contains("<previously-shown/>"));
        assert!(!xml.contains("<new/>"));
    }

    #[test]
    fn episode_numbers_emit_both_systems() {
        let mut p = programme("Serial", 1_700_000_000);
        p.episode_number = Some("S03E07".to_string());

        let xml = render(&guide_with(vec![p]), chrono_tz::UTC);
        assert!(xml.contains("<episode-num system=\"onscreen\">S03E07</episode-num>"));
        assert!(xml.contains("<episode-num system=\"xmltv_ns\">2.6.0/0</episode-num>"));
    }

    #[test]
    fn unparseable_episode_number_keeps_onscreen_only() {
        let mut p = programme("Oddball", 1_700_000_000);
        p.episode_number = Some("Episode 42".to_string());

        let xml = render(&guide_with(vec![p]), chrono_tz::UTC);
        assert!(xml.contains("<episode-num system=\"onscreen\">Episode 42</episode-num>"));
        assert!(!xml.contains("xmltv_ns"));
    }

    #[test]
    fn timestamps_follow_configured_timezone() {
        let p = programme("Tz Check", 1_700_000_000);
        let xml = render(&guide_with(vec![p]), chrono_tz::America::New_York);
        // 2023-11-14T22:13:20Z is 17:13:20 EST (-0500)
        assert!(xml.contains("start=\"20231114171320 -0500\""));
    }

    #[test]
    fn parses_onscreen_episode_forms() {
        assert_eq!(parse_onscreen_episode("S01E01"), Some((0, 0)));
        assert_eq!(parse_onscreen_episode("S10E20"), Some((9, 19)));
        assert_eq!(parse_onscreen_episode("S00E01"), None); // zero season can't go zero-based
        assert_eq!(parse_onscreen_episode("10x20"), None);
        assert_eq!(parse_onscreen_episode(""), None);
    }
}
