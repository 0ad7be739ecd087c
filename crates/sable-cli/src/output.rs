//! Output formatting for CLI

use sable_core::events::{MetadataEvent, PlaybackEvent, PlayerEvent};
use sable_core::types::Quality;
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }
}

/// One event line: text with the playhead, or a JSON object
pub fn event_line(event: &PlayerEvent, position: f64, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            let mut value = event.to_json();
            value["position"] = serde_json::json!(position);
            value.to_string()
        }
        OutputFormat::Text => {
            let detail = describe(event);
            if detail.is_empty() {
                format!("[{position:>8.2}] {}", event.name().as_str())
            } else {
                format!("[{position:>8.2}] {:<22} {detail}", event.name().as_str())
            }
        }
    }
}

fn describe(event: &PlayerEvent) -> String {
    match event {
        PlayerEvent::State(_) => String::new(),
        PlayerEvent::Playback(event) => match event {
            PlaybackEvent::QualityChanged(q) => q.label(),
            PlaybackEvent::DurationChanged(d) if d.is_infinite() => "live".to_string(),
            PlaybackEvent::DurationChanged(d) => format!("{d:.2}s"),
            PlaybackEvent::VolumeChanged(v) => format!("{v:.2}"),
            PlaybackEvent::MutedChanged(m) => m.to_string(),
            PlaybackEvent::PlaybackRateChanged(r) => format!("{r}x"),
            PlaybackEvent::Error(e) => format!("{} ({}) {}", e.error_type.as_str(), e.source, e.message),
            PlaybackEvent::TimeUpdate(t) | PlaybackEvent::SeekCompleted(t) => format!("{t:.2}"),
            PlaybackEvent::TextCue(c) => format!("{:.2}-{:.2} {:?}", c.start_time, c.end_time, c.text),
            PlaybackEvent::TextMetadataCue(c) => format!("{} {:?}", c.description, c.text),
            _ => String::new(),
        },
        PlayerEvent::Metadata(MetadataEvent::Id3(cue)) => cue
            .frames
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

#[derive(Tabled)]
struct LadderRow {
    #[tabled(rename = "")]
    marker: &'static str,
    #[tabled(rename = "Quality")]
    name: String,
    #[tabled(rename = "Bitrate")]
    bitrate: String,
    #[tabled(rename = "Resolution")]
    resolution: String,
    #[tabled(rename = "Codecs")]
    codecs: String,
}

/// Quality ladder with the active quality marked
pub fn ladder_table(qualities: &[Quality], active: Option<&Quality>) -> String {
    let rows = qualities.iter().map(|q| LadderRow {
        marker: if Some(q) == active { "*" } else { "" },
        name: q.name.clone(),
        bitrate: format!("{:.0} kbps", q.bitrate as f64 / 1000.0),
        resolution: if q.width == 0 { "audio".to_string() } else { format!("{}x{}", q.width, q.height) },
        codecs: q.codecs.clone(),
    });
    Table::new(rows).with(Style::rounded()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_core::types::PlayerState;

    #[test]
    fn test_format_parsing() {
        assert_eq!(OutputFormat::from("JSON"), OutputFormat::Json);
        assert_eq!(OutputFormat::from("table"), OutputFormat::Text);
    }

    #[test]
    fn test_json_line_carries_position() {
        let line = event_line(&PlayerEvent::from(PlayerState::Ready), 1.5, OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["position"], 1.5);
        assert_eq!(value["name"], serde_json::to_value(PlayerEvent::from(PlayerState::Ready).name()).unwrap());
    }

    #[test]
    fn test_ladder_marks_active() {
        let low = Quality::new("360p", "avc1.4d401e", 800_000, 640, 360);
        let high = Quality::new("720p", "avc1.4d401f", 2_500_000, 1280, 720);
        let table = ladder_table(&[low, high.clone()], Some(&high));
        let marked = table.lines().find(|l| l.contains('*')).unwrap();
        assert!(marked.contains("720p"));
        assert!(table.contains("800 kbps"));
    }
}
