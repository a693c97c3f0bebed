//! In-memory buffer of the day's transcripts, flushed to a GitHub issue by
//! the nightly archive job.

use chrono_tz::Tz;
use murmur_lifelog::Lifelog;

#[derive(Debug, Clone)]
struct DailyEntry {
    /// HH:MM in the configured timezone.
    heading: String,
    content: String,
}

#[derive(Debug)]
pub struct DailyLog {
    timezone: Tz,
    entries: Vec<DailyEntry>,
}

impl DailyLog {
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            entries: Vec::new(),
        }
    }

    /// Buffer one record. Records without transcript content are skipped.
    pub fn add_record(&mut self, record: &Lifelog) {
        let content = record
            .contents
            .iter()
            .map(|segment| segment.content.as_str())
            .filter(|text| !text.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        if content.is_empty() {
            return;
        }

        let heading = record
            .start_time
            .with_timezone(&self.timezone)
            .format("%H:%M")
            .to_string();
        self.entries.push(DailyEntry { heading, content });
    }

    pub fn render_markdown(&self, date: &str) -> String {
        if self.entries.is_empty() {
            return format!("# Log for {date}\n\nNothing was recorded today.\n");
        }

        let mut rendered = format!("# Log for {date}\n\n");
        for entry in &self.entries {
            rendered.push_str(&format!("## {}\n{}\n\n---\n\n", entry.heading, entry.content));
        }
        rendered
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono_tz::Tz;
    use murmur_lifelog::{Lifelog, LifelogContent};

    use super::DailyLog;

    fn record(content: &str) -> Lifelog {
        Lifelog {
            id: "log-1".to_string(),
            title: "walk".to_string(),
            start_time: "2025-01-01T00:30:00Z".parse().expect("start"),
            end_time: "2025-01-01T01:00:00Z".parse().expect("end"),
            contents: vec![LifelogContent {
                content: content.to_string(),
                end_time: "2025-01-01T00:45:00Z".to_string(),
                start_time: None,
            }],
        }
    }

    #[test]
    fn headings_use_the_configured_timezone() {
        let tz: Tz = "Asia/Tokyo".parse().expect("tz");
        let mut log = DailyLog::new(tz);
        log.add_record(&record("talked about the offsite"));

        let markdown = log.render_markdown("2025-01-01");
        // 00:30 UTC is 09:30 in Tokyo.
        assert!(markdown.contains("## 09:30"), "got: {markdown}");
        assert!(markdown.contains("talked about the offsite"));
    }

    #[test]
    fn contentless_records_are_skipped_and_clear_resets() {
        let mut log = DailyLog::new(chrono_tz::UTC);
        log.add_record(&record("   "));
        assert!(log.is_empty());

        log.add_record(&record("real content"));
        assert_eq!(log.len(), 1);
        log.clear();
        assert!(log.is_empty());
        assert!(log
            .render_markdown("2025-01-01")
            .contains("Nothing was recorded today"));
    }
}
