//! Event log sinks. Alerts are written as one JSON object per line.

use crate::alerts::Alert;
use std::fs::OpenOptions;
use std::io::{self, Write as _};

/// Sink for mapped alerts.
pub trait Writer: Send {
    fn write(&mut self, alert: &Alert) -> io::Result<()>;
}

/// JSON-lines writer over a file or one of the process streams.
pub struct JsonFileWriter {
    out: Box<dyn io::Write + Send>,
}

impl JsonFileWriter {
    /// Open the event log. The paths "stdout" and "stderr" redirect to
    /// the corresponding stream; anything else is opened for append.
    pub fn open(path: &str) -> io::Result<Self> {
        let out: Box<dyn io::Write + Send> = match path {
            "stdout" => Box::new(io::stdout()),
            "stderr" => Box::new(io::stderr()),
            _ => Box::new(OpenOptions::new().create(true).append(true).open(path)?),
        };
        Ok(Self { out })
    }
}

impl Writer for JsonFileWriter {
    fn write(&mut self, alert: &Alert) -> io::Result<()> {
        // nothing to log without events
        if alert.events.is_empty() {
            return Ok(());
        }
        serde_json::to_writer(&mut self.out, alert)?;
        self.out.write_all(b"\n")?;
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{Event, EventGroup};
    use tempfile::tempdir;

    fn sample_alert() -> Alert {
        Alert {
            follow: "c1".to_string(),
            more: false,
            events: vec![Event {
                kind: "alert".to_string(),
                event_type: "dns".to_string(),
                query: Some("evil.example".to_string()),
                record_type: Some("A".to_string()),
                groups: vec![EventGroup {
                    label: "lab".to_string(),
                    description: "Lab Net".to_string(),
                }],
                ..Default::default()
            }],
        }
    }

    #[test]
    fn writes_one_json_object_per_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");
        let mut writer = JsonFileWriter::open(path.to_str().unwrap()).unwrap();
        writer.write(&sample_alert()).unwrap();
        writer.write(&sample_alert()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: Alert = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.follow, "c1");
        assert_eq!(parsed.events[0].query.as_deref(), Some("evil.example"));
        assert_eq!(parsed.events[0].groups[0].label, "lab");
    }

    #[test]
    fn empty_alerts_write_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");
        let mut writer = JsonFileWriter::open(path.to_str().unwrap()).unwrap();
        writer
            .write(&Alert {
                follow: "c1".to_string(),
                more: false,
                events: Vec::new(),
            })
            .unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn reopening_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");
        JsonFileWriter::open(path.to_str().unwrap())
            .unwrap()
            .write(&sample_alert())
            .unwrap();
        JsonFileWriter::open(path.to_str().unwrap())
            .unwrap()
            .write(&sample_alert())
            .unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
