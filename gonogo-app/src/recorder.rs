use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::Context as _;
use flume::Sender;
use gonogo_core::{Event, TrialScore};
use gonogo_experiment::DataSink;
use serde_json::{Map, Value, json};

/// Progress note sent for every completed trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialSummary {
    pub trial: u64,
    pub score: Option<TrialScore>,
}

/// Writes one JSON object per line: raw events tagged `"event"`, completed
/// trials tagged `"trial"`.
pub struct JsonLinesRecorder {
    writer: BufWriter<Box<dyn Write + Send>>,
    progress: Option<Sender<TrialSummary>>,
}

impl JsonLinesRecorder {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: BufWriter::new(Box::new(writer)),
            progress: None,
        }
    }

    pub fn create<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("failed to create results file {}", path.display()))?;
        Ok(Self::new(file))
    }

    pub fn with_progress(mut self, progress: Sender<TrialSummary>) -> Self {
        self.progress = Some(progress);
        self
    }

    fn write_line(&mut self, line: &Value) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.writer, line)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

impl DataSink for JsonLinesRecorder {
    fn process_event(&mut self, event: Event, timestamp: f64) -> anyhow::Result<()> {
        self.write_line(&json!({
            "type": "event",
            "event": event.name(),
            "label": event.label(),
            "timestamp": timestamp,
        }))
    }

    fn process_trial(&mut self, results: &Map<String, Value>) -> anyhow::Result<()> {
        let mut line = results.clone();
        line.insert("type".into(), Value::from("trial"));
        self.write_line(&Value::Object(line))?;
        // Trial boundaries are rare enough to flush every time.
        self.writer.flush()?;

        if let Some(progress) = &self.progress {
            let summary = TrialSummary {
                trial: results.get("trial").and_then(Value::as_u64).unwrap_or_default(),
                score: results
                    .get("score")
                    .and_then(Value::as_str)
                    .and_then(TrialScore::from_code),
            };
            // The session may already have stopped listening.
            let _ = progress.send(summary);
        }
        Ok(())
    }

    fn finalize(&mut self) -> anyhow::Result<()> {
        self.writer.flush().context("failed to flush results")
    }
}
