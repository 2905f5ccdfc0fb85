//! JSON-lines event stream on stdout for `--json` runs.

use std::io::Write;
use std::sync::Mutex;

use bench_core::{BenchError, Fault, Mode, Observer, SensorFrame};
use serde_json::{Map, Value, json};

/// Writes one JSON object per event; frames carry every signal by name.
pub struct JsonLinesObserver<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesObserver<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn emit(&self, v: &Value) {
        let mut out = self
            .out
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // A closed stdout (e.g. `| head`) must not take the loop down.
        let _ = writeln!(out, "{v}");
        let _ = out.flush();
    }
}

pub fn frame_json(frame: &SensorFrame) -> Value {
    let mut m = Map::new();
    m.insert("event".into(), "frame".into());
    for (name, value) in frame.values() {
        m.insert(name.into(), json!(value));
    }
    Value::Object(m)
}

impl<W: Write + Send> Observer for JsonLinesObserver<W> {
    fn frame(&self, frame: &SensorFrame) {
        self.emit(&frame_json(frame));
    }

    fn fault(&self, fault: Fault) {
        tracing::warn!(%fault, "fault raised");
        self.emit(&json!({ "event": "fault", "fault": fault.to_string() }));
    }

    fn fault_cleared(&self, fault: Fault) {
        self.emit(&json!({ "event": "fault_cleared", "fault": fault.to_string() }));
    }

    fn mode_changed(&self, from: Mode, to: Mode) {
        self.emit(&json!({ "event": "mode", "from": from.to_string(), "to": to.to_string() }));
    }

    fn acquisition_failed(&self, error: &BenchError) {
        tracing::warn!(%error, "acquisition failed");
    }

    fn loop_state(&self, running: bool) {
        self.emit(&json!({ "event": "loop", "running": running }));
    }
}
