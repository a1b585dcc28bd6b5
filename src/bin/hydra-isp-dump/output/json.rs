use std::collections::BTreeMap;
use std::time::Instant;

use hydra_isp_dump::{
    chips::ChipProfile, operation::DumpEvent, targets::PortInfo, terminal::Exchange,
};

use crate::output::{
    percent, port_to_value, DumpSummary, Event, JsonProgressMode, OutputOptions, Reporter,
};

#[derive(serde::Serialize)]
pub struct JsonEvent {
    schema: u32,
    event: &'static str,
    #[serde(flatten)]
    fields: BTreeMap<&'static str, serde_json::Value>,
}

impl JsonEvent {
    pub fn status(event: &'static str) -> Self {
        Self {
            schema: 1,
            event,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_u64(mut self, k: &'static str, v: u64) -> Self {
        self.fields.insert(k, serde_json::Value::from(v));
        self
    }

    pub fn with_str(mut self, k: &'static str, v: &str) -> Self {
        self.fields.insert(k, serde_json::Value::from(v));
        self
    }

    pub fn with_value(mut self, k: &'static str, v: serde_json::Value) -> Self {
        self.fields.insert(k, v);
        self
    }
}

pub struct JsonOutput {
    opts: OutputOptions,
    start: Instant,
    last_percent: Option<u64>,
}

impl JsonOutput {
    pub fn new(opts: OutputOptions) -> Self {
        Self {
            opts,
            start: Instant::now(),
            last_percent: None,
        }
    }

    pub(crate) fn render_event_json(&mut self, ev: JsonEvent) -> String {
        let mut ev = ev;
        if self.opts.json_timestamps {
            ev.fields.insert(
                "t_ms",
                serde_json::Value::from(self.start.elapsed().as_millis() as u64),
            );
        }
        serde_json::to_string(&ev).unwrap_or_else(|_| "{}".to_string())
    }

    fn json_event(&mut self, ev: JsonEvent) {
        println!("{}", self.render_event_json(ev));
    }

    fn error_event(&mut self, code: i32, msg: &str) {
        self.json_event(
            JsonEvent::status("error")
                .with_u64("code", code as u64)
                .with_str("message", msg),
        );

        if self.opts.verbose {
            eprintln!("error: {msg}");
        }
    }

    /// Whether a progress event passes the configured throttle.
    pub(crate) fn keep_progress(&mut self, address: usize, words: usize) -> bool {
        match self.opts.json_progress {
            JsonProgressMode::All => true,
            JsonProgressMode::None => false,
            JsonProgressMode::Percent => {
                let p = percent(address, words);
                let keep = address == 0
                    || address == words
                    || self.last_percent.map(|last| last != p).unwrap_or(true);
                if keep {
                    self.last_percent = Some(p);
                }
                keep
            }
        }
    }

    fn emit_dump(&mut self, ev: DumpEvent) {
        match &ev {
            DumpEvent::ReadStart { .. } => self.last_percent = None,
            DumpEvent::Progress { address, words } => {
                if !self.keep_progress(*address, *words) {
                    return;
                }
            }
            _ => {}
        }
        self.json_event(dump_event_to_json(ev));
    }
}

impl Reporter for JsonOutput {
    fn emit(&mut self, event: Event) {
        match event {
            Event::Dump(ev) => self.emit_dump(ev),
            Event::DumpSummary(summary) => self.json_event(dump_summary_to_json(summary)),
            Event::Exchange(ex) => self.json_event(exchange_to_json(&ex)),
            Event::ListPorts(ports) => self.json_event(list_to_json(&ports)),
            Event::Chips(chips) => self.json_event(chips_to_json(&chips)),
            Event::Error { code, message } => self.error_event(code, &message),
            Event::HintPortSelection => {}
        }
    }

    fn finish(&mut self) {}
}

pub fn list_to_json(ports: &[PortInfo]) -> JsonEvent {
    JsonEvent::status("list")
        .with_u64("count", ports.len() as u64)
        .with_value(
            "ports",
            serde_json::Value::Array(
                ports
                    .iter()
                    .enumerate()
                    .map(|(i, p)| port_to_value(i, p))
                    .collect(),
            ),
        )
}

pub fn chips_to_json(chips: &[&'static ChipProfile]) -> JsonEvent {
    JsonEvent::status("chips").with_value(
        "chips",
        serde_json::Value::Array(
            chips
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "id": c.id,
                        "name": c.name,
                        "signature": c.signature.to_string(),
                        "flash_words": c.flash_words,
                        "image_bytes": c.image_len(),
                    })
                })
                .collect(),
        ),
    )
}

pub fn exchange_to_json(ex: &Exchange) -> JsonEvent {
    JsonEvent::status("exchange")
        .with_str("command", &ex.command)
        .with_str("reply", &ex.reply)
}

pub fn dump_summary_to_json(summary: DumpSummary) -> JsonEvent {
    let DumpSummary {
        exit_code,
        message,
        output,
        port,
        entry_attempts,
        signature,
        words_read,
        bytes_written,
    } = summary;

    let mut ev = JsonEvent::status("dump_summary")
        .with_u64("ok", if exit_code == 0 { 1 } else { 0 })
        .with_u64("exit_code", exit_code.max(0) as u64)
        .with_str("output", &output)
        .with_u64("words_read", words_read)
        .with_u64("bytes_written", bytes_written);

    if let Some(p) = &port {
        ev = ev.with_str("port", p);
    }
    if let Some(n) = entry_attempts {
        ev = ev.with_u64("entry_attempts", n as u64);
    }
    if let Some(s) = signature {
        ev = ev.with_str("signature", &s.to_string());
    }
    if let Some(msg) = &message {
        ev = ev.with_str("message", msg);
    }

    ev
}

pub fn dump_event_to_json(ev: DumpEvent) -> JsonEvent {
    match ev {
        DumpEvent::PortOpen { port, baud } => JsonEvent::status("port_open")
            .with_str("port", &port)
            .with_u64("baud", baud as u64),
        DumpEvent::BinaryMode { attempts } => {
            JsonEvent::status("binary_mode").with_u64("attempts", attempts as u64)
        }
        DumpEvent::SpiMode => JsonEvent::status("spi_mode"),
        DumpEvent::BusConfigured { config } => JsonEvent::status("bus_configured").with_value(
            "config",
            serde_json::to_value(config)
                .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new())),
        ),
        DumpEvent::ChipSelect { asserted } => {
            JsonEvent::status("chip_select").with_u64("asserted", if asserted { 1 } else { 0 })
        }
        DumpEvent::ProgramEnabled { reply } => JsonEvent::status("program_enabled").with_value(
            "reply",
            serde_json::Value::Array(reply.iter().map(|b| serde_json::Value::from(*b)).collect()),
        ),
        DumpEvent::SignatureByte { index, value } => JsonEvent::status("signature_byte")
            .with_u64("index", index as u64)
            .with_u64("value", value as u64),
        DumpEvent::SignatureVerified { chip, signature } => {
            JsonEvent::status("signature_verified")
                .with_str("chip", chip)
                .with_str("signature", &signature.to_string())
        }
        DumpEvent::ReadStart { words } => {
            JsonEvent::status("read_start").with_u64("words", words as u64)
        }
        DumpEvent::Progress { address, words } => JsonEvent::status("progress")
            .with_u64("address", address as u64)
            .with_u64("words", words as u64),
        DumpEvent::ReadDone { bytes } => {
            JsonEvent::status("read_done").with_u64("bytes", bytes as u64)
        }
        DumpEvent::ImageWritten { path, bytes } => JsonEvent::status("image_written")
            .with_str("path", &path.display().to_string())
            .with_u64("bytes", bytes as u64),
        DumpEvent::SessionClosed => JsonEvent::status("session_closed"),
    }
}
