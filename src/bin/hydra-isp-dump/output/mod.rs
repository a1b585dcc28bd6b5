use crate::cli;

use hydra_isp_dump::{
    chips::{ChipProfile, Signature},
    operation::DumpEvent,
    targets::PortInfo,
    terminal::Exchange,
};

pub mod human;
pub mod json;


#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub verbose: bool,
    pub quiet: bool,
    pub json_timestamps: bool,
    pub json_progress: JsonProgressMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonProgressMode {
    All,
    Percent,
    None,
}

#[derive(Debug, Clone)]
pub enum Event {
    Dump(DumpEvent),
    DumpSummary(DumpSummary),
    Exchange(Exchange),
    ListPorts(Vec<PortInfo>),
    Chips(Vec<&'static ChipProfile>),
    Error { code: i32, message: String },
    HintPortSelection,
}

#[derive(Debug, Clone)]
pub struct DumpSummary {
    pub exit_code: i32,
    pub message: Option<String>,
    pub output: String,
    pub port: Option<String>,
    pub entry_attempts: Option<usize>,
    pub signature: Option<Signature>,
    pub words_read: u64,
    pub bytes_written: u64,
}

/// Folds the event stream of one dump into its summary.
pub struct DumpRecorder {
    output: String,
    port: Option<String>,
    entry_attempts: Option<usize>,
    signature: Option<Signature>,
    words_read: u64,
    bytes_written: u64,
}

impl DumpRecorder {
    pub fn new(output: String) -> Self {
        Self {
            output,
            port: None,
            entry_attempts: None,
            signature: None,
            words_read: 0,
            bytes_written: 0,
        }
    }

    pub fn observe(&mut self, ev: &DumpEvent) {
        match ev {
            DumpEvent::PortOpen { port, .. } => self.port = Some(port.clone()),
            DumpEvent::BinaryMode { attempts } => self.entry_attempts = Some(*attempts),
            DumpEvent::SignatureVerified { signature, .. } => self.signature = Some(*signature),
            DumpEvent::Progress { address, .. } => self.words_read = *address as u64,
            DumpEvent::ImageWritten { bytes, .. } => self.bytes_written = *bytes as u64,
            _ => {}
        }
    }

    pub fn finish(self, exit_code: i32, message: Option<String>) -> DumpSummary {
        DumpSummary {
            exit_code,
            message,
            output: self.output,
            port: self.port,
            entry_attempts: self.entry_attempts,
            signature: self.signature,
            words_read: self.words_read,
            bytes_written: self.bytes_written,
        }
    }
}

pub trait Reporter {
    fn emit(&mut self, event: Event);
    fn finish(&mut self);
}

pub fn make_for_dump(args: &cli::DumpArgs) -> Box<dyn Reporter> {
    let json_progress = match args.json_progress {
        cli::JsonProgressArg::All => JsonProgressMode::All,
        cli::JsonProgressArg::Percent => JsonProgressMode::Percent,
        cli::JsonProgressArg::None => JsonProgressMode::None,
    };
    let opts = OutputOptions {
        verbose: args.verbose,
        quiet: args.quiet,
        json_timestamps: args.json_timestamps,
        json_progress,
    };
    if args.json {
        Box::new(json::JsonOutput::new(opts))
    } else {
        Box::new(human::HumanOutput::new(opts))
    }
}

pub fn make_for_probe(args: &cli::ProbeArgs) -> Box<dyn Reporter> {
    let opts = OutputOptions {
        verbose: args.verbose,
        quiet: false,
        json_timestamps: args.json_timestamps,
        json_progress: JsonProgressMode::All,
    };
    if args.json {
        Box::new(json::JsonOutput::new(opts))
    } else {
        Box::new(human::HumanOutput::new(opts))
    }
}

pub fn make_simple(json: bool) -> Box<dyn Reporter> {
    let opts = OutputOptions {
        verbose: false,
        quiet: false,
        json_timestamps: false,
        json_progress: JsonProgressMode::All,
    };
    if json {
        Box::new(json::JsonOutput::new(opts))
    } else {
        Box::new(human::HumanOutput::new(opts))
    }
}

pub fn port_to_value(index: usize, p: &PortInfo) -> serde_json::Value {
    let mut v = serde_json::to_value(p)
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
    if let serde_json::Value::Object(obj) = &mut v {
        obj.insert("index".to_string(), serde_json::Value::from(index as u64));
    }
    v
}

pub fn format_port_line(index: usize, p: &PortInfo) -> String {
    format!(
        "[{index}] {} {} {:04X}:{:04X} {}",
        if p.is_hydrabus { "hydrabus" } else { "serial  " },
        p.port_name,
        p.vid,
        p.pid,
        p.product.as_deref().unwrap_or("")
    )
    .trim_end()
    .to_string()
}

pub fn percent(address: usize, words: usize) -> u64 {
    (address as u64).saturating_mul(100) / words.max(1) as u64
}
