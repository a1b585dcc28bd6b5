use std::io::{IsTerminal, Write};

use hydra_isp_dump::{
    chips::ChipProfile, hydrabus, operation::DumpEvent, targets::PortInfo, terminal::Exchange,
};

use crate::output::{format_port_line, percent, DumpSummary, Event, OutputOptions, Reporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Quiet,
    Verbose,
    Progress,
}

pub struct HumanOutput {
    opts: OutputOptions,
    is_tty: bool,
    progress_active: bool,
    last_percent: Option<u64>,
}

impl HumanOutput {
    pub fn new(opts: OutputOptions) -> Self {
        Self {
            opts,
            is_tty: std::io::stderr().is_terminal(),
            progress_active: false,
            last_percent: None,
        }
    }

    fn mode(&self) -> Mode {
        if self.opts.quiet {
            Mode::Quiet
        } else if self.opts.verbose {
            Mode::Verbose
        } else {
            Mode::Progress
        }
    }

    fn finish_line(&mut self) {
        if self.progress_active {
            eprintln!();
            self.progress_active = false;
        }
    }

    fn println(&mut self, msg: &str) {
        if self.mode() == Mode::Quiet {
            return;
        }
        self.finish_line();
        eprintln!("{msg}");
    }

    fn progress_update(&mut self, address: usize, words: usize) {
        let percent = percent(address, words);

        if self.is_tty {
            eprint!("\r  reading {percent:3}% ({address}/{words}) @ 0x{address:04X}");
            let _ = std::io::stderr().flush();
            self.progress_active = true;
            self.last_percent = Some(percent);
            return;
        }

        let last = self.last_percent.unwrap_or(0);
        if percent == 0 || percent == 100 || percent >= last + 10 {
            self.last_percent = Some(percent);
            self.println(&format!("  reading {percent:3}% ({address}/{words})"));
        }
    }

    pub(crate) fn exchange_lines(ex: &Exchange) -> Vec<String> {
        let mut lines = vec![format!("> {}", ex.command)];
        lines.extend(
            ex.reply
                .lines()
                .map(str::trim_end)
                .filter(|l| !l.is_empty())
                .map(|l| format!("< {l}")),
        );
        lines
    }

    fn on_dump_event(&mut self, ev: DumpEvent) {
        let mode = self.mode();
        match ev {
            DumpEvent::PortOpen { port, baud } => {
                if mode != Mode::Quiet {
                    self.println(&format!("port: {port} ({baud} baud)"));
                }
            }
            DumpEvent::BinaryMode { attempts } => {
                if mode == Mode::Verbose {
                    self.println(&format!("binary mode (after {attempts} entry byte(s))"));
                }
            }
            DumpEvent::SpiMode => {
                if mode == Mode::Verbose {
                    self.println("SPI mode");
                }
            }
            DumpEvent::BusConfigured { config } => {
                if mode == Mode::Verbose {
                    self.println(&format!(
                        "bus: {:?} {} {:?} {:?}",
                        config.device, config.speed, config.polarity, config.phase
                    ));
                }
            }
            DumpEvent::ChipSelect { asserted } => {
                if mode == Mode::Verbose {
                    self.println(if asserted {
                        "chip-select low"
                    } else {
                        "chip-select high"
                    });
                }
            }
            DumpEvent::ProgramEnabled { reply } => {
                if mode == Mode::Verbose {
                    self.println(&format!(
                        "program enable reply: {:02X} {:02X} {:02X} {:02X}",
                        reply[0], reply[1], reply[2], reply[3]
                    ));
                }
            }
            DumpEvent::SignatureByte { index, value } => {
                if mode == Mode::Verbose {
                    self.println(&format!("signature[{index}] = 0x{value:02X}"));
                }
            }
            DumpEvent::SignatureVerified { chip, signature } => {
                if mode != Mode::Quiet {
                    self.println(&format!("chip: {chip} (signature {signature})"));
                }
            }
            DumpEvent::ReadStart { words } => {
                self.last_percent = None;
                if mode == Mode::Verbose {
                    self.println(&format!("reading {words} words"));
                }
            }
            DumpEvent::Progress { address, words } => match mode {
                Mode::Verbose => {
                    self.println(&format!("read @ 0x{address:04X} ({address}/{words})"))
                }
                Mode::Progress => self.progress_update(address, words),
                Mode::Quiet => {}
            },
            DumpEvent::ReadDone { bytes } => {
                self.finish_line();
                if mode == Mode::Verbose {
                    self.println(&format!("read {bytes} bytes"));
                }
            }
            DumpEvent::ImageWritten { path, bytes } => {
                if mode != Mode::Quiet {
                    self.println(&format!("wrote {bytes} bytes to {}", path.display()));
                }
            }
            DumpEvent::SessionClosed => {
                if mode == Mode::Verbose {
                    self.println("bridge back in terminal mode");
                }
            }
        }
    }
}

impl Reporter for HumanOutput {
    fn emit(&mut self, event: Event) {
        match event {
            Event::Dump(ev) => self.on_dump_event(ev),
            Event::DumpSummary(summary) => emit_summary(summary, self),
            Event::Exchange(ex) => {
                for line in Self::exchange_lines(&ex) {
                    self.println(&line);
                }
            }
            Event::ListPorts(ports) => emit_list_ports(&ports, self),
            Event::Chips(chips) => emit_chips(&chips, self),
            Event::Error { code: _, message } => {
                self.finish_line();
                eprintln!("error: {message}");
            }
            Event::HintPortSelection => {
                self.println("Hint: pass --port <name>, or run `hydra-isp-dump list` to see serial ports.");
            }
        }
    }

    fn finish(&mut self) {
        self.finish_line();
    }
}

fn emit_summary(summary: DumpSummary, out: &mut HumanOutput) {
    if summary.exit_code == 0 && out.mode() == Mode::Verbose {
        out.println(&format!("ok: {}", summary.output));
    }
}

fn emit_list_ports(ports: &[PortInfo], out: &mut HumanOutput) {
    if ports.is_empty() {
        out.println(&format!(
            "No USB serial ports found (HydraBus is {:04X}:{:04X})",
            hydrabus::VID,
            hydrabus::PID
        ));
        return;
    }

    for (i, p) in ports.iter().enumerate() {
        out.println(&format_port_line(i, p));
    }
}

fn emit_chips(chips: &[&'static ChipProfile], out: &mut HumanOutput) {
    for c in chips {
        out.println(&format!(
            "{:<12} {:<12} signature {}  {} words ({} bytes)",
            c.id,
            c.name,
            c.signature,
            c.flash_words,
            c.image_len()
        ));
    }
}
