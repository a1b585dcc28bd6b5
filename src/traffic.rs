use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Hook points around every exchange with the bridge.
///
/// Observers see the bytes but cannot influence the protocol: the session
/// ignores anything an observer does.
pub trait TrafficObserver {
    fn before(&mut self, _step: &str, _command: &[u8]) {}

    fn after(&mut self, _step: &str, _reply: &[u8]) {}
}

pub fn hex_bytes(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            s.push(' ');
        }
        s.push_str(&format!("{b:02X}"));
    }
    s
}

/// Command/reply audit log, one line per direction.
pub struct TrafficLog<W: Write> {
    out: W,
    failures: u64,
}

impl TrafficLog<BufWriter<File>> {
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> TrafficLog<W> {
    pub fn new(out: W) -> Self {
        Self { out, failures: 0 }
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn into_inner(mut self) -> W {
        let _ = self.out.flush();
        self.out
    }

    /// Terminal-mode transcript entry (text command, text reply).
    pub fn record_text(&mut self, command: &str, reply: &str) {
        let r = writeln!(self.out, "Command >> {}", command.trim_end())
            .and_then(|()| writeln!(self.out, "Reply   << {}", reply.trim_end()));
        self.note(r);
    }

    fn note(&mut self, r: io::Result<()>) {
        if let Err(e) = r {
            if self.failures == 0 {
                tracing::warn!("traffic log write failed: {e}");
            }
            self.failures = self.failures.saturating_add(1);
        }
    }
}

impl<W: Write> TrafficObserver for TrafficLog<W> {
    fn before(&mut self, step: &str, command: &[u8]) {
        let r = writeln!(self.out, "Command >> {} ({step})", hex_bytes(command));
        self.note(r);
    }

    fn after(&mut self, _step: &str, reply: &[u8]) {
        let r = writeln!(self.out, "Reply   << {}", hex_bytes(reply));
        self.note(r);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_bytes() {
        assert_eq!(hex_bytes(&[]), "");
        assert_eq!(hex_bytes(&[0xAC, 0x53, 0x00, 0x00]), "AC 53 00 00");
    }

    #[test]
    fn test_log_lines() {
        let mut log = TrafficLog::new(Vec::new());
        log.before("program enable", &[0x05, 0x00, 0x04]);
        log.after("program enable", &[0x01]);
        log.record_text("help\r\n", "usage\r\n");

        let text = String::from_utf8(log.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Command >> 05 00 04 (program enable)",
                "Reply   << 01",
                "Command >> help",
                "Reply   << usage",
            ]
        );
    }

    #[test]
    fn test_write_failures_are_counted_not_raised() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::other("disk full"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut log = TrafficLog::new(Broken);
        log.before("x", &[1]);
        log.after("x", &[2]);
        assert_eq!(log.failures(), 2);
    }
}
