use std::time::Duration;

use serde::Serialize;

use crate::transport::{ByteTransport, TransportError};

pub const DEFAULT_SETTLE: Duration = Duration::from_millis(500);

/// Upper bound on one captured reply.
const REPLY_LIMIT: usize = 16 * 1024;

/// Puts the console in SPI mode and runs program enable plus the three
/// signature reads by hand.
pub const ISP_PROBE_SCRIPT: &[&str] = &[
    "help",
    "spi",
    "device 2",
    "frequency 2620000",
    "[ 0xAC 0x53 0x00 0x00 hd:4",
    "0x30 0x00 0x00 hd:1",
    "0x30 0x00 0x01 hd:1",
    "0x30 0x00 0x02 hd:1",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exchange {
    pub command: String,
    pub reply: String,
}

pub fn default_script() -> Vec<String> {
    ISP_PROBE_SCRIPT.iter().map(|s| s.to_string()).collect()
}

/// One command per line. Blank lines and lines starting with `#` are skipped.
pub fn parse_script(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Send each line terminated by CRLF, wait `settle`, and keep whatever came back.
pub fn run_script<T, F>(
    transport: &mut T,
    script: &[String],
    settle: Duration,
    mut on_exchange: F,
) -> Result<Vec<Exchange>, TransportError>
where
    T: ByteTransport,
    F: FnMut(&Exchange),
{
    transport.clear_input()?;

    let mut out = Vec::with_capacity(script.len());
    for command in script {
        let mut line = command.clone().into_bytes();
        line.extend_from_slice(b"\r\n");
        transport.write(&line)?;

        let reply = transport.read(REPLY_LIMIT, settle)?;
        let ex = Exchange {
            command: command.clone(),
            reply: String::from_utf8_lossy(&reply).into_owned(),
        };
        tracing::debug!(command = %ex.command, reply_len = reply.len(), "terminal exchange");
        on_exchange(&ex);
        out.push(ex);
    }
    Ok(out)
}
