use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use crate::chips::{self, ChipProfile, ATMEGA328P};
use crate::transport::{ByteTransport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    /// Swallow the nth reply (1-based) so the host read times out.
    DropReply { nth_reply: usize },
    /// Flip every bit of the first byte of the nth reply.
    CorruptReply { nth_reply: usize },
    /// Fail all I/O from the nth reply on, as if the cable was pulled.
    Disconnect { nth_reply: usize },
    /// Hold the nth reply back until the second read after it was sent.
    LateReply { nth_reply: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Terminal,
    Bbio,
    Spi,
}

struct State {
    mode: Mode,
    entry_needed: usize,
    entry_seen: usize,
    prev: Option<u8>,
    line: Vec<u8>,
    frame: Vec<u8>,
    pending: VecDeque<u8>,
    late: Vec<(usize, Vec<u8>)>,
    written: Vec<u8>,
    replies: usize,
    faults: Vec<Fault>,
    disconnected: bool,
    exit_count: usize,
    closed: bool,
    cs_low: bool,

    signature: [u8; 3],
    flash_words: usize,
    flash: Box<dyn Fn(u16) -> u16>,
    programming: bool,
    flash_reads: Vec<(u8, u16)>,
}

#[derive(Clone)]
pub(crate) struct SimBridge {
    state: Rc<RefCell<State>>,
}

impl SimBridge {
    /// ATmega328P whose word `a` holds low byte `a & 0xFF` and high byte `a >> 8`.
    pub fn atmega328p() -> Self {
        Self::with_chip(&ATMEGA328P, |a| a)
    }

    pub fn with_chip(chip: &ChipProfile, flash: impl Fn(u16) -> u16 + 'static) -> Self {
        Self {
            state: Rc::new(RefCell::new(State {
                mode: Mode::Terminal,
                entry_needed: 1,
                entry_seen: 0,
                prev: None,
                line: Vec::new(),
                frame: Vec::new(),
                pending: VecDeque::new(),
                late: Vec::new(),
                written: Vec::new(),
                replies: 0,
                faults: Vec::new(),
                disconnected: false,
                exit_count: 0,
                closed: false,
                cs_low: false,
                signature: chip.signature.0,
                flash_words: chip.flash_words,
                flash: Box::new(flash),
                programming: false,
                flash_reads: Vec::new(),
            })),
        }
    }

    pub fn set_entry_bytes_needed(&self, n: usize) {
        self.state.borrow_mut().entry_needed = n;
    }

    pub fn set_signature_byte(&self, index: usize, value: u8) {
        self.state.borrow_mut().signature[index] = value;
    }

    pub fn inject(&self, fault: Fault) {
        self.state.borrow_mut().faults.push(fault);
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.borrow().written.clone()
    }

    pub fn exit_count(&self) -> usize {
        self.state.borrow().exit_count
    }

    pub fn closed(&self) -> bool {
        self.state.borrow().closed
    }

    pub fn chip_selected(&self) -> bool {
        self.state.borrow().cs_low
    }

    pub fn in_terminal_mode(&self) -> bool {
        self.state.borrow().mode == Mode::Terminal
    }

    pub fn programming_enabled(&self) -> bool {
        self.state.borrow().programming
    }

    /// Every flash read the target executed, as (opcode, word address).
    pub fn flash_reads(&self) -> Vec<(u8, u16)> {
        self.state.borrow().flash_reads.clone()
    }

    pub fn replies(&self) -> usize {
        self.state.borrow().replies
    }
}

impl State {
    fn reply(&mut self, bytes: &[u8]) {
        self.replies += 1;
        let n = self.replies;
        let mut bytes = bytes.to_vec();
        for f in &self.faults {
            match *f {
                Fault::DropReply { nth_reply } if nth_reply == n => return,
                Fault::CorruptReply { nth_reply } if nth_reply == n => {
                    if let Some(b) = bytes.first_mut() {
                        *b ^= 0xFF;
                    }
                }
                Fault::Disconnect { nth_reply } if nth_reply == n => {
                    self.disconnected = true;
                    return;
                }
                Fault::LateReply { nth_reply } if nth_reply == n => {
                    self.late.push((1, bytes));
                    return;
                }
                _ => {}
            }
        }
        self.pending.extend(bytes);
    }

    /// Late bytes were sent before anything still queued, so they go in front.
    fn release_late(&mut self) {
        let mut ready = Vec::new();
        self.late.retain_mut(|(reads_left, bytes)| {
            if *reads_left == 0 {
                ready.push(std::mem::take(bytes));
                false
            } else {
                *reads_left -= 1;
                true
            }
        });
        for b in ready.into_iter().flatten().rev() {
            self.pending.push_front(b);
        }
    }

    fn feed(&mut self, b: u8) {
        if !self.frame.is_empty() {
            self.frame.push(b);
            self.try_finish_frame();
            return;
        }

        let prev = self.prev.replace(b);
        match self.mode {
            Mode::Terminal => match b {
                0x00 => {
                    self.entry_seen += 1;
                    if self.entry_seen >= self.entry_needed {
                        self.entry_seen = 0;
                        self.mode = Mode::Bbio;
                        self.reply(b"BBIO1");
                    }
                }
                0x0F if prev == Some(0x00) => {
                    self.exit_count += 1;
                    self.entry_seen = 0;
                }
                b'\n' => {
                    let line = String::from_utf8_lossy(&self.line).trim().to_string();
                    self.line.clear();
                    let text = format!("{line}\r\nOK\r\nspi1> ");
                    self.reply(text.as_bytes());
                }
                _ => self.line.push(b),
            },
            Mode::Bbio => match b {
                0x00 => self.reply(b"BBIO1"),
                0x01 => {
                    self.mode = Mode::Spi;
                    self.reply(b"SPI1");
                }
                0x0F => {
                    if prev == Some(0x00) {
                        self.exit_count += 1;
                    }
                    self.mode = Mode::Terminal;
                    self.cs_low = false;
                }
                _ => self.reply(&[0x00]),
            },
            Mode::Spi => match b {
                0x00 => {
                    self.mode = Mode::Bbio;
                    self.reply(b"BBIO1");
                }
                0x02 => {
                    self.cs_low = true;
                    self.reply(&[0x01]);
                }
                0x03 => {
                    self.cs_low = false;
                    self.reply(&[0x01]);
                }
                0x05 => self.frame.push(b),
                b if b & 0xF0 == 0x80 => self.reply(&[0x01]),
                b if b & 0xF8 == 0x60 => self.reply(&[0x01]),
                _ => self.reply(&[0x00]),
            },
        }
    }

    fn try_finish_frame(&mut self) {
        if self.frame.len() < 5 {
            return;
        }
        let w = u16::from_be_bytes([self.frame[1], self.frame[2]]) as usize;
        let r = u16::from_be_bytes([self.frame[3], self.frame[4]]) as usize;
        if self.frame.len() < 5 + w {
            return;
        }
        let payload = self.frame.split_off(5);
        self.frame.clear();

        let mut out = vec![0x01];
        out.extend(self.spi(&payload, r));
        self.reply(&out);
    }

    fn spi(&mut self, payload: &[u8], read_len: usize) -> Vec<u8> {
        if !self.cs_low {
            return vec![0xFF; read_len];
        }
        let data: Vec<u8> = match payload {
            p if p == chips::ISP_PROGRAM_ENABLE => {
                self.programming = true;
                vec![0x00, 0xAC, 0x53, 0x00]
            }
            [chips::ISP_READ_SIGNATURE, 0x00, idx] if self.programming && *idx < 3 => {
                vec![self.signature[*idx as usize]]
            }
            [op @ (chips::ISP_READ_FLASH_LOW | chips::ISP_READ_FLASH_HIGH), seg, off]
                if self.programming =>
            {
                let addr = u16::from_be_bytes([*seg, *off]);
                self.flash_reads.push((*op, addr));
                let word = if (addr as usize) < self.flash_words {
                    (self.flash)(addr)
                } else {
                    0xFFFF
                };
                let [hi, lo] = word.to_be_bytes();
                vec![if *op == chips::ISP_READ_FLASH_LOW { lo } else { hi }]
            }
            _ => vec![0x00],
        };
        let mut data = data;
        data.resize(read_len, 0x00);
        data
    }
}

fn unplugged() -> TransportError {
    TransportError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"))
}

impl ByteTransport for SimBridge {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut st = self.state.borrow_mut();
        if st.closed {
            return Err(TransportError::Closed);
        }
        if st.disconnected {
            return Err(unplugged());
        }
        st.written.extend_from_slice(data);
        for b in data {
            st.feed(*b);
        }
        Ok(())
    }

    fn read(&mut self, n: usize, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let mut st = self.state.borrow_mut();
        if st.closed {
            return Err(TransportError::Closed);
        }
        if st.disconnected {
            return Err(unplugged());
        }
        st.release_late();
        let k = n.min(st.pending.len());
        Ok(st.pending.drain(..k).collect())
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.state.borrow_mut().pending.clear();
        Ok(())
    }

    fn close(&mut self) {
        self.state.borrow_mut().closed = true;
    }
}
