use hydra_isp_dump::chips::ChipType;

use crate::exit_codes;
use crate::output::{Event, Reporter};

pub fn run(out: &mut dyn Reporter) -> i32 {
    let chips = ChipType::ALL.iter().map(|c| c.profile()).collect();
    out.emit(Event::Chips(chips));
    exit_codes::EXIT_OK
}
