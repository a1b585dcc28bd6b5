use hydra_isp_dump::targets;

use crate::cli;
use crate::exit_codes;
use crate::output::{Event, Reporter};

pub fn run(_args: cli::ListArgs, out: &mut dyn Reporter) -> i32 {
    match targets::discover_ports() {
        Ok(ports) => {
            out.emit(Event::ListPorts(ports));
            exit_codes::EXIT_OK
        }
        Err(e) => {
            out.emit(Event::Error {
                code: exit_codes::EXIT_UNEXPECTED,
                message: e.to_string(),
            });
            exit_codes::EXIT_UNEXPECTED
        }
    }
}
