use hydra_isp_dump::api;

use crate::cli;
use crate::context;
use crate::exit_codes;
use crate::output::{DumpRecorder, Event, Reporter};

pub fn run(args: cli::DumpArgs, out: &mut dyn Reporter) -> i32 {
    let opts = context::dump_opts(&args.connection, &args.bus);
    let mut recorder = DumpRecorder::new(args.output.display().to_string());

    let r = api::dump_to_file(&opts, &args.output, args.traffic_log.as_deref(), |ev| {
        recorder.observe(&ev);
        out.emit(Event::Dump(ev));
    });

    let (code, message) = match r {
        Ok(_) => (exit_codes::EXIT_OK, None),
        Err(e) => {
            let code = map_dump_error(&e);
            let message = e.to_string();
            out.emit(Event::Error {
                code,
                message: message.clone(),
            });
            if matches!(
                e,
                api::DumpError::NoDevice | api::DumpError::AmbiguousPort { .. }
            ) {
                out.emit(Event::HintPortSelection);
            }
            (code, Some(message))
        }
    };

    out.emit(Event::DumpSummary(recorder.finish(code, message)));
    code
}

pub(crate) fn map_dump_error(e: &api::DumpError) -> i32 {
    match e.kind() {
        api::DumpErrorKind::Connection => exit_codes::EXIT_CONNECTION,
        api::DumpErrorKind::Protocol => exit_codes::EXIT_PROTOCOL,
        api::DumpErrorKind::Identity => exit_codes::EXIT_IDENTITY,
        api::DumpErrorKind::Output => exit_codes::EXIT_OUTPUT,
        api::DumpErrorKind::InvalidConfig => exit_codes::EXIT_INVALID_CONFIG,
    }
}
