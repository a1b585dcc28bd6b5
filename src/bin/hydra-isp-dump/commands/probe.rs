use std::time::Duration;

use hydra_isp_dump::{api, terminal, traffic::TrafficLog};

use crate::cli;
use crate::commands::dump::map_dump_error;
use crate::context;
use crate::exit_codes;
use crate::output::{Event, Reporter};

pub fn run(args: cli::ProbeArgs, out: &mut dyn Reporter) -> i32 {
    let script = match &args.script {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(text) => terminal::parse_script(&text),
            Err(e) => {
                return fail(
                    out,
                    exit_codes::EXIT_INVALID_CONFIG,
                    format!("unable to read script {}: {e}", path.display()),
                );
            }
        },
        None => terminal::default_script(),
    };
    if script.is_empty() {
        return fail(
            out,
            exit_codes::EXIT_INVALID_CONFIG,
            "script has no commands".to_string(),
        );
    }

    let mut transcript = match &args.transcript {
        Some(path) => match TrafficLog::create(path) {
            Ok(log) => Some(log),
            Err(e) => {
                return fail(
                    out,
                    exit_codes::EXIT_OUTPUT,
                    format!("unable to create transcript {}: {e}", path.display()),
                );
            }
        },
        None => None,
    };

    let opts = context::connection_opts(&args.connection);
    let settle = Duration::from_millis(args.settle_ms);
    let r = api::probe_port(&opts, &script, settle, |ex| {
        if let Some(log) = transcript.as_mut() {
            log.record_text(&ex.command, &ex.reply);
        }
        out.emit(Event::Exchange(ex.clone()));
    });

    if let Some(log) = transcript {
        let failures = log.failures();
        let _ = log.into_inner();
        if failures > 0 {
            tracing::warn!(failures, "transcript incomplete");
        }
    }

    match r {
        Ok(_) => exit_codes::EXIT_OK,
        Err(e) => {
            let code = map_dump_error(&e);
            let no_port = matches!(
                e,
                api::DumpError::NoDevice | api::DumpError::AmbiguousPort { .. }
            );
            out.emit(Event::Error {
                code,
                message: e.to_string(),
            });
            if no_port {
                out.emit(Event::HintPortSelection);
            }
            code
        }
    }
}

fn fail(out: &mut dyn Reporter, code: i32, message: String) -> i32 {
    out.emit(Event::Error { code, message });
    code
}
