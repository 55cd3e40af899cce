use std::{env, path::PathBuf, process::ExitCode};

use loam::{CompilerState, Config, RecordingBackend, compile_program, load_program};

struct Options {
    file: Option<PathBuf>,
    search_paths: Vec<PathBuf>,
    full_match_errors: bool,
    log_match_symbols: Vec<(String, String)>,
}

fn main() -> ExitCode {
    let options = match parse_args(env::args().skip(1)) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("error: {message}");
            usage();
            return ExitCode::FAILURE;
        }
    };
    let Some(file) = options.file else {
        usage();
        return ExitCode::FAILURE;
    };

    let mut state = CompilerState::new();
    let mut search_paths = options.search_paths;
    if let Some(parent) = file.parent() {
        search_paths.push(parent.to_path_buf());
    }
    let full_match_errors = options.full_match_errors;
    state.config = Config {
        search_paths,
        full_match_errors,
        log_match_symbols: options.log_match_symbols,
    };

    let module = match load_program(&mut state, &file) {
        Ok(module) => module,
        Err(diagnostic) => {
            eprintln!("{}", diagnostic.render(&state.sources, full_match_errors));
            return ExitCode::FAILURE;
        }
    };

    let mut backend = RecordingBackend::default();
    match compile_program(&mut state, module, &mut backend) {
        Ok(_) => {
            eprintln!(
                "compiled {} specialization(s) from {}",
                backend.units.len(),
                file.display()
            );
            ExitCode::SUCCESS
        }
        Err(diagnostic) => {
            eprintln!("{}", diagnostic.render(&state.sources, full_match_errors));
            ExitCode::FAILURE
        }
    }
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Options, String> {
    let mut options = Options {
        file: None,
        search_paths: Vec::new(),
        full_match_errors: false,
        log_match_symbols: Vec::new(),
    };
    let mut args = args.peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-I" => {
                let path = args
                    .next()
                    .ok_or_else(|| "-I requires a directory".to_owned())?;
                options.search_paths.push(PathBuf::from(path));
            }
            "--full-match-errors" => options.full_match_errors = true,
            "--log-match" => {
                let glob = args
                    .next()
                    .ok_or_else(|| "--log-match requires module.symbol".to_owned())?;
                let Some((module, symbol)) = glob.rsplit_once('.') else {
                    return Err(format!("invalid --log-match glob: {glob}"));
                };
                options
                    .log_match_symbols
                    .push((module.to_owned(), symbol.to_owned()));
            }
            other if other.starts_with('-') => {
                return Err(format!("unknown option: {other}"));
            }
            _ => {
                if options.file.is_some() {
                    return Err("multiple input files".to_owned());
                }
                options.file = Some(PathBuf::from(arg));
            }
        }
    }
    Ok(options)
}

fn usage() {
    eprintln!(
        "usage: loam [options] file.{ext}\n\
         \n\
         options:\n\
         \x20 -I <dir>              add a module search path\n\
         \x20 --full-match-errors   show every overload candidate in match errors\n\
         \x20 --log-match <m.sym>   dump overload matching for a symbol (m.* for all)",
        ext = loam::SOURCE_EXTENSION
    );
}
