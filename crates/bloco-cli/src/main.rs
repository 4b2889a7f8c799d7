use std::process::ExitCode;
use std::time::Instant;
use std::{env, fs, io};

use bloco::{Engine, Registry, TraceEvent, tracer::RecordingTracer};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let file_path = if args.len() > 1 { &args[1] } else { "program.xml" };
    let xml = match read_file(file_path) {
        Ok(xml) => xml,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let tracer = RecordingTracer::new();
    let engine = Engine::with_tracer(Registry::with_defaults(), Box::new(tracer.clone()));
    if let Err(err) = engine.load_program(&xml) {
        eprintln!("error:\n{err}");
        return ExitCode::FAILURE;
    }

    let start = Instant::now();
    if let Err(err) = engine.start(false) {
        eprintln!("error:\n{err}");
        return ExitCode::FAILURE;
    }
    engine.complete();
    engine.stop();
    let elapsed = start.elapsed();

    let mut failed = false;
    for event in tracer.events() {
        match event {
            TraceEvent::Broadcast { topic, message } if topic == "print" => println!("{message}"),
            TraceEvent::Broadcast { topic, message } if topic == "error" => {
                eprintln!("error: {message}");
                failed = true;
            }
            _ => {}
        }
    }

    eprintln!("ran {file_path} in {elapsed:?}");
    for variable in engine.variables() {
        match serde_json::to_string(&variable.value) {
            Ok(value) => eprintln!("  {} = {value}", variable.name),
            Err(_) => eprintln!("  {} = {}", variable.name, variable.value),
        }
    }

    if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

fn read_file(path: &str) -> io::Result<String> {
    fs::read_to_string(path)
}
