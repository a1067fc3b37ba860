use dcjit::config::Config;
use dcjit::instruction::Opcode;
use dcjit::machine::Machine;
use dcjit::operand;
use dcjit::processor::Processor;
use dcjit::test_utils::{basic, lit};
use log::{debug, info};
use std::env;
use std::fs::File;
use std::io::prelude::*;
use std::path::Path;

fn usage(program: &str) {
    println!("dcjit - chunk JIT for a 16-bit register virtual CPU");
    println!();
    println!("Usage: {} [image.bin] [--config file.toml]", program);
    println!();
    println!("With an image path, loads it as big-endian 16-bit words at");
    println!("address 0 and runs the dispatch loop. Without one, runs the");
    println!("built-in sample program for a single chunk.");
}

/// The reference sample program:
///   add [next], 1   with the literal word holding address 1
///   set b, 0x1f
///   set pc, pc
fn sample_program() -> Vec<u16> {
    vec![
        basic(Opcode::Add, operand::NEXT_LITERAL, lit(1)),
        0x0001,
        basic(Opcode::Set, 0x01, lit(0x1F)),
        basic(Opcode::Set, operand::PC, operand::PC),
    ]
}

fn load_image(path: &str) -> Result<Vec<u16>, String> {
    let mut file = File::open(path).map_err(|e| format!("cannot open image '{}': {}", path, e))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|e| format!("cannot read image '{}': {}", path, e))?;
    if bytes.len() % 2 != 0 {
        return Err(format!("image '{}' has an odd byte length", path));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        usage(&args[0]);
        return Ok(());
    }

    let mut config = Config::default();
    let mut image_path: Option<String> = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                let path = args
                    .get(i)
                    .ok_or("--config needs a file argument".to_string())?;
                config = Config::load(Path::new(path))?;
                debug!("loaded config from {}: {:?}", path, config);
            }
            other => image_path = Some(other.to_string()),
        }
        i += 1;
    }

    let mut machine = Machine::new();
    match image_path {
        Some(path) => {
            let words = load_image(&path)?;
            info!("loaded {} words from {}", words.len(), path);
            machine.load(0, &words)?;
            let mut processor = Processor::with_config(machine, config);
            processor.run()?;
            println!("{}", processor.machine);
            println!("chunks dispatched: {}", processor.chunks_dispatched());
        }
        None => {
            info!("no image given, running the built-in sample");
            // the literal word at address 1 doubles as the data cell
            machine.load(0, &sample_program())?;
            let mut processor = Processor::with_config(machine, config);
            processor.dispatch();
            println!("{}", processor.machine);
            println!(
                "mem[1]={:x} pc={:x}",
                processor.machine.read(1),
                processor.machine.pc
            );
        }
    }

    Ok(())
}
