#![deny(clippy::all)]

use anyhow::Context;
use std::{fs, path::PathBuf, process};
use structopt::StructOpt;
use turbo::{compile, Host, Machine};

/// The sub-command to execute.
#[derive(Debug, StructOpt)]
enum Command {
    /// Compile source code.
    #[structopt(name = "compile")]
    Compile {
        /// Path to the source code file
        #[structopt(parse(from_os_str), long = "source", short = "s")]
        source_path: PathBuf,
        /// Print a disassembly listing of the compiled program
        #[structopt(long = "disassemble", short = "d")]
        disassemble: bool,
        /// Dump the compiled program (istore, constants, typed constants)
        /// as JSON
        #[structopt(long = "json")]
        json: bool,
    },

    /// Compile and execute source code.
    #[structopt(name = "run")]
    Run {
        /// Path to the source code file
        #[structopt(parse(from_os_str), long = "source", short = "s")]
        source_path: PathBuf,
        /// Print one disassembly line per executed instruction
        #[structopt(long = "trace", short = "t")]
        trace: bool,
        /// Print elapsed wall time when the program stops
        #[structopt(long = "time")]
        time: bool,
    },
}

/// Turbo Pascal executable, for compiling and running Pascal programs
#[derive(Debug, StructOpt)]
#[structopt(name = "turbo")]
struct Opt {
    #[structopt(subcommand)]
    cmd: Command,
}

/// Host that wires program output straight to stdout.
struct TerminalHost;

impl Host for TerminalHost {
    fn writeln(&mut self, line: &str) {
        println!("{}", line);
    }
}

fn read_file(path: &PathBuf) -> anyhow::Result<String> {
    fs::read_to_string(path)
        .with_context(|| format!("Failed to read file {:?}", path))
}

fn run(opt: Opt) -> anyhow::Result<()> {
    match opt.cmd {
        Command::Compile {
            source_path,
            disassemble,
            json,
        } => {
            let source = read_file(&source_path)?;
            let bytecode = compile(&source)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&bytecode)?);
            } else if disassemble {
                print!("{}", bytecode.disassemble());
            } else {
                println!(
                    "Compiled {} instructions, {} constants",
                    bytecode.istore.len(),
                    bytecode.constants.len(),
                );
            }
        }

        Command::Run {
            source_path,
            trace,
            time,
        } => {
            let source = read_file(&source_path)?;
            let bytecode = compile(&source)?;
            let mut machine =
                Machine::new(bytecode, Box::new(TerminalHost));
            if trace {
                machine.set_debug_callback(|line| eprintln!("{}", line));
            }
            if time {
                machine.set_finish_callback(|elapsed| {
                    eprintln!("Finished in {:?}", elapsed)
                });
            }
            machine.run();
            if let Some(error) = machine.error() {
                anyhow::bail!("{}", error);
            }
        }
    }
    Ok(())
}

fn main() {
    let exit_code = match run(Opt::from_args()) {
        Ok(_) => 0,
        Err(err) => {
            eprintln!("{:#}", err);
            1
        }
    };
    process::exit(exit_code);
}
