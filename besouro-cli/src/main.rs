//! Besouro CLI - コマンドラインインターフェース
//!
//! ptraceデバッガ besouro のREPLインターフェース

use anyhow::Result;
use besouro_core::{
    parse, Command, CommandError, Debugger, DebuggerOptions, InfoCommand, Lookup, MemoryCommand,
    RegisterCommand, StopReason,
};
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Besouro - ptrace debugger for x86-64 Linux
#[derive(Parser)]
#[command(name = "besouro")]
#[command(version)]
#[command(about = "Native process debugger for x86-64 Linux executables", long_about = None)]
struct Cli {
    /// Keep address space layout randomization enabled in the debuggee
    #[arg(long)]
    aslr: bool,

    /// Do not check that breakpoint addresses are instruction boundaries
    #[arg(long)]
    no_boundary_check: bool,

    /// Path to the executable binary
    program: PathBuf,

    /// Arguments to pass to the program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

/// コマンド処理後のREPLの動作
enum Flow {
    Continue,
    Quit,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut debugger = init_debugger(&cli)?;
    run_repl(&mut debugger)?;

    Ok(())
}

/// デバッガを初期化してプロセスを起動する
fn init_debugger(cli: &Cli) -> Result<Debugger> {
    let options = DebuggerOptions {
        disable_aslr: !cli.aslr,
        check_instruction_boundary: !cli.no_boundary_check,
    };
    let mut debugger = Debugger::new(options);

    // DWARF情報がなくてもアドレス指定でのデバッグは可能
    if let Err(e) = debugger.load_binary(&cli.program) {
        warn!("failed to load debug info from {}: {:#}", cli.program.display(), e);
    }

    debugger.launch(&cli.program, &cli.args)?;
    if let Some(pid) = debugger.pid() {
        println!("Started {} (pid {})", cli.program.display(), pid);
    }

    Ok(debugger)
}

/// REPLループを実行する
fn run_repl(debugger: &mut Debugger) -> Result<()> {
    let mut rl = DefaultEditor::new()?;

    loop {
        match rl.readline("besouro> ") {
            Ok(line) => {
                if !line.trim().is_empty() {
                    rl.add_history_entry(line.as_str())?;
                }

                match Command::parse(&line) {
                    Ok(Some(command)) => match handle_command(debugger, command) {
                        Ok(Flow::Quit) => break,
                        Ok(Flow::Continue) => {}
                        Err(e) => eprintln!("Error: {:#}", e),
                    },
                    Ok(None) => {}
                    Err(e) => report_command_error(&e),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}

fn report_command_error(error: &CommandError) {
    eprintln!("{}", error);
    if matches!(error, CommandError::Unknown(_)) {
        eprintln!("Type 'help' for available commands.");
    }
}

fn handle_command(debugger: &mut Debugger, command: Command) -> Result<Flow> {
    debug!(?command, "dispatch");

    match command {
        Command::Help => print_help(),
        Command::Quit => return Ok(Flow::Quit),
        Command::Break(loc) => handle_break(debugger, &loc)?,
        Command::Continue => {
            let reason = debugger.continue_execution()?;
            report_stop(debugger, &reason);
        }
        Command::StepInstruction => {
            let reason = debugger.step_instruction()?;
            report_stop(debugger, &reason);
        }
        Command::Register(cmd) => handle_register(debugger, cmd)?,
        Command::Memory(cmd) => handle_memory(debugger, cmd)?,
        Command::Info(cmd) => handle_info(debugger, cmd)?,
    }

    Ok(Flow::Continue)
}

/// Breakコマンドを処理する
fn handle_break(debugger: &mut Debugger, loc: &str) -> Result<()> {
    if parse::looks_like_address(loc) {
        let addr = parse::parse_address(loc)?;
        debugger.set_breakpoint(addr)?;
        println!("Breakpoint set at 0x{:x}", addr);
    } else {
        let addr = debugger.set_breakpoint_at_symbol(loc)?;
        println!("Breakpoint set at 0x{:x} ({})", addr, loc);
    }
    Ok(())
}

/// 停止位置を表示する
fn report_stop(debugger: &Debugger, reason: &StopReason) {
    match reason {
        StopReason::Exited(code) => {
            println!("Process exited with code {}", code);
            return;
        }
        StopReason::Killed(signal) => {
            println!("Process killed by {:?}", signal);
            return;
        }
        StopReason::Breakpoint => println!("Breakpoint hit"),
        StopReason::Signal(signal) => println!("Received signal {:?}", signal),
        StopReason::Step | StopReason::Other => {}
    }

    let pc = match debugger.get_pc() {
        Ok(pc) => pc,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return;
        }
    };

    // INT3の直後で止まっている場合は、ブレークポイントのアドレスを表示する
    let location = match reason {
        StopReason::Breakpoint => pc.wrapping_sub(1),
        _ => pc,
    };

    let mut line = format!("Stopped at 0x{:x}", location);
    if let Some(name) = function_name(debugger, location) {
        line.push_str(&format!(" in {}", name));
    }
    if let Ok(Lookup::Found(info)) = debugger.source_location(location) {
        line.push_str(&format!(" at {}:{}", info.file, info.line));
    }
    println!("{}", line);
}

/// アドレスを含む関数名（DWARF、次にELFシンボル）
fn function_name(debugger: &Debugger, addr: u64) -> Option<String> {
    match debugger.function_at(addr) {
        Ok(Lookup::Found(function)) => Some(function.display_name()),
        _ => debugger.symbol_name_at(addr),
    }
}

/// 引数のアドレス、省略時はPC
fn address_or_pc(debugger: &Debugger, arg: Option<&str>) -> Result<u64> {
    match arg {
        Some(s) => parse::parse_address(s),
        None => debugger.get_pc(),
    }
}

/// Registerコマンドを処理する
fn handle_register(debugger: &Debugger, cmd: RegisterCommand) -> Result<()> {
    match cmd {
        RegisterCommand::Dump => {
            for (descriptor, value) in debugger.dump_registers()? {
                println!("{:<8} 0x{:016x}", descriptor.name, value);
            }
        }
        RegisterCommand::Read(name) => {
            let register = Debugger::register_by_name(&name)?;
            println!("{} = 0x{:x}", register.name(), debugger.read_register(register)?);
        }
        RegisterCommand::Write(name, value) => {
            let register = Debugger::register_by_name(&name)?;
            let value = parse::parse_value(&value)?;
            debugger.write_register(register, value)?;
        }
    }
    Ok(())
}

/// Memoryコマンドを処理する
fn handle_memory(debugger: &mut Debugger, cmd: MemoryCommand) -> Result<()> {
    match cmd {
        MemoryCommand::Read(addr) => {
            let addr = parse::parse_address(&addr)?;
            println!("0x{:x}: 0x{:016x}", addr, debugger.read_memory(addr)?);
        }
        MemoryCommand::Write(addr, value) => {
            let addr = parse::parse_address(&addr)?;
            let value = parse::parse_value(&value)?;
            debugger.write_memory(addr, value)?;
        }
    }
    Ok(())
}

/// Infoコマンドを処理する
fn handle_info(debugger: &Debugger, cmd: InfoCommand) -> Result<()> {
    match cmd {
        InfoCommand::Function(addr) => {
            let addr = address_or_pc(debugger, addr.as_deref())?;
            match debugger.function_at(addr)? {
                Lookup::Found(function) => {
                    let bias = debugger.load_bias();
                    println!(
                        "0x{:x} is in {} [0x{:x}, 0x{:x})",
                        addr,
                        function.display_name(),
                        function.range.begin + bias,
                        function.range.end + bias
                    );
                }
                Lookup::NotFound => println!("Could not find function at 0x{:x}", addr),
            }
        }
        InfoCommand::Line(addr) => {
            let addr = address_or_pc(debugger, addr.as_deref())?;
            match debugger.line_at(addr)? {
                Lookup::Found(row) => {
                    let stmt = if row.is_stmt { "" } else { " (not a statement boundary)" };
                    println!("0x{:x} is at {}:{}{}", addr, row.file, row.line, stmt);
                }
                Lookup::NotFound => match debugger.source_location(addr)? {
                    Lookup::Found(info) => println!(
                        "No line table row starts at 0x{:x} (nearest: {}:{})",
                        addr, info.file, info.line
                    ),
                    Lookup::NotFound => println!("Could not find line at 0x{:x}", addr),
                },
            }
        }
        InfoCommand::Breakpoints => {
            let breakpoints = debugger.breakpoints().all();
            if breakpoints.is_empty() {
                println!("No breakpoints");
            }
            for bp in breakpoints {
                let state = if bp.is_enabled() { "enabled" } else { "disabled" };
                match function_name(debugger, bp.address()) {
                    Some(name) => println!("0x{:x} {} in {}", bp.address(), state, name),
                    None => println!("0x{:x} {}", bp.address(), state),
                }
            }
        }
    }
    Ok(())
}

fn print_help() {
    println!("Available commands:");
    println!();
    println!("  help (h)                          - Show this help message");
    println!("  quit (q, exit)                    - Exit the debugger");
    println!();
    println!("Execution:");
    println!("  break (b) <addr|symbol>           - Set breakpoint at address or symbol");
    println!("  continue (c)                      - Continue execution");
    println!("  stepi (si)                        - Execute one instruction");
    println!();
    println!("Inspection:");
    println!("  register (reg) dump               - Show all registers");
    println!("  register (reg) read <name>        - Show one register");
    println!("  register (reg) write <name> <val> - Set a register");
    println!("  memory (mem) read <addr>          - Read one word");
    println!("  memory (mem) write <addr> <val>   - Write one word");
    println!("  info function [addr]              - Function containing addr (default: pc)");
    println!("  info line [addr]                  - Line table row at addr (default: pc)");
    println!("  info breakpoints                  - List breakpoints");
    println!();
    println!("Examples:");
    println!("  break main");
    println!("  break 0x401136");
    println!("  register write rax 0x10");
}
