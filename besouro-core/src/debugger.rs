//! デバッガのメインロジック
//!
//! トレース対象プロセスの実行制御（起動、実行継続、ブレークポイントの踏み越え、停止待ち）と、
//! ブレークポイント・レジスタ・メモリ・シンボル情報へのアクセスをまとめます。

use crate::{breakpoint::BreakpointSet, disasm, DebuggerError, Result};
use besouro_dwarf::{
    DwarfLoader, FunctionEntry, LineInfo, LineInfoProvider, LineRow, Lookup, SymbolResolver,
    SymbolTable,
};
use besouro_target::{
    Memory, Process, Register, RegisterDescriptor, Registers, StopReason, WordMemory,
    REGISTER_DESCRIPTORS,
};
use nix::sys::signal::Signal;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// デバッガの設定
#[derive(Debug, Clone)]
pub struct DebuggerOptions {
    /// 起動するプロセスのアドレス空間配置のランダム化を無効にする
    pub disable_aslr: bool,
    /// ブレークポイントのアドレスが命令の先頭かどうかを検査する
    pub check_instruction_boundary: bool,
}

impl Default for DebuggerOptions {
    fn default() -> Self {
        Self {
            disable_aslr: true,
            check_instruction_boundary: true,
        }
    }
}

/// トレース対象の実行状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    /// プロセスが起動されていない
    NotStarted,
    /// 停止中（コマンドを受け付ける）
    Stopped,
    /// プロセスが終了した
    Terminated,
}

/// 起動中のトレース対象
struct Tracee {
    process: Process,
    memory: Memory,
    registers: Registers,
}

/// デバッグ情報
struct DebugInfo {
    resolver: SymbolResolver<DwarfLoader>,
    symbols: SymbolTable,
    lines: LineInfoProvider,
    is_pie: bool,
}

/// デバッガ
pub struct Debugger {
    options: DebuggerOptions,
    /// デバッグ対象プロセス
    tracee: Option<Tracee>,
    state: ExecutionState,
    /// 次の実行継続で配送するシグナル
    pending_signal: Option<Signal>,
    /// 直前の停止がブレークポイントのトラップだった場合、そのアドレス
    trapped_at: Option<u64>,
    /// 実行ファイルのロードバイアス（PIEの場合のみ非ゼロ）
    load_bias: u64,
    /// 読み込んだ実行ファイルのパス
    program: Option<PathBuf>,
    debug_info: Option<DebugInfo>,
    /// ブレークポイント管理
    breakpoints: BreakpointSet,
}

impl Debugger {
    /// 新しいデバッガを作成する
    pub fn new(options: DebuggerOptions) -> Self {
        Self {
            options,
            tracee: None,
            state: ExecutionState::NotStarted,
            pending_signal: None,
            trapped_at: None,
            load_bias: 0,
            program: None,
            debug_info: None,
            breakpoints: BreakpointSet::new(),
        }
    }

    /// 停止中のトレース対象を取得する
    fn require_stopped(&self) -> Result<&Tracee> {
        match (&self.tracee, self.state) {
            (_, ExecutionState::Terminated) => Err(DebuggerError::ProcessTerminated.into()),
            (Some(tracee), ExecutionState::Stopped) => Ok(tracee),
            _ => Err(DebuggerError::NotLaunched.into()),
        }
    }

    fn require_stopped_mut(&mut self) -> Result<&mut Tracee> {
        match (&mut self.tracee, self.state) {
            (_, ExecutionState::Terminated) => Err(DebuggerError::ProcessTerminated.into()),
            (Some(tracee), ExecutionState::Stopped) => Ok(tracee),
            _ => Err(DebuggerError::NotLaunched.into()),
        }
    }

    fn require_debug_info(&self) -> Result<&DebugInfo> {
        self.debug_info
            .as_ref()
            .ok_or_else(|| DebuggerError::DwarfNotLoaded.into())
    }

    /// ELFバイナリからDWARF情報を読み込む
    pub fn load_binary<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = std::fs::canonicalize(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to resolve {:?}: {}", path.as_ref(), e))?;

        let loader = DwarfLoader::load(&path)?;
        let symbols = SymbolTable::new(&loader);
        let lines = LineInfoProvider::new(&loader)?;
        let is_pie = loader.is_pie();

        debug!(path = %path.display(), symbols = symbols.len(), is_pie, "binary loaded");

        self.debug_info = Some(DebugInfo {
            resolver: SymbolResolver::new(loader),
            symbols,
            lines,
            is_pie,
        });
        self.program = Some(path);
        Ok(())
    }

    /// 実行可能ファイルを起動してデバッグを開始する
    ///
    /// プロセスはexecv直後に停止状態で開始されます。
    pub fn launch<P: AsRef<Path>>(&mut self, program: P, args: &[String]) -> Result<()> {
        if self.tracee.is_some() && self.state != ExecutionState::Terminated {
            anyhow::bail!("A process is already being debugged");
        }

        let process = Process::spawn(program.as_ref(), args, self.options.disable_aslr)?;
        let pid = process.pid();
        let tracee = Tracee {
            process,
            memory: Memory::new(pid),
            registers: Registers::new(pid),
        };

        self.load_bias = match (&self.debug_info, &self.program) {
            (Some(info), Some(path)) if info.is_pie => {
                tracee.memory.get_base_address(&path.to_string_lossy())? as u64
            }
            _ => 0,
        };
        debug!(pid, "process launched, load bias 0x{:x}", self.load_bias);

        self.tracee = Some(tracee);
        self.state = ExecutionState::Stopped;
        self.pending_signal = None;
        self.trapped_at = None;
        self.breakpoints = BreakpointSet::new();
        Ok(())
    }

    /// 現在の実行状態
    pub fn state(&self) -> ExecutionState {
        self.state
    }

    /// トレース対象のプロセスID
    pub fn pid(&self) -> Option<i32> {
        self.tracee.as_ref().map(|t| t.process.pid())
    }

    /// 実行ファイルのロードバイアス
    pub fn load_bias(&self) -> u64 {
        self.load_bias
    }

    /// プログラムカウンタを取得する
    pub fn get_pc(&self) -> Result<u64> {
        self.require_stopped()?.registers.get_pc()
    }

    /// プログラムカウンタを設定する
    pub fn set_pc(&self, pc: u64) -> Result<()> {
        self.require_stopped()?.registers.set_pc(pc)
    }

    /// ブレークポイントを設定する
    ///
    /// 同じアドレスの既存のブレークポイントは置き換えます。
    pub fn set_breakpoint(&mut self, address: u64) -> Result<()> {
        self.require_stopped()?;

        if self.options.check_instruction_boundary {
            self.check_instruction_boundary(address)?;
        }

        let tracee = self.tracee.as_ref().ok_or(DebuggerError::NotLaunched)?;
        self.breakpoints.insert_and_enable(address, &tracee.memory)?;
        debug!("breakpoint set at 0x{:x}", address);
        Ok(())
    }

    /// シンボル名の位置にブレークポイントを設定し、そのアドレスを返す
    pub fn set_breakpoint_at_symbol(&mut self, name: &str) -> Result<u64> {
        let address = self.resolve_symbol(name)?;
        self.set_breakpoint(address)?;
        Ok(address)
    }

    /// シンボル名から実行時アドレスを解決する
    pub fn resolve_symbol(&self, name: &str) -> Result<u64> {
        let info = self.require_debug_info()?;
        info.symbols
            .resolve(name)
            .map(|addr| addr + self.load_bias)
            .ok_or_else(|| DebuggerError::SymbolNotFound(name.to_string()).into())
    }

    /// アドレスが既知の関数内にある場合、命令の先頭かどうかを検査する
    fn check_instruction_boundary(&self, address: u64) -> Result<()> {
        let function = match self.function_at(address) {
            Ok(Lookup::Found(function)) => function,
            Ok(Lookup::NotFound) => {
                trace!("0x{:x} is outside known functions, skipping boundary check", address);
                return Ok(());
            }
            Err(e) if e.downcast_ref::<DebuggerError>() == Some(&DebuggerError::DwarfNotLoaded) => {
                return Ok(());
            }
            Err(e) => {
                warn!("skipping boundary check at 0x{:x}: {:#}", address, e);
                return Ok(());
            }
        };

        let start = function.range.begin + self.load_bias;
        if address == start {
            return Ok(());
        }

        let end = function.range.end + self.load_bias;
        let code = self.read_bytes(start, (end - start) as usize)?;

        match disasm::is_instruction_boundary(&code, start, address)? {
            Some(true) => Ok(()),
            Some(false) => Err(DebuggerError::NotInstructionBoundary(address).into()),
            None => {
                warn!("could not decode {} up to 0x{:x}", function.display_name(), address);
                Ok(())
            }
        }
    }

    /// すべてのブレークポイントを取得する
    pub fn breakpoints(&self) -> &BreakpointSet {
        &self.breakpoints
    }

    /// 実行を継続し、次の停止まで待機する
    ///
    /// 直前にブレークポイントで停止していた場合は、先にそのブレークポイントを踏み越えます。
    pub fn continue_execution(&mut self) -> Result<StopReason> {
        self.require_stopped()?;

        if let Some(reason) = self.step_over_breakpoint()? {
            if reason.is_terminal() {
                return Ok(reason);
            }
        }

        let signal = self.pending_signal.take();
        self.require_stopped()?.process.resume(signal)?;
        self.wait_for_signal()
    }

    /// 1命令だけステップ実行する
    ///
    /// 直前にブレークポイントで停止していた場合は、踏み越えの1ステップがそのまま1命令になります。
    pub fn step_instruction(&mut self) -> Result<StopReason> {
        self.require_stopped()?;

        if let Some(reason) = self.step_over_breakpoint()? {
            return Ok(reason);
        }

        let reason = self.require_stopped_mut()?.process.step()?;
        self.observe(reason)
    }

    /// トレース対象の状態が変わるまで待機する
    pub fn wait_for_signal(&mut self) -> Result<StopReason> {
        let tracee = self
            .tracee
            .as_mut()
            .ok_or(DebuggerError::NotLaunched)?;
        if self.state == ExecutionState::Terminated {
            return Err(DebuggerError::ProcessTerminated.into());
        }

        let reason = tracee.process.wait()?;
        self.observe(reason)
    }

    /// 停止イベントを記録し、実行状態を更新する
    fn observe(&mut self, reason: StopReason) -> Result<StopReason> {
        debug!(?reason, "tracee stopped");
        self.trapped_at = None;

        let reason = match reason {
            StopReason::Exited(_) | StopReason::Killed(_) => {
                self.state = ExecutionState::Terminated;
                reason
            }
            StopReason::Breakpoint => {
                self.state = ExecutionState::Stopped;
                let address = self.get_pc()?.wrapping_sub(1);
                if self.breakpoints.is_enabled_at(address) {
                    self.trapped_at = Some(address);
                    StopReason::Breakpoint
                } else {
                    StopReason::Signal(Signal::SIGTRAP)
                }
            }
            StopReason::Signal(signal) => {
                self.state = ExecutionState::Stopped;
                self.pending_signal = Some(signal);
                reason
            }
            StopReason::Step | StopReason::Other => {
                self.state = ExecutionState::Stopped;
                reason
            }
        };

        Ok(reason)
    }

    /// ブレークポイントを踏み越える
    ///
    /// INT3を実行した直後はPCがブレークポイントのアドレス+1を指しています。
    /// 直前の停止がそのブレークポイントのトラップで、まだ有効であれば、
    /// PCを戻してブレークポイントを無効化し、元の命令を1つ実行してから再び有効化します。
    /// シングルステップなど他の理由でPCがブレークポイントの直後にある場合は何もしません。
    ///
    /// 踏み越えた場合はそのステップの停止イベントを、何もしなかった場合は `None` を返します。
    pub fn step_over_breakpoint(&mut self) -> Result<Option<StopReason>> {
        let candidate = self.get_pc()?.wrapping_sub(1);
        if self.trapped_at != Some(candidate) || !self.breakpoints.is_enabled_at(candidate) {
            return Ok(None);
        }

        trace!("stepping over breakpoint at 0x{:x}", candidate);
        self.set_pc(candidate)?;

        let tracee = self.tracee.as_mut().ok_or(DebuggerError::NotLaunched)?;
        let bp = self
            .breakpoints
            .get_mut(candidate)
            .ok_or_else(|| anyhow::anyhow!("Breakpoint at 0x{:x} vanished", candidate))?;

        bp.disable(&tracee.memory)?;
        let reason = tracee.process.step()?;
        if !reason.is_terminal() {
            bp.enable(&tracee.memory)?;
        }

        self.observe(reason).map(Some)
    }

    /// レジスタの値を読み取る
    pub fn read_register(&self, register: Register) -> Result<u64> {
        self.require_stopped()?.registers.get(register)
    }

    /// レジスタに値を書き込む
    pub fn write_register(&self, register: Register, value: u64) -> Result<()> {
        self.require_stopped()?.registers.set(register, value)
    }

    /// 名前でレジスタを検索する
    pub fn register_by_name(name: &str) -> Result<Register> {
        Register::from_name(name).ok_or_else(|| DebuggerError::UnknownRegister(name.to_string()).into())
    }

    /// 全レジスタの値を記述子表の順に取得する
    pub fn dump_registers(&self) -> Result<Vec<(&'static RegisterDescriptor, u64)>> {
        let regs = self.require_stopped()?.registers.read()?;
        Ok(REGISTER_DESCRIPTORS
            .iter()
            .map(|d| (d, besouro_target::registers::read_register(&regs, d.register)))
            .collect())
    }

    /// メモリから1ワード読み取る
    ///
    /// 有効なブレークポイントのINT3は元のバイトに戻した値を返します。
    pub fn read_memory(&self, address: u64) -> Result<u64> {
        let word = self.require_stopped()?.memory.read_word(address)?;
        let mut bytes = word.to_le_bytes();
        self.breakpoints.restore_original_bytes(address, &mut bytes);
        Ok(u64::from_le_bytes(bytes))
    }

    /// メモリに1ワード書き込む
    ///
    /// 有効なブレークポイントの位置にはINT3を残し、書き込んだバイトは
    /// 無効化時に戻すバイトとして記録します。
    pub fn write_memory(&mut self, address: u64, value: u64) -> Result<()> {
        self.require_stopped()?;

        let mut bytes = value.to_le_bytes();
        let written = self.breakpoints.overlay_write(address, &mut bytes);

        let tracee = self.tracee.as_ref().ok_or(DebuggerError::NotLaunched)?;
        tracee.memory.write_word(address, u64::from_le_bytes(bytes))?;

        self.breakpoints.record_written_bytes(&written)
    }

    /// メモリからバイト列を読み取る（ブレークポイントは元のバイトに戻す）
    pub fn read_bytes(&self, address: u64, len: usize) -> Result<Vec<u8>> {
        let mut bytes = self.require_stopped()?.memory.read(address as usize, len)?;
        self.breakpoints.restore_original_bytes(address, &mut bytes);
        Ok(bytes)
    }

    /// 実行時アドレスをデバッグ情報上のアドレスに変換する
    fn to_debug_address(&self, address: u64) -> Option<u64> {
        address.checked_sub(self.load_bias)
    }

    /// 実行時アドレスを含む関数エントリを検索する
    pub fn function_at(&self, address: u64) -> Result<Lookup<FunctionEntry>> {
        let info = self.require_debug_info()?;
        match self.to_debug_address(address) {
            Some(addr) => info.resolver.function_at(addr),
            None => Ok(Lookup::NotFound),
        }
    }

    /// 実行時アドレスに対応する行番号テーブルの行を検索する
    pub fn line_at(&self, address: u64) -> Result<Lookup<LineRow>> {
        let info = self.require_debug_info()?;
        match self.to_debug_address(address) {
            Some(addr) => info.resolver.line_at(addr),
            None => Ok(Lookup::NotFound),
        }
    }

    /// 実行時アドレスを含む最寄りのソース位置を検索する
    pub fn source_location(&self, address: u64) -> Result<Lookup<LineInfo>> {
        let info = self.require_debug_info()?;
        match self.to_debug_address(address) {
            Some(addr) => info.lines.lookup(addr),
            None => Ok(Lookup::NotFound),
        }
    }

    /// 実行時アドレスを含むELFシンボル名を検索する
    pub fn symbol_name_at(&self, address: u64) -> Option<String> {
        let info = self.debug_info.as_ref()?;
        let addr = self.to_debug_address(address)?;
        info.symbols
            .reverse_resolve(addr)
            .map(|sym| sym.display_name().to_string())
    }

    /// メモリアクセスを取得する
    pub fn memory(&self) -> Option<&Memory> {
        self.tracee.as_ref().map(|t| &t.memory)
    }
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new(DebuggerOptions::default())
    }
}
