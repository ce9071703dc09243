//! Besouro デバッガのコア機能
//!
//! このクレートは、デバッガの中核となるロジックを提供します。
//! ターゲットプロセスの実行制御、ブレークポイントの踏み越え、シンボル解決、
//! 対話コマンドのパースを統合します。

pub mod breakpoint;
pub mod command;
pub mod debugger;
pub mod disasm;
pub mod errors;
pub mod parse;

pub use breakpoint::BreakpointSet;
pub use command::{Command, CommandError, InfoCommand, MemoryCommand, RegisterCommand};
pub use debugger::{Debugger, DebuggerOptions, ExecutionState};
pub use errors::DebuggerError;

// 他のクレートから使用するために再エクスポート
pub use besouro_dwarf::{FunctionEntry, LineInfo, LineRow, Lookup};
pub use besouro_target::{Register, RegisterDescriptor, StopReason};

/// デバッガの結果型
pub type Result<T> = anyhow::Result<T>;
