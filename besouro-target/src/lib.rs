//! Besouro ターゲットプロセス制御
//!
//! このクレートは、デバッグ対象のプロセスを制御するための低レベル機能を提供します。
//! ptrace によるプロセス起動と停止待ち、ワード単位のメモリアクセス、
//! レジスタカタログ、ソフトウェアブレークポイントを扱います。

pub mod breakpoint;
pub mod error;
pub mod memory;
pub mod process;
pub mod registers;

pub use breakpoint::{SoftwareBreakpoint, INT3_OPCODE};
pub use error::TargetError;
pub use memory::{Memory, MemoryMapping, WordMemory};
pub use process::{Process, StopReason};
pub use registers::{Register, RegisterDescriptor, Registers, REGISTER_DESCRIPTORS};

/// ターゲット制御の結果型
pub type Result<T> = anyhow::Result<T>;
