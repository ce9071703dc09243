//! レジスタアクセス機能
//!
//! 論理レジスタ（[`Register`]）とDWARFレジスタ番号・名前の対応表は純粋な参照データです。
//! ptraceのレジスタダンプ（`user_regs_struct`）へのアクセスは
//! [`read_register`] / [`write_register`] のフィールド単位の変換で行い、
//! 構造体のメモリレイアウトには依存しません。

use crate::Result;
use nix::libc::user_regs_struct;
use nix::unistd::Pid;

/// x86-64の論理レジスタ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rdi,
    Rsi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    Rip,
    Rflags,
    Cs,
    OrigRax,
    FsBase,
    GsBase,
    Fs,
    Gs,
    Ss,
    Ds,
    Es,
}

/// レジスタ記述子
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDescriptor {
    pub register: Register,
    /// DWARFレジスタ番号（RIPとORIG_RAXには番号がない）
    pub dwarf: Option<u16>,
    pub name: &'static str,
}

const fn descriptor(register: Register, dwarf: Option<u16>, name: &'static str) -> RegisterDescriptor {
    RegisterDescriptor { register, dwarf, name }
}

/// 全レジスタの記述子（27個）
pub static REGISTER_DESCRIPTORS: [RegisterDescriptor; 27] = [
    descriptor(Register::R15, Some(15), "r15"),
    descriptor(Register::R14, Some(14), "r14"),
    descriptor(Register::R13, Some(13), "r13"),
    descriptor(Register::R12, Some(12), "r12"),
    descriptor(Register::Rbp, Some(6), "rbp"),
    descriptor(Register::Rbx, Some(3), "rbx"),
    descriptor(Register::R11, Some(11), "r11"),
    descriptor(Register::R10, Some(10), "r10"),
    descriptor(Register::R9, Some(9), "r9"),
    descriptor(Register::R8, Some(8), "r8"),
    descriptor(Register::Rax, Some(0), "rax"),
    descriptor(Register::Rcx, Some(2), "rcx"),
    descriptor(Register::Rdx, Some(1), "rdx"),
    descriptor(Register::Rsi, Some(4), "rsi"),
    descriptor(Register::Rdi, Some(5), "rdi"),
    descriptor(Register::OrigRax, None, "orig_rax"),
    descriptor(Register::Rip, None, "rip"),
    descriptor(Register::Cs, Some(51), "cs"),
    descriptor(Register::Rflags, Some(49), "eflags"),
    descriptor(Register::Rsp, Some(7), "rsp"),
    descriptor(Register::Ss, Some(52), "ss"),
    descriptor(Register::FsBase, Some(58), "fs_base"),
    descriptor(Register::GsBase, Some(59), "gs_base"),
    descriptor(Register::Ds, Some(53), "ds"),
    descriptor(Register::Es, Some(50), "es"),
    descriptor(Register::Fs, Some(54), "fs"),
    descriptor(Register::Gs, Some(55), "gs"),
];

impl Register {
    /// このレジスタの記述子を取得する
    ///
    /// 記述子表は全レジスタを網羅しているため、見つからない場合は不変条件違反としてpanicします。
    pub fn descriptor(self) -> &'static RegisterDescriptor {
        REGISTER_DESCRIPTORS
            .iter()
            .find(|d| d.register == self)
            .expect("register descriptor table covers every register")
    }

    /// レジスタ名
    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    /// DWARFレジスタ番号
    pub fn dwarf_number(self) -> Option<u16> {
        self.descriptor().dwarf
    }

    /// 名前からレジスタを検索する（大文字小文字は区別しない）
    pub fn from_name(name: &str) -> Option<Self> {
        REGISTER_DESCRIPTORS
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
            .map(|d| d.register)
    }

    /// DWARFレジスタ番号からレジスタを検索する
    pub fn from_dwarf(number: u16) -> Option<Self> {
        REGISTER_DESCRIPTORS
            .iter()
            .find(|d| d.dwarf == Some(number))
            .map(|d| d.register)
    }
}

/// レジスタダンプの対応フィールドへの可変参照を取得する
fn field_mut(regs: &mut user_regs_struct, register: Register) -> &mut u64 {
    match register {
        Register::Rax => &mut regs.rax,
        Register::Rbx => &mut regs.rbx,
        Register::Rcx => &mut regs.rcx,
        Register::Rdx => &mut regs.rdx,
        Register::Rdi => &mut regs.rdi,
        Register::Rsi => &mut regs.rsi,
        Register::Rbp => &mut regs.rbp,
        Register::Rsp => &mut regs.rsp,
        Register::R8 => &mut regs.r8,
        Register::R9 => &mut regs.r9,
        Register::R10 => &mut regs.r10,
        Register::R11 => &mut regs.r11,
        Register::R12 => &mut regs.r12,
        Register::R13 => &mut regs.r13,
        Register::R14 => &mut regs.r14,
        Register::R15 => &mut regs.r15,
        Register::Rip => &mut regs.rip,
        Register::Rflags => &mut regs.eflags,
        Register::Cs => &mut regs.cs,
        Register::OrigRax => &mut regs.orig_rax,
        Register::FsBase => &mut regs.fs_base,
        Register::GsBase => &mut regs.gs_base,
        Register::Fs => &mut regs.fs,
        Register::Gs => &mut regs.gs,
        Register::Ss => &mut regs.ss,
        Register::Ds => &mut regs.ds,
        Register::Es => &mut regs.es,
    }
}

/// レジスタダンプから1つのレジスタ値を取り出す
pub fn read_register(regs: &user_regs_struct, register: Register) -> u64 {
    let mut copy = *regs;
    *field_mut(&mut copy, register)
}

/// レジスタダンプ中の1つのレジスタ値を書き換える
pub fn write_register(regs: &mut user_regs_struct, register: Register, value: u64) {
    *field_mut(regs, register) = value;
}

/// レジスタ情報
pub struct Registers {
    pid: Pid,
}

impl Registers {
    /// レジスタアクセスを作成する
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    /// レジスタを読み取る
    pub fn read(&self) -> Result<user_regs_struct> {
        let regs = nix::sys::ptrace::getregs(self.pid)?;
        Ok(regs)
    }

    /// レジスタに書き込む
    pub fn write(&self, regs: user_regs_struct) -> Result<()> {
        nix::sys::ptrace::setregs(self.pid, regs)?;
        Ok(())
    }

    /// 指定したレジスタの値を取得する
    pub fn get(&self, register: Register) -> Result<u64> {
        let regs = self.read()?;
        Ok(read_register(&regs, register))
    }

    /// 指定したレジスタに値を設定する
    ///
    /// ptraceは部分的な書き込みをサポートしないため、ダンプ全体を読み直してから書き戻します。
    pub fn set(&self, register: Register, value: u64) -> Result<()> {
        let mut regs = self.read()?;
        write_register(&mut regs, register, value);
        self.write(regs)
    }

    /// プログラムカウンタ（RIP）を取得する
    pub fn get_pc(&self) -> Result<u64> {
        self.get(Register::Rip)
    }

    /// プログラムカウンタ（RIP）を設定する
    pub fn set_pc(&self, pc: u64) -> Result<()> {
        self.set(Register::Rip, pc)
    }
}
