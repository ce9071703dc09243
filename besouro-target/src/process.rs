//! プロセス制御機能

use crate::{Result, TargetError};
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use std::ffi::CString;
use std::path::Path;
use tracing::{debug, trace};

/// 停止イベントの種類
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// ブレークポイントヒット（実行継続後のSIGTRAP）
    Breakpoint,
    /// ステップ実行完了（シングルステップ後のSIGTRAP）
    Step,
    /// シグナル受信
    Signal(Signal),
    /// プロセス終了
    Exited(i32),
    /// シグナルによるプロセス終了
    Killed(Signal),
    /// その他の停止
    Other,
}

impl StopReason {
    /// プロセスが終了したかどうか
    pub fn is_terminal(&self) -> bool {
        matches!(self, StopReason::Exited(_) | StopReason::Killed(_))
    }

    /// waitpidの結果を停止イベントに変換する
    ///
    /// `trap` はSIGTRAP停止をどの種類として扱うかを指定します。
    fn from_wait_status(status: WaitStatus, trap: StopReason) -> Self {
        match status {
            WaitStatus::Stopped(_, Signal::SIGTRAP) => trap,
            WaitStatus::Stopped(_, signal) => StopReason::Signal(signal),
            WaitStatus::Exited(_, code) => StopReason::Exited(code),
            WaitStatus::Signaled(_, signal, _) => StopReason::Killed(signal),
            _ => StopReason::Other,
        }
    }
}

/// デバッグ対象のプロセス
pub struct Process {
    pid: Pid,
    exited: bool,
}

impl Process {
    /// 実行可能ファイルを起動してデバッグ対象プロセスを開始する
    ///
    /// 新しいプロセスをforkして起動し、PTRACE_TRACEMEを設定してから
    /// 指定された実行可能ファイルをexecvで実行します。
    /// プロセスはexecv直後の最初の命令で停止状態で返されます。
    ///
    /// `disable_aslr` が真の場合、子プロセスのアドレス空間配置のランダム化を無効にします。
    pub fn spawn<P: AsRef<Path>>(program: P, args: &[String], disable_aslr: bool) -> Result<Self> {
        use nix::unistd::{execv, fork, ForkResult};

        let program_path = program.as_ref().to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid program path"))?;
        let program_cstring = CString::new(program_path)?;

        let mut cstring_args = vec![program_cstring.clone()];
        for arg in args {
            cstring_args.push(CString::new(arg.as_str())?);
        }

        // fork後の子プロセスではアロケーションを避けるため、引数はここで用意しておく
        match unsafe { fork()? } {
            ForkResult::Parent { child } => {
                debug!(pid = child.as_raw(), program = program_path, "forked tracee");

                match waitpid(child, None)? {
                    WaitStatus::Stopped(_, Signal::SIGTRAP) => Ok(Self {
                        pid: child,
                        exited: false,
                    }),
                    WaitStatus::Exited(_, code) => Err(TargetError::LaunchFailed(format!(
                        "{} exited with status {} before its first instruction",
                        program_path, code
                    ))
                    .into()),
                    status => Err(TargetError::LaunchFailed(format!(
                        "unexpected wait status after exec: {:?}",
                        status
                    ))
                    .into()),
                }
            }
            ForkResult::Child => {
                if ptrace::traceme().is_err() {
                    std::process::exit(127);
                }

                if disable_aslr {
                    use nix::sys::personality::{self, Persona};
                    if let Ok(persona) = personality::get() {
                        let _ = personality::set(persona | Persona::ADDR_NO_RANDOMIZE);
                    }
                }

                // execvは成功すると戻ってこない
                let _ = execv(&program_cstring, &cstring_args);
                std::process::exit(127);
            }
        }
    }

    /// プロセスIDを取得する
    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// プロセスを実行継続する
    ///
    /// `signal` が指定された場合、そのシグナルをトレース対象に配送します。
    pub fn resume(&self, signal: Option<Signal>) -> Result<()> {
        trace!(pid = self.pid.as_raw(), ?signal, "PTRACE_CONT");
        ptrace::cont(self.pid, signal)?;
        Ok(())
    }

    /// 次の停止イベント（ブレークポイント、シグナル、終了など）まで待機する
    ///
    /// SIGTRAPによる停止は [`StopReason::Breakpoint`] として報告します。
    pub fn wait(&mut self) -> Result<StopReason> {
        let status = waitpid(self.pid, None)?;
        trace!(pid = self.pid.as_raw(), ?status, "waitpid");
        let reason = StopReason::from_wait_status(status, StopReason::Breakpoint);
        self.exited |= reason.is_terminal();
        Ok(reason)
    }

    /// 1命令だけ実行して停止する（ステップ実行）
    ///
    /// プロセスの1命令だけを実行し、次の停止イベントまで待機します。
    pub fn step(&mut self) -> Result<StopReason> {
        trace!(pid = self.pid.as_raw(), "PTRACE_SINGLESTEP");
        ptrace::step(self.pid, None)?;

        let status = waitpid(self.pid, None)?;
        let reason = StopReason::from_wait_status(status, StopReason::Step);
        self.exited |= reason.is_terminal();
        Ok(reason)
    }

    /// プロセスを強制終了して回収する
    pub fn kill(&mut self) -> Result<()> {
        if self.exited {
            return Ok(());
        }

        nix::sys::signal::kill(self.pid, Signal::SIGKILL)?;
        waitpid(self.pid, None)?;
        self.exited = true;
        Ok(())
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if let Err(e) = self.kill() {
            debug!(pid = self.pid.as_raw(), "failed to kill tracee on drop: {}", e);
        }
    }
}
