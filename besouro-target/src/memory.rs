//! メモリアクセス機能

use crate::Result;
use nix::sys::ptrace;
use nix::unistd::Pid;
use std::fs::File;
use std::io::{BufRead, BufReader, Read as _, Seek, SeekFrom};

/// マシンワード単位で読み書きできるメモリ
///
/// ブレークポイントのパッチはこのトレイト経由でのみ行います。
pub trait WordMemory {
    /// 指定アドレスから1ワード読み取る
    fn read_word(&self, addr: u64) -> Result<u64>;

    /// 指定アドレスに1ワード書き込む
    fn write_word(&self, addr: u64, word: u64) -> Result<()>;
}

/// メモリマッピング情報
#[derive(Debug, Clone)]
pub struct MemoryMapping {
    pub start: usize,
    pub end: usize,
    pub offset: usize,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    pub path: Option<String>,
}

/// メモリアクセス
pub struct Memory {
    pid: Pid,
}

impl Memory {
    /// メモリアクセスを作成する
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    /// /proc/pid/mem のパスを取得する
    fn mem_path(&self) -> String {
        format!("/proc/{}/mem", self.pid)
    }

    /// メモリからデータを読み取る
    ///
    /// /proc/pid/memを使用してターゲットプロセスのメモリを読み取ります。
    /// /proc/pid/memが使用できない場合（EIOエラー）、PTRACE_PEEKDATAにフォールバックします。
    pub fn read(&self, addr: usize, size: usize) -> Result<Vec<u8>> {
        match self.read_via_proc_mem(addr, size) {
            Ok(data) => Ok(data),
            Err(e) => {
                if let Some(io_err) = e.downcast_ref::<std::io::Error>() {
                    if io_err.raw_os_error() == Some(nix::libc::EIO) {
                        return self.read_via_ptrace(addr, size);
                    }
                }
                Err(e)
            }
        }
    }

    /// /proc/pid/mem経由でメモリを読み取る（内部実装）
    fn read_via_proc_mem(&self, addr: usize, size: usize) -> Result<Vec<u8>> {
        let mem_path = self.mem_path();
        let mut file = File::open(&mem_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", mem_path, e))?;

        file.seek(SeekFrom::Start(addr as u64))?;

        let mut buffer = vec![0u8; size];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// /proc/pid/maps を解析してメモリマッピング情報を取得する
    pub fn get_mappings(&self) -> Result<Vec<MemoryMapping>> {
        let maps_path = format!("/proc/{}/maps", self.pid);
        let file = File::open(&maps_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", maps_path, e))?;
        let reader = BufReader::new(file);

        let mut mappings = Vec::new();
        for line in reader.lines() {
            if let Some(mapping) = parse_maps_line(&line?)? {
                mappings.push(mapping);
            }
        }

        Ok(mappings)
    }

    /// 実行可能ファイルのベースアドレスを取得する
    ///
    /// PIE（Position Independent Executable）の場合、実行時にランダムなアドレスにロードされます。
    /// `program` にマップされた最初のセグメントの開始アドレスからファイルオフセットを引いた値を返します。
    pub fn get_base_address(&self, program: &str) -> Result<usize> {
        let mappings = self.get_mappings()?;

        mappings
            .iter()
            .find(|m| m.path.as_deref() == Some(program))
            .map(|m| m.start - m.offset)
            .ok_or_else(|| {
                anyhow::anyhow!("Could not find a mapping of {} in the memory map", program)
            })
    }

    /// PTRACE_PEEKDATAを使用してメモリからデータを読み取る
    ///
    /// /proc/pid/memが使用できない場合のフォールバック。
    pub fn read_via_ptrace(&self, addr: usize, size: usize) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(size);
        let word_size = std::mem::size_of::<u64>();

        for offset in (0..size).step_by(word_size) {
            let word = self.read_word((addr + offset) as u64)?;
            let bytes = word.to_ne_bytes();
            let copy_size = (size - offset).min(word_size);
            data.extend_from_slice(&bytes[..copy_size]);
        }

        Ok(data)
    }
}

impl WordMemory for Memory {
    fn read_word(&self, addr: u64) -> Result<u64> {
        let word = ptrace::read(self.pid, addr as ptrace::AddressType)
            .map_err(|e| anyhow::anyhow!("Failed to read via ptrace at 0x{:x}: {}", addr, e))?;
        Ok(word as u64)
    }

    fn write_word(&self, addr: u64, word: u64) -> Result<()> {
        ptrace::write(self.pid, addr as ptrace::AddressType, word as nix::libc::c_long)
            .map_err(|e| anyhow::anyhow!("Failed to write via ptrace at 0x{:x}: {}", addr, e))?;
        Ok(())
    }
}

/// /proc/pid/maps の1行を解析する
///
/// フォーマット: "address perms offset dev inode pathname"
/// 例: "7f1234567000-7f1234568000 r-xp 00000000 08:01 123456 /lib/libc.so"
fn parse_maps_line(line: &str) -> Result<Option<MemoryMapping>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 5 {
        return Ok(None);
    }

    let (start, end) = match parts[0].split_once('-') {
        Some(range) => range,
        None => return Ok(None),
    };

    let start = usize::from_str_radix(start, 16)
        .map_err(|e| anyhow::anyhow!("Failed to parse start address: {}", e))?;
    let end = usize::from_str_radix(end, 16)
        .map_err(|e| anyhow::anyhow!("Failed to parse end address: {}", e))?;
    let offset = usize::from_str_radix(parts[2], 16)
        .map_err(|e| anyhow::anyhow!("Failed to parse segment offset: {}", e))?;

    let perms = parts[1].as_bytes();

    Ok(Some(MemoryMapping {
        start,
        end,
        offset,
        readable: perms.first() == Some(&b'r'),
        writable: perms.get(1) == Some(&b'w'),
        executable: perms.get(2) == Some(&b'x'),
        path: parts.get(5).map(|p| p.to_string()),
    }))
}
