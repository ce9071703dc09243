//! 逆アセンブル機能
//!
//! 関数のバイト列を逆アセンブルして、アドレスが命令の先頭かどうかを判定します。

use crate::Result;
use capstone::prelude::*;

fn x86_64() -> Result<Capstone> {
    Capstone::new()
        .x86()
        .mode(arch::x86::ArchMode::Mode64)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create Capstone: {}", e))
}

/// `addr` が命令の先頭かどうかを判定する
///
/// # Arguments
/// * `code` - `base_addr` から始まる関数のバイト列
/// * `base_addr` - 関数の開始アドレス
/// * `addr` - 判定するアドレス
///
/// # Returns
/// 判定できた場合は `Some(bool)`、`addr` に到達する前に逆アセンブルが止まった場合は `None`
pub fn is_instruction_boundary(code: &[u8], base_addr: u64, addr: u64) -> Result<Option<bool>> {
    let cs = x86_64()?;

    let insns = cs
        .disasm_all(code, base_addr)
        .map_err(|e| anyhow::anyhow!("Failed to disassemble: {}", e))?;

    for insn in insns.as_ref() {
        if insn.address() == addr {
            return Ok(Some(true));
        }
        if insn.address() > addr {
            return Ok(Some(false));
        }
    }

    Ok(None)
}

/// `addr` から始まる最初の命令の長さを返す
pub fn instruction_length(code: &[u8], addr: u64) -> Result<Option<usize>> {
    let cs = x86_64()?;

    let insns = cs
        .disasm_count(code, addr, 1)
        .map_err(|e| anyhow::anyhow!("Failed to disassemble: {}", e))?;

    Ok(insns.as_ref().first().map(|insn| insn.bytes().len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // mov rax, 1; nop; ret
    const CODE: [u8; 9] = [0x48, 0xc7, 0xc0, 0x01, 0x00, 0x00, 0x00, 0x90, 0xc3];

    #[test]
    fn test_boundary_at_instruction_starts() {
        assert_eq!(is_instruction_boundary(&CODE, 0x1000, 0x1000).unwrap(), Some(true));
        assert_eq!(is_instruction_boundary(&CODE, 0x1000, 0x1007).unwrap(), Some(true));
        assert_eq!(is_instruction_boundary(&CODE, 0x1000, 0x1008).unwrap(), Some(true));
    }

    #[test]
    fn test_boundary_inside_instruction() {
        assert_eq!(is_instruction_boundary(&CODE, 0x1000, 0x1003).unwrap(), Some(false));
    }

    #[test]
    fn test_boundary_past_decoded_code() {
        assert_eq!(is_instruction_boundary(&CODE, 0x1000, 0x2000).unwrap(), None);
    }

    #[test]
    fn test_instruction_length() {
        assert_eq!(instruction_length(&CODE, 0x1000).unwrap(), Some(7));
        assert_eq!(instruction_length(&CODE[7..], 0x1007).unwrap(), Some(1));
        assert_eq!(instruction_length(&[], 0x1000).unwrap(), None);
    }
}
