//! パース関連のユーティリティ関数

use anyhow::Result;

/// アドレス文字列をu64にパース
///
/// 16進数（0xプレフィックス付き）または10進数をサポート
///
/// # Examples
/// ```
/// use besouro_core::parse::parse_address;
///
/// assert_eq!(parse_address("0x1234").unwrap(), 0x1234);
/// assert_eq!(parse_address("1234").unwrap(), 1234);
/// ```
pub fn parse_address(s: &str) -> Result<u64> {
    let s = s.trim();

    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
            .map_err(|e| anyhow::anyhow!("Invalid hexadecimal address '{}': {}", s, e))
    } else {
        s.parse::<u64>()
            .map_err(|e| anyhow::anyhow!("Invalid address '{}': {}", s, e))
    }
}

/// 値の文字列をu64にパース
///
/// アドレスと同じ表記に加えて、負の10進数を2の補数として受け付けます。
pub fn parse_value(s: &str) -> Result<u64> {
    let s = s.trim();

    match s.strip_prefix('-') {
        Some(digits) => digits
            .parse::<i64>()
            .map(|v| v.wrapping_neg() as u64)
            .map_err(|e| anyhow::anyhow!("Invalid value '{}': {}", s, e)),
        None => parse_address(s),
    }
}

/// アドレスらしい文字列かどうか（シンボル名と区別するため）
pub fn looks_like_address(s: &str) -> bool {
    let s = s.trim();
    s.starts_with("0x") || s.starts_with("0X") || (!s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_hex() {
        assert_eq!(parse_address("0x1234").unwrap(), 0x1234);
        assert_eq!(parse_address("0X1234").unwrap(), 0x1234);
        assert_eq!(parse_address("0xabcd").unwrap(), 0xabcd);
        assert_eq!(parse_address("0xABCD").unwrap(), 0xabcd);
    }

    #[test]
    fn test_parse_address_dec() {
        assert_eq!(parse_address("1234").unwrap(), 1234);
        assert_eq!(parse_address("9999").unwrap(), 9999);
    }

    #[test]
    fn test_parse_address_invalid() {
        assert!(parse_address("xyz").is_err());
        assert!(parse_address("0xghij").is_err());
        assert!(parse_address("").is_err());
        assert!(parse_address("0x").is_err());
    }

    #[test]
    fn test_parse_value_negative() {
        assert_eq!(parse_value("-1").unwrap(), u64::MAX);
        assert_eq!(parse_value("0x10").unwrap(), 16);
        assert!(parse_value("-x").is_err());
    }

    #[test]
    fn test_looks_like_address() {
        assert!(looks_like_address("0x401000"));
        assert!(looks_like_address("4198400"));
        assert!(!looks_like_address("main"));
        assert!(!looks_like_address("deadbeef"));
        assert!(!looks_like_address(""));
    }
}
