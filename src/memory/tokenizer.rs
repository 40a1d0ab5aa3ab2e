//! Token 估算
//!
//! 简单的字符计数近似：英文约 4 字符/token，中文等非 ASCII 字符约 1.5 字符/token。
//! Context Provider、Memory Store 与 Saturation Monitor 共用这一口径。

/// Token 估算器
pub struct TokenEstimator;

impl TokenEstimator {
    /// 估算文本的 token 数量；空文本为 0，非空文本至少为 1
    pub fn estimate(text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        let mut ascii_chars = 0usize;
        let mut non_ascii_chars = 0usize;
        for c in text.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }

        let tokens = ascii_chars / 4 + (non_ascii_chars as f64 / 1.5).ceil() as usize;
        tokens.max(1)
    }
}

/// 按字符截断（不会切断 UTF-8 字符），超出时追加省略号
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...", head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_english() {
        let text = "Hello, world! This is a test.";
        let tokens = TokenEstimator::estimate(text);
        assert_eq!(tokens, text.len() / 4);
    }

    #[test]
    fn test_estimate_chinese() {
        // 6 个非 ASCII 字符 -> ceil(6 / 1.5) = 4
        assert_eq!(TokenEstimator::estimate("你好世界测试"), 4);
    }

    #[test]
    fn test_estimate_empty_and_short() {
        assert_eq!(TokenEstimator::estimate(""), 0);
        assert_eq!(TokenEstimator::estimate("a"), 1);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abcdef", 10), "abcdef");
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
        assert_eq!(truncate_chars("巴黎是法国首都", 2), "巴黎...");
    }
}
