//! Secret-masking helper shared by anything that logs provider error text
//! (spec §10.1: "Secrets (API keys) are never logged in full").

/// Mask substrings in `msg` that look like API keys or bearer tokens before
/// they reach a log field or a structured trace event.
pub fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_string();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            let masked = if trimmed.len() > 8 {
                format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..])
            } else {
                "***masked***".to_string()
            };
            result = result.replace(trimmed, &masked);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_long_token_like_words() {
        let masked = mask_secrets("auth failed for key sk-abcdefghijklmnopqrstuvwxyz");
        assert!(!masked.contains("sk-abcdefghijklmnopqrstuvwxyz"));
        assert!(masked.contains("sk-a...wxyz"));
    }

    #[test]
    fn leaves_short_words_alone() {
        let masked = mask_secrets("provider openrouter returned 429");
        assert_eq!(masked, "provider openrouter returned 429");
    }
}
