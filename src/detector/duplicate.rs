/// Comparable form of a message for repetition counting.
pub fn normalize(content: &str) -> String {
    content.trim().to_lowercase()
}

pub(super) fn fingerprint(content: &str) -> Option<String> {
    let text = normalize(content);
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_has_no_fingerprint() {
        assert_eq!(fingerprint(" \n\t"), None);
        assert_eq!(fingerprint("SPAM"), Some("spam".to_string()));
    }
}
