//! Topic name validation
//!
//! Key rules for names used in PUBLISH:
//! - Must be at least 1 character
//! - Must not exceed 65535 bytes
//! - Must not contain null character
//! - Must not contain wildcards (+ or #)

/// Validate a topic name (used in PUBLISH)
pub fn validate_topic_name(topic: &str) -> Result<(), &'static str> {
    if topic.is_empty() {
        return Err("topic name cannot be empty");
    }

    if topic.len() > 65535 {
        return Err("topic name exceeds maximum length");
    }

    if topic.contains('\0') {
        return Err("topic name cannot contain null character");
    }

    if topic.contains('+') || topic.contains('#') {
        return Err("topic name cannot contain wildcards");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_topic_names() {
        assert!(validate_topic_name("rtl_433/host/devices").is_ok());
        assert!(validate_topic_name("/").is_ok());
        assert!(validate_topic_name("a b/c").is_ok());
    }

    #[test]
    fn test_invalid_topic_names() {
        assert!(validate_topic_name("").is_err());
        assert!(validate_topic_name("a/+/b").is_err());
        assert!(validate_topic_name("a/#").is_err());
        assert!(validate_topic_name("a\0b").is_err());
    }
}
