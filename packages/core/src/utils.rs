// ABOUTME: Shared utility functions for Corral
// ABOUTME: Request id generation and runtime key namespacing

/// Generate a unique request id
pub fn generate_request_id() -> String {
    format!("req-{}", uuid::Uuid::new_v4())
}

/// Runtime store key for `key` inside `app_id`'s namespace
pub fn namespaced_key(app_id: &str, key: &str) -> String {
    format!("{}:{}", app_id, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_request_id() {
        let id1 = generate_request_id();
        let id2 = generate_request_id();

        assert!(id1.starts_with("req-"));
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_namespaced_key_splits_at_first_colon() {
        let key = namespaced_key("demo", "session:42");
        assert_eq!(key, "demo:session:42");
        assert_eq!(key.split_once(':'), Some(("demo", "session:42")));
    }
}
