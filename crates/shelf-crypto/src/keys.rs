use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;

/// Generate a random 256-bit OAuth `state` value, URL-safe base64 encoded.
pub fn generate_oauth_state() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Random 128-bit session id, the handle logout revokes.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Constant-time comparison for the callback `state` check.
pub fn state_matches(expected: &str, received: &str) -> bool {
    let (a, b) = (expected.as_bytes(), received.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_unique_and_url_safe() {
        let a = generate_oauth_state();
        let b = generate_oauth_state();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn session_ids_are_unique() {
        let a = generate_session_id();
        assert_eq!(a.len(), 22);
        assert_ne!(a, generate_session_id());
    }

    #[test]
    fn state_comparison() {
        let s = generate_oauth_state();
        assert!(state_matches(&s, &s.clone()));
        assert!(!state_matches(&s, "short"));
        assert!(!state_matches(&s, &generate_oauth_state()));
    }
}
