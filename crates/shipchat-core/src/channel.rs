/// Separator between the two sorted participant ids.
pub const CHANNEL_SEPARATOR: char = '_';

/// Channel key for a conversation between two crew members.
///
/// Sorts the pair and joins it, so `channel_id(a, b) == channel_id(b, a)`.
/// Returns `None` when either id is empty.
pub fn channel_id(a: &str, b: &str) -> Option<String> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    Some(format!("{first}{CHANNEL_SEPARATOR}{second}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetric() {
        assert_eq!(channel_id("user_2", "user_1"), channel_id("user_1", "user_2"));
        assert_eq!(channel_id("user_1", "user_2").as_deref(), Some("user_1_user_2"));
    }

    #[test]
    fn test_same_user() {
        assert_eq!(channel_id("a", "a").as_deref(), Some("a_a"));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(channel_id("", "b"), None);
        assert_eq!(channel_id("a", ""), None);
        assert_eq!(channel_id("", ""), None);
    }

    #[test]
    fn test_order_is_bytewise() {
        // Uppercase sorts before lowercase.
        assert_eq!(channel_id("bob", "Zed").as_deref(), Some("Zed_bob"));
    }
}
