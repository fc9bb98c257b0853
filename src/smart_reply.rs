//! Reply suggestions
//!
//! A no-smart implementation: a message ending in a question gets a small
//! fixed set of affirmative replies, localized by which question mark was
//! used. Everything else gets none.

use crate::messaging::Message;

/// Affirmative replies, CJK set first
const REPLIES_FOR_QUESTION: [&[&str]; 2] = [&["👌", "好", "对", "没问题"], &["👌", "OK", "Ye"]];

/// Suggest reply choices for the last message
///
/// # Examples
///
/// ```rust
/// use wechat_decorator::messaging::Message;
/// use wechat_decorator::smart_reply::generate_choices;
///
/// let messages = vec![Message { text: "coming?".to_string(), timestamp: 0, person: None }];
/// assert_eq!(generate_choices(&messages), Some(&["👌", "OK", "Ye"][..]));
/// ```
pub fn generate_choices(messages: &[Message]) -> Option<&'static [&'static str]> {
    let text = &messages.last()?.text;
    let chinese = text.contains('？');
    if chinese || text.contains('?') {
        Some(REPLIES_FOR_QUESTION[if chinese { 0 } else { 1 }])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(text: &str) -> Message {
        Message { text: text.to_string(), timestamp: 0, person: None }
    }

    #[test]
    fn test_ascii_question() {
        let choices = generate_choices(&[message("coming?")]).unwrap();
        assert!(choices.contains(&"OK"));
    }

    #[test]
    fn test_cjk_question() {
        let choices = generate_choices(&[message("来吗？")]).unwrap();
        assert!(choices.contains(&"没问题"));
    }

    #[test]
    fn test_cjk_wins_over_ascii() {
        let choices = generate_choices(&[message("both？?")]).unwrap();
        assert!(choices.contains(&"好"));
    }

    #[test]
    fn test_no_question_no_choices() {
        assert!(generate_choices(&[message("see you")]).is_none());
        assert!(generate_choices(&[]).is_none());
    }

    #[test]
    fn test_only_last_message_counts() {
        let messages = [message("coming?"), message("nevermind")];
        assert!(generate_choices(&messages).is_none());
    }
}
