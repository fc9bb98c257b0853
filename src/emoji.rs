//! Emoji marker translation
//!
//! The source app renders emoji in notification text as bracket-delimited
//! markers (e.g. `[Smile]` or the localized `[微笑]`). This module replaces
//! recognized markers with the corresponding glyph and leaves everything
//! else untouched.
//!
//! Two lookup maps are consulted, selected by the first character of the
//! marker name: names starting with an ASCII uppercase letter use the
//! alternate (English) map, everything else the localized (default) map —
//! the common case for this app's locale-specific names.
//!
//! `translate` is total and idempotent on marker-free input: when nothing
//! is substituted the original string is returned borrowed, so callers can
//! detect the no-op cheaply.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Static marker table: localized name, alternate (English) name, glyph.
///
/// Entries without a proper glyph candidate are omitted rather than mapped
/// to an approximation.
const MARKER_TABLE: &[(Option<&str>, Option<&str>, &str)] = &[
    (Some("OK"), Some("OK"), "👌"),
    (Some("耶"), Some("Yeah!"), "✌"),
    (Some("嘘"), Some("Silent"), "🤫"),
    (Some("晕"), Some("Dizzy"), "😲"),
    (Some("衰"), Some("BadLuck"), "😳"),
    (Some("色"), Some("Drool"), "😍"),
    (Some("囧"), Some("Tension"), "☺"),
    (Some("鸡"), Some("Chick"), "🐥"),
    (Some("强"), Some("Thumbs Up"), "👍"),
    (Some("弱"), Some("Weak"), "👎"),
    (Some("睡"), Some("Sleep"), "😴"),
    (Some("吐"), Some("Puke"), "🤢"),
    (Some("困"), Some("Drowsy"), "😪"),
    (Some("發"), Some("Rich"), "🀅"),
    (Some("微笑"), Some("Smile"), "😃"),
    (Some("撇嘴"), Some("Grimace"), "😖"),
    (Some("发呆"), Some("Scowl"), "😳"),
    (Some("得意"), Some("CoolGuy"), "😎"),
    (Some("流泪"), Some("Sob"), "😭"),
    (Some("害羞"), Some("Shy"), "☺"),
    (Some("闭嘴"), Some("Shutup"), "🤐"),
    (Some("大哭"), Some("Cry"), "😣"),
    (Some("尴尬"), Some("Awkward"), "😰"),
    (Some("发怒"), Some("Angry"), "😡"),
    (Some("调皮"), Some("Tongue"), "😜"),
    (Some("呲牙"), Some("Grin"), "😁"),
    (Some("惊讶"), Some("Surprise"), "😱"),
    (Some("难过"), Some("Frown"), "🙁"),
    (Some("抓狂"), Some("Scream"), "😫"),
    (Some("偷笑"), Some("Chuckle"), "😅"),
    (Some("愉快"), Some("Joyful"), "☺"),
    (Some("白眼"), Some("Slight"), "🙄"),
    (Some("傲慢"), Some("Smug"), "😕"),
    (Some("惊恐"), Some("Panic"), "😱"),
    (Some("流汗"), Some("Sweat"), "😓"),
    (Some("憨笑"), Some("Laugh"), "😄"),
    (Some("悠闲"), Some("Loafer"), "😌"),
    (Some("奋斗"), Some("Strive"), "💪"),
    (Some("咒骂"), Some("Scold"), "😤"),
    (Some("疑问"), Some("Doubt"), "❓"),
    (Some("骷髅"), Some("Skull"), "💀"),
    (Some("敲打"), Some("Hammer"), "👊"),
    (Some("捂脸"), Some("Facepalm"), "🤦"),
    (Some("奸笑"), Some("Smirk"), "😏"),
    (Some("皱眉"), Some("Concerned"), "😟"),
    (Some("小狗"), Some("Pup"), "🐶"),
    (Some("再见"), Some("Bye"), "🙋"),
    (Some("擦汗"), Some("Relief"), "😥"),
    (Some("鼓掌"), Some("Clap"), "👏"),
    (Some("坏笑"), Some("Trick"), "👻"),
    (Some("哈欠"), Some("Yawn"), "😪"),
    (Some("鄙视"), Some("Lookdown"), "😒"),
    (Some("委屈"), Some("Wronged"), "😣"),
    (Some("阴险"), Some("Sly"), "😈"),
    (Some("亲亲"), Some("Kiss"), "😘"),
    (Some("菜刀"), Some("Cleaver"), "🔪"),
    (Some("西瓜"), Some("Melon"), "🍉"),
    (Some("啤酒"), Some("Beer"), "🍺"),
    (Some("咖啡"), Some("Coffee"), "☕"),
    (Some("猪头"), Some("Pig"), "🐷"),
    (Some("玫瑰"), Some("Rose"), "🌹"),
    (Some("凋谢"), Some("Wilt"), "🥀"),
    (Some("嘴唇"), Some("Lip"), "💋"),
    (Some("爱心"), Some("Heart"), "❤"),
    (Some("心碎"), Some("BrokenHeart"), "💔"),
    (Some("蛋糕"), Some("Cake"), "🎂"),
    (Some("炸弹"), Some("Bomb"), "💣"),
    (Some("便便"), Some("Poop"), "💩"),
    (Some("月亮"), Some("Moon"), "🌙"),
    (Some("太阳"), Some("Sun"), "🌞"),
    (Some("拥抱"), Some("Hug"), "🤗"),
    (Some("握手"), Some("Shake"), "🤝"),
    (Some("胜利"), Some("Victory"), "✌"),
    (Some("抱拳"), Some("Salute"), "🙏"),
    (Some("拳头"), Some("Fist"), "✊"),
    (Some("怄火"), Some("Aaagh!"), "😡"),
    (Some("蜡烛"), Some("Candle"), "🕯"),
    (Some("快哭了"), Some("Puling"), "😔"),
    (Some("破涕为笑"), Some("Lol"), "😂"),
    (Some("强壮"), None, "💪"),
    (Some("鬼魂"), None, "👻"),
    (Some("篮球"), Some("Basketball"), "🏀"),
    (Some("乒乓"), Some("PingPong"), "🏓"),
    (Some("饭"), Some("Rice"), "🍚"),
    (Some("瓢虫"), Some("Ladybug"), "🐞"),
    (Some("礼物"), Some("Gift"), "🎁"),
    (Some("爱你"), Some("Love"), "🤟"),
    (None, Some("NO"), "🙅"),
    (Some("爱情"), Some("InLove"), "💕"),
    (Some("飞吻"), Some("Blowkiss"), "😘"),
    (Some("闪电"), Some("Lightning"), "⚡"),
    (Some("刀"), None, "🔪"),
    (Some("足球"), Some("Soccer"), "⚽"),
    (Some("棒球"), Some("Baseball"), "⚾"),
    (Some("橄榄球"), Some("Football"), "🏈"),
    (Some("钱"), Some("Money"), "💰"),
    (Some("相机"), Some("Camera"), "📷"),
    (Some("干杯"), Some("Cheers"), "🍻"),
    (Some("钻石"), Some("Gem"), "💎"),
    (Some("茶"), Some("Tea"), "🍵"),
    (Some("药丸"), Some("Pill"), "💊"),
    (Some("庆祝"), Some("Party"), "🎉"),
    (Some("火箭"), Some("Rocket ship"), "🚀"),
];

fn localized_map() -> &'static HashMap<&'static str, &'static str> {
    static MAP: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    MAP.get_or_init(|| {
        MARKER_TABLE
            .iter()
            .filter_map(|(localized, _, glyph)| localized.map(|name| (name, *glyph)))
            .collect()
    })
}

fn alternate_map() -> &'static HashMap<&'static str, &'static str> {
    static MAP: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    MAP.get_or_init(|| {
        MARKER_TABLE
            .iter()
            .filter_map(|(_, alternate, glyph)| alternate.map(|name| (name, *glyph)))
            .collect()
    })
}

/// Translate emoji markers to glyphs
///
/// Scans left-to-right for the nearest `[...]` pair with at least one
/// character inside. Recognized markers are replaced; unrecognized markers
/// and unpaired brackets are left as literal text, and scanning continues
/// after the miss. Returns the input borrowed when no substitution
/// occurred.
///
/// # Examples
///
/// ```rust
/// use wechat_decorator::emoji::translate;
///
/// assert_eq!(translate("[Smile]"), "😃");
/// assert_eq!(translate("Left[Smile] Right"), "Left😃 Right");
/// assert_eq!(translate("no markers here"), "no markers here");
/// ```
pub fn translate(text: &str) -> Cow<'_, str> {
    let bytes = text.as_bytes();
    let mut bracket_end = find_byte(bytes, b']', 0);
    let mut bracket_start = preceding_open_bracket(bytes, bracket_end);
    if bracket_start.is_none() {
        return Cow::Borrowed(text);
    }

    let mut replaced: Option<String> = None;
    let mut copied = 0;
    while let (Some(start), Some(end)) = (bracket_start, bracket_end) {
        let marker = &text[start + 1..end];
        let first = marker.chars().next();
        let map = match first {
            Some(c) if c.is_ascii_uppercase() => alternate_map(),
            _ => localized_map(),
        };
        if let Some(glyph) = map.get(marker) {
            if start >= copied {
                let out = replaced.get_or_insert_with(String::new);
                out.push_str(&text[copied..start]);
                out.push_str(glyph);
                copied = end + 1;
            }
        }
        bracket_end = find_byte(bytes, b']', end + 3); // "]..[X.."
        bracket_start = preceding_open_bracket(bytes, bracket_end);
    }

    match replaced {
        Some(mut out) => {
            out.push_str(&text[copied..]);
            Cow::Owned(out)
        }
        None => Cow::Borrowed(text),
    }
}

fn find_byte(bytes: &[u8], needle: u8, from: usize) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..].iter().position(|&b| b == needle).map(|p| p + from)
}

/// Nearest `[` leaving at least one character before the closing bracket
fn preceding_open_bracket(bytes: &[u8], bracket_end: Option<usize>) -> Option<usize> {
    let end = bracket_end?;
    if end < 2 {
        return None;
    }
    bytes[..end - 1].iter().rposition(|&b| b == b'[')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(input: &str, expected: &str) {
        assert_eq!(translate(input), expected, "input: {input}");
    }

    #[test]
    fn test_convert() {
        check("[Smile]", "😃");
        check("Left[Smile]", "Left😃");
        check("[Smile] Right", "😃 Right");
        check("Left[Smile] Right", "Left😃 Right");
        check("Left [色][色][发呆]Right", "Left 😍😍😳Right");
        check("Left[[Smile]", "Left[😃");
        check("Left[Smile]]", "Left😃]");
        check("Left[[Smile]]", "Left[😃]");
        check("Left[NotEmoji][][[Smile][", "Left[NotEmoji][][😃[");
    }

    #[test]
    fn test_no_marker_returns_borrowed() {
        for input in ["", "plain text", "no ] pair [", "]reversed[", "[]"] {
            assert!(matches!(translate(input), Cow::Borrowed(_)), "input: {input}");
        }
    }

    #[test]
    fn test_map_selection_by_first_char() {
        // Uppercase ASCII first char selects the alternate map
        check("[Chick]", "🐥");
        // Everything else goes through the localized map
        check("[鸡]", "🐥");
        // Lowercase names are not in the alternate map, so they miss
        check("[smile]", "[smile]");
    }

    #[test]
    fn test_localized_only_and_alternate_only_entries() {
        check("[强壮]", "💪");
        check("[NO]", "🙅");
    }
}
