//! Encoding of text into synthetic console key transitions.
//!
//! A console front end sees typed input as pairs of key-down/key-up events.
//! Plain characters are sent in character mode (no virtual-key code); the
//! trailing Enter is sent with the canonical VK_RETURN virtual-key and scan
//! code because ConPTY-based front ends listen for either form and the two
//! encodings are observably different.

/// Virtual-key code for the Return key.
pub const VK_RETURN: u16 = 0x0D;

/// Hardware scan code for the Return key.
pub const RETURN_SCAN_CODE: u16 = 0x1C;

/// One synthetic press or release, as it will be written to the console
/// input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyTransition {
    /// `true` for key-down, `false` for key-up.
    pub down: bool,
    /// The character carried by the event.
    pub ch: char,
    /// Virtual-key code; `0` for character-mode input.
    pub virtual_key: u16,
    /// Hardware scan code; `0` for character-mode input.
    pub scan_code: u16,
}

impl KeyTransition {
    fn character(ch: char, down: bool) -> Self {
        Self {
            down,
            ch,
            virtual_key: 0,
            scan_code: 0,
        }
    }

    fn enter(down: bool) -> Self {
        Self {
            down,
            ch: '\r',
            virtual_key: VK_RETURN,
            scan_code: RETURN_SCAN_CODE,
        }
    }

    /// Whether this transition is the VK-mode Enter terminator.
    pub fn is_enter(self) -> bool {
        self.virtual_key == VK_RETURN
    }
}

/// Encode `text` into an ordered press/release sequence, optionally followed
/// by the Enter terminator pair. Pure and infallible; empty input with
/// `append_enter == false` yields an empty sequence.
pub fn encode(text: &str, append_enter: bool) -> Vec<KeyTransition> {
    let mut events = Vec::with_capacity(text.len() * 2 + 2);
    for ch in text.chars() {
        events.push(KeyTransition::character(ch, true));
        events.push(KeyTransition::character(ch, false));
    }
    if append_enter {
        events.push(KeyTransition::enter(true));
        events.push(KeyTransition::enter(false));
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn two_chars_with_terminator_is_six_transitions() {
        let events = encode("ab", true);
        assert_eq!(events.len(), 6);
        assert_eq!(
            events[0],
            KeyTransition {
                down: true,
                ch: 'a',
                virtual_key: 0,
                scan_code: 0
            }
        );
        assert_eq!(events[1].ch, 'a');
        assert!(!events[1].down);
        assert_eq!(events[2].ch, 'b');
        assert!(events[2].down);
        assert_eq!(events[3].ch, 'b');
        assert!(!events[3].down);
        assert!(events[4].is_enter() && events[4].down);
        assert!(events[5].is_enter() && !events[5].down);
        assert_eq!(events[4].scan_code, RETURN_SCAN_CODE);
    }

    #[test]
    fn empty_text_without_terminator_is_empty() {
        assert_eq!(encode("", false), Vec::new());
    }

    #[test]
    fn empty_text_with_terminator_is_enter_pair_only() {
        let events = encode("", true);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.is_enter()));
    }

    #[test]
    fn characters_are_sent_in_character_mode() {
        let events = encode("hé€", false);
        assert_eq!(events.len(), 6);
        assert!(events.iter().all(|e| e.virtual_key == 0 && e.scan_code == 0));
        let downs: String = events.iter().filter(|e| e.down).map(|e| e.ch).collect();
        assert_eq!(downs, "hé€");
    }
}
