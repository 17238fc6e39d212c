use crate::snap_error;
use crate::error::{Result, SnapError};
use crate::mappings::{GlyphToKeycode, KeycodeToGlyph};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Виртуальный код клавиши macOS (kVK_*)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyCode(pub u16);

impl KeyCode {
    pub fn new(code: u16) -> Self {
        Self(code)
    }

    pub fn value(&self) -> u16 {
        self.0
    }

    /// Глиф клавиши для отображения, `Key<N>` для неизвестных кодов
    pub fn glyph(&self) -> String {
        match KeycodeToGlyph::translate(self.0) {
            Some(glyph) => glyph.to_string(),
            None => format!("Key{}", self.0),
        }
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.glyph())
    }
}

// Биты модификаторов в маске флагов событий клавиатуры macOS
pub const FLAG_CAPS_LOCK: u64 = 1 << 16;
pub const FLAG_SHIFT: u64 = 1 << 17;
pub const FLAG_CONTROL: u64 = 1 << 18;
pub const FLAG_OPTION: u64 = 1 << 19;
pub const FLAG_COMMAND: u64 = 1 << 20;
pub const FLAG_NUMERIC_PAD: u64 = 1 << 21;
pub const FLAG_FUNCTION: u64 = 1 << 23;

const GLYPH_COMMAND: char = '⌘';
const GLYPH_SHIFT: char = '⇧';
const GLYPH_OPTION: char = '⌥';
const GLYPH_CONTROL: char = '⌃';

/// Модификаторы клавиш, значимые для сравнения сочетаний
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Modifiers {
    pub command: bool,
    pub shift: bool,
    pub option: bool,
    pub control: bool,
}

impl Modifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_command(mut self, command: bool) -> Self {
        self.command = command;
        self
    }

    pub fn with_shift(mut self, shift: bool) -> Self {
        self.shift = shift;
        self
    }

    pub fn with_option(mut self, option: bool) -> Self {
        self.option = option;
        self
    }

    pub fn with_control(mut self, control: bool) -> Self {
        self.control = control;
        self
    }

    pub fn is_empty(&self) -> bool {
        !self.command && !self.shift && !self.option && !self.control
    }

    /// Разбор маски флагов; caps lock, fn, numpad и прочие биты отбрасываются
    pub fn from_flags(flags: u64) -> Self {
        Self {
            command: flags & FLAG_COMMAND != 0,
            shift: flags & FLAG_SHIFT != 0,
            option: flags & FLAG_OPTION != 0,
            control: flags & FLAG_CONTROL != 0,
        }
    }

    pub fn to_flags(&self) -> u64 {
        let mut flags = 0;
        if self.command { flags |= FLAG_COMMAND; }
        if self.shift { flags |= FLAG_SHIFT; }
        if self.option { flags |= FLAG_OPTION; }
        if self.control { flags |= FLAG_CONTROL; }
        flags
    }

    /// Глифы в порядке ⌘ ⇧ ⌥ ⌃
    pub fn glyphs(&self) -> String {
        let mut result = String::new();
        if self.command { result.push(GLYPH_COMMAND); }
        if self.shift { result.push(GLYPH_SHIFT); }
        if self.option { result.push(GLYPH_OPTION); }
        if self.control { result.push(GLYPH_CONTROL); }
        result
    }

    fn apply_glyph(&mut self, glyph: char) -> bool {
        match glyph {
            GLYPH_COMMAND => self.command = true,
            GLYPH_SHIFT => self.shift = true,
            GLYPH_OPTION => self.option = true,
            GLYPH_CONTROL => self.control = true,
            _ => return false,
        }
        true
    }
}

impl fmt::Display for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", self.glyphs())
        }
    }
}

/// Сочетание клавиш, привязанное к раскладке.
///
/// Каноническое представление: код клавиши + набор модификаторов.
/// Уникальность сочетаний проверяется именно по этой паре, а не по строке.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shortcut {
    pub key: KeyCode,
    pub modifiers: Modifiers,
}

impl Shortcut {
    pub fn new(key: KeyCode, modifiers: Modifiers) -> Self {
        Self { key, modifiers }
    }

    /// Сочетание из сырых данных события клавиатуры
    pub fn from_event(key_code: u16, flags: u64) -> Self {
        Self::new(KeyCode::new(key_code), Modifiers::from_flags(flags))
    }

    /// Компактная строка вида `⌘⇧K`
    pub fn display_string(&self) -> String {
        format!("{}{}", self.modifiers.glyphs(), self.key.glyph())
    }

    /// Сочетание без модификаторов перехватывало бы обычный ввод
    pub fn validate(&self) -> Result<()> {
        if self.modifiers.is_empty() {
            return Err(SnapError::InvalidShortcut(format!(
                "сочетание {} должно содержать хотя бы один модификатор",
                self.display_string()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Shortcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_string())
    }
}

impl FromStr for Shortcut {
    type Err = SnapError;

    /// Разбор строки из глифов модификаторов и глифа клавиши.
    /// Глиф модификатора в конце строки трактуется как сама клавиша (`⌘⇧` = ⌘ + клавиша ⇧).
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(SnapError::InvalidShortcut("пустая строка".to_string()));
        }

        let mut modifiers = Modifiers::new();
        let mut rest = trimmed;
        while let Some(first) = rest.chars().next() {
            let remainder = &rest[first.len_utf8()..];
            if remainder.is_empty() {
                break;
            }
            if !modifiers.apply_glyph(first) {
                break;
            }
            rest = remainder;
        }

        let code = GlyphToKeycode::translate(rest)
            .map_err(|e| snap_error!(invalid_shortcut, "'{}': {}", trimmed, e))?;

        Ok(Self::new(KeyCode::new(code), modifiers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modifiers_flags_ignore_irrelevant_bits() {
        let flags = FLAG_COMMAND | FLAG_SHIFT | FLAG_CAPS_LOCK | FLAG_FUNCTION | FLAG_NUMERIC_PAD;
        let modifiers = Modifiers::from_flags(flags);

        assert_eq!(modifiers, Modifiers::new().with_command(true).with_shift(true));
        assert_eq!(modifiers.to_flags(), FLAG_COMMAND | FLAG_SHIFT);
    }

    #[test]
    fn test_shortcut_display_order() {
        let shortcut = Shortcut::new(
            KeyCode::new(40),
            Modifiers::new().with_control(true).with_command(true).with_shift(true),
        );
        assert_eq!(shortcut.display_string(), "⌘⇧⌃K");
    }

    #[test]
    fn test_shortcut_parse() {
        let shortcut: Shortcut = "⌘⇧1".parse().unwrap();
        assert_eq!(shortcut.key, KeyCode::new(18));
        assert!(shortcut.modifiers.command);
        assert!(shortcut.modifiers.shift);
        assert!(!shortcut.modifiers.option);

        let lower: Shortcut = "⌥k".parse().unwrap();
        assert_eq!(lower.key, KeyCode::new(40));
        assert!(lower.modifiers.option);
    }

    #[test]
    fn test_trailing_modifier_glyph_is_key() {
        let shortcut: Shortcut = "⌘⇧".parse().unwrap();
        assert!(shortcut.modifiers.command);
        assert!(!shortcut.modifiers.shift);
        assert_eq!(shortcut.key, KeyCode::new(56));
    }

    #[test]
    fn test_unknown_key_roundtrips_through_fallback_name() {
        let shortcut = Shortcut::new(KeyCode::new(110), Modifiers::new().with_control(true));
        let text = shortcut.display_string();
        assert_eq!(text, "⌃Key110");
        assert_eq!(text.parse::<Shortcut>().unwrap(), shortcut);
    }

    #[test]
    fn test_semantic_equality_across_encodings() {
        let from_event = Shortcut::from_event(18, FLAG_COMMAND | FLAG_SHIFT | FLAG_CAPS_LOCK);
        let from_text: Shortcut = "⌘⇧1".parse().unwrap();
        assert_eq!(from_event, from_text);
    }

    #[test]
    fn test_validate_requires_modifier() {
        let bare = Shortcut::new(KeyCode::new(0), Modifiers::new());
        assert!(bare.validate().is_err());
        assert!("⌘A".parse::<Shortcut>().unwrap().validate().is_ok());
        assert!("".parse::<Shortcut>().is_err());
        assert!("⌘Nope".parse::<Shortcut>().is_err());
    }
}
