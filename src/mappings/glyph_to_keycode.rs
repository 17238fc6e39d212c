use super::KeycodeToGlyph;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Преобразование глифов клавиш обратно в виртуальные коды macOS
/// Отвечает за разбор строкового представления сочетаний
pub struct GlyphToKeycode;

// Обратная карта строится из прямой; при совпадении глифов побеждает меньший код
// (основная клавиатура раньше цифрового блока, левый модификатор раньше правого)
static GLYPH_TO_CODE: Lazy<HashMap<&'static str, u16>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for code in 0..=127u16 {
        if let Some(glyph) = KeycodeToGlyph::translate(code) {
            map.entry(glyph).or_insert(code);
        }
    }
    map
});

// Текстовые синонимы для глифов, которые неудобно набирать
static ALIASES: Lazy<HashMap<&'static str, u16>> = Lazy::new(|| {
    let mut map = HashMap::new();
    map.insert("space", 49);
    map.insert("return", 36);
    map.insert("enter", 36);
    map.insert("tab", 48);
    map.insert("delete", 51);
    map.insert("backspace", 51);
    map.insert("escape", 53);
    map.insert("esc", 53);
    map.insert("left", 123);
    map.insert("right", 124);
    map.insert("down", 125);
    map.insert("up", 126);
    map
});

impl GlyphToKeycode {
    /// Получить код клавиши по её глифу или имени
    pub fn translate(glyph: &str) -> Result<u16, String> {
        if let Some(code) = GLYPH_TO_CODE.get(glyph) {
            return Ok(*code);
        }

        let upper = glyph.to_uppercase();
        if let Some(code) = GLYPH_TO_CODE.get(upper.as_str()) {
            return Ok(*code);
        }

        if let Some(code) = ALIASES.get(glyph.to_lowercase().as_str()) {
            return Ok(*code);
        }

        // Запасной формат `Key<N>` для клавиш без глифа
        if let Some(number) = glyph.strip_prefix("Key") {
            if let Ok(code) = number.parse::<u16>() {
                return Ok(code);
            }
        }

        Err(format!("Неизвестная клавиша: {}", glyph))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_prefers_main_keyboard() {
        assert_eq!(GlyphToKeycode::translate("1").unwrap(), 18);
        assert_eq!(GlyphToKeycode::translate(".").unwrap(), 47);
        assert_eq!(GlyphToKeycode::translate("/").unwrap(), 44);
        assert_eq!(GlyphToKeycode::translate("⇧").unwrap(), 56);
        assert_eq!(GlyphToKeycode::translate("⌘").unwrap(), 54);
    }

    #[test]
    fn test_case_and_aliases() {
        assert_eq!(GlyphToKeycode::translate("k").unwrap(), 40);
        assert_eq!(GlyphToKeycode::translate("K").unwrap(), 40);
        assert_eq!(GlyphToKeycode::translate("space").unwrap(), 49);
        assert_eq!(GlyphToKeycode::translate("Space").unwrap(), 49);
        assert_eq!(GlyphToKeycode::translate("esc").unwrap(), 53);
        assert_eq!(GlyphToKeycode::translate("f5").unwrap(), 96);
    }

    #[test]
    fn test_fallback_and_errors() {
        assert_eq!(GlyphToKeycode::translate("Key110").unwrap(), 110);
        assert!(GlyphToKeycode::translate("Keyboard").is_err());
        assert!(GlyphToKeycode::translate("???").is_err());
    }
}
