/// Преобразование виртуальных кодов клавиш macOS в глифы для отображения
/// Отвечает за трансляцию числовых kVK_* кодов в короткие имена клавиш
pub struct KeycodeToGlyph;

impl KeycodeToGlyph {
    /// Получить глиф клавиши по её коду
    pub fn translate(key_code: u16) -> Option<&'static str> {
        match key_code {
            // Буквенные клавиши (раскладка ANSI)
            0 => Some("A"),
            1 => Some("S"),
            2 => Some("D"),
            3 => Some("F"),
            4 => Some("H"),
            5 => Some("G"),
            6 => Some("Z"),
            7 => Some("X"),
            8 => Some("C"),
            9 => Some("V"),
            11 => Some("B"),
            12 => Some("Q"),
            13 => Some("W"),
            14 => Some("E"),
            15 => Some("R"),
            16 => Some("Y"),
            17 => Some("T"),
            31 => Some("O"),
            32 => Some("U"),
            34 => Some("I"),
            35 => Some("P"),
            37 => Some("L"),
            38 => Some("J"),
            40 => Some("K"),
            45 => Some("N"),
            46 => Some("M"),

            // Цифровые клавиши (верхний ряд)
            18 => Some("1"),
            19 => Some("2"),
            20 => Some("3"),
            21 => Some("4"),
            22 => Some("6"),
            23 => Some("5"),
            25 => Some("9"),
            26 => Some("7"),
            28 => Some("8"),
            29 => Some("0"),

            // Знаки препинания
            24 => Some("="),
            27 => Some("-"),
            30 => Some("]"),
            33 => Some("["),
            39 => Some("'"),
            41 => Some(";"),
            42 => Some("\\"),
            43 => Some(","),
            44 => Some("/"),
            47 => Some("."),
            50 => Some("`"),

            // Цифровая клавиатура
            65 => Some("."),
            67 => Some("*"),
            69 => Some("+"),
            71 => Some("Clear"),
            75 => Some("/"),
            76 => Some("Enter"),
            78 => Some("-"),
            81 => Some("="),
            82 => Some("0"),
            83 => Some("1"),
            84 => Some("2"),
            85 => Some("3"),
            86 => Some("4"),
            87 => Some("5"),
            88 => Some("6"),
            89 => Some("7"),
            91 => Some("8"),
            92 => Some("9"),

            // Специальные клавиши
            36 => Some("↩"),
            48 => Some("⇥"),
            49 => Some("Space"),
            51 => Some("⌫"),
            53 => Some("⎋"),
            123 => Some("←"),
            124 => Some("→"),
            125 => Some("↓"),
            126 => Some("↑"),

            // Функциональные клавиши
            122 => Some("F1"),
            120 => Some("F2"),
            99 => Some("F3"),
            118 => Some("F4"),
            96 => Some("F5"),
            97 => Some("F6"),
            98 => Some("F7"),
            100 => Some("F8"),
            101 => Some("F9"),
            109 => Some("F10"),
            103 => Some("F11"),
            111 => Some("F12"),

            // Модификаторы как самостоятельные клавиши
            54 => Some("⌘"),
            55 => Some("⌘"),
            56 => Some("⇧"),
            57 => Some("⇪"),
            58 => Some("⌥"),
            59 => Some("⌃"),
            60 => Some("⇧"),
            61 => Some("⌥"),
            62 => Some("⌃"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letters_and_digits() {
        assert_eq!(KeycodeToGlyph::translate(0), Some("A"));
        assert_eq!(KeycodeToGlyph::translate(40), Some("K"));
        assert_eq!(KeycodeToGlyph::translate(18), Some("1"));
        assert_eq!(KeycodeToGlyph::translate(29), Some("0"));
    }

    #[test]
    fn test_special_and_unknown() {
        assert_eq!(KeycodeToGlyph::translate(49), Some("Space"));
        assert_eq!(KeycodeToGlyph::translate(122), Some("F1"));
        assert_eq!(KeycodeToGlyph::translate(110), None);
        assert_eq!(KeycodeToGlyph::translate(500), None);
    }
}
