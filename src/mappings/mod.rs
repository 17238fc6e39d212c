mod glyph_to_keycode;
mod keycode_to_glyph;

pub use glyph_to_keycode::GlyphToKeycode;
pub use keycode_to_glyph::KeycodeToGlyph;
