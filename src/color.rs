//! Colour conversions for the minimap palette and light payloads.

use formats::dat::MAX_MINIMAP_COLOR;

/// Minimap colours index a 6x6x6 cube with red varying fastest.
pub fn minimap_color_to_rgb(index: u16) -> [u8; 3] {
    let index = index.min(MAX_MINIMAP_COLOR);
    let r = (index % 6) * 51;
    let g = ((index / 6) % 6) * 51;
    let b = ((index / 36) % 6) * 51;
    [r as u8, g as u8, b as u8]
}

/// Light colours are 15-bit RGB with red in the low bits.
pub fn light_color_to_rgb(color: u16) -> [u8; 3] {
    let r = (color & 0x1F) << 3;
    let g = ((color >> 5) & 0x1F) << 3;
    let b = ((color >> 10) & 0x1F) << 3;
    [r as u8, g as u8, b as u8]
}

/// Nearest minimap index for a 15-bit light colour.
pub fn light_color_to_minimap(color: u16) -> u16 {
    let [r, g, b] = light_color_to_rgb(color);
    let step = |c: u8| ((c as f32) / 51.0).round() as u16;
    (step(r) + step(g) * 6 + step(b) * 36).min(MAX_MINIMAP_COLOR)
}
