use formats::spr::SpriteImage;
use std::io::Cursor;

/// Encodes a decoded sprite as an RGBA PNG.
pub fn sprite_png(image: &SpriteImage) -> Result<Vec<u8>, png::EncodingError> {
    let mut cursor = Cursor::new(Vec::new());
    let mut encoder = png::Encoder::new(&mut cursor, image.width as u32, image.height as u32);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&image.data)?;
    writer.finish()?;
    Ok(cursor.into_inner())
}
