use std::fmt;
use std::path::{Path, PathBuf};

use fontdue::layout::{
    CoordinateSystem, HorizontalAlign, Layout, LayoutSettings, TextStyle, WrapStyle,
};
use fontdue::{Font, FontSettings};
use image::{ImageFormat, Rgb, RgbImage};
use tracing::{info, warn};

use super::error::PlaceholderError;
use super::font::{glyph, GLYPH_HEIGHT, GLYPH_WIDTH};
use crate::config::RenderSection;

pub const PLACEHOLDER_FILE_NAME: &str = "placeholder.jpg";
pub const PLACEHOLDER_WIDTH: u32 = 800;
pub const PLACEHOLDER_HEIGHT: u32 = 600;

const BACKGROUND: Rgb<u8> = Rgb([33, 33, 33]);
const FOREGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const CAPTION_TOP: u32 = 280;
const FONT_SIZE: f32 = 40.0;
const BUILTIN_SCALE: u32 = 5;
const SIDE_MARGIN: u32 = 20;

pub fn placeholder_caption(channel: &str) -> String {
    format!("No images found in r/{channel}")
}

/// Renders the stand-in frame used when a channel run retained no images.
pub struct PlaceholderGenerator {
    font: Option<Font>,
}

impl fmt::Debug for PlaceholderGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaceholderGenerator")
            .field("builtin_font", &self.font.is_none())
            .finish()
    }
}

impl Default for PlaceholderGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaceholderGenerator {
    pub fn new() -> Self {
        Self { font: None }
    }

    /// Loads a TrueType font; unreadable or unparsable files leave the
    /// generator on the builtin bitmap font.
    pub fn with_font_file<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "caption font unreadable, using builtin font");
                return Self::new();
            }
        };
        match Font::from_bytes(bytes, FontSettings::default()) {
            Ok(font) => Self { font: Some(font) },
            Err(err) => {
                warn!(path = %path.display(), error = err, "caption font invalid, using builtin font");
                Self::new()
            }
        }
    }

    pub fn from_render_config(render: &RenderSection) -> Self {
        match &render.font_path {
            Some(path) => Self::with_font_file(path),
            None => Self::new(),
        }
    }

    pub fn uses_builtin_font(&self) -> bool {
        self.font.is_none()
    }

    pub fn render(&self, caption: &str) -> RgbImage {
        let mut canvas = RgbImage::from_pixel(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT, BACKGROUND);
        match &self.font {
            Some(font) => draw_truetype(&mut canvas, font, caption),
            None => draw_builtin(&mut canvas, caption),
        }
        canvas
    }

    /// Writes `placeholder.jpg` into `scratch_dir` and returns its path.
    pub fn generate(&self, scratch_dir: &Path, caption: &str) -> Result<PathBuf, PlaceholderError> {
        let path = scratch_dir.join(PLACEHOLDER_FILE_NAME);
        self.render(caption)
            .save_with_format(&path, ImageFormat::Jpeg)
            .map_err(|err| PlaceholderError::Write {
                path: path.clone(),
                reason: err.to_string(),
            })?;
        info!(path = %path.display(), caption, "placeholder generated");
        Ok(path)
    }
}

fn draw_truetype(canvas: &mut RgbImage, font: &Font, caption: &str) {
    let mut layout = Layout::new(CoordinateSystem::PositiveYDown);
    layout.reset(&LayoutSettings {
        x: SIDE_MARGIN as f32,
        y: CAPTION_TOP as f32,
        max_width: Some((PLACEHOLDER_WIDTH - 2 * SIDE_MARGIN) as f32),
        horizontal_align: HorizontalAlign::Center,
        wrap_style: WrapStyle::Word,
        ..LayoutSettings::default()
    });
    layout.append(&[font], &TextStyle::new(caption, FONT_SIZE, 0));

    for placed in layout.glyphs() {
        if placed.width == 0 || placed.height == 0 {
            continue;
        }
        let (_, coverage) = font.rasterize_config(placed.key);
        let origin_x = placed.x.round() as i64;
        let origin_y = placed.y.round() as i64;
        for row in 0..placed.height {
            for col in 0..placed.width {
                let alpha = coverage[row * placed.width + col];
                if alpha > 0 {
                    blend(canvas, origin_x + col as i64, origin_y + row as i64, alpha);
                }
            }
        }
    }
}

fn draw_builtin(canvas: &mut RgbImage, caption: &str) {
    let chars = caption.chars().count().max(1) as u32;
    let cell = GLYPH_WIDTH + 1;
    let available = PLACEHOLDER_WIDTH - 2 * SIDE_MARGIN;
    let scale = (available / (chars * cell)).clamp(1, BUILTIN_SCALE);
    let text_width = chars * cell * scale - scale;
    let left = PLACEHOLDER_WIDTH.saturating_sub(text_width) / 2;

    for (index, ch) in caption.chars().enumerate() {
        let x0 = left + index as u32 * cell * scale;
        for (col, bits) in glyph(ch).iter().enumerate() {
            for row in 0..GLYPH_HEIGHT {
                if bits & (1 << row) == 0 {
                    continue;
                }
                let px = x0 + col as u32 * scale;
                let py = CAPTION_TOP + row * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        blend(canvas, (px + dx) as i64, (py + dy) as i64, u8::MAX);
                    }
                }
            }
        }
    }
}

fn blend(canvas: &mut RgbImage, x: i64, y: i64, alpha: u8) {
    if x < 0 || y < 0 || x >= canvas.width() as i64 || y >= canvas.height() as i64 {
        return;
    }
    let pixel = canvas.get_pixel_mut(x as u32, y as u32);
    let alpha = alpha as u32;
    for channel in 0..3 {
        let bg = pixel.0[channel] as u32;
        let fg = FOREGROUND.0[channel] as u32;
        pixel.0[channel] = ((fg * alpha + bg * (255 - alpha)) / 255) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn lit_rows(image: &RgbImage) -> Vec<u32> {
        (0..image.height())
            .filter(|&y| (0..image.width()).any(|x| image.get_pixel(x, y).0[0] > 128))
            .collect()
    }

    #[test]
    fn caption_names_the_channel() {
        assert_eq!(placeholder_caption("emptysub"), "No images found in r/emptysub");
    }

    #[test]
    fn builtin_render_is_centered_on_the_caption_line() {
        let generator = PlaceholderGenerator::new();
        assert!(generator.uses_builtin_font());
        let image = generator.render(&placeholder_caption("wholesomememes"));

        assert_eq!(image.dimensions(), (PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT));
        assert_eq!(*image.get_pixel(0, 0), BACKGROUND);
        let rows = lit_rows(&image);
        assert!(!rows.is_empty());
        assert!(rows.iter().all(|&y| y >= CAPTION_TOP && y < CAPTION_TOP + 60));

        let columns: Vec<u32> = (0..image.width())
            .filter(|&x| (0..image.height()).any(|y| image.get_pixel(x, y).0[0] > 128))
            .collect();
        let left = columns[0];
        let right = PLACEHOLDER_WIDTH - 1 - columns[columns.len() - 1];
        assert!(left.abs_diff(right) <= 10, "left {left} right {right}");
    }

    #[test]
    fn missing_font_file_falls_back_to_builtin() {
        let dir = TempDir::new().unwrap();
        let generator = PlaceholderGenerator::with_font_file(dir.path().join("absent.ttf"));
        assert!(generator.uses_builtin_font());

        let bogus = dir.path().join("bogus.ttf");
        std::fs::write(&bogus, b"not a font").unwrap();
        let render = RenderSection {
            font_path: Some(bogus),
            ..RenderSection::default()
        };
        assert!(PlaceholderGenerator::from_render_config(&render).uses_builtin_font());
    }

    #[test]
    fn generate_writes_a_jpeg() {
        let dir = TempDir::new().unwrap();
        let path = PlaceholderGenerator::new()
            .generate(dir.path(), &placeholder_caption("emptysub"))
            .unwrap();
        assert_eq!(path, dir.path().join(PLACEHOLDER_FILE_NAME));
        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (800, 600));
    }

    #[test]
    fn generate_into_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let err = PlaceholderGenerator::new()
            .generate(&dir.path().join("gone"), "x")
            .unwrap_err();
        assert!(matches!(err, PlaceholderError::Write { .. }));
    }
}
