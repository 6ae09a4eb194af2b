// src/emit/exe/images.rs

//! Branding bitmaps for the Windows installer
//!
//! NSIS's Modern UI takes uncompressed BMP files for the welcome panel and
//! the page header. Without a user-supplied image, a solid fill in the
//! recipe's `default_image_color` is written instead.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::filesystem::{copy_atomic, write_atomic};

/// Welcome/finish panel, left side of the wizard
pub const WELCOME_SIZE: (u32, u32) = (164, 314);
/// Header strip of inner pages
pub const HEADER_SIZE: (u32, u32) = (150, 57);

const FILE_HEADER_LEN: u32 = 14;
const INFO_HEADER_LEN: u32 = 40;

/// An RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// Parse a color name or `#rrggbb`
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Some(hex) = value.strip_prefix('#') {
            if hex.len() != 6 {
                return None;
            }
            let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
            return Some(Rgb(channel(0)?, channel(2)?, channel(4)?));
        }
        let rgb = match value.to_ascii_lowercase().as_str() {
            "blue" => Rgb(0, 0, 255),
            "red" => Rgb(255, 0, 0),
            "green" => Rgb(0, 128, 0),
            "yellow" => Rgb(255, 255, 0),
            "black" => Rgb(0, 0, 0),
            "white" => Rgb(255, 255, 255),
            "gray" | "grey" => Rgb(128, 128, 128),
            "orange" => Rgb(255, 165, 0),
            "purple" => Rgb(128, 0, 128),
            "navy" => Rgb(0, 0, 128),
            _ => return None,
        };
        Some(rgb)
    }
}

/// Encode a solid-color 24-bit BMP
///
/// Rows are stored bottom-up, BGR, each padded to a multiple of four bytes.
pub fn solid_bmp(width: u32, height: u32, color: Rgb) -> Vec<u8> {
    let row_len = (width * 3).div_ceil(4) * 4;
    let pixels_len = row_len * height;
    let offset = FILE_HEADER_LEN + INFO_HEADER_LEN;
    let mut out = Vec::with_capacity((offset + pixels_len) as usize);

    // BITMAPFILEHEADER
    out.extend_from_slice(b"BM");
    out.extend_from_slice(&(offset + pixels_len).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&offset.to_le_bytes());

    // BITMAPINFOHEADER
    out.extend_from_slice(&INFO_HEADER_LEN.to_le_bytes());
    out.extend_from_slice(&(width as i32).to_le_bytes());
    out.extend_from_slice(&(height as i32).to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&24u16.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&pixels_len.to_le_bytes());
    out.extend_from_slice(&2835i32.to_le_bytes());
    out.extend_from_slice(&2835i32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());

    let Rgb(r, g, b) = color;
    let mut row = Vec::with_capacity(row_len as usize);
    for _ in 0..width {
        row.extend_from_slice(&[b, g, r]);
    }
    row.resize(row_len as usize, 0);
    for _ in 0..height {
        out.extend_from_slice(&row);
    }
    out
}

/// Place `name` in `dir`: a copy of `supplied`, or a solid fill
///
/// Supplied images must already be BMP files.
pub fn stage_bitmap(
    dir: &Path,
    name: &str,
    supplied: Option<&Path>,
    size: (u32, u32),
    color: &str,
) -> Result<PathBuf> {
    let dest = dir.join(name);
    match supplied {
        Some(src) => {
            let is_bmp = src
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("bmp"));
            if !is_bmp {
                return Err(Error::Emit(format!(
                    "{} is not a BMP image; NSIS accepts only bitmaps",
                    src.display()
                )));
            }
            copy_atomic(src, &dest)?;
        }
        None => {
            let rgb = Rgb::parse(color).ok_or_else(|| {
                Error::recipe("default_image_color", format!("unknown color '{color}'"))
            })?;
            write_atomic(&dest, solid_bmp(size.0, size.1, rgb))?;
        }
    }
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn u32_at(data: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
    }

    #[test]
    fn test_parse_colors() {
        assert_eq!(Rgb::parse("blue"), Some(Rgb(0, 0, 255)));
        assert_eq!(Rgb::parse("Grey"), Some(Rgb(128, 128, 128)));
        assert_eq!(Rgb::parse("#1a2B3c"), Some(Rgb(0x1a, 0x2b, 0x3c)));
        assert_eq!(Rgb::parse("#123"), None);
        assert_eq!(Rgb::parse("chartreuse-ish"), None);
    }

    #[test]
    fn test_solid_bmp_layout() {
        let (w, h) = HEADER_SIZE;
        let bmp = solid_bmp(w, h, Rgb(1, 2, 3));
        let row_len = (w * 3).div_ceil(4) * 4;
        assert_eq!(&bmp[..2], b"BM");
        assert_eq!(u32_at(&bmp, 2) as usize, bmp.len());
        assert_eq!(u32_at(&bmp, 10), 54);
        assert_eq!(u32_at(&bmp, 18), w);
        assert_eq!(u32_at(&bmp, 22), h);
        assert_eq!(bmp.len(), 54 + (row_len * h) as usize);
        // first pixel is BGR
        assert_eq!(&bmp[54..57], &[3, 2, 1]);
        // 150 * 3 = 450 bytes of pixels, two bytes of row padding
        assert_eq!(row_len, 452);
        assert_eq!(&bmp[54 + 450..54 + 452], &[0, 0]);
    }

    #[test]
    fn test_stage_default_and_supplied() {
        let dir = TempDir::new().unwrap();
        let path = stage_bitmap(dir.path(), "welcome.bmp", None, WELCOME_SIZE, "white").unwrap();
        let data = std::fs::read(&path).unwrap();
        assert_eq!(u32_at(&data, 18), 164);

        let png = dir.path().join("logo.png");
        std::fs::write(&png, b"\x89PNG").unwrap();
        assert!(stage_bitmap(dir.path(), "header.bmp", Some(&png), HEADER_SIZE, "blue").is_err());

        let err = stage_bitmap(dir.path(), "header.bmp", None, HEADER_SIZE, "mauve").unwrap_err();
        assert!(matches!(err, Error::Recipe { .. }));
    }
}
