//! Sample input files that documentation snippets open by name
//! (`open("invoice.pdf", "rb")`). Provisioned once per run and copied into
//! each entry point's working directory.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use flate2::Crc;
use flate2::Compression;
use flate2::write::ZlibEncoder;
use tempfile::TempDir;
use tracing::debug;

const PDF_FILES: &[&str] = &["document.pdf", "invoice.pdf"];
const JPEG_FILES: &[&str] = &["image.jpg", "photo.jpg", "product.jpg", "people.jpg", "passport.jpg"];
const PNG_FILES: &[&str] = &["image.png"];
const TEXT_FILES: &[&str] = &["document.txt"];

const SAMPLE_TEXT: &str = "This platform provides access to multiple AI providers through a \
single API. It supports text analysis, image processing, OCR, and many other AI features.";

/// A directory of fixture files, removed on drop.
#[derive(Debug)]
pub struct Fixtures {
    dir: TempDir,
    files: Vec<&'static str>,
}

impl Fixtures {
    pub fn provision() -> io::Result<Fixtures> {
        let dir = tempfile::Builder::new().prefix("docsnip-fixtures-").tempdir()?;
        let mut files = Vec::new();

        let groups: [(&[&'static str], Vec<u8>); 4] = [
            (PDF_FILES, minimal_pdf()),
            (JPEG_FILES, minimal_jpeg()),
            (PNG_FILES, minimal_png()?),
            (TEXT_FILES, SAMPLE_TEXT.as_bytes().to_vec()),
        ];
        for (names, bytes) in &groups {
            for name in *names {
                fs::write(dir.path().join(name), bytes)?;
                files.push(*name);
            }
        }
        debug!(dir = %dir.path().display(), files = files.len(), "provisioned fixtures");
        Ok(Fixtures { dir, files })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn files(&self) -> &[&'static str] {
        &self.files
    }

    /// A fresh working directory holding a copy of every fixture.
    pub fn workspace(&self) -> io::Result<TempDir> {
        let work = tempfile::Builder::new().prefix("docsnip-run-").tempdir()?;
        for name in &self.files {
            fs::copy(self.dir.path().join(name), work.path().join(name))?;
        }
        Ok(work)
    }
}

// ---------------------------------------------------------------------------
// Minimal valid files
// ---------------------------------------------------------------------------

fn minimal_pdf() -> Vec<u8> {
    concat!(
        "%PDF-1.0\n",
        "1 0 obj<</Type/Catalog/Pages 2 0 R>>endobj\n",
        "2 0 obj<</Type/Pages/Kids[3 0 R]/Count 1>>endobj\n",
        "3 0 obj<</Type/Page/MediaBox[0 0 612 792]/Parent 2 0 R>>endobj\n",
        "xref\n0 4\n",
        "0000000000 65535 f \n",
        "0000000009 00000 n \n",
        "0000000058 00000 n \n",
        "0000000115 00000 n \n",
        "trailer<</Size 4/Root 1 0 R>>\n",
        "startxref\n190\n%%EOF",
    )
    .as_bytes()
    .to_vec()
}

/// Baseline JPEG, 1x1, one component.
fn minimal_jpeg() -> Vec<u8> {
    let mut out = vec![
        0xFF, 0xD8, // SOI
        0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x00, 0x00, 0x01, 0x00,
        0x01, 0x00, 0x00, // APP0
        0xFF, 0xDB, 0x00, 0x43, 0x00, // DQT
    ];
    out.extend([0x01; 64]);
    out.extend([
        0xFF, 0xC0, 0x00, 0x0B, 0x08, 0x00, 0x01, 0x00, 0x01, 0x01, 0x01, 0x11, 0x00, // SOF0
        0xFF, 0xC4, 0x00, 0x1F, 0x00, // DHT, DC table 0
    ]);
    out.extend([0x00; 16]);
    out.extend([0x00, 0xFF, 0xC4, 0x00, 0x1F, 0x10]); // DHT, AC table 0
    out.extend([0x00; 16]);
    out.extend([
        0x00, 0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00, // SOS
        0x7F, 0x50, // scan data
        0xFF, 0xD9, // EOI
    ]);
    out
}

/// 1x1 white RGB PNG.
fn minimal_png() -> io::Result<Vec<u8>> {
    let mut out = b"\x89PNG\r\n\x1a\n".to_vec();

    let mut ihdr = Vec::new();
    ihdr.extend(1u32.to_be_bytes());
    ihdr.extend(1u32.to_be_bytes());
    ihdr.extend([8, 2, 0, 0, 0]);
    png_chunk(&mut out, b"IHDR", &ihdr);

    // One scanline: filter byte, then RGB.
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&[0x00, 0xFF, 0xFF, 0xFF])?;
    png_chunk(&mut out, b"IDAT", &encoder.finish()?);

    png_chunk(&mut out, b"IEND", &[]);
    Ok(out)
}

/// Length, type, data, then the CRC-32 of type and data.
fn png_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    out.extend((data.len() as u32).to_be_bytes());
    let mut crc = Crc::new();
    crc.update(kind);
    crc.update(data);
    out.extend(kind);
    out.extend(data);
    out.extend(crc.sum().to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    #[test]
    fn png_scanline_decompresses() {
        let png = minimal_png().unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        // IEND with its fixed CRC.
        assert!(png.ends_with(&[0, 0, 0, 0, b'I', b'E', b'N', b'D', 0xAE, 0x42, 0x60, 0x82]));

        let idat = png.windows(4).position(|w| w == b"IDAT").unwrap();
        let len = u32::from_be_bytes(png[idat - 4..idat].try_into().unwrap()) as usize;
        let mut pixels = Vec::new();
        ZlibDecoder::new(&png[idat + 4..idat + 4 + len])
            .read_to_end(&mut pixels)
            .unwrap();
        assert_eq!(pixels, vec![0x00, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn provisions_every_file() {
        let fixtures = Fixtures::provision().unwrap();
        assert_eq!(fixtures.files().len(), 9);
        let pdf = fs::read(fixtures.path().join("invoice.pdf")).unwrap();
        assert!(pdf.starts_with(b"%PDF-"));
        let png = fs::read(fixtures.path().join("image.png")).unwrap();
        assert!(png.ends_with(&[0xAE, 0x42, 0x60, 0x82]));
        let jpeg = fs::read(fixtures.path().join("passport.jpg")).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn workspaces_are_independent_and_removed_on_drop() {
        let fixtures = Fixtures::provision().unwrap();
        let a = fixtures.workspace().unwrap();
        let b = fixtures.workspace().unwrap();
        assert_ne!(a.path(), b.path());
        fs::write(a.path().join("document.txt"), "changed").unwrap();
        assert_eq!(fs::read_to_string(b.path().join("document.txt")).unwrap(), SAMPLE_TEXT);

        let kept = a.path().to_path_buf();
        drop(a);
        assert!(!kept.exists());
    }
}
