//! Image fixtures and work item builders

use card_dl::WorkItem;
use std::path::Path;
use url::Url;

/// Smallest well-framed PNG (signature, IHDR, IEND)
pub fn png_bytes() -> Vec<u8> {
    let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
    png.extend_from_slice(&[0, 0, 0, 13]);
    png.extend_from_slice(b"IHDR");
    png.extend_from_slice(&[0, 0, 0, 1, 0, 0, 0, 1, 8, 6, 0, 0, 0]);
    png.extend_from_slice(&[0x1f, 0x15, 0xc4, 0x89]);
    png.extend_from_slice(b"\x00\x00\x00\x00IEND\xae\x42\x60\x82");
    png
}

/// Minimal JPEG: SOI, APP0 marker, EOI
pub fn jpeg_bytes() -> Vec<u8> {
    vec![
        0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0xFF, 0xD9,
    ]
}

/// A PNG cut off mid-transfer
pub fn truncated_png_bytes() -> Vec<u8> {
    let png = png_bytes();
    png[..png.len() / 2].to_vec()
}

/// Work item for `<server>/cards/<id>.png`, saved as `<dir>/cards/<id>.png`
pub fn card(server_uri: &str, dir: &Path, id: &str) -> WorkItem {
    WorkItem::new(
        id,
        Url::parse(&format!("{server_uri}/cards/{id}.png")).unwrap(),
        dir.join("cards").join(format!("{id}.png")),
    )
}
