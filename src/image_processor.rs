use image::ImageFormat;
use std::path::Path;

/// Detect MIME type based on file extension
pub fn mime_from_extension(file_name: &str) -> Option<&'static str> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())?
        .to_lowercase();

    match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

/// Sniff the image format from the leading bytes.
pub fn sniff_image_format(bytes: &[u8]) -> Option<ImageFormat> {
    match image::guess_format(bytes) {
        Ok(format) if is_supported_format(format) => Some(format),
        Ok(format) => {
            log::debug!("Unsupported image format detected: {:?}", format);
            None
        }
        Err(_) => None,
    }
}

fn is_supported_format(format: ImageFormat) -> bool {
    matches!(
        format,
        ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::WebP | ImageFormat::Gif
    )
}

/// MIME type for a payload: content first, then the file name.
pub fn detect_mime_type(bytes: &[u8], file_name: &str) -> Option<String> {
    sniff_image_format(bytes)
        .map(|format| format.to_mime_type().to_string())
        .or_else(|| mime_from_extension(file_name).map(str::to_string))
}

/// File extension used when asking storage for an upload slot.
pub fn extension_for(file_name: &str, mime_type: &str) -> String {
    if let Some(ext) = Path::new(file_name).extension().and_then(|e| e.to_str()) {
        return ext.to_lowercase();
    }

    match mime_type {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
    .to_string()
}

#[cfg(test)]
pub(crate) fn minimal_png() -> Vec<u8> {
    vec![
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, // PNG signature
        0x00, 0x00, 0x00, 0x0D, // IHDR chunk length
        0x49, 0x48, 0x44, 0x52, // IHDR
        0x00, 0x00, 0x00, 0x01, // width = 1
        0x00, 0x00, 0x00, 0x01, // height = 1
        0x08, 0x02, 0x00, 0x00, 0x00, // bit depth = 8, color type = 2 (RGB)
        0x90, 0x77, 0x53, 0xDE, // IHDR CRC
        0x00, 0x00, 0x00, 0x0C, // IDAT chunk length
        0x49, 0x44, 0x41, 0x54, // IDAT
        0x08, 0x99, 0x01, 0x01, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x02, 0x00,
        0x01, // IDAT data
        0x00, 0x00, 0x00, 0x00, // IEND chunk length
        0x49, 0x45, 0x4E, 0x44, // IEND
        0xAE, 0x42, 0x60, 0x82, // IEND CRC
    ]
}
