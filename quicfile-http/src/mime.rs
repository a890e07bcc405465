//! Static MIME type lookup.

/// Map a lowercase file extension to a MIME type.
///
/// Unknown extensions fall back to `application/octet-stream`.
pub fn mime_type(extension: &str) -> &'static str {
    match extension {
        "html" | "htm" => "text/html",
        "txt" => "text/plain",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flv" => "video/x-flv",
        _ => "application/octet-stream",
    }
}

/// Extract the extension of a path, if any.
pub fn file_extension(path: &str) -> Option<&str> {
    path.rsplit_once('.').map(|(_, ext)| ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions_resolve() {
        assert_eq!(mime_type("html"), "text/html");
        assert_eq!(mime_type("png"), "image/png");
        assert_eq!(mime_type("flv"), "video/x-flv");
    }

    #[test]
    fn unknown_extension_defaults_to_octet_stream() {
        assert_eq!(mime_type("weird"), "application/octet-stream");
        assert_eq!(mime_type(""), "application/octet-stream");
    }

    #[test]
    fn extension_extraction() {
        assert_eq!(file_extension("/data/movie.flv"), Some("flv"));
        assert_eq!(file_extension("archive.tar.gz"), Some("gz"));
        assert_eq!(file_extension("/no-extension"), None);
    }
}
