//! Content-type resolution for uploaded objects.
//!
//! Resolution order: explicit override, then the no-guess flag, then an
//! extension lookup on the destination key, then `application/octet-stream`.

/// The fallback content type when nothing better is known.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Resolve the content type to send with an object.
pub fn resolve(override_type: Option<&str>, no_guess: bool, key: &str) -> String {
    if let Some(t) = override_type {
        return t.to_string();
    }
    if no_guess {
        return OCTET_STREAM.to_string();
    }
    by_extension(key).unwrap_or(OCTET_STREAM).to_string()
}

/// Look up a MIME type by the key's extension (everything after the last
/// `.`). Text types carry an explicit UTF-8 charset, matching what the
/// standard platform tables advertise.
fn by_extension(key: &str) -> Option<&'static str> {
    let ext = key.rsplit('.').next()?;
    if ext.len() == key.len() {
        // no dot at all
        return None;
    }
    let mime = match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "csv" => "text/csv; charset=utf-8",
        "txt" => "text/plain; charset=utf-8",
        "md" => "text/markdown; charset=utf-8",
        "xml" => "text/xml; charset=utf-8",
        "js" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "wasm" => "application/wasm",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ico" => "image/vnd.microsoft.icon",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => return None,
    };
    Some(mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins() {
        assert_eq!(
            resolve(Some("application/x-custom"), false, "a.html"),
            "application/x-custom"
        );
        // even over the no-guess flag
        assert_eq!(
            resolve(Some("application/x-custom"), true, "a.html"),
            "application/x-custom"
        );
    }

    #[test]
    fn no_guess_returns_octet_stream() {
        assert_eq!(resolve(None, true, "a.html"), OCTET_STREAM);
    }

    #[test]
    fn html_extension_carries_charset() {
        assert_eq!(resolve(None, false, "tmpfile.html"), "text/html; charset=utf-8");
    }

    #[test]
    fn unknown_extension_falls_back() {
        assert_eq!(resolve(None, false, "archive.xyzzy"), OCTET_STREAM);
        assert_eq!(resolve(None, false, "no_extension"), OCTET_STREAM);
    }

    #[test]
    fn lookup_uses_last_dot() {
        assert_eq!(resolve(None, false, "bundle.tar.gz"), "application/gzip");
    }
}
