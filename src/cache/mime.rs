/// Fallback type for unknown extensions.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// MIME type for a file name, chosen by its (case-insensitive) extension.
pub fn mime_for_path(path: &str) -> &'static str {
    let name = path.rsplit('/').next().unwrap_or(path);
    let Some((_, ext)) = name.rsplit_once('.') else {
        return DEFAULT_MIME_TYPE;
    };
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "js" => "application/javascript",
        "css" => "text/css",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "xml" => "application/xml",
        "json" => "application/json",
        "swf" => "application/x-shockwave-flash",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "txt" => "text/plain",
        _ => DEFAULT_MIME_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_extensions() {
        assert_eq!(mime_for_path("story.html"), "text/html");
        assert_eq!(mime_for_path("story_content/M1.PNG"), "image/png");
        assert_eq!(mime_for_path("a/b/player.js"), "application/javascript");
        assert_eq!(mime_for_path("intro.mp4"), "video/mp4");
    }

    #[test]
    fn test_unknown_extensions() {
        assert_eq!(mime_for_path("data.bin"), DEFAULT_MIME_TYPE);
        assert_eq!(mime_for_path("README"), DEFAULT_MIME_TYPE);
        assert_eq!(mime_for_path("dir.d/README"), DEFAULT_MIME_TYPE);
    }
}
