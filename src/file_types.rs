//! Extension allow-lists and the MIME types attached to stored objects.

/// Extensions the in-browser editor can open, create and save.
pub const EDITABLE_EXTENSIONS: [&str; 12] = [
    "html", "htm", "xml", "xhtml", "svg", "md", "markdown", "mdx", "css", "txt", "js", "json",
];

pub const AUDIO_EXTENSIONS: [&str; 6] = ["ogg", "wav", "mp3", "opus", "mid", "midi"];

pub const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "gif", "webp", "ico"];

/// Placeholder page written at `{directory}/index.html` to make a directory visible.
pub const DEFAULT_INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1.0" />
    <title>Home</title>
  </head>
  <body>
    <h1>Hello, world!</h1>
  </body>
</html>
"#;

/// Which allow-list an operation is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionSet {
    /// Text formats handled by the editor (save, create).
    Editable,
    /// Editable formats plus audio and images (upload).
    Uploadable,
}

impl ExtensionSet {
    pub fn allows(self, extension: &str) -> bool {
        let extension = extension.to_ascii_lowercase();
        let ext = extension.as_str();
        match self {
            ExtensionSet::Editable => EDITABLE_EXTENSIONS.contains(&ext),
            ExtensionSet::Uploadable => {
                EDITABLE_EXTENSIONS.contains(&ext)
                    || AUDIO_EXTENSIONS.contains(&ext)
                    || IMAGE_EXTENSIONS.contains(&ext)
            }
        }
    }

    pub fn extensions(self) -> Vec<&'static str> {
        let mut all = EDITABLE_EXTENSIONS.to_vec();
        if self == ExtensionSet::Uploadable {
            all.extend_from_slice(&AUDIO_EXTENSIONS);
            all.extend_from_slice(&IMAGE_EXTENSIONS);
        }
        all
    }
}

/// Text after the last `.`, or `None` when there is no dot or nothing follows it.
pub fn extension_of(name: &str) -> Option<&str> {
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() { None } else { Some(ext) }
}

/// MIME type for a file name, falling back to `application/octet-stream`.
pub fn content_type_for(name: &str) -> &'static str {
    let ext = extension_of(name).map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("html") | Some("htm") => "text/html",
        Some("xml") => "application/xml",
        Some("xhtml") => "application/xhtml+xml",
        Some("svg") => "image/svg+xml",
        Some("md") | Some("markdown") | Some("mdx") => "text/markdown",
        Some("css") => "text/css",
        Some("txt") => "text/plain",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("ogg") => "audio/ogg",
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("opus") => "audio/opus",
        Some("mid") | Some("midi") => "audio/midi",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_set_is_a_superset_of_editable() {
        for ext in EDITABLE_EXTENSIONS {
            assert!(ExtensionSet::Uploadable.allows(ext));
        }
        assert!(ExtensionSet::Uploadable.allows("PNG"));
        assert!(!ExtensionSet::Editable.allows("png"));
        assert!(!ExtensionSet::Uploadable.allows("exe"));
    }

    #[test]
    fn extension_requires_text_after_last_dot() {
        assert_eq!(extension_of("a.tar.gz"), Some("gz"));
        assert_eq!(extension_of("noext"), None);
        assert_eq!(extension_of("trailing."), None);
    }

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type_for("index.HTML"), "text/html");
        assert_eq!(content_type_for("song.mp3"), "audio/mpeg");
        assert_eq!(content_type_for("blob"), "application/octet-stream");
    }
}
