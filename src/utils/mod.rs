mod timestamp;

pub use timestamp::{modified_since, read_last_run, write_last_run, TimestampError};

/// Default manifest file name
pub const DEFAULT_MANIFEST_FILE: &str = "settings.xml";

/// Default folder holding the local files referenced by the manifest
pub const DEFAULT_ASSETS_DIR: &str = "Branding";

/// Default name of the last-run timestamp file
pub const DEFAULT_TIMESTAMP_FILE: &str = "lastrun.log";

/// Comment used for every checkin, publish and approval
pub const LIFECYCLE_COMMENT: &str = "Updating branding";

/// Strip trailing slashes from a URL or path
pub fn trim_end_slashes(value: &str) -> &str {
    value.trim_end_matches('/')
}

/// Join two URL fragments with exactly one slash between them
pub fn join_url(base: &str, segment: &str) -> String {
    format!(
        "{}/{}",
        trim_end_slashes(base),
        segment.trim_start_matches('/')
    )
}

/// Build a file URL from a server path ending in `/`, an optional folder and a file name
pub fn file_url(server_path: &str, folder: &str, name: &str) -> String {
    if folder.is_empty() {
        format!("{}{}", server_path, name)
    } else {
        format!("{}{}/{}", server_path, folder, name)
    }
}

/// Split a server-relative file URL into its folder and leaf name
pub fn split_file_url(url: &str) -> (&str, &str) {
    match url.rfind('/') {
        Some(index) => (&url[..index], &url[index + 1..]),
        None => ("", url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("/sites/a/", "/Style Library"), "/sites/a/Style Library");
        assert_eq!(join_url("https://x", "sites/a"), "https://x/sites/a");
    }

    #[test]
    fn test_file_url() {
        assert_eq!(file_url("/sites/a/lib/", "", "f.css"), "/sites/a/lib/f.css");
        assert_eq!(file_url("/sites/a/lib/", "css", "f.css"), "/sites/a/lib/css/f.css");
    }

    #[test]
    fn test_split_file_url() {
        assert_eq!(split_file_url("/a/b/c.txt"), ("/a/b", "c.txt"));
        assert_eq!(split_file_url("c.txt"), ("", "c.txt"));
    }
}
