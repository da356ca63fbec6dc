/// Connection settings for a WebDAV server
#[derive(Debug, Clone, PartialEq)]
pub struct WebDavConfig {
    /// Base URL all relative paths are resolved against
    pub base_url: String,
    pub username: String,
    pub password: String,
}

impl WebDavConfig {
    /// Absolute URL for a relative remote path
    pub fn url_for(&self, path: &str) -> String {
        let base = self.base_url.trim().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            format!("{}/", base)
        } else {
            format!("{}/{}", base, path)
        }
    }
}

/// A direct child of a remote collection
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RemoteEntry {
    pub name: String,
    pub is_dir: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for_joins_single_slash() {
        let config = WebDavConfig {
            base_url: " https://example.com/dav/ ".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
        };
        assert_eq!(
            config.url_for("/life-habits-data/todo/all.json"),
            "https://example.com/dav/life-habits-data/todo/all.json"
        );
        assert_eq!(config.url_for(""), "https://example.com/dav/");
    }
}
