use serde::Deserialize;

/// Normalized cast used by the watch loop (provider-agnostic).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    /// Stable unique identifier (the cast hash).
    pub id: String,
    pub author: Option<String>,
    pub text: String,
    /// ISO-8601 publication time, as sent by the API.
    pub timestamp: Option<String>,
}

impl Post {
    pub fn author_handle(&self) -> &str {
        match self.author.as_deref() {
            Some(handle) if !handle.is_empty() => handle,
            _ => "unknown",
        }
    }

    /// Canonical Warpcast permalink for this cast.
    pub fn link(&self) -> String {
        format!("https://warpcast.com/{}/{}", self.author_handle(), self.id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Connection failure or timeout; worth retrying.
    #[error("transport error: {0}")]
    Transport(String),
    /// Non-2xx status or an undecodable body.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl FeedError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FeedError::Transport(_))
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        let e = e.without_url();
        if e.is_decode() || e.is_builder() || e.is_status() {
            FeedError::Protocol(e.to_string())
        } else {
            FeedError::Transport(e.to_string())
        }
    }
}

/// Neynar `feed/user/casts` cast object. Only the fields we read.
#[derive(Debug, Deserialize)]
pub struct NeynarCast {
    pub hash: Option<String>,
    pub author: Option<NeynarAuthor>,
    pub text: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NeynarAuthor {
    pub username: Option<String>,
}

impl NeynarCast {
    /// Casts without a hash cannot be deduplicated and are dropped.
    pub fn into_post(self) -> Option<Post> {
        let id = self.hash.filter(|h| !h.is_empty())?;
        Some(Post {
            id,
            author: self.author.and_then(|a| a.username),
            text: self.text.unwrap_or_default(),
            timestamp: self.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(author: Option<&str>) -> Post {
        Post {
            id: "0xabc".to_string(),
            author: author.map(str::to_string),
            text: String::new(),
            timestamp: None,
        }
    }

    #[test]
    fn test_link_uses_author_and_hash() {
        assert_eq!(post(Some("dwr")).link(), "https://warpcast.com/dwr/0xabc");
    }

    #[test]
    fn test_missing_or_empty_author_is_unknown() {
        assert_eq!(post(None).author_handle(), "unknown");
        assert_eq!(post(Some("")).link(), "https://warpcast.com/unknown/0xabc");
    }

    #[test]
    fn test_cast_without_hash_is_dropped() {
        let cast: NeynarCast = serde_json::from_str(r#"{"text": "hi"}"#).unwrap();
        assert!(cast.into_post().is_none());
        let cast: NeynarCast = serde_json::from_str(r#"{"hash": "", "text": "hi"}"#).unwrap();
        assert!(cast.into_post().is_none());
    }

    #[test]
    fn test_cast_into_post() {
        let cast: NeynarCast = serde_json::from_str(
            r#"{"hash": "0x1", "author": {"fid": 3, "username": "dwr"}, "text": "gm", "timestamp": "2024-05-01T10:00:00Z", "reactions": {}}"#,
        )
        .unwrap();
        let post = cast.into_post().unwrap();
        assert_eq!(post.id, "0x1");
        assert_eq!(post.author.as_deref(), Some("dwr"));
        assert_eq!(post.text, "gm");
        assert_eq!(post.timestamp.as_deref(), Some("2024-05-01T10:00:00Z"));
    }

    #[test]
    fn test_only_transport_errors_are_transient() {
        assert!(FeedError::Transport("timed out".into()).is_transient());
        assert!(!FeedError::Protocol("HTTP 500".into()).is_transient());
    }
}
