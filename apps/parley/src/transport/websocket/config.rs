use parley_proto::ConversationId;
use url::Url;

use crate::error::ChatResult;

/// Where the live channel for a conversation lives.
#[derive(Debug, Clone)]
pub struct LiveChannelConfig {
    /// Host base, e.g. `wss://social.example` or `127.0.0.1:8000`
    pub base_url: String,
    /// Whether to use TLS (wss:// vs ws://) when the base has no scheme
    pub use_tls: bool,
}

impl LiveChannelConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        // Auto-detect TLS based on URL
        let use_tls = base_url.starts_with("wss://")
            || (!base_url.starts_with("ws://")
                && !base_url.contains("127.0.0.1")
                && !base_url.contains("localhost"));

        Self { base_url, use_tls }
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// `{base}/ws/chat/{conversation}/?token={token}`
    pub fn build_url(&self, conversation_id: &ConversationId, token: &str) -> ChatResult<Url> {
        let mut base = self.base_url.trim_end_matches('/').to_string();

        if !base.starts_with("ws://") && !base.starts_with("wss://") {
            base = if self.use_tls {
                format!("wss://{base}")
            } else {
                format!("ws://{base}")
            };
        }

        // Normalize localhost to avoid IPv6 issues
        if base.contains("localhost") {
            base = base.replace("localhost", "127.0.0.1");
        }

        let mut url = Url::parse(&format!("{base}/ws/chat/{conversation_id}/"))?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_channel_url_with_encoded_token() {
        let config = LiveChannelConfig::new("wss://social.example/");
        let url = config.build_url(&"12".into(), "a b+c").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://social.example/ws/chat/12/?token=a+b%2Bc"
        );
    }

    #[test]
    fn schemeless_base_picks_tls_by_host() {
        let local = LiveChannelConfig::new("localhost:8000");
        assert!(!local.use_tls);
        assert_eq!(
            local.build_url(&"1".into(), "t").unwrap().as_str(),
            "ws://127.0.0.1:8000/ws/chat/1/?token=t"
        );

        let remote = LiveChannelConfig::new("social.example");
        assert!(remote.use_tls);
        assert!(remote
            .build_url(&"1".into(), "t")
            .unwrap()
            .as_str()
            .starts_with("wss://social.example/"));

        let forced = LiveChannelConfig::new("social.example").with_tls(false);
        assert!(forced
            .build_url(&"1".into(), "t")
            .unwrap()
            .as_str()
            .starts_with("ws://"));
    }
}
