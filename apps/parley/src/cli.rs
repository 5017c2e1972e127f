use std::path::PathBuf;

use clap::Parser;
use parley_client_core::config::{parse_utc_offset, ChatConfig};
use parley_client_core::telemetry::DEFAULT_LOG_FILTER;
use parley_proto::MessageId;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(about = "Follow and post to a Parley conversation from the terminal")]
pub struct Cli {
    /// Conversation to open
    #[arg(long, short)]
    pub conversation: String,

    /// REST base URL, including the /api/ prefix
    #[arg(long, env = "PARLEY_API_URL")]
    pub api_url: Option<String>,

    /// Live channel base URL (derived from --api-url when omitted)
    #[arg(long, env = "PARLEY_WS_URL")]
    pub ws_url: Option<String>,

    #[arg(long, env = "PARLEY_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Your user id, used to label your own messages
    #[arg(long, env = "PARLEY_USER_ID")]
    pub user_id: Option<String>,

    #[arg(long, env = "PARLEY_DRAFT_DIR")]
    pub draft_dir: Option<PathBuf>,

    /// Display offset for timestamps, e.g. +02:00
    #[arg(long, env = "PARLEY_DISPLAY_UTC_OFFSET")]
    pub utc_offset: Option<String>,

    #[arg(long, env = "RUST_LOG", default_value = DEFAULT_LOG_FILTER)]
    pub log_filter: String,
}

impl Cli {
    /// Environment defaults overridden by whatever was given explicitly.
    pub fn into_config(self) -> (String, ChatConfig, String) {
        let mut config = ChatConfig::from_env();
        if let Some(api_url) = self.api_url {
            config.api_url = api_url;
        }
        if self.ws_url.is_some() {
            config.ws_url = self.ws_url;
        }
        if let Some(token) = self.token {
            config.token = token;
        }
        if let Some(user_id) = self.user_id {
            config.user_id = user_id;
        }
        if self.draft_dir.is_some() {
            config.draft_dir = self.draft_dir;
        }
        if let Some(offset) = self.utc_offset.as_deref().and_then(parse_utc_offset) {
            config.display_offset = offset;
        }
        (self.conversation, config, self.log_filter)
    }
}

/// One line typed at the prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Text(String),
    Files(Vec<PathBuf>),
    More,
    Search(String),
    Delete(MessageId),
    Discard(MessageId),
    Help,
    Quit,
    Unknown(String),
}

impl Input {
    pub fn parse(line: &str) -> Option<Input> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        let Some(command) = trimmed.strip_prefix('/') else {
            return Some(Input::Text(line.trim_end_matches(['\r', '\n']).to_string()));
        };
        let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
        let rest = rest.trim();
        Some(match name {
            "file" | "files" if !rest.is_empty() => {
                Input::Files(rest.split_whitespace().map(PathBuf::from).collect())
            }
            "more" => Input::More,
            "search" => Input::Search(rest.to_string()),
            "delete" if !rest.is_empty() => Input::Delete(MessageId::confirmed(rest)),
            "discard" => match rest.strip_prefix("local-").unwrap_or(rest).parse::<Uuid>() {
                Ok(local) => Input::Discard(MessageId::Pending(local)),
                Err(_) => Input::Unknown(trimmed.to_string()),
            },
            "help" => Input::Help,
            "quit" | "exit" => Input::Quit,
            _ => Input::Unknown(trimmed.to_string()),
        })
    }
}

pub const HELP: &str = "\
/file <path>...   upload and send files
/more             load older messages
/search <text>    search loaded messages
/delete <id>      delete one of your messages
/discard <id>     abandon a file that is still sending
/quit             leave
anything else is sent as a message";
