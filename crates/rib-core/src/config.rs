use std::{env, fs, path::Path, time::Duration};

use crate::{domain::Source, errors::Error, ids::decode_base36, Result};

pub const DEFAULT_AUTH_URL: &str = "https://www.reddit.com/api/v1/access_token";
pub const DEFAULT_API_BASE: &str = "https://oauth.reddit.com";

/// Typed configuration for the relay.
#[derive(Clone, Debug)]
pub struct Config {
    pub reddit: RedditConfig,
    pub irc: IrcConfig,

    // Feeds
    pub endpoints: Vec<String>,
    pub initial_watermarks: Vec<u64>,
    pub poll_interval: Duration,
    pub auth_retry_delay: Duration,

    // Delivery
    pub delivery_interval: Duration,
    pub delivery_queue_capacity: usize,
}

/// OAuth password-grant identity plus endpoint locations.
#[derive(Clone)]
pub struct RedditConfig {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub user_agent: String,
    pub auth_url: String,
    pub api_base: String,
}

impl std::fmt::Debug for RedditConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedditConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("user_agent", &self.user_agent)
            .field("auth_url", &self.auth_url)
            .field("api_base", &self.api_base)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct IrcConfig {
    pub nickname: String,
    pub realname: String,
    pub server_host: String,
    pub server_port: u16,
    pub use_tls: bool,
    pub channels: Vec<String>,
    pub nick_max_len: usize,
    pub ping_interval: Duration,
    pub reconnect_delay: Duration,
}

impl Config {
    /// Load from the process environment, after merging `./.env` if present.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let req = |key: &str| -> Result<String> {
            get(key)
                .and_then(non_empty)
                .ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
        };

        // Reddit OAuth
        let reddit = RedditConfig {
            client_id: req("REDDIT_CLIENT_ID")?,
            client_secret: req("REDDIT_CLIENT_SECRET")?,
            username: req("REDDIT_USERNAME")?,
            password: req("REDDIT_PASSWORD")?,
            user_agent: get("REDDIT_USER_AGENT")
                .and_then(non_empty)
                .unwrap_or_else(default_user_agent),
            auth_url: get("REDDIT_AUTH_URL")
                .and_then(non_empty)
                .unwrap_or_else(|| DEFAULT_AUTH_URL.to_string()),
            api_base: get("REDDIT_API_BASE")
                .and_then(non_empty)
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        };

        // Feeds
        let endpoints = parse_csv(get("FEED_ENDPOINTS").or_else(|| Some("/new".to_string())))
            .into_iter()
            .map(|e| if e.starts_with('/') { e } else { format!("/{e}") })
            .collect::<Vec<_>>();
        if endpoints.is_empty() {
            return Err(Error::Config(
                "FEED_ENDPOINTS must name at least one endpoint".to_string(),
            ));
        }
        let initial_watermarks = parse_watermarks(get("FEED_WATERMARKS"), endpoints.len())?;

        let poll_interval = Duration::from_secs(positive_u64(&get, "POLL_INTERVAL_SECS", 60)?);
        let auth_retry_delay = Duration::from_secs(opt_u64(&get, "AUTH_RETRY_SECS")?.unwrap_or(60));

        // IRC
        let nickname = req("IRC_NICK")?;
        let realname = get("IRC_REALNAME")
            .and_then(non_empty)
            .unwrap_or_else(|| nickname.clone());
        let use_tls = get("IRC_TLS").map(|s| parse_bool(&s)).unwrap_or(false);
        let (server_host, server_port) = parse_server(&req("IRC_SERVER")?, use_tls)?;
        let channels = parse_csv(get("IRC_CHANNELS"))
            .into_iter()
            .map(normalize_channel)
            .collect::<Vec<_>>();
        if channels.is_empty() {
            return Err(Error::Config(
                "IRC_CHANNELS environment variable is required".to_string(),
            ));
        }
        let nick_max_len = opt_u64(&get, "IRC_NICK_MAX_LEN")?.unwrap_or(16).max(2) as usize;
        if nickname.chars().count() > nick_max_len {
            return Err(Error::Config(format!(
                "IRC_NICK {nickname:?} is longer than IRC_NICK_MAX_LEN ({nick_max_len})"
            )));
        }
        let ping_interval =
            Duration::from_secs(positive_u64(&get, "IRC_PING_INTERVAL_SECS", 60)?);
        let reconnect_delay =
            Duration::from_secs(opt_u64(&get, "IRC_RECONNECT_DELAY_SECS")?.unwrap_or(15));

        // Delivery
        let delivery_interval =
            Duration::from_millis(opt_u64(&get, "DELIVERY_INTERVAL_MS")?.unwrap_or(1000));
        let delivery_queue_capacity =
            positive_u64(&get, "DELIVERY_QUEUE_CAPACITY", 256)? as usize;

        Ok(Self {
            reddit,
            irc: IrcConfig {
                nickname,
                realname,
                server_host,
                server_port,
                use_tls,
                channels,
                nick_max_len,
                ping_interval,
                reconnect_delay,
            },
            endpoints,
            initial_watermarks,
            poll_interval,
            auth_retry_delay,
            delivery_interval,
            delivery_queue_capacity,
        })
    }

    /// One [`Source`] per configured endpoint, in configuration order.
    pub fn sources(&self) -> Vec<Source> {
        self.endpoints
            .iter()
            .zip(self.initial_watermarks.iter())
            .map(|(endpoint, mark)| Source::with_watermark(endpoint.clone(), *mark))
            .collect()
    }
}

fn default_user_agent() -> String {
    format!("rib/{} (reddit irc relay)", env!("CARGO_PKG_VERSION"))
}

/// Export `KEY=value` pairs from `path` without overriding the environment.
fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };
    for (key, value) in parse_dotenv(&contents) {
        if env::var_os(&key).is_none() {
            env::set_var(key, value);
        }
    }
}

/// `KEY=value` lines; blank lines and `#` comments are skipped and one layer
/// of matching quotes around the value is removed.
fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim(), unquote(value.trim())))
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .iter()
        .find_map(|q| value.strip_prefix(*q)?.strip_suffix(*q))
        .unwrap_or(value)
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn opt_u64(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>> {
    let Some(raw) = get(key).and_then(non_empty) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(Some)
        .map_err(|e| Error::Config(format!("{key}={raw:?} is not a number: {e}")))
}

fn positive_u64(get: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64> {
    match opt_u64(get, key)?.unwrap_or(default) {
        0 => Err(Error::Config(format!("{key} must be greater than zero"))),
        v => Ok(v),
    }
}

fn parse_csv(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn parse_watermarks(v: Option<String>, endpoints: usize) -> Result<Vec<u64>> {
    let Some(raw) = v.and_then(non_empty) else {
        return Ok(vec![0; endpoints]);
    };
    let marks = raw
        .split(',')
        .map(|s| s.trim())
        .map(|s| if s.is_empty() { Ok(0) } else { decode_base36(s) })
        .collect::<Result<Vec<_>>>()
        .map_err(|e| Error::Config(format!("FEED_WATERMARKS: {e}")))?;
    if marks.len() != endpoints {
        return Err(Error::Config(format!(
            "FEED_WATERMARKS has {} entries but FEED_ENDPOINTS has {endpoints}",
            marks.len()
        )));
    }
    Ok(marks)
}

fn parse_server(raw: &str, use_tls: bool) -> Result<(String, u16)> {
    let default_port = if use_tls { 6697 } else { 6667 };
    let raw = raw.trim();
    let (host, port) = match raw.rsplit_once(':') {
        Some((host, port)) if !host.ends_with(':') => {
            let port = port
                .parse::<u16>()
                .map_err(|e| Error::Config(format!("IRC_SERVER port {port:?}: {e}")))?;
            (host, port)
        }
        _ => (raw, default_port),
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(Error::Config("IRC_SERVER has an empty host".to_string()));
    }
    Ok((host.to_string(), port))
}

fn normalize_channel(c: String) -> String {
    if c.starts_with('#') || c.starts_with('&') {
        c
    } else {
        format!("#{c}")
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn base_env() -> HashMap<&'static str, String> {
        [
            ("REDDIT_CLIENT_ID", "client"),
            ("REDDIT_CLIENT_SECRET", "s3cret"),
            ("REDDIT_USERNAME", "dev"),
            ("REDDIT_PASSWORD", "hunter2"),
            ("IRC_NICK", "redditbot"),
            ("IRC_SERVER", "irc.example.net"),
            ("IRC_CHANNELS", "news, #rust"),
        ]
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect()
    }

    fn load(env: &HashMap<&'static str, String>) -> Result<Config> {
        Config::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn applies_defaults() {
        let cfg = load(&base_env()).unwrap();
        assert_eq!(cfg.endpoints, vec!["/new".to_string()]);
        assert_eq!(cfg.initial_watermarks, vec![0]);
        assert_eq!(cfg.poll_interval, Duration::from_secs(60));
        assert_eq!(cfg.auth_retry_delay, Duration::from_secs(60));
        assert_eq!(cfg.delivery_interval, Duration::from_secs(1));
        assert_eq!(cfg.irc.server_port, 6667);
        assert_eq!(cfg.irc.realname, "redditbot");
        assert_eq!(cfg.irc.channels, vec!["#news", "#rust"]);
        assert_eq!(cfg.reddit.auth_url, DEFAULT_AUTH_URL);
        assert!(cfg.reddit.user_agent.starts_with("rib/"));
    }

    #[test]
    fn tls_changes_default_port_and_explicit_port_wins() {
        let mut env = base_env();
        env.insert("IRC_TLS", "yes".to_string());
        assert_eq!(load(&env).unwrap().irc.server_port, 6697);

        env.insert("IRC_SERVER", "irc.example.net:7000".to_string());
        let cfg = load(&env).unwrap();
        assert_eq!(cfg.irc.server_host, "irc.example.net");
        assert_eq!(cfg.irc.server_port, 7000);
    }

    #[test]
    fn missing_required_key_is_a_config_error() {
        let mut env = base_env();
        env.remove("REDDIT_PASSWORD");
        let err = load(&env).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("REDDIT_PASSWORD")));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut env = base_env();
        env.insert("POLL_INTERVAL_SECS", "0".to_string());
        assert!(matches!(load(&env), Err(Error::Config(_))));
    }

    #[test]
    fn sources_follow_endpoint_order_with_watermarks() {
        let mut env = base_env();
        env.insert("FEED_ENDPOINTS", "/r/rust/new, r/golang/new".to_string());
        env.insert("FEED_WATERMARKS", "z,".to_string());
        let cfg = load(&env).unwrap();
        let sources = cfg.sources();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].endpoint, "/r/rust/new");
        assert_eq!(sources[0].high_water_mark, 35);
        assert_eq!(sources[1].endpoint, "/r/golang/new");
        assert_eq!(sources[1].high_water_mark, 0);
        assert!(sources.iter().all(|s| !s.is_seeded()));
    }

    #[test]
    fn watermark_count_must_match_endpoints() {
        let mut env = base_env();
        env.insert("FEED_WATERMARKS", "a,b".to_string());
        assert!(matches!(load(&env), Err(Error::Config(_))));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let cfg = load(&base_env()).unwrap();
        let dbg = format!("{:?}", cfg.reddit);
        assert!(!dbg.contains("s3cret"));
        assert!(!dbg.contains("hunter2"));
    }

    #[test]
    fn nickname_longer_than_protocol_limit_is_rejected() {
        let mut env = base_env();
        env.insert("IRC_NICK_MAX_LEN", "9".to_string());
        assert_eq!(load(&env).unwrap().irc.nickname, "redditbot");

        env.insert("IRC_NICK_MAX_LEN", "8".to_string());
        let err = load(&env).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("IRC_NICK")));
    }

    #[test]
    fn dotenv_lines_are_parsed_and_unquoted() {
        let parsed = parse_dotenv(
            "# reddit\n\nREDDIT_USERNAME = dev\nIRC_REALNAME=\"feed relay\"\nIRC_NICK='rib'\nnot a pair\n=orphan\nEMPTY=\n",
        );
        let expected = [
            ("REDDIT_USERNAME", "dev"),
            ("IRC_REALNAME", "feed relay"),
            ("IRC_NICK", "rib"),
            ("EMPTY", ""),
        ];
        assert_eq!(
            parsed,
            expected
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Vec<_>>()
        );
    }
}
