use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, security::AuthPolicy, Result};

pub const DEFAULT_TEXT_MODEL: &str = "gemini-1.5-flash-latest";
pub const DEFAULT_VISION_MODEL: &str = "gemini-1.5-pro-latest";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_IMAGE_PROMPT: &str = "Explain this question and provide answer in detail.";

/// Typed process configuration, read once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub bot_token: String,
    pub app_url: Option<String>,
    pub telegram_message_limit: usize,

    // Authority
    pub owner_id: Option<i64>,
    pub allowed_groups: Vec<i64>,
    pub auth_policy: AuthPolicy,
    pub auth_file: PathBuf,

    // HTTP server
    pub host: String,
    pub port: u16,

    // Gemini
    pub gemini_api_key: Option<String>,
    pub gemini_api_base: String,
    pub gemini_timeout: Duration,
    pub text_model: String,
    pub vision_model: String,
    pub image_prompt: String,
    pub answer_language: Option<String>,

    // Runtime
    pub temp_dir: PathBuf,
    pub ask_timeout: Option<Duration>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        let cfg = Self::from_lookup(|key| env::var(key).ok())?;
        fs::create_dir_all(&cfg.temp_dir)?;
        Ok(cfg)
    }

    /// Build the config from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let bot_token = get("BOT_TOKEN")
            .or_else(|| get("TELEGRAM_BOT_TOKEN"))
            .ok_or_else(|| {
                Error::Config("BOT_TOKEN environment variable is required".to_string())
            })?;

        let app_url = get("APP_URL").map(|u| u.trim().trim_end_matches('/').to_string());
        let telegram_message_limit =
            parse_opt::<usize>("TELEGRAM_MESSAGE_LIMIT", get("TELEGRAM_MESSAGE_LIMIT"))?
                .unwrap_or(4096)
                .max(1);

        let owner_id = parse_opt::<i64>("OWNER_ID", get("OWNER_ID"))?;
        let allowed_groups = parse_csv_i64("ALLOWED_GROUPS", get("ALLOWED_GROUPS"))?;
        let auth_policy = match get("AUTH_POLICY") {
            Some(raw) => raw.trim().parse::<AuthPolicy>()?,
            None => AuthPolicy::default(),
        };
        let auth_file = PathBuf::from(
            get("AUTH_FILE").unwrap_or_else(|| "authorized_users.json".to_string()),
        );

        let host = get("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parse_opt::<u16>("PORT", get("PORT"))?.unwrap_or(8080);

        let gemini_api_key = get("GEMINI_API_KEY");
        let gemini_api_base = get("GEMINI_API_BASE")
            .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();
        let gemini_timeout = Duration::from_secs(
            parse_opt::<u64>("GEMINI_TIMEOUT_SECS", get("GEMINI_TIMEOUT_SECS"))?.unwrap_or(120),
        );
        let text_model = get("GEMINI_TEXT_MODEL").unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string());
        let vision_model =
            get("GEMINI_VISION_MODEL").unwrap_or_else(|| DEFAULT_VISION_MODEL.to_string());
        let image_prompt = get("IMAGE_PROMPT").unwrap_or_else(|| DEFAULT_IMAGE_PROMPT.to_string());
        let answer_language = get("ANSWER_LANGUAGE");

        let temp_dir = get("TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join("gemini-telegram-bot"));

        // 0 keeps continuations forever.
        let ask_timeout = parse_opt::<u64>("ASK_TIMEOUT_SECS", get("ASK_TIMEOUT_SECS"))?
            .filter(|s| *s > 0)
            .map(Duration::from_secs);

        Ok(Self {
            bot_token,
            app_url,
            telegram_message_limit,
            owner_id,
            allowed_groups,
            auth_policy,
            auth_file,
            host,
            port,
            gemini_api_key,
            gemini_api_base,
            gemini_timeout,
            text_model,
            vision_model,
            image_prompt,
            answer_language,
            temp_dir,
            ask_timeout,
        })
    }

    /// Full prompt for image questions, including the optional answer language.
    pub fn effective_image_prompt(&self) -> String {
        match &self.answer_language {
            Some(lang) => format!("{}\nExplain the answer in {lang}.", self.image_prompt),
            None => self.image_prompt.clone(),
        }
    }

    /// URL Telegram should post updates to, if an external base URL is configured.
    pub fn webhook_url(&self) -> Option<String> {
        self.app_url
            .as_ref()
            .map(|base| format!("{base}/{}", self.bot_token))
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, unquote(v.trim()));
    }
}

fn unquote(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        &val[1..val.len() - 1]
    } else {
        val
    }
}

fn parse_opt<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| Error::Config(format!("{key} has an invalid value: {raw}")))
}

fn parse_csv_i64(key: &str, v: Option<String>) -> Result<Vec<i64>> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| Error::Config(format!("{key} contains a non-numeric id: {s}")))
        })
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
