//! Per-session browser fingerprint randomization.

use std::path::Path;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

pub const WEBDRIVER_VALUES: [&str; 3] = ["undefined", "null", "false"];
pub const LANGUAGES: [&str; 4] = ["hy-AM", "ru-RU", "en-US", "en-GB"];
pub const MAX_PLUGINS: usize = 5;

/// Resource types the session refuses to load.
pub const BLOCKED_RESOURCE_TYPES: [&str; 3] = ["Image", "Font", "Media"];

const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    pub user_agent: String,
    pub viewport: Viewport,
    pub webdriver: &'static str,
    pub plugin_count: usize,
    pub languages: Vec<&'static str>,
}

impl Fingerprint {
    /// Script run before any page script on every document of the session.
    pub fn init_script(&self) -> String {
        let plugins: Vec<String> = (1..=self.plugin_count).map(|n| n.to_string()).collect();
        let languages: Vec<String> = self.languages.iter().map(|l| format!("'{l}'")).collect();
        format!(
            "Object.defineProperty(navigator, 'webdriver', {{get: () => {}}});\n\
             Object.defineProperty(navigator, 'plugins', {{get: () => [{}]}});\n\
             Object.defineProperty(navigator, 'languages', {{get: () => [{}]}});\n",
            self.webdriver,
            plugins.join(", "),
            languages.join(", "),
        )
    }
}

pub struct FingerprintGenerator {
    user_agents: Vec<String>,
    viewports: Vec<Viewport>,
}

impl Default for FingerprintGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect())
    }
}

impl FingerprintGenerator {
    pub fn new(user_agents: Vec<String>) -> Self {
        Self {
            user_agents,
            viewports: vec![Viewport {
                width: 1280,
                height: 720,
            }],
        }
    }

    /// Load the user agent pool from a JSON array of strings.
    pub fn from_file(path: &Path) -> Result<Self, FingerprintError> {
        let raw = std::fs::read_to_string(path)?;
        let user_agents: Vec<String> = serde_json::from_str(&raw)?;
        if user_agents.is_empty() {
            return Err(FingerprintError::Empty);
        }
        Ok(Self::new(user_agents))
    }

    pub fn generate(&self) -> Fingerprint {
        let mut rng = rand::thread_rng();

        let user_agent = self
            .user_agents
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| DEFAULT_USER_AGENTS[0].to_string());
        let viewport = self.viewports.choose(&mut rng).copied().unwrap_or(Viewport {
            width: 1280,
            height: 720,
        });
        let webdriver = WEBDRIVER_VALUES.choose(&mut rng).copied().unwrap_or("undefined");
        let languages = LANGUAGES.choose_multiple(&mut rng, 2).copied().collect();

        Fingerprint {
            user_agent,
            viewport,
            webdriver,
            plugin_count: rng.gen_range(1..=MAX_PLUGINS),
            languages,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("Failed to read user agent file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid user agent file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("User agent file is empty")]
    Empty,
}
