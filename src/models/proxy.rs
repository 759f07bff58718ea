use serde::{Deserialize, Deserializer, Serialize};

/// Health marker kept alongside each cached proxy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProxyStatus {
    Ok,
    Bad,
}

/// One proxy credential as cached in the pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxyRecord {
    pub id: String,
    pub proxy_address: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub valid: bool,
    pub status: ProxyStatus,
    pub failures: u32,
}

impl ProxyRecord {
    pub fn is_eligible(&self, failure_threshold: u32) -> bool {
        self.status == ProxyStatus::Ok && self.valid && self.failures < failure_threshold
    }

    /// `http://host:port`, as passed to the browser.
    pub fn server(&self) -> String {
        format!("http://{}:{}", self.proxy_address, self.port)
    }
}

/// Proxy entry as returned by the upstream listing API. Fields the pool does
/// not need are ignored on deserialization.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamProxy {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub proxy_address: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub valid: bool,
}

impl From<UpstreamProxy> for ProxyRecord {
    fn from(p: UpstreamProxy) -> Self {
        Self {
            id: p.id,
            proxy_address: p.proxy_address,
            port: p.port,
            username: p.username,
            password: p.password,
            valid: p.valid,
            status: ProxyStatus::Ok,
            failures: 0,
        }
    }
}

/// Upstream ids are strings on some plans and integers on others.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Str(String),
        Num(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Str(s) => s,
        Id::Num(n) => n.to_string(),
    })
}
