use crate::error::{ExporterError, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub exporter: ExporterConfig,
    pub kafka: KafkaConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExporterConfig {
    #[serde(default = "default_http_host")]
    pub http_host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Regex selecting which topics to collect.
    #[serde(default = "default_filter")]
    pub topic_filter: String,
    /// Regex selecting which consumer groups to collect.
    #[serde(default = "default_filter")]
    pub group_filter: String,
    /// Report offsets/lag for every partition of every known topic, not only
    /// for partitions assigned to a live member. Surfaces lag for groups with
    /// no active consumers.
    #[serde(default = "default_true")]
    pub offset_show_all: bool,
    /// Upper bound on concurrent topic workers per cycle.
    #[serde(default = "default_topic_workers")]
    pub topic_workers: usize,
    /// Let every scrape run its own collection cycle instead of coalescing
    /// concurrent scrapes into one. Unsafe on large clusters.
    #[serde(default)]
    pub allow_concurrent: bool,
    #[serde(with = "humantime_serde", default = "default_metadata_refresh_interval")]
    pub metadata_refresh_interval: Duration,
    /// Static labels appended to every exported sample.
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(with = "humantime_serde", default = "default_kafka_timeout")]
    pub timeout: Duration,
    pub tls: Option<TlsConfig>,
    pub sasl: Option<SaslConfig>,
    /// Raw librdkafka properties, applied last so they can override anything.
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TlsConfig {
    pub ca_file: Option<String>,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

/// SASL mechanism selection. A closed set: the connection factory resolves the
/// variant into librdkafka properties once, at client creation.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "mechanism", rename_all = "kebab-case")]
pub enum SaslConfig {
    Plain {
        username: String,
        password: String,
    },
    ScramSha256 {
        username: String,
        password: String,
    },
    ScramSha512 {
        username: String,
        password: String,
    },
    Gssapi {
        service_name: String,
        principal: String,
        kerberos_config_path: Option<String>,
        #[serde(flatten)]
        auth: GssapiAuth,
    },
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "auth", rename_all = "lowercase")]
pub enum GssapiAuth {
    Keytab { keytab_path: String },
    Password { password: String },
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    9308
}

fn default_filter() -> String {
    ".*".to_string()
}

fn default_true() -> bool {
    true
}

fn default_topic_workers() -> usize {
    100
}

fn default_metadata_refresh_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_client_id() -> String {
    "kstate-exporter".to_string()
}

fn default_kafka_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Config {
    pub fn load(path: &str) -> Result<Config> {
        if !Path::new(path).exists() {
            return Err(ExporterError::Config(format!(
                "Configuration file not found: {path}"
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let content = substitute_env_vars(&content);

        let config: Config = toml::from_str(&content)
            .map_err(|e| ExporterError::Config(format!("TOML parse error: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.kafka.bootstrap_servers.is_empty() {
            return Err(ExporterError::Config(
                "bootstrap_servers cannot be empty".to_string(),
            ));
        }

        if self.exporter.topic_workers == 0 {
            return Err(ExporterError::Config(
                "topic_workers must be at least 1".to_string(),
            ));
        }

        if let Some(tls) = &self.kafka.tls {
            tls.validate()?;
        }

        self.exporter.compile_filters()?;
        Ok(())
    }
}

impl TlsConfig {
    fn validate(&self) -> Result<()> {
        // Client certificate and key only make sense as a pair.
        match (&self.cert_file, &self.key_file) {
            (Some(_), None) | (None, Some(_)) => Err(ExporterError::Config(
                "tls cert_file and key_file must be supplied as a pair".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl ExporterConfig {
    pub fn compile_filters(&self) -> Result<CompiledFilters> {
        Ok(CompiledFilters {
            topic: Regex::new(&self.topic_filter)?,
            group: Regex::new(&self.group_filter)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CompiledFilters {
    pub topic: Regex,
    pub group: Regex,
}

/// Supports `${VAR}` and `${VAR:-default}` substitution anywhere in the file.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:-]+)(?::-([^}]*))?\}").expect("static regex");
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
    })
    .to_string()
}
