use serde::Deserialize;

/// Root application configuration. Loaded from environment variables with
/// the prefix `MAILFLOW__` (double-underscore separator), constructed once
/// at process start and passed by reference into the orchestrator and each
/// stage constructor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub sendgrid: SendGridConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub ab: AbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub audience: AudienceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Temperature for content-producing calls (strategy, personalization).
    #[serde(default = "default_temperature_creative")]
    pub temperature_creative: f32,
    /// Temperature for analytical calls (segmentation, deliverability).
    #[serde(default = "default_temperature_analysis")]
    pub temperature_analysis: f32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_use_llm_segmentation")]
    pub use_llm_segmentation: bool,
    /// Max audience rows included in the segmentation prompt.
    #[serde(default = "default_segmentation_sample_size")]
    pub segmentation_sample_size: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendGridConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub from_email: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    /// Validate payloads without delivering (SendGrid sandbox mode).
    #[serde(default)]
    pub sandbox: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_server")]
    pub server: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub sender_email: String,
    #[serde(default = "default_from_name")]
    pub sender_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AbConfig {
    /// Fraction of each segment assigned to variant "A".
    #[serde(default = "default_split_ratio")]
    pub split_ratio: f64,
    /// Number of variants to generate and test (2 or 3).
    #[serde(default = "default_max_variants")]
    pub max_variants: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_results_dir")]
    pub results_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudienceConfig {
    /// Audience CSV consulted by server-started campaign runs.
    #[serde(default = "default_audience_file")]
    pub file: String,
    #[serde(default)]
    pub on_malformed_row: MalformedRowPolicy,
}

impl Default for AudienceConfig {
    fn default() -> Self {
        Self {
            file: default_audience_file(),
            on_malformed_row: MalformedRowPolicy::default(),
        }
    }
}

/// Process-wide policy for malformed audience CSV rows.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MalformedRowPolicy {
    #[default]
    SkipWarn,
    FailFast,
}

/// Delivery backend, selected by presence of a vendor credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryProviderKind {
    VendorApi,
    Smtp,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("MAILFLOW")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    pub fn delivery_provider(&self) -> DeliveryProviderKind {
        if self.sendgrid.api_key.is_empty() {
            DeliveryProviderKind::Smtp
        } else {
            DeliveryProviderKind::VendorApi
        }
    }
}

// Default functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_temperature_creative() -> f32 {
    0.7
}
fn default_temperature_analysis() -> f32 {
    0.0
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_use_llm_segmentation() -> bool {
    true
}
fn default_segmentation_sample_size() -> usize {
    200
}
fn default_from_name() -> String {
    "Marketing Campaign System".to_string()
}
fn default_smtp_server() -> String {
    "smtp.gmail.com".to_string()
}
fn default_smtp_port() -> u16 {
    587
}
fn default_split_ratio() -> f64 {
    0.5
}
fn default_max_variants() -> usize {
    2
}
fn default_audience_file() -> String {
    "data/audience.csv".to_string()
}
fn default_data_dir() -> String {
    "data".to_string()
}
fn default_results_dir() -> String {
    "results".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            base_url: default_base_url(),
            temperature_creative: default_temperature_creative(),
            temperature_analysis: default_temperature_analysis(),
            request_timeout_secs: default_request_timeout_secs(),
            use_llm_segmentation: default_use_llm_segmentation(),
            segmentation_sample_size: default_segmentation_sample_size(),
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            server: default_smtp_server(),
            port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            sender_email: String::new(),
            sender_name: default_from_name(),
        }
    }
}

impl Default for AbConfig {
    fn default() -> Self {
        Self {
            split_ratio: default_split_ratio(),
            max_variants: default_max_variants(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            results_dir: default_results_dir(),
        }
    }
}
