use clap::Parser;

/// Webhook receiver that files inbound email into Paperless.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Base URL of the Paperless instance
    #[arg(long, env = "MAILHOOK_PAPERLESS_ENDPOINT")]
    pub paperless_endpoint: String,

    /// Paperless API token
    #[arg(long, env = "MAILHOOK_PAPERLESS_API_KEY", hide_env_values = true)]
    pub paperless_api_key: String,

    /// Tag names applied to every uploaded document
    #[arg(long, env = "MAILHOOK_PAPERLESS_TAGS", value_delimiter = ',')]
    pub paperless_tags: Vec<String>,

    /// Base URL of the Gotenberg instance used to render mail bodies
    #[arg(long, env = "MAILHOOK_GOTENBERG_ENDPOINT")]
    pub gotenberg_endpoint: Option<String>,

    /// Sender addresses allowed to submit documents
    #[arg(long, env = "MAILHOOK_ALLOWED_EMAILS", value_delimiter = ',', required = true)]
    pub allowed_emails: Vec<String>,

    /// Only accept mail addressed to this recipient
    #[arg(long, env = "MAILHOOK_TO_ADDRESS")]
    pub to_address: Option<String>,

    /// Listen address for the HTTP server
    #[arg(long, env = "MAILHOOK_HTTP_HOST", default_value = "127.0.0.1:5000")]
    pub http_host: String,

    /// Timeout in seconds for calls to Paperless
    #[arg(long, env = "MAILHOOK_UPLOAD_TIMEOUT", default_value_t = 120)]
    pub upload_timeout: u64,

    /// Enable trace logging
    #[arg(long, env = "MAILHOOK_DEBUG", default_value_t = false)]
    pub debug: bool,
}

impl Config {
    /// Drops empty entries left by blank env vars or trailing commas.
    pub fn normalize(mut self) -> Self {
        self.paperless_tags = clean_list(self.paperless_tags);
        self.allowed_emails = clean_list(self.allowed_emails);
        self.gotenberg_endpoint = self.gotenberg_endpoint.filter(|s| !s.trim().is_empty());
        self.to_address = self.to_address.filter(|s| !s.trim().is_empty());
        self
    }
}

fn clean_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}
