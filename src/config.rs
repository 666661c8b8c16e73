use clap::Parser;

#[derive(Parser, Clone, Debug)]
pub struct Config {
    #[clap(env, long, default_value = "development")]
    pub environment: String,

    #[clap(env, long, default_value_t = 3000)]
    pub port: u16,

    #[clap(env, long)]
    pub database_url: String,

    #[clap(env, long, default_value_t = 16)]
    pub database_pool_size: u32,

    /// Comma separated list of origins allowed by CORS
    #[clap(env, long, default_value = "http://localhost:5173")]
    pub origin_urls: String,

    /// Public front-end base, used to build password reset links
    #[clap(env, long, default_value = "http://localhost:5173")]
    pub frontend_url: String,

    #[clap(env, long, default_value_t = 256)]
    pub max_in_flight_requests: usize,

    #[clap(env, long, default_value = "https://api.lemonsqueezy.com")]
    pub payment_api_url: String,

    #[clap(env, long, hide_env_values = true)]
    pub payment_api_key: String,

    #[clap(env, long)]
    pub payment_store_id: String,

    #[clap(env, long)]
    pub payment_variant_id: String,

    #[clap(env, long)]
    pub email_api_url: String,

    #[clap(env, long, hide_env_values = true)]
    pub email_api_key: String,

    #[clap(env, long)]
    pub default_from_email: String,

    #[clap(env, long, default_value_t = 1024)]
    pub email_queue_capacity: usize,
}

impl Config {
    pub fn allowed_origins(&self) -> Vec<String> {
        self.origin_urls
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_required_arguments_and_origins() {
        let config = Config::parse_from([
            "traveler-cargo-backend",
            "--database-url", "postgres://localhost/cargo",
            "--payment-api-key", "key",
            "--payment-store-id", "1",
            "--payment-variant-id", "2",
            "--email-api-url", "http://mail.local/send",
            "--email-api-key", "mail-key",
            "--default-from-email", "noreply@cargo.local",
            "--origin-urls", "http://a.local, http://b.local,",
        ]);

        assert_eq!(config.allowed_origins(), vec!["http://a.local", "http://b.local"]);
    }
}
