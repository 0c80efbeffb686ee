//! Environment sources: `CONFLUENCE_BULK__SECTION__KEY` overrides, then the
//! conventional credential variables, which win over everything else.

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment};

pub const ENV_PREFIX: &str = "CONFLUENCE_BULK";
pub const ENV_URL: &str = "CONFLUENCE_URL";
pub const ENV_EMAIL: &str = "CONFLUENCE_EMAIL";
pub const ENV_API_TOKEN: &str = "CONFLUENCE_API_TOKEN";

pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("confluence.base_url", non_empty_var(ENV_URL))?
        .set_override_option("confluence.email", non_empty_var(ENV_EMAIL))?
        .set_override_option("confluence.api_token", non_empty_var(ENV_API_TOKEN))
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
