pub mod api;
pub mod config;

use crate::config::Config;
use tubedrop_core::Tubedrop;

/// Builds the download service described by `config`, creating the downloads directory.
pub fn build_service(config: &Config) -> Result<Tubedrop, Box<dyn std::error::Error + Send + Sync>> {
    let service = Tubedrop::new(
        &config.downloads.dir,
        config.job_config(),
        config.artifact_config(),
    )?
    .with_info_timeout(config.info_timeout());

    Ok(service)
}
