//! Pipeline and server assembly from a loaded configuration

use siphon_compression::Gzip;
use siphon_config::Config;
use siphon_core::{Pipeline, Result};
use siphon_proxy::{Forwarder, HttpClient};
use siphon_runtime::{Server, ServerConfig};

/// Gzip (when enabled) in front of the forwarder
pub fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let target = config.proxy.target()?;
    let client = HttpClient::from_config(&config.proxy.transport());
    let forwarder = Forwarder::with_client(target, client, config.proxy.proxy_config());

    let mut builder = Pipeline::builder();
    if config.gzip.enabled {
        let gzip = config.gzip.to_gzip_config()?;
        gzip.validate()?;
        tracing::info!(
            level = ?gzip.level,
            skip_paths = ?config.gzip.skip_paths,
            "Gzip compression enabled"
        );
        builder = builder.with(Gzip::with_config(gzip));
    }

    Ok(builder.handler(forwarder))
}

/// Server ready to run the configured pipeline
pub fn build_server(config: &Config) -> Result<Server> {
    let pipeline = build_pipeline(config)?;
    let server_config = ServerConfig {
        listen: config.server.listen,
        max_body_size: config.server.max_body_size,
        shutdown_timeout: config.server.shutdown_timeout,
    };
    Ok(Server::new(pipeline, server_config))
}
