use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use thermostat_common::{Authenticator, Endpoint, HmacKey, TagEncoding};
use thermostat_remote::RemoteController;
use tracing::warn;

#[derive(Debug, Parser)]
#[command(name = "thermostat-remote", version, about = "Query and adjust a thermostat controller")]
struct Cli {
    #[arg(long, default_value = "localhost")]
    host: String,
    #[arg(long, default_value_t = 8000)]
    port: u16,
    /// File holding the base64 encoded shared key. Takes precedence over `--key`.
    #[arg(long)]
    key_file: Option<PathBuf>,
    /// Base64 encoded shared key.
    #[arg(long, env = "THERMOSTAT_HMAC_KEY", hide_env_values = true)]
    key: Option<String>,
    #[arg(long, value_enum, default_value_t = Encoding::Base64)]
    encoding: Encoding,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Encoding {
    Base64,
    Hex,
}

impl From<Encoding> for TagEncoding {
    fn from(value: Encoding) -> Self {
        match value {
            Encoding::Base64 => TagEncoding::Base64,
            Encoding::Hex => TagEncoding::Hex,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the current state of every thermostat.
    Data,
    /// Change the setpoint of one thermostat.
    Set {
        name: String,
        #[arg(allow_negative_numbers = true)]
        setpoint: f64,
        #[arg(long, default_value = "data.json")]
        endpoint: Endpoint,
    },
}

impl Cli {
    fn key(&self) -> anyhow::Result<HmacKey> {
        let encoded = match (&self.key_file, &self.key) {
            (Some(path), _) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read key file {}", path.display()))?,
            (None, Some(key)) => key.clone(),
            (None, None) => anyhow::bail!("no key given, use --key-file or THERMOSTAT_HMAC_KEY"),
        };
        Ok(HmacKey::from_base64(encoded.trim())?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let auth = Authenticator::new(cli.key()?, cli.encoding.into());
    let remote = RemoteController::new(&cli.host, cli.port, auth)?;

    let output = match &cli.command {
        Command::Data => serde_json::to_string_pretty(&remote.get_remote_data().await?)?,
        Command::Set {
            name,
            setpoint,
            endpoint,
        } => {
            let data = remote
                .update_remote_setpoint(name, *setpoint, *endpoint)
                .await?;
            if data.setpoint != *setpoint {
                warn!("controller kept setpoint {} for {name}", data.setpoint);
            }
            serde_json::to_string_pretty(&data)?
        }
    };
    println!("{output}");
    Ok(())
}
