use clap::{Parser, Subcommand};
use registrar_client::RegistryClient;
use registrar_core::{ApiType, Claims, Role};
use registrar_wire::{GetTargetRequest, InstanceAddress, ListResponse};
use std::time::Duration;

const SHUTDOWN_PATH: &str = "/internal/pleaseshutdown";

#[derive(Parser)]
#[command(name = "registrar")]
#[command(about = "Service registry operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Registry address; a bare host gets the default port
    #[arg(long, env = "REGISTRAR_ADDR", default_value = "localhost:5000")]
    registry: String,

    /// Bearer token for registries that require one
    #[arg(long, env = "REGISTRAR_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered services
    List {
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Find instances by deploy path and capability
    Lookup {
        #[arg(long)]
        api_type: String,
        #[arg(long, default_value = "")]
        deploy_path: String,
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Ask every instance of the named services to shut down
    Shutdown {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Ask a single instance to shut down, bypassing the registry
    Stop {
        /// host:port of the instance
        address: String,
    },
    /// Mint a bearer token
    Token {
        #[arg(long)]
        subject: String,
        #[arg(long = "role", required = true)]
        roles: Vec<Role>,
        #[arg(long, default_value_t = 24)]
        ttl_hours: u64,
        #[arg(long, env = "REGISTRAR_JWT_SECRET", hide_env_values = true)]
        secret: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut client = RegistryClient::new(&cli.registry)?;
    if let Some(token) = cli.token {
        client = client.with_token(token);
    }

    match cli.command {
        Commands::List { name } => {
            let listing = client.list(&name).await?;
            print_listing(&listing);
        }
        Commands::Lookup { api_type, deploy_path, name } => {
            let api_type: ApiType = api_type.parse().map_err(|_| {
                let valid: Vec<&str> = ApiType::ALL.iter().map(|t| t.as_str()).collect();
                format!("Invalid api type {:?}. Valid types: {}", api_type, valid.join(", "))
            })?;
            let listing = client
                .get_target(&GetTargetRequest { deploy_path, name, api_type })
                .await?;
            if listing.services.is_empty() {
                return Err("No matching instances".into());
            }
            print_listing(&listing);
        }
        Commands::Shutdown { names } => {
            let mut failed = 0;
            for name in &names {
                match client.shutdown(name).await {
                    Ok(()) => println!("Shutdown requested: {}", name),
                    Err(e) => {
                        eprintln!("Shutdown of {} failed: {}", name, e);
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                return Err(format!("{} of {} shutdowns failed", failed, names.len()).into());
            }
        }
        Commands::Stop { address } => {
            let http = reqwest::Client::builder()
                .danger_accept_invalid_certs(true)
                .timeout(Duration::from_secs(5))
                .build()?;
            let res = http.get(format!("https://{}{}", address, SHUTDOWN_PATH)).send().await?;
            if !res.status().is_success() {
                return Err(format!("{} answered {}", address, res.status()).into());
            }
            println!("Shutdown requested: {}", address);
        }
        Commands::Token { subject, roles, ttl_hours, secret } => {
            let claims = Claims::new(subject, roles, token_ttl(ttl_hours));
            println!("{}", claims.sign(&secret)?);
        }
    }

    Ok(())
}

fn token_ttl(hours: u64) -> Duration {
    Duration::from_secs(hours.saturating_mul(3600))
}

fn print_listing(listing: &ListResponse) {
    println!("{:<30} {:<25} {:<22} {:<20}", "Service", "Deploy Path", "Address", "API Types");
    println!("{}", "-".repeat(97));
    for svc in &listing.services {
        for addr in &svc.addresses {
            println!(
                "{:<30} {:<25} {:<22} {:<20}",
                svc.service.name,
                svc.service.deploy_path().unwrap_or("-"),
                format!("{}:{}", addr.host, addr.port),
                api_types(addr),
            );
        }
    }
}

fn api_types(addr: &InstanceAddress) -> String {
    addr.api_types
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_ttl_saturates() {
        assert_eq!(token_ttl(24), Duration::from_secs(86_400));
        assert_eq!(token_ttl(u64::MAX), Duration::from_secs(u64::MAX));
    }
}
