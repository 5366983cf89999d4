use clap::Parser;
use std::net::{Ipv4Addr, SocketAddr};

use crate::auth::Authenticator;

/// Command line interface configuration
#[derive(Parser, Debug)]
#[command(
    author, version,
    about = "Forwarding HTTP/HTTPS proxy",
    long_about = "fwdproxy relays plain HTTP requests upstream and tunnels CONNECT traffic.\n\nFeatures:\n- Optional Bearer and/or Basic credentials on Proxy-Authorization\n- Pooled upstream HTTP transport for plain requests\n- Pooled fixed-size copy buffers for CONNECT tunnels\n- PORT environment variable overrides --port\n"
)]
pub struct Cli {
    /// Bearer token for Proxy-Authorization (empty disables bearer auth)
    #[arg(long)]
    pub token: Option<String>,

    /// Basic auth user for Proxy-Authorization (requires --auth-pass)
    #[arg(long = "auth-user")]
    pub auth_user: Option<String>,

    /// Basic auth password for Proxy-Authorization (requires --auth-user)
    #[arg(long = "auth-pass")]
    pub auth_pass: Option<String>,

    /// Port to listen on (the PORT environment variable takes precedence)
    #[arg(short, long, default_value_t = 18888)]
    pub port: u16,

    /// IP address to bind the listener
    #[arg(long, default_value = "0.0.0.0")]
    pub listen_ip: Ipv4Addr,

    /// Copy buffer size in bytes for tunnel streams
    #[arg(long = "buffer", default_value_t = 16 * 1024, allow_negative_numbers = true)]
    pub buffer: i64,

    /// Log proxied requests to stderr
    #[arg(long, default_value_t = false)]
    pub log: bool,
}

/// Proxy server configuration derived from CLI arguments.
///
/// Built once at startup and read-only afterwards; handlers receive it
/// through shared state, never through mutable globals.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    pub buffer_size: usize,
    pub log_requests: bool,
    pub auth: Authenticator,
}

impl ProxyConfig {
    /// Create ProxyConfig from CLI arguments
    pub fn from_cli(args: Cli) -> color_eyre::Result<Self> {
        if args.buffer <= 0 {
            return Err(color_eyre::eyre::eyre!("invalid buffer size: {}", args.buffer));
        }

        // The environment wins over the flag when both are set
        let port = match std::env::var("PORT") {
            Ok(value) if !value.is_empty() => value
                .parse::<u16>()
                .map_err(|_| color_eyre::eyre::eyre!("invalid PORT override: {value:?}"))?,
            _ => args.port,
        };
        let listen_addr = SocketAddr::from((args.listen_ip, port));

        let basic = match (args.auth_user, args.auth_pass) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => {
                Some((user, pass))
            }
            _ => None,
        };
        let auth = Authenticator::new(args.token, basic);

        Ok(Self {
            listen_addr,
            buffer_size: args.buffer as usize,
            log_requests: args.log,
            auth,
        })
    }
}
