//! Shadowgate - CLI entry point
//!
//! Accepts Go-style single-dash long options (`-cipher`, `-udptun`, ...) in
//! addition to standard double-dash forms, for drop-in compatibility with
//! existing shadowsocks launch scripts.

use clap::Parser;
use rand::rngs::OsRng;
use rand::RngCore;
use shadowgate::{config, crypto, Config, VERSION};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Go-style long options that use a single dash (Go's flag package
/// behavior). These are converted to double-dash for clap.
const GO_STYLE_LONG_OPTIONS: &[&str] = &[
    "-cipher",
    "-password",
    "-key",
    "-keygen",
    "-socks",
    "-redir",
    "-redir6",
    "-tproxytcp",
    "-tcptun",
    "-udptun",
    "-udp",
    "-udptimeout",
    "-verbose",
    "-plugin",
    "-plugin-opts",
    "-list-ciphers",
];

fn normalize_args() -> Vec<String> {
    std::env::args()
        .map(|arg| {
            if arg.starts_with('-') && !arg.starts_with("--") {
                for go_opt in GO_STYLE_LONG_OPTIONS {
                    if arg == *go_opt {
                        return format!("-{}", arg);
                    }
                }
            }
            arg
        })
        .collect()
}

#[derive(Parser, Debug)]
#[command(name = "shadowgate")]
#[command(version = VERSION)]
#[command(about = "Shadowsocks client and server")]
struct Args {
    /// Server listen URL (ss://cipher:password@host:port) or address
    #[arg(short = 's', long = "server")]
    server: Vec<String>,

    /// Client connect URL (ss://cipher:password@host:port) or address
    #[arg(short = 'c', long = "client")]
    client: Vec<String>,

    /// Cipher name (when not embedded in the URL)
    #[arg(long = "cipher", default_value = "chacha20-ietf-poly1305")]
    cipher: String,

    /// Password (when not embedded in the URL)
    #[arg(long = "password", default_value = "")]
    password: String,

    /// Base64url-encoded key (overrides the password)
    #[arg(long = "key")]
    key: Option<String>,

    /// Generate N random key bytes, print them base64url-encoded, and exit
    #[arg(long = "keygen")]
    keygen: Option<usize>,

    /// (client-only) SOCKS5 listen address
    #[arg(long = "socks")]
    socks: Option<String>,

    /// (client-only) Redirect TCP from this address (Linux netfilter)
    #[arg(long = "redir")]
    redir: Option<String>,

    /// (client-only) Redirect TCP IPv6 from this address
    #[arg(long = "redir6")]
    redir6: Option<String>,

    /// (Linux client-only) TPROXY TCP listen address
    #[arg(long = "tproxytcp")]
    tproxy_tcp: Option<String>,

    /// (client-only) TCP tunnel (laddr1=raddr1,laddr2=raddr2,...)
    #[arg(long = "tcptun")]
    tcp_tun: Option<String>,

    /// (client-only) UDP tunnel (laddr1=raddr1,laddr2=raddr2,...)
    #[arg(long = "udptun")]
    udp_tun: Option<String>,

    /// Enable UDP (server relay / client SOCKS UDP ASSOCIATE)
    #[arg(long = "udp")]
    udp: bool,

    /// UDP NAT idle timeout
    #[arg(long = "udptimeout", default_value = "120s")]
    udp_timeout: String,

    /// Verbose logging
    #[arg(long = "verbose")]
    verbose: bool,

    /// SIP003 plugin binary
    #[arg(long = "plugin")]
    plugin: Option<String>,

    /// SIP003 plugin options
    #[arg(long = "plugin-opts", default_value = "")]
    plugin_opts: String,

    /// List supported ciphers and exit
    #[arg(long = "list-ciphers")]
    list_ciphers: bool,
}

fn build_config(args: &Args) -> anyhow::Result<Config> {
    let key = match &args.key {
        Some(k) => config::decode_key(k)?,
        None => Vec::new(),
    };

    let mut cfg = Config {
        verbose: args.verbose,
        udp: args.udp,
        udp_timeout: config::parse_duration(&args.udp_timeout)?,
        socks: args.socks.clone(),
        redir: args.redir.clone(),
        redir6: args.redir6.clone(),
        tproxy_tcp: args.tproxy_tcp.clone(),
        plugin: args.plugin.clone(),
        plugin_opts: args.plugin_opts.clone(),
        ..Default::default()
    };

    for s in &args.server {
        cfg.server
            .push(config::Endpoint::parse(s, &args.cipher, &args.password, &key)?);
    }
    for c in &args.client {
        cfg.client
            .push(config::Endpoint::parse(c, &args.cipher, &args.password, &key)?);
    }
    if let Some(list) = &args.tcp_tun {
        cfg.tcp_tun = config::parse_pairs(list)?;
    }
    if let Some(list) = &args.udp_tun {
        cfg.udp_tun = config::parse_pairs(list)?;
    }

    Ok(cfg)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse_from(normalize_args());

    if args.list_ciphers {
        println!("{}", crypto::list_ciphers().join(" "));
        return Ok(());
    }

    if let Some(n) = args.keygen {
        let mut key = vec![0u8; n];
        OsRng.fill_bytes(&mut key);
        println!("{}", config::encode_key(&key));
        return Ok(());
    }

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("shadowgate={}", default_level))),
        )
        .init();

    let config = build_config(&args)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("shadowgate-worker")
        .build()?;

    runtime.block_on(async {
        if let Err(e) = shadowgate::run(config).await {
            error!("{}", e);
            std::process::exit(1);
        }
    });

    Ok(())
}
