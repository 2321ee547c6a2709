use std::time::Duration;

use color_eyre::eyre::WrapErr;
use log::{error, info, warn};
use structopt::StructOpt;

use crate::update_dns::api::DynDns;
use crate::update_dns::cloudflare::{Cloudflare, CloudflareConfig};

mod address;
mod campus;
mod update_dns;

const RUST_BACKTRACE: &str = "RUST_BACKTRACE";

/// Timeout applied to every outbound call except the reachability probe,
/// which uses a shorter one of its own.
pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(StructOpt, Debug)]
pub(crate) struct UestcDdns {
    /// Cloudflare API token
    #[structopt(long)]
    pub token: String,

    /// Cloudflare zone id holding the records
    #[structopt(long)]
    pub zone: String,

    /// Domain whose A/AAAA records are kept up to date
    #[structopt(long)]
    pub domain: String,

    /// Account for the campus network portal
    #[structopt(long)]
    pub username: String,

    /// Password for the campus network portal
    #[structopt(long)]
    pub password: String,

    /// Also publish the host's public IPv6 address
    #[structopt(long)]
    pub ipv6: bool,

    /// Verbosity of output, 1 occurrence for debug, 2 occurrences for trace
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: usize,
}

fn main() -> color_eyre::Result<()> {
    if std::env::var_os(RUST_BACKTRACE).is_none() {
        std::env::set_var(RUST_BACKTRACE, "1");
    }

    let args: UestcDdns = UestcDdns::from_args();

    color_eyre::install()?;
    stderrlog::new()
        .verbosity(args.verbose + 2)
        .init()
        .wrap_err("Failed to initialize logging")?;

    if !campus::ensure_online(&args.username, &args.password) {
        warn!(
            "Still offline after {} portal logins, leaving DNS alone",
            campus::MAX_LOGIN_ATTEMPTS
        );
        return Ok(());
    }

    let host = address::discover(args.ipv6)?;
    match host.ipv6 {
        Some(v6) => info!("Your public addresses are {} and {}", host.ipv4, v6),
        None => info!("Your public IP address is {}", host.ipv4),
    }

    let backend: Box<dyn DynDns> = Box::new(Cloudflare::from_config(CloudflareConfig::new(
        args.zone,
        args.token,
    )));

    let published = backend.published_addresses(&args.domain, args.ipv6)?;
    if published.matches(&host) {
        info!("DNS records already match, nothing to update.");
        return Ok(());
    }

    info!(
        "Attempting to update DNS entries with {}",
        backend.describe()
    );

    let pushes = backend
        .push_addresses(&args.domain, &host)
        .wrap_err("Failed to update DNS records")?;
    for push in &pushes {
        match &push.result {
            Ok(()) => info!(
                "Updated {} record {} to {}",
                push.record_type, push.record_id, push.content
            ),
            Err(report) => error!(
                "Failed to update {} record {}: {:?}",
                push.record_type, push.record_id, report
            ),
        }
    }

    Ok(())
}
