use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use color_eyre::eyre::{eyre, WrapErr};

use crate::HTTP_TIMEOUT;

const IPV4_ECHO_URL: &str = "https://api-ipv4.ip.sb/ip";
const IPV6_ECHO_URL: &str = "https://api-ipv6.ip.sb/ip";

/// The addresses this host currently holds, as reported by the echo
/// services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HostAddresses {
    pub ipv4: Ipv4Addr,
    pub ipv6: Option<Ipv6Addr>,
}

/// The addresses currently published in DNS. Either side may be missing when
/// the zone carries no record of that type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct PublishedAddresses {
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

impl PublishedAddresses {
    /// Field-by-field comparison against the host: the IPv4 sides must be
    /// equal, and the IPv6 sides equal or both absent.
    pub(crate) fn matches(&self, host: &HostAddresses) -> bool {
        self.ipv4 == Some(host.ipv4) && self.ipv6 == host.ipv6
    }
}

/// Asks the echo endpoints what this host's public addresses are. The IPv6
/// endpoint is only consulted when `want_v6` is set. Any failure here is
/// fatal to the run; nothing downstream can work without a definite answer.
pub(crate) fn discover(want_v6: bool) -> color_eyre::Result<HostAddresses> {
    let ipv4 =
        fetch_address(IPV4_ECHO_URL).wrap_err("Failed to discover the public IPv4 address")?;
    let ipv6 = if want_v6 {
        Some(fetch_address(IPV6_ECHO_URL).wrap_err("Failed to discover the public IPv6 address")?)
    } else {
        None
    };
    Ok(HostAddresses { ipv4, ipv6 })
}

fn fetch_address<A>(url: &str) -> color_eyre::Result<A>
where
    A: FromStr,
    A::Err: std::error::Error + Send + Sync + 'static,
{
    let response = attohttpc::get(url)
        .timeout(HTTP_TIMEOUT)
        .send()
        .wrap_err("Failed to send request")?;
    if !response.is_success() {
        return Err(eyre!("{} answered {}", url, response.status()));
    }
    let body = response.text().wrap_err("Failed to read response")?;
    parse_echo_body(&body).wrap_err_with(|| format!("{} returned an unusable body", url))
}

fn parse_echo_body<A: FromStr>(body: &str) -> Result<A, A::Err> {
    body.trim().parse()
}
