use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use attohttpc::Response;
use color_eyre::eyre::{eyre, WrapErr};
use log::info;
use serde::{Deserialize, Serialize};

use crate::address::{HostAddresses, PublishedAddresses};
use crate::update_dns::api::{DynDns, RecordPush, RecordType};
use crate::HTTP_TIMEOUT;

/// TTL written on every updated record, matching the short re-check cycle of
/// a dynamic address.
const RECORD_TTL: u32 = 120;

pub(crate) struct Cloudflare {
    config: CloudflareConfig,
}

pub(crate) struct CloudflareConfig {
    pub base_url: String,
    pub zone_id: String,
    pub api_token: String,
}

impl CloudflareConfig {
    pub(crate) fn new(zone_id: String, api_token: String) -> Self {
        CloudflareConfig {
            base_url: default_base_url(),
            zone_id,
            api_token,
        }
    }
}

fn default_base_url() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}

impl Cloudflare {
    pub(crate) fn from_config(config: CloudflareConfig) -> Self {
        Cloudflare { config }
    }

    fn create_cf_error(response: Response) -> color_eyre::Report {
        eyre!(
            "{status} Error from Cloudflare: {de:?}",
            status = response.status(),
            de = response.json::<CloudflareResponse<()>>().map_or_else(
                |e| format!("Unable to read response: {:?}", e),
                |v| format!("{:?}", v.errors),
            ),
        )
    }

    /// GET all records filed under `domain` in the zone, of every type.
    fn list_records(&self, domain: &str) -> color_eyre::Result<Vec<DnsRecord>> {
        let response = attohttpc::get(format!(
            "{base}/zones/{zone_id}/dns_records",
            base = self.config.base_url,
            zone_id = &self.config.zone_id,
        ))
        .param("name", domain)
        .header("Authorization", format!("Bearer {}", self.config.api_token))
        .timeout(HTTP_TIMEOUT)
        .send()
        .wrap_err("Failed to send request")?;
        if !response.is_success() {
            return Err(Cloudflare::create_cf_error(response));
        }

        let cf_res: CloudflareResponse<Vec<DnsRecord>> =
            response.json().wrap_err("Failed to read response")?;
        if !cf_res.success {
            return Err(eyre!(
                "Cloudflare reported failure listing records: {:?}",
                cf_res.errors
            ));
        }
        cf_res
            .result
            .ok_or_else(|| eyre!("Cloudflare reported success without a record list"))
    }

    fn put_record(&self, domain: &str, update: &RecordUpdate) -> color_eyre::Result<()> {
        let response = attohttpc::put(format!(
            "{base}/zones/{zone_id}/dns_records/{id}",
            base = self.config.base_url,
            zone_id = &self.config.zone_id,
            id = update.record_id,
        ))
        .json(&UpdateDnsRecordReq {
            content: &update.content,
            record_type: update.record_type.as_str(),
            ttl: RECORD_TTL,
            name: domain,
            proxied: false,
        })
        .wrap_err("Failed to serialize body")?
        .header("Authorization", format!("Bearer {}", self.config.api_token))
        .timeout(HTTP_TIMEOUT)
        .send()
        .wrap_err("Failed to send request")?;
        if !response.is_success() {
            return Err(Cloudflare::create_cf_error(response));
        }

        let cf_res: CloudflareResponse<DnsRecord> =
            response.json().wrap_err("Failed to read response")?;
        if !cf_res.success {
            return Err(eyre!(
                "Cloudflare reported failure for the update: {:?}",
                cf_res.errors
            ));
        }
        Ok(())
    }
}

impl DynDns for Cloudflare {
    fn describe(&self) -> String {
        format!("Cloudflare[zone={zone_id}]", zone_id = &self.config.zone_id)
    }

    fn published_addresses(
        &self,
        domain: &str,
        want_v6: bool,
    ) -> color_eyre::Result<PublishedAddresses> {
        let records = self
            .list_records(domain)
            .wrap_err("Failed to list DNS records")?;
        Ok(published_from_records(&records, want_v6))
    }

    fn push_addresses(
        &self,
        domain: &str,
        host: &HostAddresses,
    ) -> color_eyre::Result<Vec<RecordPush>> {
        // Work from a fresh list; the zone may have changed since the read.
        let records = self
            .list_records(domain)
            .wrap_err("Failed to list DNS records")?;
        let plan = plan_updates(&records, host);
        if plan.is_empty() {
            info!(
                "[cloudflare] No A/AAAA records under {}, nothing to update.",
                domain
            );
        }
        Ok(run_updates(plan, |update| self.put_record(domain, update)))
    }
}

/// One pending PUT: which record, and what it should say afterwards.
struct RecordUpdate {
    record_id: String,
    record_type: RecordType,
    content: String,
}

fn first_record_address<A: FromStr>(records: &[DnsRecord], wanted: &str) -> Option<A> {
    records
        .iter()
        .find(|record| record.record_type == wanted)
        .and_then(|record| record.content.parse().ok())
}

/// The first A and (when asked for) first AAAA record decide what counts as
/// published. Contents that do not parse as an address of the record's type
/// are treated as absent, so they always read as differing.
fn published_from_records(records: &[DnsRecord], want_v6: bool) -> PublishedAddresses {
    PublishedAddresses {
        ipv4: first_record_address::<Ipv4Addr>(records, "A"),
        ipv6: if want_v6 {
            first_record_address::<Ipv6Addr>(records, "AAAA")
        } else {
            None
        },
    }
}

/// Every A record gets the host IPv4; every AAAA record gets the host IPv6,
/// but only when the host has one. Other record types are left alone.
fn plan_updates(records: &[DnsRecord], host: &HostAddresses) -> Vec<RecordUpdate> {
    let mut plan = Vec::new();
    for record in records {
        match record.record_type.as_str() {
            "A" => plan.push(RecordUpdate {
                record_id: record.id.clone(),
                record_type: RecordType::A,
                content: host.ipv4.to_string(),
            }),
            "AAAA" => {
                if let Some(v6) = host.ipv6 {
                    plan.push(RecordUpdate {
                        record_id: record.id.clone(),
                        record_type: RecordType::Aaaa,
                        content: v6.to_string(),
                    });
                }
            }
            _ => {}
        }
    }
    plan
}

/// Fires every update without waiting on the others, then joins the whole
/// group. A failed update only fails its own outcome.
fn run_updates<F>(plan: Vec<RecordUpdate>, put: F) -> Vec<RecordPush>
where
    F: Fn(&RecordUpdate) -> color_eyre::Result<()> + Sync,
{
    let results: Vec<color_eyre::Result<()>> = std::thread::scope(|scope| {
        let put = &put;
        let handles: Vec<_> = plan
            .iter()
            .map(|update| scope.spawn(move || put(update)))
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(result) => result,
                Err(_) => Err(eyre!("Update worker panicked")),
            })
            .collect()
    });
    plan.into_iter()
        .zip(results)
        .map(|(update, result)| RecordPush {
            record_id: update.record_id,
            record_type: update.record_type,
            content: update.content,
            result,
        })
        .collect()
}

#[derive(Deserialize, Debug)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct CloudflareResponse<T> {
    result: Option<T>,
    success: bool,
    errors: Vec<CloudflareError>,
}

#[derive(Deserialize, Debug)]
struct CloudflareError {
    code: u32,
    message: String,
}

#[derive(Deserialize, Debug)]
struct DnsRecord {
    id: String,
    name: String,
    #[serde(rename = "type")]
    record_type: String,
    content: String,
    ttl: u32,
    proxied: bool,
}

#[derive(Serialize)]
struct UpdateDnsRecordReq<'a> {
    content: &'a str,
    #[serde(rename = "type")]
    record_type: &'static str,
    ttl: u32,
    name: &'a str,
    proxied: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, record_type: &str, content: &str) -> DnsRecord {
        DnsRecord {
            id: id.to_string(),
            name: "ddns.example.com".to_string(),
            record_type: record_type.to_string(),
            content: content.to_string(),
            ttl: RECORD_TTL,
            proxied: false,
        }
    }

    fn host(ipv4: [u8; 4], ipv6: Option<Ipv6Addr>) -> HostAddresses {
        HostAddresses {
            ipv4: ipv4.into(),
            ipv6,
        }
    }

    #[test]
    fn record_list_payload_round_trips_into_published_addresses() {
        let payload = r#"{
            "success": true,
            "errors": [],
            "messages": [],
            "result": [
                {"id": "r1", "name": "ddns.example.com", "type": "A",
                 "content": "203.0.113.7", "ttl": 120, "proxied": false},
                {"id": "r2", "name": "ddns.example.com", "type": "AAAA",
                 "content": "2001:db8::7", "ttl": 120, "proxied": false}
            ]
        }"#;
        let parsed: CloudflareResponse<Vec<DnsRecord>> = serde_json::from_str(payload).unwrap();
        assert!(parsed.success);
        let records = parsed.result.unwrap();

        let published = published_from_records(&records, true);
        assert_eq!(published.ipv4, Some(Ipv4Addr::new(203, 0, 113, 7)));
        assert_eq!(published.ipv6, "2001:db8::7".parse().ok());
    }

    #[test]
    fn aaaa_records_are_ignored_unless_asked_for() {
        let records = vec![
            record("r1", "A", "203.0.113.7"),
            record("r2", "AAAA", "2001:db8::7"),
        ];
        let published = published_from_records(&records, false);
        assert_eq!(published.ipv4, Some(Ipv4Addr::new(203, 0, 113, 7)));
        assert_eq!(published.ipv6, None);
    }

    #[test]
    fn missing_and_unparseable_contents_read_as_absent() {
        let records = vec![record("r1", "A", "not-an-address")];
        let published = published_from_records(&records, true);
        assert_eq!(published.ipv4, None);
        assert_eq!(published.ipv6, None);
    }

    #[test]
    fn first_record_of_a_type_wins() {
        let records = vec![
            record("r1", "A", "203.0.113.7"),
            record("r2", "A", "198.51.100.2"),
        ];
        let published = published_from_records(&records, false);
        assert_eq!(published.ipv4, Some(Ipv4Addr::new(203, 0, 113, 7)));
    }

    #[test]
    fn plan_updates_every_a_record_and_skips_aaaa_without_a_host_ipv6() {
        let records = vec![
            record("r1", "A", "9.9.9.9"),
            record("r2", "AAAA", "2001:db8::7"),
            record("r3", "TXT", "v=spf1 -all"),
        ];
        let plan = plan_updates(&records, &host([1, 2, 3, 4], None));

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].record_id, "r1");
        assert_eq!(plan[0].record_type, RecordType::A);
        assert_eq!(plan[0].content, "1.2.3.4");
    }

    #[test]
    fn plan_covers_both_types_when_the_host_has_an_ipv6() {
        let records = vec![
            record("r1", "A", "9.9.9.9"),
            record("r2", "AAAA", "2001:db8::7"),
        ];
        let v6 = Some("::1".parse().unwrap());
        let plan = plan_updates(&records, &host([1, 2, 3, 4], v6));

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[1].record_id, "r2");
        assert_eq!(plan[1].record_type, RecordType::Aaaa);
        assert_eq!(plan[1].content, "::1");
    }

    #[test]
    fn update_body_matches_the_api_shape() {
        let body = serde_json::to_value(&UpdateDnsRecordReq {
            content: "1.2.3.4",
            record_type: "A",
            ttl: RECORD_TTL,
            name: "ddns.example.com",
            proxied: false,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "content": "1.2.3.4",
                "type": "A",
                "ttl": 120,
                "name": "ddns.example.com",
                "proxied": false,
            })
        );
    }

    #[test]
    fn one_failed_update_does_not_abort_the_rest() {
        let plan = vec![
            RecordUpdate {
                record_id: "r1".to_string(),
                record_type: RecordType::A,
                content: "1.2.3.4".to_string(),
            },
            RecordUpdate {
                record_id: "r2".to_string(),
                record_type: RecordType::Aaaa,
                content: "::1".to_string(),
            },
        ];
        let pushes = run_updates(plan, |update| {
            if update.record_id == "r1" {
                Err(eyre!("injected failure"))
            } else {
                Ok(())
            }
        });

        assert_eq!(pushes.len(), 2);
        assert_eq!(pushes[0].record_id, "r1");
        assert!(pushes[0].result.is_err());
        assert_eq!(pushes[1].record_id, "r2");
        assert!(pushes[1].result.is_ok());
    }

    #[test]
    fn an_empty_plan_yields_no_outcomes() {
        let pushes = run_updates(Vec::new(), |_| Ok(()));
        assert!(pushes.is_empty());
    }
}
