//! Outbound URL handling: liveness checks, affiliate rewriting, and the
//! sanitization fixes applied before the merge pass.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use std::time::Duration;
use tracing::debug;

use crate::config::Secrets;
use crate::constants::USER_AGENT;
use crate::registry::AFFILIATE_PLATFORMS;

const HEAD_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, PartialEq)]
pub struct UrlCheck {
    pub valid: bool,
    pub reason: String,
}

impl UrlCheck {
    fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: reason.into(),
        }
    }
}

/// Lightweight existence check for a ticket/event URL.
///
/// A redirect landing on a bare root path when the original path was
/// specific is evidence of an expired listing and counts as a failure.
pub async fn check_url(client: &reqwest::Client, raw: &str) -> UrlCheck {
    if raw.is_empty() || raw == "#" || raw == "null" {
        return UrlCheck::invalid("empty");
    }
    let original = match Url::parse(raw) {
        Ok(u) => u,
        Err(_) => return UrlCheck::invalid("malformed"),
    };

    let res = client
        .head(raw)
        .header("User-Agent", USER_AGENT)
        .timeout(HEAD_TIMEOUT)
        .send()
        .await;

    match res {
        Ok(res) => {
            let orig_path = original.path();
            let final_path = res.url().path();
            let redirected_home = final_path == "/" && orig_path != "/" && orig_path.len() > 5;
            if !res.status().is_success() {
                UrlCheck::invalid(format!("HTTP {}", res.status().as_u16()))
            } else if redirected_home {
                UrlCheck::invalid("redirected to homepage")
            } else {
                UrlCheck {
                    valid: true,
                    reason: "ok".to_string(),
                }
            }
        }
        Err(e) => UrlCheck::invalid(e.to_string()),
    }
}

/// Append the affiliate tracking parameter for a recognized platform.
///
/// Idempotent: an existing parameter of the same name is replaced, never
/// duplicated. Returns the rewritten URL and the platform id, or `None`
/// when no platform matches or no affiliate id is configured.
pub fn rewrite_affiliate(raw: &str, secrets: &Secrets) -> Option<(String, &'static str)> {
    let mut url = Url::parse(raw).ok()?;
    let host = url.host_str()?.to_lowercase();

    let platform = AFFILIATE_PLATFORMS
        .iter()
        .find(|p| p.domains.iter().any(|d| host.contains(d)))?;
    let affiliate_id = secrets.affiliate_id(platform.id)?.to_string();

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != platform.param)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        pairs.append_pair(platform.param, &affiliate_id);
    }
    Some((url.to_string(), platform.id))
}

static TRAVEL_TM_EVENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://travel\.ticketmaster\.com/tm-event/([A-Za-z0-9]+).*").unwrap()
});
static TRAVEL_TM_ANY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://travel\.ticketmaster\.com/").unwrap());

/// Repair known-bad URL shapes carried in from upstream sources: decode
/// double-encoded entities and route travel-portal ticket links back to the
/// main ticketing domain. Returns `None` when the URL is unusable.
pub fn sanitize_url(raw: &str, vendor_event_id: Option<&str>) -> Option<String> {
    let mut url = raw.replace("&amp%3B", "&").replace("&amp;", "&");

    if let Some(caps) = TRAVEL_TM_EVENT.captures(&url) {
        url = format!("https://www.ticketmaster.com/event/{}", &caps[1]);
    } else if TRAVEL_TM_ANY.is_match(&url) {
        match vendor_event_id {
            Some(id) => url = format!("https://www.ticketmaster.com/event/{id}"),
            None => {
                debug!("dropping unroutable travel portal URL: {}", raw);
                return None;
            }
        }
    }
    Some(url)
}

static PLACEHOLDER_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)RETINA_PORTRAIT|ARTIST_PAGE.*_3_2").unwrap());

/// Vendor placeholder artwork carries no information; stripping it lets the
/// consumer fall back to category imagery.
pub fn is_placeholder_image(url: &str) -> bool {
    PLACEHOLDER_IMAGE.is_match(url)
}
