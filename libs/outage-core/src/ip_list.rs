use ipnet::{IpNet, Ipv4Net};
use std::net::{IpAddr, Ipv4Addr};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Rule {
    Net(IpNet),
    /// Inclusive IPv4 range, e.g. `10.0.0.5-20`.
    Range(u32, u32),
}

impl Rule {
    fn matches(&self, ip: IpAddr) -> bool {
        match (self, ip) {
            (Rule::Net(net), ip) => net.contains(&ip),
            (Rule::Range(lo, hi), IpAddr::V4(v4)) => (*lo..=*hi).contains(&u32::from(v4)),
            (Rule::Range(..), IpAddr::V6(_)) => false,
        }
    }
}

/// Parsed allow-list of addresses and networks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    rules: Vec<Rule>,
}

impl AllowList {
    /// Builds the list, skipping blank and malformed entries.
    pub fn parse<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let rules = entries
            .into_iter()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .filter_map(|entry| {
                let rule = parse_rule(entry);
                if rule.is_none() {
                    debug!("Skipping malformed allow-list entry: {:?}", entry);
                }
                rule
            })
            .collect();
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = normalize(ip);
        self.rules.iter().any(|rule| rule.matches(ip))
    }
}

/// Splits newline separated text into trimmed, non-empty entries.
pub fn split_entries(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty())
}

fn normalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}

fn parse_rule(entry: &str) -> Option<Rule> {
    if entry.contains('/') {
        return entry.parse::<IpNet>().ok().map(|net| Rule::Net(net.trunc()));
    }
    if let Ok(addr) = entry.parse::<IpAddr>() {
        return Some(Rule::Net(IpNet::from(normalize(addr))));
    }
    if let Some((start, end)) = entry.split_once('-') {
        return parse_range(start.trim(), end.trim());
    }
    parse_prefix(entry)
}

fn parse_range(start: &str, end: &str) -> Option<Rule> {
    let start: Ipv4Addr = start.parse().ok()?;
    let last: u8 = end.parse().ok()?;
    let [a, b, c, first] = start.octets();
    if last < first {
        return None;
    }
    let lo = u32::from(start);
    let hi = u32::from(Ipv4Addr::new(a, b, c, last));
    Some(Rule::Range(lo, hi))
}

/// `192.168` or `192.168.` covers `192.168.0.0/16`.
fn parse_prefix(entry: &str) -> Option<Rule> {
    let trimmed = entry.strip_suffix('.').unwrap_or(entry);
    let parts: Vec<u8> = trimmed
        .split('.')
        .map(|p| p.parse::<u8>().ok())
        .collect::<Option<_>>()?;
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    let mut octets = [0u8; 4];
    octets[..parts.len()].copy_from_slice(&parts);
    let prefix_len = (parts.len() * 8) as u8;
    let net = Ipv4Net::new(Ipv4Addr::from(octets), prefix_len).ok()?;
    Some(Rule::Net(IpNet::V4(net)))
}
