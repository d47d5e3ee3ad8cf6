use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::net::IpAddr;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Ban list file name.
pub const FILE: &str = "bans.json";

/// Reserved players file name.
pub const RESERVED_FILE: &str = "reserved.json";

/// The forever expiry literal.
const EXPIRY_FOREVER: &str = "forever";

/// File-backed ban store, keyed by lowercased name and by IP.
///
/// Stands in for the statistics database the full deployment queries; the
/// session only ever asks "is this name/IP banned in this scope".
#[derive(Debug, Default)]
pub struct BanList {
    names: HashMap<String, BanEntry>,
    ips: HashMap<IpAddr, BanEntry>,
}

impl BanList {
    /// Check whether the given name is banned.
    pub fn is_name_banned(&self, name: &str) -> bool {
        self.names
            .get(&name.to_lowercase())
            .map(|b| b.is_active())
            .unwrap_or(false)
    }

    /// Check whether the given IP is banned.
    pub fn is_ip_banned(&self, ip: &IpAddr) -> bool {
        self.ips.get(ip).map(|b| b.is_active()).unwrap_or(false)
    }

    /// Get the ban entry for a name if it exists.
    pub fn name_entry(&self, name: &str) -> Option<&BanEntry> {
        self.names.get(&name.to_lowercase())
    }
}

/// A single ban record.
#[derive(Debug, Deserialize, Clone)]
pub struct BanEntry {
    /// Banned player name, if this is a name ban.
    pub name: Option<String>,

    /// Banned IP, if this is an IP ban.
    pub ip: Option<IpAddr>,

    /// Realm scope the ban applies to, empty for all.
    #[serde(default)]
    pub realm: String,

    /// Ban creation time.
    pub created: Option<String>,

    /// Ban expiry time, or "forever".
    pub expires: Option<String>,

    /// Ban reason.
    pub reason: Option<String>,
}

impl BanEntry {
    /// Check if this entry is currently in force.
    pub fn is_active(&self) -> bool {
        let expires = match &self.expires {
            Some(expires) => expires,
            None => return true,
        };

        if expires.trim().to_lowercase() == EXPIRY_FOREVER {
            return true;
        }

        // Parse expiry time, check if it has passed
        match DateTime::parse_from_str(expires, "%Y-%m-%d %H:%M:%S %z") {
            Ok(expiry) => expiry > Utc::now(),
            Err(err) => {
                error!(target: "warhost", "Failed to parse ban expiry '{}', assuming still banned: {}", expires, err);
                true
            }
        }
    }
}

/// Load the ban list from file.
pub fn load(path: &Path) -> Result<BanList, Box<dyn Error>> {
    let contents = fs::read_to_string(path)?;
    let entries: Vec<BanEntry> = serde_json::from_str(&contents)?;
    debug!(target: "warhost", "Loaded {} ban entries", entries.len());

    let mut list = BanList::default();
    for entry in entries {
        if let Some(name) = &entry.name {
            list.names.insert(name.to_lowercase(), entry.clone());
        }
        if let Some(ip) = entry.ip {
            list.ips.insert(ip, entry);
        }
    }
    Ok(list)
}

/// Load the reserved player names from file.
pub fn load_reserved(path: &Path) -> Result<Vec<String>, Box<dyn Error>> {
    let contents = fs::read_to_string(path)?;
    let names: Vec<String> = serde_json::from_str(&contents)?;
    debug!(target: "warhost", "Loaded {} reserved names", names.len());
    Ok(names.into_iter().map(|n| n.to_lowercase()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(expires: Option<&str>) -> BanEntry {
        BanEntry {
            name: Some("griefer".into()),
            ip: None,
            realm: String::new(),
            created: None,
            expires: expires.map(Into::into),
            reason: None,
        }
    }

    #[test]
    fn missing_expiry_means_banned() {
        assert!(entry(None).is_active());
    }

    #[test]
    fn forever_is_banned() {
        assert!(entry(Some("forever")).is_active());
        assert!(entry(Some(" FOREVER ")).is_active());
    }

    #[test]
    fn expired_ban_is_inactive() {
        assert!(!entry(Some("2001-01-01 00:00:00 +0000")).is_active());
    }

    #[test]
    fn name_lookup_is_case_insensitive() {
        let mut list = BanList::default();
        list.names.insert("griefer".into(), entry(None));
        assert!(list.is_name_banned("Griefer"));
        assert!(list.is_name_banned("GRIEFER"));
        assert!(!list.is_name_banned("innocent"));
    }
}
