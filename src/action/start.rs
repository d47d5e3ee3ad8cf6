use clap::ArgMatches;
use sha1::{Digest, Sha1};

use crate::ban;
use crate::config::{self, Config};
use crate::service;

/// Start warhost.
pub fn invoke(matches: &ArgMatches) -> Result<(), ()> {
    // Load config
    let mut config = config::load(matches);

    // Reserved names from the data directory join the configured list
    merge_reserved(&mut config);

    // Fill in map hashes the operator left out
    fill_map_hashes(&mut config);

    // Start the host service
    service::server::service(config)
}

/// Compute size, CRC32 and SHA1 of the map file for unset config fields.
fn fill_map_hashes(config: &mut Config) {
    let needs_size = config.map.size == 0;
    let needs_crc = config.map.crc32 == 0;
    let needs_sha1 = config.map.sha1.chars().all(|c| c == '0');
    if !needs_size && !needs_crc && !needs_sha1 {
        return;
    }

    let data = match std::fs::read(&config.map.file) {
        Ok(data) => data,
        Err(err) => {
            warn!(target: "warhost", "Cannot hash map file {}: {}", config.map.file.display(), err);
            return;
        }
    };

    if needs_size {
        config.map.size = data.len() as u32;
    }
    if needs_crc {
        config.map.crc32 = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC).checksum(&data);
    }
    if needs_sha1 {
        let digest = Sha1::digest(&data);
        config.map.sha1 = digest.iter().map(|b| format!("{:02x}", b)).collect();
    }
    info!(target: "warhost", "Map {}: {} bytes, crc32 {:08x}, sha1 {}",
        config.map.file.display(), config.map.size, config.map.crc32, config.map.sha1);
}

/// Merge `reserved.json` into the configured reservation list.
fn merge_reserved(config: &mut Config) {
    let path = config.bot.data_dir.join(ban::RESERVED_FILE);
    if !path.is_file() {
        return;
    }
    match ban::load_reserved(&path) {
        Ok(names) => {
            for name in names {
                if !config.setup.reserved.contains(&name) {
                    config.setup.reserved.push(name);
                }
            }
        }
        Err(err) => {
            warn!(target: "warhost", "Failed to load {}: {}", ban::RESERVED_FILE, err);
        }
    }
}
