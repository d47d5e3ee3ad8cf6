use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use anyhow::Context;
use clap::ArgMatches;
use serde::Deserialize;

use crate::util::error::{quit_error, ErrorHintsBuilder};

/// Default configuration file location.
pub const CONFIG_FILE: &str = "warhost.toml";

/// Load configuration from file, based on CLI arguments.
///
/// Quits with an error message on failure.
pub fn load(matches: &ArgMatches) -> Config {
    // Get config path, attempt to canonicalize
    let mut path = PathBuf::from(
        matches
            .get_one::<String>("config")
            .map(String::as_str)
            .unwrap_or(CONFIG_FILE),
    );
    if let Ok(p) = path.canonicalize() {
        path = p;
    }

    // Ensure config file exists
    if !path.is_file() {
        quit_error(
            anyhow::anyhow!("Config file does not exist: {}", path.to_string_lossy()),
            ErrorHintsBuilder::default()
                .config(true)
                .config_generate(true)
                .build()
                .unwrap(),
        );
    }

    // Load config
    match Config::load(path) {
        Ok(config) => config,
        Err(err) => {
            quit_error(
                err.context("Failed to load config"),
                ErrorHintsBuilder::default()
                    .config(true)
                    .config_test(true)
                    .build()
                    .unwrap(),
            );
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub bot: Bot,
    pub net: Net,
    pub game: Game,
    pub discovery: Discovery,
    pub reconnect: Reconnect,
    pub setup: Setup,
    pub map: Map,
    #[serde(rename = "realm")]
    pub realms: Vec<Realm>,
}

impl Config {
    /// Load config from file.
    pub fn load(path: PathBuf) -> Result<Self, anyhow::Error> {
        let data = fs::read_to_string(&path).context("failed to read config file")?;
        let config: Config = toml::from_str(&data).context("failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Sanity checks that cannot be expressed through serde.
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.net.game_port_start > self.net.game_port_end {
            anyhow::bail!("net.game_port_start must not exceed net.game_port_end");
        }
        for &v in &self.game.versions {
            if !(crate::proto::VERSION_MIN..=crate::proto::VERSION_MAX).contains(&v) {
                anyhow::bail!("game.versions entry {} outside supported range 23-63", v);
            }
        }
        if self.map.sha1.len() != 40 || !self.map.sha1.chars().all(|c| c.is_ascii_hexdigit()) {
            anyhow::bail!("map.sha1 must be 40 hex characters");
        }
        if self.game.countdown_start == 0 {
            anyhow::bail!("game.countdown_start must be at least 1");
        }
        for realm in &self.realms {
            if realm.internal_id < 0x10 {
                anyhow::bail!("realm.internal_id must be 16 or higher, lower values are reserved");
            }
        }
        Ok(())
    }
}

/// Bot-wide settings.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Bot {
    /// Directory for ban list, reserved list and other data files.
    pub data_dir: PathBuf,

    /// Main log file, empty to disable.
    pub log_file: String,

    /// Remote log file, empty to disable.
    pub remote_log_file: String,

    /// Token that prefixes operator commands in chat.
    pub command_token: String,

    /// Name announced for the virtual host user.
    pub virtual_host_name: String,

    /// Maximum lobbies open at once.
    pub max_lobbies: usize,

    /// Maximum games past the countdown.
    pub max_started_games: usize,

    /// Maximum games still loading.
    pub max_join_in_progress_games: usize,

    /// Maximum games in any state.
    pub max_total_games: usize,
}

impl Default for Bot {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            log_file: "warhost.log".into(),
            remote_log_file: String::new(),
            command_token: "!".into(),
            virtual_host_name: "|cFF4080C0warhost".into(),
            max_lobbies: 2,
            max_started_games: 10,
            max_join_in_progress_games: 2,
            max_total_games: 12,
        }
    }
}

/// Sockets and transfer limits.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Net {
    /// First TCP port games may bind.
    pub game_port_start: u16,

    /// Last TCP port games may bind.
    pub game_port_end: u16,

    /// UDP port for LAN discovery.
    pub udp_port: u16,

    /// Bind address for listeners.
    pub bind_addr: IpAddr,

    /// Simultaneous joins allowed from one IP.
    pub max_connections_per_ip: usize,

    /// Simultaneous joins allowed from loopback.
    pub max_connections_loopback: usize,

    /// Map upload budget in bytes per second.
    pub max_upload_speed: usize,

    /// Map packets kept in flight per downloader.
    pub max_parallel_map_packets: usize,

    /// Players downloading the map at once.
    pub max_downloaders: usize,
}

impl Default for Net {
    fn default() -> Self {
        Self {
            game_port_start: 6113,
            game_port_end: 6119,
            udp_port: 6112,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            max_connections_per_ip: 2,
            max_connections_loopback: 8,
            max_upload_speed: 1_000_000,
            max_parallel_map_packets: 2,
            max_downloaders: 3,
        }
    }
}

/// Session behavior.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Game {
    /// Game versions advertised and admitted.
    pub versions: Vec<u8>,

    /// Action relay cadence in milliseconds.
    pub latency_ms: u64,

    /// Keepalives a player may fall behind before lagging.
    pub sync_limit: u32,

    /// Behind-frames below which a lagger recovers.
    pub sync_limit_safe: u32,

    /// What to do with desynced players.
    pub desync_policy: DesyncPolicy,

    /// Whether clients may download the map from the host.
    pub map_transfers: bool,

    /// Countdown ticks to go from this value to zero.
    pub countdown_start: u32,

    /// Milliseconds per countdown tick.
    pub countdown_tick_ms: u64,

    /// Start automatically at this many players, zero to disable.
    pub auto_start_players: usize,

    /// Earliest auto start, seconds after lobby creation.
    pub auto_start_secs: u64,

    /// Seconds a connection may idle before its join request must arrive.
    pub join_grace_secs: u64,

    /// Seconds the owner may be absent before ownership clears.
    pub release_owner_secs: u64,

    /// Seconds an ownerless lobby survives.
    pub delete_orphan_lobby_secs: u64,

    /// Player count at which the game-over timer arms.
    pub num_players_to_start_gameover: usize,

    /// Seconds between game-over arming and shutdown.
    pub gameover_tolerance_secs: u64,

    /// When to inject a save for a leaver.
    pub save_on_leave: SaveOnLeave,
}

impl Default for Game {
    fn default() -> Self {
        Self {
            versions: vec![26, 27, 28, 30],
            latency_ms: 100,
            sync_limit: 32,
            sync_limit_safe: 8,
            desync_policy: DesyncPolicy::Notify,
            map_transfers: true,
            countdown_start: 5,
            countdown_tick_ms: 500,
            auto_start_players: 0,
            auto_start_secs: 0,
            join_grace_secs: 10,
            release_owner_secs: 120,
            delete_orphan_lobby_secs: 600,
            num_players_to_start_gameover: 1,
            gameover_tolerance_secs: 60,
            save_on_leave: SaveOnLeave::Never,
        }
    }
}

/// What happens to a desynced player.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesyncPolicy {
    Notify,
    Drop,
}

/// When to inject a save before a leaver departs.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveOnLeave {
    Never,
    Always,
    Auto,
}

/// LAN advertisement.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Discovery {
    /// Broadcast GAMEINFO into the local network.
    pub enabled: bool,

    /// Advertise the full GAMEINFO every cycle instead of REFRESHGAME.
    pub strict: bool,

    /// Subnet broadcast address.
    pub broadcast_addr: SocketAddr,

    /// Extra unicast targets that should hear about games.
    #[serde(deserialize_with = "crate::util::serde::to_socket_addrs_vec")]
    pub extra_addrs: Vec<SocketAddr>,
}

impl Default for Discovery {
    fn default() -> Self {
        Self {
            enabled: true,
            strict: true,
            broadcast_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), 6112),
            extra_addrs: Vec::new(),
        }
    }
}

/// Reconnect proxy support.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Reconnect {
    /// Accept basic reconnect proxies.
    pub enabled: bool,

    /// Accept the extended variant with game id checks.
    pub extended: bool,

    /// Seconds a dropped player may take to come back.
    pub wait_secs: u64,
}

impl Default for Reconnect {
    fn default() -> Self {
        Self {
            enabled: true,
            extended: true,
            wait_secs: 180,
        }
    }
}

/// The game this bot hosts on startup.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Setup {
    /// Lobby name shown to clients.
    pub game_name: String,

    /// Owner name; may be empty until someone takes ownership.
    pub owner: String,

    /// Realm the owner belongs to, empty for LAN.
    pub owner_realm: String,

    /// Only reserved players may join.
    pub private: bool,

    /// Names admitted past a full-lobby or private check.
    pub reserved: Vec<String>,

    /// HCL mode string injected at start, empty for none.
    pub hcl: String,

    /// Host a fresh lobby when the running game ends.
    pub auto_rehost: bool,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            game_name: "warhost game".into(),
            owner: String::new(),
            owner_realm: String::new(),
            private: false,
            reserved: Vec::new(),
            hcl: String::new(),
            auto_rehost: false,
        }
    }
}

/// The hosted map, as produced by an external map parser.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Map {
    /// Local file with the map data.
    pub file: PathBuf,

    /// Client-visible path sent in MAPCHECK.
    pub path: String,

    /// File size in bytes.
    pub size: u32,

    /// CRC32 of the file.
    pub crc32: u32,

    /// SHA1 of the file, 40 hex characters.
    pub sha1: String,

    /// Number of player slots the map declares.
    pub num_slots: u8,

    /// Number of teams the map declares.
    pub num_teams: u8,

    /// Map allows observer slots.
    pub observers: bool,

    /// Observers are referees with full chat and pause rights.
    pub referees: bool,

    /// Map hides player identities until game end.
    pub hidden_players: bool,

    /// Map declares fixed player settings.
    pub fixed_player_settings: bool,

    /// Map declares custom forces.
    pub custom_forces: bool,

    /// Name the map reserves for host-to-map communication, empty for none.
    pub comm_pseudonym: String,

    /// Where players can fetch the map themselves.
    pub url: String,

    /// Welcome template shown to joiners.
    pub greeting: String,
}

impl Default for Map {
    fn default() -> Self {
        Self {
            file: PathBuf::from("maps/map.w3x"),
            path: "Maps\\Download\\map.w3x".into(),
            size: 0,
            crc32: 0,
            sha1: "0000000000000000000000000000000000000000".into(),
            num_slots: 12,
            num_teams: 2,
            observers: false,
            referees: false,
            hidden_players: false,
            fixed_player_settings: false,
            custom_forces: false,
            comm_pseudonym: String::new(),
            url: String::new(),
            greeting: "Welcome {NAME}!\n{URL?}Get the map at {URL}".into(),
        }
    }
}

impl Map {
    /// Decode the configured SHA1 hex string.
    pub fn sha1_bytes(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&self.sha1[i * 2..i * 2 + 2], 16).unwrap_or(0);
        }
        out
    }
}

/// An external chat realm games are advertised on.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Realm {
    /// Realm display name.
    pub name: String,

    /// Internal id, 16 or higher; encoded into host counters.
    pub internal_id: u8,

    /// Joiners from this realm must be verified by a whisper challenge.
    #[serde(default)]
    pub verify_joiners: bool,

    /// Skip this realm when queueing game refreshes.
    #[serde(default)]
    pub excluded: bool,

    /// Versions this realm can carry, empty for all supported.
    #[serde(default)]
    pub versions: Vec<u8>,
}

impl Realm {
    /// Whether this realm can advertise the given game version.
    pub fn supports_version(&self, version: u8) -> bool {
        self.versions.is_empty() || self.versions.contains(&version)
    }
}

/// Generate an example configuration file.
pub fn generate() -> String {
    include_str!("../res/warhost.example.toml").to_string()
}
