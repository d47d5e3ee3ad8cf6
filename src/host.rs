use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::ban::BanList;
use crate::command::{self, CommandContext, CommandRequest, Permission, ServiceKind};
use crate::config::Config;
use crate::discovery::Discovery;
use crate::game::{Game, GameEvent, GameState, RealmNotice};
use crate::logfile::LogFiles;
use crate::stats::StatsSink;

/// Minimum gap between automatic rehosts.
const AUTO_REHOST_COOLDOWN: Duration = Duration::from_secs(30);

/// Length of a generated sudo challenge.
const SUDO_CHALLENGE_LENGTH: usize = 24;

/// Event delivered to the host controller by the network services.
#[derive(Debug)]
pub enum HostEvent {
    /// Traffic on a game's TCP listener.
    Net { port: u16, event: GameEvent },

    /// A datagram on the discovery socket.
    Search { data: Vec<u8>, from: SocketAddr },

    /// A line typed on the console.
    Console(String),

    /// Shut everything down.
    Shutdown,
}

/// Deferred action from the CLI or a command context.
#[derive(Debug, Clone)]
pub enum HostAction {
    /// Turn the configured game setup into a live lobby.
    Host,

    /// Run a named command with a claimed identity and sudo payload.
    Exec {
        name: String,
        args: String,
        as_name: String,
        exec_auth: Option<String>,
    },
}

/// Creates game sessions, enforces global quotas and routes commands.
pub struct Host {
    pub cfg: Arc<Config>,
    pub games: Vec<Game>,

    /// Lobbies created mid-iteration, drained into `games` on the next tick.
    pending_create: Vec<Game>,

    pub pending_actions: VecDeque<HostAction>,
    pub discovery: Discovery,
    pub bans: Arc<RwLock<BanList>>,
    pub logs: LogFiles,
    stats: StatsSink,
    map_data: Option<Arc<Vec<u8>>>,

    next_host_counter: u32,
    sudo_challenge: Option<String>,
    last_rehost: Option<Instant>,

    /// The service layer binds a port and calls `create_game` when set.
    pub wants_lobby: bool,

    pub shutdown: bool,
}

impl Host {
    pub fn new(cfg: Arc<Config>, discovery: Discovery, _now: Instant) -> Self {
        let map_data = match std::fs::read(&cfg.map.file) {
            Ok(data) => Some(Arc::new(data)),
            Err(err) => {
                warn!(target: "warhost", "Cannot read map file {}: {}; transfers disabled",
                    cfg.map.file.display(), err);
                None
            }
        };
        let logs = LogFiles::open(&cfg.bot.log_file, &cfg.bot.remote_log_file);
        let stats = StatsSink::new(&cfg.bot.data_dir);
        Self {
            cfg,
            games: Vec::new(),
            pending_create: Vec::new(),
            pending_actions: VecDeque::new(),
            discovery,
            bans: Arc::new(RwLock::new(BanList::default())),
            logs,
            stats,
            map_data,
            next_host_counter: 1,
            sudo_challenge: None,
            last_rehost: None,
            wants_lobby: true,
            shutdown: false,
        }
    }

    /// Count of games still in the lobby phase.
    pub fn lobbies(&self) -> usize {
        self.all_games()
            .filter(|g| matches!(g.state, GameState::Lobby | GameState::CountingDown))
            .count()
    }

    /// Count of games past the countdown.
    pub fn started_games(&self) -> usize {
        self.all_games()
            .filter(|g| matches!(g.state, GameState::Playing | GameState::Over))
            .count()
    }

    /// Count of games still loading.
    pub fn loading_games(&self) -> usize {
        self.all_games()
            .filter(|g| g.state == GameState::Loading)
            .count()
    }

    fn all_games(&self) -> impl Iterator<Item = &Game> {
        self.games.iter().chain(self.pending_create.iter())
    }

    /// Whether quotas allow another lobby right now.
    pub fn may_create_lobby(&self) -> bool {
        self.lobbies() < self.cfg.bot.max_lobbies
            && self.started_games() < self.cfg.bot.max_started_games
            && self.loading_games() < self.cfg.bot.max_join_in_progress_games
            && self.games.len() + self.pending_create.len() < self.cfg.bot.max_total_games
    }

    /// Build a new session on the given bound port.
    ///
    /// The session lands in the pending buffer so it never joins the game
    /// list mid-iteration.
    pub fn create_game(&mut self, port: u16, now: Instant) -> bool {
        if !self.may_create_lobby() {
            info!(target: "warhost", "Lobby quota reached, not hosting");
            return false;
        }
        let host_counter = self.next_host_counter;
        self.next_host_counter += 1;

        let mut game = Game::new(
            self.cfg.clone(),
            host_counter,
            port,
            self.map_data.clone(),
            now,
        );
        game.bans = self.bans.clone();
        info!(target: "warhost", "Hosting [{}] on port {}", game.game_name, port);
        self.logs
            .log(&format!("hosting [{}] on port {}", game.game_name, port));
        self.discovery.announce_create(&game);
        self.pending_create.push(game);
        self.wants_lobby = false;
        self.last_rehost = Some(now);
        true
    }

    /// Route one external event.
    pub fn handle_event(&mut self, event: HostEvent, now: Instant) {
        match event {
            HostEvent::Net { port, event } => {
                match self.games.iter_mut().find(|g| g.host_port == port) {
                    Some(game) => game.handle_event(event, now),
                    // Dropping the connect event closes the socket
                    None => debug!(target: "warhost", "traffic for unknown game port {}", port),
                }
            }
            HostEvent::Search { data, from } => {
                self.discovery.handle_search(&self.games, &data, from, now);
            }
            HostEvent::Console(line) => self.handle_console(&line, now),
            HostEvent::Shutdown => {
                info!(target: "warhost", "Shutting down...");
                self.shutdown = true;
                for game in &mut self.games {
                    game.exiting = true;
                    game.finish(now);
                }
            }
        }
    }

    /// One pass over all per-tick work.
    pub fn tick(&mut self, now: Instant) {
        // Let each session run; collect the ones that finished
        let mut i = 0;
        while i < self.games.len() {
            let done = self.games[i].update(now);
            self.drain_session_outputs(i, now);
            if done {
                let game = self.games.remove(i);
                self.logs
                    .log(&format!("game [{}] over", game.game_name));
                if game.record.started {
                    self.stats.commit(&game.record);
                }
                self.discovery.announce_decreate(&game);
            } else {
                i += 1;
            }
        }

        // New lobbies join the list between iterations
        if !self.pending_create.is_empty() {
            self.games.append(&mut self.pending_create);
        }

        self.discovery.tick(&self.games, now);
        self.process_actions(now);

        // Auto rehost with a cooldown
        if self.cfg.setup.auto_rehost
            && !self.shutdown
            && self.lobbies() == 0
            && self.may_create_lobby()
        {
            let cooled = self
                .last_rehost
                .map(|at| now.duration_since(at) >= AUTO_REHOST_COOLDOWN)
                .unwrap_or(true);
            if cooled && !self.wants_lobby {
                info!(target: "warhost", "Auto-rehosting");
                self.wants_lobby = true;
            }
        }
    }

    /// Whether the process can exit.
    pub fn done(&self) -> bool {
        self.shutdown && self.games.is_empty() && self.pending_create.is_empty()
    }

    /// The next instant any session wants attention.
    pub fn next_deadline(&self, now: Instant) -> Instant {
        self.games
            .iter()
            .map(|g| g.next_deadline(now))
            .min()
            .unwrap_or(now + Duration::from_millis(500))
            .min(now + Duration::from_millis(500))
    }

    /// Commands and realm notices a session queued this iteration.
    fn drain_session_outputs(&mut self, idx: usize, now: Instant) {
        let requests: Vec<CommandRequest> = self.games[idx].pending_commands.drain(..).collect();
        for request in requests {
            let permission = command::permission_for(&self.games[idx], &request);
            let ctx = CommandContext::from_request(&request, permission);
            let mut reply = command::CommandReply::default();
            command::run(
                &mut self.games[idx],
                &ctx,
                &request.name,
                &request.args,
                now,
                &mut reply,
            );
            for line in reply.lines {
                if request.broadcast {
                    self.games[idx].announce(&line);
                } else {
                    self.games[idx].whisper(request.sender_uid, &line);
                }
            }
        }

        let notices: Vec<RealmNotice> = self.games[idx].realm_outbox.drain(..).collect();
        for notice in notices {
            // Realm adapters are external; their queue feed is mirrored to
            // the remote log
            match &notice {
                RealmNotice::RefreshGame { slots_open } => {
                    // Excluded realms and realms without this version are
                    // skipped
                    let version = self.games[idx].version;
                    for realm in self
                        .cfg
                        .realms
                        .iter()
                        .filter(|r| !r.excluded && r.supports_version(version))
                    {
                        self.logs.log_remote(&format!(
                            "refresh [{}] on {} open={}",
                            self.games[idx].game_name, realm.name, slots_open
                        ));
                    }
                }
                RealmNotice::VerifyWhisper { realm_id, name } => {
                    self.logs
                        .log_remote(&format!("verify realm={} name={}", realm_id, name));
                }
                RealmNotice::RejectionNotice { realm_id, reason, .. } => {
                    self.logs
                        .log_remote(&format!("reject realm={} {}", realm_id, reason));
                }
                RealmNotice::Uncreate => {
                    self.logs
                        .log_remote(&format!("uncreate [{}]", self.games[idx].game_name));
                }
            }
        }
    }

    /// Drain the global pending-actions queue.
    fn process_actions(&mut self, now: Instant) {
        while let Some(action) = self.pending_actions.pop_front() {
            match action {
                HostAction::Host => {
                    if self.may_create_lobby() {
                        self.wants_lobby = true;
                    } else {
                        info!(target: "warhost", "Cannot host: game quota reached");
                    }
                }
                HostAction::Exec {
                    name,
                    args,
                    as_name,
                    exec_auth,
                } => {
                    // Sudo elevation is single-shot: the challenge is
                    // consumed whether or not the command succeeds
                    let elevated = match (&exec_auth, self.sudo_challenge.take()) {
                        (Some(token), Some(challenge)) => *token == challenge,
                        _ => false,
                    };
                    let permission = if elevated {
                        Permission::Sudo
                    } else {
                        Permission::RootAdmin
                    };
                    let Some(game) = self.games.first_mut() else {
                        info!(target: "warhost", "No game to run [{}] against", name);
                        continue;
                    };
                    let mut ctx = CommandContext::service_level(ServiceKind::Cli, permission);
                    ctx.sender = as_name;
                    let mut reply = command::CommandReply::default();
                    command::run(game, &ctx, &name, &args, now, &mut reply);
                    for line in reply.lines {
                        info!(target: "warhost", "{}", line);
                    }
                }
            }
        }
    }

    /// Console command intake.
    fn handle_console(&mut self, line: &str, now: Instant) {
        let Some(parts) = shlex::split(line) else {
            info!(target: "warhost", "Unbalanced quoting");
            return;
        };
        let Some((name, args)) = parts.split_first() else {
            return;
        };
        match name.as_str() {
            "quit" | "exit" => self.handle_event(HostEvent::Shutdown, now),
            "host" => self.pending_actions.push_back(HostAction::Host),
            "sudo" => {
                // Hand the operator a one-shot challenge over this private
                // channel
                let challenge: String = rand::thread_rng()
                    .sample_iter(&Alphanumeric)
                    .take(SUDO_CHALLENGE_LENGTH)
                    .map(char::from)
                    .collect();
                info!(target: "warhost", "sudo challenge: {}", challenge);
                self.sudo_challenge = Some(challenge);
            }
            "exec" => {
                // exec [--auth TOKEN] <command> [args...]
                let mut rest: Vec<String> = args.to_vec();
                let mut exec_auth = None;
                if rest.first().map(String::as_str) == Some("--auth") && rest.len() >= 2 {
                    exec_auth = Some(rest.remove(1));
                    rest.remove(0);
                }
                let Some((cmd, cmd_args)) = rest.split_first() else {
                    info!(target: "warhost", "Usage: exec [--auth TOKEN] <command> [args...]");
                    return;
                };
                self.pending_actions.push_back(HostAction::Exec {
                    name: cmd.clone(),
                    args: cmd_args.join(" "),
                    as_name: "console".into(),
                    exec_auth,
                });
            }
            _ => {
                // Everything else runs as a plain root-level command
                self.pending_actions.push_back(HostAction::Exec {
                    name: name.clone(),
                    args: args.join(" "),
                    as_name: "console".into(),
                    exec_auth: None,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::testutil::test_config;

    fn test_host() -> Host {
        let cfg = test_config();
        let discovery = Discovery::new(cfg.clone(), None, Instant::now());
        let mut host = Host::new(cfg, discovery, Instant::now());
        host.map_data = None;
        host
    }

    #[test]
    fn lobby_quota_enforced() {
        let mut host = test_host();
        let now = Instant::now();
        assert!(host.create_game(6113, now));
        assert!(host.create_game(6114, now));
        // Default max_lobbies is 2
        assert!(!host.create_game(6115, now));
        assert_eq!(host.lobbies(), 2);
    }

    #[test]
    fn pending_lobbies_join_list_on_tick() {
        let mut host = test_host();
        let now = Instant::now();
        host.create_game(6113, now);
        assert!(host.games.is_empty());
        host.tick(now);
        assert_eq!(host.games.len(), 1);
    }

    #[test]
    fn shutdown_finishes_games() {
        let mut host = test_host();
        let now = Instant::now();
        host.create_game(6113, now);
        host.tick(now);
        host.handle_event(HostEvent::Shutdown, now);
        host.tick(now);
        assert!(host.done());
    }

    #[test]
    fn console_host_action_sets_flag() {
        let mut host = test_host();
        let now = Instant::now();
        host.wants_lobby = false;
        host.handle_event(HostEvent::Console("host".into()), now);
        host.tick(now);
        assert!(host.wants_lobby);
    }

    #[test]
    fn sudo_challenge_is_single_shot() {
        let mut host = test_host();
        let now = Instant::now();
        host.create_game(6113, now);
        host.tick(now);

        host.handle_console("sudo", now);
        let challenge = host.sudo_challenge.clone().unwrap();
        host.handle_console(&format!("exec --auth {} end", challenge), now);
        host.tick(now);
        assert!(host.sudo_challenge.is_none(), "challenge consumed");
        assert!(host.games[0].gameover_armed());
    }
}
