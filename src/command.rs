use std::time::Instant;

use crate::game::{Game, GameState};
use crate::proto::join::LeaveReason;
use crate::slot::{CompDifficulty, LayoutPreset, SlotError};

/// Where a command came from.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ServiceKind {
    GameChat,
    RealmWhisper,
    RealmChannel,
    Irc,
    Discord,
    Cli,
}

/// Permission tier of a command invocation, strongest first.
#[derive(Debug, Copy, Clone, Eq, PartialEq, PartialOrd, Ord)]
pub enum Permission {
    Disabled,
    Unverified,
    PotentialOwner,
    Auto,
    Verified,
    Owner,
    VerifiedOwner,
    Admin,
    RootAdmin,
    SudoUnsafe,
    Sudo,
}

/// A command scanned out of chat, waiting for the host controller.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub sender: String,
    pub sender_uid: u8,
    /// Arena generation of the sender at scan time; a mismatch at dispatch
    /// time means the player is gone.
    pub sender_generation: u32,
    pub realm_id: u8,
    pub verified: bool,
    pub name: String,
    pub args: String,
    pub broadcast: bool,
}

/// Short-lived dispatch context.
///
/// Holds indices and names, never references into the session; the sender is
/// looked up again at dispatch time and may be gone.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub service: ServiceKind,
    pub sender: String,
    pub sender_uid: u8,
    pub sender_generation: u32,
    pub verified: bool,
    pub permission: Permission,
    pub broadcast: bool,
}

impl CommandContext {
    /// Context for a console or service-level invocation.
    pub fn service_level(service: ServiceKind, permission: Permission) -> Self {
        Self {
            service,
            sender: String::new(),
            sender_uid: 0,
            sender_generation: 0,
            verified: true,
            permission,
            broadcast: false,
        }
    }

    pub fn from_request(request: &CommandRequest, permission: Permission) -> Self {
        Self {
            service: ServiceKind::GameChat,
            sender: request.sender.clone(),
            sender_uid: request.sender_uid,
            sender_generation: request.sender_generation,
            verified: request.verified,
            permission,
            broadcast: request.broadcast,
        }
    }
}

/// The result the caller routes back to the reply channel.
#[derive(Debug, Default)]
pub struct CommandReply {
    pub lines: Vec<String>,
}

impl CommandReply {
    fn say(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }
}

/// Compute the permission tier of a request against a session.
pub fn permission_for(game: &Game, request: &CommandRequest) -> Permission {
    let is_owner = game
        .owner
        .as_ref()
        .map(|(name, _)| name.eq_ignore_ascii_case(&request.sender))
        .unwrap_or(false);
    if is_owner {
        if request.verified {
            Permission::VerifiedOwner
        } else {
            Permission::Owner
        }
    } else if game.owner.is_none() {
        Permission::PotentialOwner
    } else if request.verified {
        Permission::Verified
    } else {
        Permission::Unverified
    }
}

/// Run one named command against a session.
///
/// The taxonomy is fixed; unknown names produce a reply, not an error.
pub fn run(
    game: &mut Game,
    ctx: &CommandContext,
    name: &str,
    args: &str,
    now: Instant,
    reply: &mut CommandReply,
) {
    // A context may outlive its player; commands that need the sender check
    let sender_gone = ctx.sender_uid != 0
        && game
            .player_by_uid(ctx.sender_uid)
            .map(|p| p.generation != ctx.sender_generation)
            .unwrap_or(true);

    let can_admin = ctx.permission >= Permission::Owner;

    match name {
        "ping" => {
            let mut lines: Vec<String> = game
                .active_players()
                .map(|p| match p.avg_ping() {
                    Some(ms) => format!("{}: {}ms", p.name, ms),
                    None => format!("{}: ?", p.name),
                })
                .collect();
            lines.sort();
            reply.say(lines.join(", "));
        }
        "owner" => {
            if game.owner.is_none() && ctx.permission >= Permission::PotentialOwner {
                game.owner = Some((ctx.sender.clone(), String::new()));
                game.touch_owner(now);
                reply.say(format!("{} now owns this game.", ctx.sender));
            } else if let Some((owner, _)) = &game.owner {
                reply.say(format!("This game is owned by {}.", owner));
            }
        }
        "open" | "close" | "comp" | "team" | "color" | "race" | "handicap" | "swap" => {
            if !can_admin {
                reply.say("You are not the owner of this game.");
                return;
            }
            slot_command(game, name, args, reply);
            if reply.lines.is_empty() {
                game.send_slot_snapshot(now);
            }
        }
        "sp" | "shuffle" => {
            if !can_admin {
                reply.say("You are not the owner of this game.");
                return;
            }
            match game.slots.shuffle() {
                Ok(()) => {
                    game.send_slot_snapshot(now);
                    game.announce("Players shuffled.");
                }
                Err(err) => reply.say(err.describe()),
            }
        }
        "layout" => {
            if !can_admin {
                reply.say("You are not the owner of this game.");
                return;
            }
            let preset = match parse_layout(args) {
                Some(preset) => preset,
                None => {
                    reply.say("Usage: layout <any|1va N|hva|ffa|compact|draft|iso>");
                    return;
                }
            };
            match game.slots.layout(&preset) {
                Ok(()) => game.send_slot_snapshot(now),
                Err(err) => reply.say(err.describe()),
            }
        }
        "start" => {
            if !can_admin {
                reply.say("You are not the owner of this game.");
                return;
            }
            let force = args.trim() == "force";
            if let Err(err) = game.try_start(force, now) {
                reply.say(err);
            }
        }
        "abort" | "a" => {
            if !can_admin {
                reply.say("You are not the owner of this game.");
                return;
            }
            if !game.abort_countdown() {
                reply.say("No countdown to abort.");
            }
        }
        "kick" => {
            if !can_admin {
                reply.say("You are not the owner of this game.");
                return;
            }
            match game.player_by_name(args).map(|p| p.uid) {
                Some(uid) => {
                    let reason = if game.state == GameState::Lobby {
                        LeaveReason::Lobby
                    } else {
                        LeaveReason::Disconnect
                    };
                    game.mark_leaving(uid, reason, "was kicked by the owner", now);
                }
                None => reply.say(format!("No player named [{}].", args)),
            }
        }
        "mute" => {
            if !can_admin {
                reply.say("You are not the owner of this game.");
                return;
            }
            set_muted(game, args, true, reply);
        }
        "unmute" => {
            if !can_admin {
                reply.say("You are not the owner of this game.");
                return;
            }
            set_muted(game, args, false, reply);
        }
        "muteall" => {
            if !can_admin {
                reply.say("You are not the owner of this game.");
                return;
            }
            game.mute_all = true;
            game.announce("Global chat muted.");
        }
        "unmuteall" => {
            if !can_admin {
                reply.say("You are not the owner of this game.");
                return;
            }
            game.mute_all = false;
            game.announce("Global chat unmuted.");
        }
        "lock" => {
            if !can_admin {
                reply.say("You are not the owner of this game.");
                return;
            }
            game.locked = true;
            game.announce("Game locked, only the owner may join or change settings.");
        }
        "unlock" => {
            if !can_admin {
                reply.say("You are not the owner of this game.");
                return;
            }
            game.locked = false;
            game.announce("Game unlocked.");
        }
        "hcl" => {
            if !can_admin {
                reply.say("You are not the owner of this game.");
                return;
            }
            game.hcl = args.trim().to_owned();
            reply.say(format!("HCL string set to [{}].", game.hcl));
        }
        "reserve" => {
            if !can_admin {
                reply.say("You are not the owner of this game.");
                return;
            }
            let lower = args.trim().to_lowercase();
            if lower.is_empty() {
                reply.say("Usage: reserve <name>");
            } else if !game.reserved.contains(&lower) {
                game.reserved.push(lower);
                reply.say(format!("Reserved a slot for [{}].", args.trim()));
            }
        }
        "unreserve" => {
            if !can_admin {
                reply.say("You are not the owner of this game.");
                return;
            }
            let lower = args.trim().to_lowercase();
            game.reserved.retain(|n| n != &lower);
        }
        "ban" => {
            if !can_admin {
                reply.say("You are not the owner of this game.");
                return;
            }
            let lower = args.trim().to_lowercase();
            if lower.is_empty() {
                reply.say("Usage: ban <name>");
                return;
            }
            if !game.session_bans.contains(&lower) {
                game.session_bans.push(lower);
            }
            if let Some(uid) = game.player_by_name(args.trim()).map(|p| p.uid) {
                game.mark_leaving(uid, LeaveReason::Lobby, "was banned from this game", now);
            }
            reply.say(format!("[{}] is banned from this game.", args.trim()));
        }
        "pin" => {
            if sender_gone {
                reply.say("You are no longer in this game.");
                return;
            }
            if args.trim().is_empty() {
                reply.say("Usage: pin <message>");
            } else {
                game.pinned_messages
                    .push((ctx.sender.clone(), args.trim().to_owned()));
                reply.say("Message pinned for future joiners.");
            }
        }
        "unpin" => {
            let before = game.pinned_messages.len();
            game.pinned_messages.retain(|(from, _)| from != &ctx.sender);
            if game.pinned_messages.len() < before {
                reply.say("Your pinned messages were removed.");
            }
        }
        "end" => {
            if ctx.permission < Permission::Admin && !can_admin {
                reply.say("You are not the owner of this game.");
                return;
            }
            game.announce("The game is being ended by the operator.");
            game.arm_gameover(now, "operator command");
        }
        "save" => {
            if !can_admin {
                reply.say("You are not the owner of this game.");
                return;
            }
            game.inject_save();
        }
        _ => {
            reply.say(format!("Unknown command [{}].", name));
        }
    }
}

/// Slot-table commands that take `<sid> [extra]` arguments.
fn slot_command(game: &mut Game, name: &str, args: &str, reply: &mut CommandReply) {
    let mut parts = args.split_whitespace();
    let Some(sid) = parts.next().and_then(|s| s.parse::<u8>().ok()) else {
        reply.say(format!("Usage: {} <slot> [value]", name));
        return;
    };
    // Operators count slots from one
    let sid = sid.saturating_sub(1);
    let extra = parts.next();

    let result = match name {
        "open" => {
            if let Some(uid) = game.slots.get(sid).map(|s| s.uid).filter(|&u| u != 0) {
                reply.say(format!(
                    "Slot {} is taken by a player, kick [{}] instead.",
                    sid + 1,
                    game.player_by_uid(uid)
                        .map(|p| p.name.as_str())
                        .unwrap_or("?")
                ));
                return;
            }
            game.slots.open(sid)
        }
        "close" => {
            if let Some(uid) = game.slots.get(sid).map(|s| s.uid).filter(|&u| u != 0) {
                if game.player_by_uid(uid).is_some() {
                    reply.say(format!("Slot {} is taken by a player.", sid + 1));
                    return;
                }
            }
            game.slots.close(sid)
        }
        "comp" => {
            let difficulty = match extra {
                Some("easy") => CompDifficulty::Easy,
                Some("hard") => CompDifficulty::Hard,
                _ => CompDifficulty::Normal,
            };
            game.slots.set_computer(sid, difficulty)
        }
        "team" => match extra.and_then(|v| v.parse::<u8>().ok()) {
            Some(team) => game.slots.set_team(sid, team.saturating_sub(1)),
            None => Err(SlotError::OutOfRange),
        },
        "color" => match extra.and_then(|v| v.parse::<u8>().ok()) {
            Some(color) => game.slots.set_color(sid, color.saturating_sub(1)),
            None => Err(SlotError::OutOfRange),
        },
        "race" => {
            let race = match extra {
                Some("human") => crate::slot::RACE_HUMAN,
                Some("orc") => crate::slot::RACE_ORC,
                Some("undead") => crate::slot::RACE_UNDEAD,
                Some("elf") | Some("nightelf") => crate::slot::RACE_NIGHTELF,
                Some("random") => crate::slot::RACE_RANDOM,
                _ => {
                    reply.say("Usage: race <slot> <human|orc|undead|elf|random>");
                    return;
                }
            };
            game.slots.set_race(sid, race)
        }
        "handicap" => match extra.and_then(|v| v.parse::<u8>().ok()) {
            Some(handicap) => game.slots.set_handicap(sid, handicap),
            None => Err(SlotError::OutOfRange),
        },
        "swap" => match extra.and_then(|v| v.parse::<u8>().ok()) {
            Some(other) => game.slots.swap(sid, other.saturating_sub(1)),
            None => Err(SlotError::OutOfRange),
        },
        _ => unreachable!("slot_command called with unknown name"),
    };

    if let Err(err) = result {
        reply.say(err.describe());
    }
}

fn set_muted(game: &mut Game, args: &str, muted: bool, reply: &mut CommandReply) {
    match game.player_by_name(args.trim()).map(|p| p.uid) {
        Some(uid) => {
            if let Some(player) = game.player_by_uid_mut(uid) {
                player.muted = muted;
            }
            let verb = if muted { "muted" } else { "unmuted" };
            game.announce(&format!("{} was {}.", args.trim(), verb));
        }
        None => reply.say(format!("No player named [{}].", args.trim())),
    }
}

fn parse_layout(args: &str) -> Option<LayoutPreset> {
    let mut parts = args.split_whitespace();
    match parts.next()? {
        "any" => Some(LayoutPreset::Any),
        "1va" | "onevsall" => {
            let seat = parts.next()?.parse::<u8>().ok()?.saturating_sub(1);
            Some(LayoutPreset::OneVsAll { seat })
        }
        "hva" | "humansvsai" => Some(LayoutPreset::HumansVsAi),
        "ffa" => Some(LayoutPreset::FreeForAll),
        "compact" => Some(LayoutPreset::Compact),
        "draft" => Some(LayoutPreset::Draft),
        "iso" => Some(LayoutPreset::IsoPlayers),
        _ => None,
    }
}
