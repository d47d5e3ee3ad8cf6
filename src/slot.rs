use rand::seq::SliceRandom;

/// Observer team/color sentinel for clients before 1.29.
pub const OBSERVER_SENTINEL_LEGACY: u8 = 12;

/// Observer team/color sentinel for clients from 1.29 on.
pub const OBSERVER_SENTINEL_EXPANDED: u8 = 24;

/// UID value meaning "no user".
pub const UID_NONE: u8 = 0;

pub const RACE_HUMAN: u8 = 0x01;
pub const RACE_ORC: u8 = 0x02;
pub const RACE_NIGHTELF: u8 = 0x04;
pub const RACE_UNDEAD: u8 = 0x08;
pub const RACE_RANDOM: u8 = 0x20;
pub const RACE_SELECTABLE: u8 = 0x40;

/// Handicap values the game client accepts.
pub const VALID_HANDICAPS: [u8; 6] = [50, 60, 70, 80, 90, 100];

/// Character alphabet the HCL string may use.
const HCL_CHARS: &str = "abcdefghijklmnopqrstuvwxyz0123456789 -=,.";

/// Map-declared slot kind.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SlotType {
    User,
    Computer,
    Neutral,
    Rescuable,
    None,
}

/// Occupancy state of a slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SlotStatus {
    Open,
    Closed,
    Occupied,
}

impl SlotStatus {
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Closed => 1,
            Self::Occupied => 2,
        }
    }
}

/// Computer opponent difficulty.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CompDifficulty {
    Easy,
    Normal,
    Hard,
}

impl CompDifficulty {
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Easy => 0,
            Self::Normal => 1,
            Self::Hard => 2,
        }
    }
}

/// Role to find a slot for.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SlotRole {
    Player,
    Observer,
    Any,
}

/// One seat in the game.
#[derive(Debug, Clone)]
pub struct Slot {
    pub slot_type: SlotType,
    pub uid: u8,
    pub download_progress: u8,
    pub status: SlotStatus,
    pub is_computer: bool,
    pub team: u8,
    pub color: u8,
    pub race: u8,
    pub difficulty: CompDifficulty,
    pub handicap: u8,
}

impl Slot {
    /// An open user slot on the given team with the given color.
    pub fn open(team: u8, color: u8, race: u8) -> Self {
        Self {
            slot_type: SlotType::User,
            uid: UID_NONE,
            download_progress: 255,
            status: SlotStatus::Open,
            is_computer: false,
            team,
            color,
            race,
            difficulty: CompDifficulty::Normal,
            handicap: 100,
        }
    }

    /// Whether the slot holds a controller (user or computer) that plays.
    pub fn is_controller(&self, observer_sentinel: u8) -> bool {
        self.status == SlotStatus::Occupied && self.team != observer_sentinel
    }

    /// Whether the slot holds an observer.
    pub fn is_observer(&self, observer_sentinel: u8) -> bool {
        self.status == SlotStatus::Occupied && self.team == observer_sentinel
    }
}

/// Reason a slot mutation was refused.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SlotError {
    /// The map declares fixed player settings, nothing may change.
    FixedSettings,

    /// The map declares custom forces, team membership is bound to slots.
    CustomForces,

    /// The change would give two controllers the same color.
    DuplicateColor,

    /// The change would remove the last controller from the game.
    LastController,

    /// Slot index out of range.
    OutOfRange,

    /// The target is the host-to-map communication slot.
    MapCommunicationSlot,
}

impl SlotError {
    /// Operator-facing description.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::FixedSettings => "the map uses fixed player settings",
            Self::CustomForces => "the map uses custom forces",
            Self::DuplicateColor => "that color is already taken",
            Self::LastController => "that would leave the game without players",
            Self::OutOfRange => "no such slot",
            Self::MapCommunicationSlot => "that slot is reserved by the map",
        }
    }
}

/// Requested lobby layout.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LayoutPreset {
    /// Map defaults, no constraint.
    Any,

    /// One chosen seat against everyone else.
    OneVsAll { seat: u8 },

    /// Humans on one side, computers on the other.
    HumansVsAi,

    /// Every controller in a team of their own.
    FreeForAll,

    /// Pack controllers so the largest current team size caps all teams.
    Compact,

    /// Everyone starts observing, captains pick.
    Draft,

    /// Two equal teams where possible.
    IsoPlayers,
}

/// The authoritative seating chart of a game.
///
/// Every mutation either succeeds and marks the table dirty, or fails with a
/// [`SlotError`] leaving the table untouched.
#[derive(Debug, Clone)]
pub struct SlotTable {
    slots: Vec<Slot>,
    observer_sentinel: u8,
    num_teams: u8,
    fixed_settings: bool,
    custom_forces: bool,
    observers_allowed: bool,
    map_comm_sid: Option<u8>,
    dirty: bool,
}

impl SlotTable {
    pub fn new(
        slots: Vec<Slot>,
        observer_sentinel: u8,
        num_teams: u8,
        fixed_settings: bool,
        custom_forces: bool,
        observers_allowed: bool,
        map_comm_sid: Option<u8>,
    ) -> Self {
        Self {
            slots,
            observer_sentinel,
            num_teams,
            fixed_settings,
            custom_forces,
            observers_allowed,
            map_comm_sid,
            dirty: false,
        }
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn observer_sentinel(&self) -> u8 {
        self.observer_sentinel
    }

    pub fn custom_forces(&self) -> bool {
        self.custom_forces
    }

    /// Whether a snapshot must be sent to clients.
    pub fn dirty(&self) -> bool {
        self.dirty
    }

    /// Mark the pending snapshot as sent.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn get(&self, sid: u8) -> Option<&Slot> {
        self.slots.get(sid as usize)
    }

    /// Slot index holding the given UID.
    pub fn sid_of_uid(&self, uid: u8) -> Option<u8> {
        if uid == UID_NONE {
            return None;
        }
        self.slots
            .iter()
            .position(|s| s.status == SlotStatus::Occupied && s.uid == uid)
            .map(|i| i as u8)
    }

    /// Number of occupied slots.
    pub fn occupied(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.status == SlotStatus::Occupied)
            .count()
    }

    /// Number of open slots.
    pub fn open_slots(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.status == SlotStatus::Open)
            .count()
    }

    /// Number of occupied controller (non-observer) slots.
    pub fn controllers(&self) -> usize {
        let ob = self.observer_sentinel;
        self.slots.iter().filter(|s| s.is_controller(ob)).count()
    }

    /// Distinct teams with at least one controller.
    pub fn teams_represented(&self) -> usize {
        let ob = self.observer_sentinel;
        let mut teams: Vec<u8> = self
            .slots
            .iter()
            .filter(|s| s.is_controller(ob))
            .map(|s| s.team)
            .collect();
        teams.sort_unstable();
        teams.dedup();
        teams.len()
    }

    /// Find an empty slot for the given role.
    ///
    /// Observer slots sit at the observer sentinel team; player slots do not.
    pub fn find_empty_slot(&self, role: SlotRole) -> Option<u8> {
        let ob = self.observer_sentinel;
        self.slots
            .iter()
            .position(|s| {
                s.status == SlotStatus::Open
                    && match role {
                        SlotRole::Player => s.team != ob,
                        SlotRole::Observer => s.team == ob,
                        SlotRole::Any => true,
                    }
            })
            .map(|i| i as u8)
    }

    fn check_sid(&self, sid: u8) -> Result<usize, SlotError> {
        let i = sid as usize;
        if i >= self.slots.len() {
            return Err(SlotError::OutOfRange);
        }
        Ok(i)
    }

    /// A color not used by any controller slot.
    fn free_color(&self) -> Option<u8> {
        (0..self.observer_sentinel).find(|c| {
            !self
                .slots
                .iter()
                .any(|s| s.team != self.observer_sentinel && s.color == *c)
        })
    }

    /// Open a closed or occupied slot.
    pub fn open(&mut self, sid: u8) -> Result<(), SlotError> {
        let i = self.check_sid(sid)?;
        if self.fixed_settings {
            return Err(SlotError::FixedSettings);
        }
        let slot = &mut self.slots[i];
        slot.status = SlotStatus::Open;
        slot.uid = UID_NONE;
        slot.is_computer = false;
        slot.download_progress = 255;
        self.dirty = true;
        Ok(())
    }

    /// Close an open slot. Closing an already closed slot fails.
    pub fn close(&mut self, sid: u8) -> Result<(), SlotError> {
        let i = self.check_sid(sid)?;
        if self.fixed_settings {
            return Err(SlotError::FixedSettings);
        }
        if self.slots[i].status == SlotStatus::Closed {
            return Err(SlotError::OutOfRange);
        }
        let slot = &mut self.slots[i];
        slot.status = SlotStatus::Closed;
        slot.uid = UID_NONE;
        slot.is_computer = false;
        self.dirty = true;
        Ok(())
    }

    /// Seat a computer in the slot.
    pub fn set_computer(&mut self, sid: u8, difficulty: CompDifficulty) -> Result<(), SlotError> {
        let i = self.check_sid(sid)?;
        if self.fixed_settings {
            return Err(SlotError::FixedSettings);
        }
        if self.slots[i].team == self.observer_sentinel {
            // Computers never observe
            return Err(SlotError::CustomForces);
        }
        let slot = &mut self.slots[i];
        slot.status = SlotStatus::Occupied;
        slot.uid = UID_NONE;
        slot.is_computer = true;
        slot.difficulty = difficulty;
        slot.download_progress = 100;
        self.dirty = true;
        Ok(())
    }

    /// Swap the occupants of two slots.
    ///
    /// With custom forces only occupancy moves; team, color and race stay
    /// bound to the seat.
    pub fn swap(&mut self, a: u8, b: u8) -> Result<(), SlotError> {
        let ia = self.check_sid(a)?;
        let ib = self.check_sid(b)?;
        if self.fixed_settings {
            return Err(SlotError::FixedSettings);
        }
        if self.map_comm_sid == Some(a) || self.map_comm_sid == Some(b) {
            return Err(SlotError::MapCommunicationSlot);
        }
        if ia == ib {
            return Ok(());
        }
        if self.custom_forces {
            // Seat-bound settings stay, the occupant moves
            let (sa, sb) = (self.slots[ia].clone(), self.slots[ib].clone());
            let moved = |dst: &mut Slot, src: &Slot| {
                dst.uid = src.uid;
                dst.status = src.status;
                dst.is_computer = src.is_computer;
                dst.difficulty = src.difficulty;
                dst.download_progress = src.download_progress;
            };
            moved(&mut self.slots[ia], &sb);
            moved(&mut self.slots[ib], &sa);
        } else {
            self.slots.swap(ia, ib);
        }
        self.dirty = true;
        Ok(())
    }

    /// Move a slot to another team.
    pub fn set_team(&mut self, sid: u8, team: u8) -> Result<(), SlotError> {
        let i = self.check_sid(sid)?;
        if self.fixed_settings {
            return Err(SlotError::FixedSettings);
        }
        if self.custom_forces {
            return Err(SlotError::CustomForces);
        }
        if team == self.observer_sentinel && !self.observers_allowed {
            return Err(SlotError::OutOfRange);
        }
        if team > self.observer_sentinel || (team >= self.num_teams && team != self.observer_sentinel)
        {
            return Err(SlotError::OutOfRange);
        }
        let was_controller = self.slots[i].team != self.observer_sentinel;
        if was_controller
            && team == self.observer_sentinel
            && self.controllers() <= 1
            && self.slots[i].status == SlotStatus::Occupied
        {
            return Err(SlotError::LastController);
        }
        if team == self.observer_sentinel {
            // Observers mirror the sentinel in team and color
            self.slots[i].team = team;
            self.slots[i].color = self.observer_sentinel;
        } else {
            if self.slots[i].team == self.observer_sentinel {
                // Coming back from the observer bench needs a fresh color
                let color = self.free_color().ok_or(SlotError::DuplicateColor)?;
                self.slots[i].color = color;
            }
            self.slots[i].team = team;
        }
        self.dirty = true;
        Ok(())
    }

    /// Recolor a controller slot.
    pub fn set_color(&mut self, sid: u8, color: u8) -> Result<(), SlotError> {
        let i = self.check_sid(sid)?;
        if self.fixed_settings {
            return Err(SlotError::FixedSettings);
        }
        if color >= self.observer_sentinel {
            return Err(SlotError::OutOfRange);
        }
        if self.slots[i].team == self.observer_sentinel {
            return Err(SlotError::CustomForces);
        }
        let taken = self
            .slots
            .iter()
            .enumerate()
            .any(|(j, s)| j != i && s.team != self.observer_sentinel && s.color == color);
        if taken {
            return Err(SlotError::DuplicateColor);
        }
        self.slots[i].color = color;
        self.dirty = true;
        Ok(())
    }

    /// Change the race of a slot.
    pub fn set_race(&mut self, sid: u8, race: u8) -> Result<(), SlotError> {
        let i = self.check_sid(sid)?;
        if self.fixed_settings {
            return Err(SlotError::FixedSettings);
        }
        if self.slots[i].race & RACE_SELECTABLE == 0 {
            return Err(SlotError::FixedSettings);
        }
        self.slots[i].race = race | RACE_SELECTABLE;
        self.dirty = true;
        Ok(())
    }

    /// Change the handicap of a slot.
    pub fn set_handicap(&mut self, sid: u8, handicap: u8) -> Result<(), SlotError> {
        let i = self.check_sid(sid)?;
        if self.fixed_settings {
            return Err(SlotError::FixedSettings);
        }
        if !VALID_HANDICAPS.contains(&handicap) {
            return Err(SlotError::OutOfRange);
        }
        self.slots[i].handicap = handicap;
        self.dirty = true;
        Ok(())
    }

    /// Seat a user in an open slot.
    pub fn occupy(&mut self, sid: u8, uid: u8) -> Result<(), SlotError> {
        let i = self.check_sid(sid)?;
        if self.slots[i].status != SlotStatus::Open {
            return Err(SlotError::OutOfRange);
        }
        let slot = &mut self.slots[i];
        slot.status = SlotStatus::Occupied;
        slot.uid = uid;
        slot.is_computer = false;
        slot.download_progress = 255;
        self.dirty = true;
        Ok(())
    }

    /// Vacate a slot back to open.
    pub fn vacate(&mut self, sid: u8) -> Result<(), SlotError> {
        let i = self.check_sid(sid)?;
        if self.slots[i].status != SlotStatus::Occupied {
            return Err(SlotError::OutOfRange);
        }
        let slot = &mut self.slots[i];
        slot.status = SlotStatus::Open;
        slot.uid = UID_NONE;
        slot.is_computer = false;
        slot.download_progress = 255;
        self.dirty = true;
        Ok(())
    }

    /// Record download progress without full invariant churn.
    pub fn set_download_progress(&mut self, sid: u8, progress: u8) -> Result<(), SlotError> {
        let i = self.check_sid(sid)?;
        if self.slots[i].download_progress != progress {
            self.slots[i].download_progress = progress;
            self.dirty = true;
        }
        Ok(())
    }

    /// Randomly permute the occupants of controller slots.
    pub fn shuffle(&mut self) -> Result<(), SlotError> {
        if self.fixed_settings {
            return Err(SlotError::FixedSettings);
        }
        let ob = self.observer_sentinel;
        let sids: Vec<u8> = (0..self.slots.len() as u8)
            .filter(|&sid| {
                self.slots[sid as usize].is_controller(ob) && self.map_comm_sid != Some(sid)
            })
            .collect();
        let mut shuffled = sids.clone();
        shuffled.shuffle(&mut rand::thread_rng());
        // Walk a derangement of pairs; each swap keeps the invariants because
        // swap() itself is invariant-preserving
        for (from, to) in sids.iter().zip(shuffled.iter()) {
            if from != to {
                self.swap(*from, *to)?;
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// Apply a layout preset.
    ///
    /// On maps without custom forces this reassigns teams in place; with
    /// custom forces it reduces to swaps, since team membership is fixed to
    /// the seat.
    pub fn layout(&mut self, preset: &LayoutPreset) -> Result<(), SlotError> {
        if self.fixed_settings {
            return Err(SlotError::FixedSettings);
        }
        let ob = self.observer_sentinel;
        let controllers: Vec<u8> = (0..self.slots.len() as u8)
            .filter(|&sid| self.slots[sid as usize].is_controller(ob))
            .collect();
        if controllers.is_empty() {
            return Err(SlotError::LastController);
        }

        match preset {
            LayoutPreset::Any => Ok(()),
            LayoutPreset::OneVsAll { seat } => {
                self.check_sid(*seat)?;
                if !self.slots[*seat as usize].is_controller(ob) {
                    return Err(SlotError::OutOfRange);
                }
                if self.num_teams < 2 {
                    return Err(SlotError::CustomForces);
                }
                self.assign_teams(&controllers, |sid, _| if sid == *seat { 0 } else { 1 })
            }
            LayoutPreset::HumansVsAi => {
                if self.num_teams < 2 {
                    return Err(SlotError::CustomForces);
                }
                let computers: Vec<u8> = controllers
                    .iter()
                    .copied()
                    .filter(|&sid| self.slots[sid as usize].is_computer)
                    .collect();
                self.assign_teams(&controllers, |sid, _| {
                    if computers.contains(&sid) {
                        1
                    } else {
                        0
                    }
                })
            }
            LayoutPreset::FreeForAll => {
                if (self.num_teams as usize) < controllers.len() {
                    return Err(SlotError::CustomForces);
                }
                self.assign_teams(&controllers, |_, nth| nth as u8)
            }
            LayoutPreset::Compact => {
                let cap = self.largest_team_size().max(1);
                self.assign_teams(&controllers, |_, nth| (nth / cap) as u8)
            }
            LayoutPreset::Draft => {
                if !self.observers_allowed {
                    return Err(SlotError::OutOfRange);
                }
                // Everyone to the bench; captains redistribute via commands
                for sid in controllers {
                    if self.controllers() > 1 {
                        self.set_team(sid, ob)?;
                    }
                }
                Ok(())
            }
            LayoutPreset::IsoPlayers => {
                if self.num_teams < 2 {
                    return Err(SlotError::CustomForces);
                }
                let half = controllers.len().div_ceil(2);
                self.assign_teams(&controllers, |_, nth| if nth < half { 0 } else { 1 })
            }
        }
    }

    fn largest_team_size(&self) -> usize {
        let ob = self.observer_sentinel;
        (0..self.num_teams)
            .map(|t| {
                self.slots
                    .iter()
                    .filter(|s| s.is_controller(ob) && s.team == t)
                    .count()
            })
            .max()
            .unwrap_or(0)
    }

    /// Drive controllers into computed teams.
    ///
    /// `target` maps (sid, position-in-list) to a team. With custom forces
    /// this finds a seat on the target team to swap into instead.
    fn assign_teams<F>(&mut self, controllers: &[u8], target: F) -> Result<(), SlotError>
    where
        F: Fn(u8, usize) -> u8,
    {
        if self.custom_forces {
            for (nth, &sid) in controllers.iter().enumerate() {
                let want = target(sid, nth);
                if self.slots[sid as usize].team == want {
                    continue;
                }
                // Find a free seat whose fixed team matches
                let dst = (0..self.slots.len() as u8).find(|&cand| {
                    self.slots[cand as usize].team == want
                        && self.slots[cand as usize].status == SlotStatus::Open
                        && self.map_comm_sid != Some(cand)
                });
                match dst {
                    Some(dst) => self.swap(sid, dst)?,
                    None => return Err(SlotError::CustomForces),
                }
            }
        } else {
            for (nth, &sid) in controllers.iter().enumerate() {
                self.set_team(sid, target(sid, nth))?;
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// Encode the HCL string into the handicaps of occupied slots.
    ///
    /// The map decodes the invalid handicap values after load and restores
    /// the originals. Returns false when the string does not fit or holds a
    /// character outside the allowed alphabet.
    pub fn encode_hcl(&mut self, hcl: &str) -> bool {
        if hcl.is_empty() {
            return true;
        }
        if hcl.len() > self.occupied() {
            return false;
        }
        if hcl.chars().any(|c| !HCL_CHARS.contains(c)) {
            return false;
        }

        // Encoding table over all values except the seven forbidden ones
        let mut encoding = [0u8; 256];
        let mut j: u8 = 0;
        for slot in encoding.iter_mut() {
            if j == 0 || (j >= 50 && j <= 100 && j % 10 == 0) {
                j += 1;
            }
            *slot = j;
            j = j.wrapping_add(1);
        }

        let mut sid = 0usize;
        for c in hcl.chars() {
            while self.slots[sid].status != SlotStatus::Occupied {
                sid += 1;
            }
            let handicap_index = (self.slots[sid].handicap - 50) / 10;
            let char_index = HCL_CHARS.find(c).unwrap() as u8;
            self.slots[sid].handicap = encoding[(handicap_index + char_index * 6) as usize];
            sid += 1;
        }
        self.dirty = true;
        true
    }
}

/// Build a default melee slot table for the given slot count.
pub fn melee_table(num_slots: u8, observer_sentinel: u8, observers: bool) -> SlotTable {
    let mut slots: Vec<Slot> = (0..num_slots)
        .map(|i| Slot::open(i % 2, i, RACE_RANDOM | RACE_SELECTABLE))
        .collect();
    if observers {
        for _ in 0..2 {
            let mut s = Slot::open(observer_sentinel, observer_sentinel, RACE_RANDOM);
            s.slot_type = SlotType::User;
            slots.push(s);
        }
    }
    SlotTable::new(slots, observer_sentinel, 2, false, false, observers, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SlotTable {
        melee_table(4, OBSERVER_SENTINEL_LEGACY, true)
    }

    fn assert_colors_distinct(t: &SlotTable) {
        let ob = t.observer_sentinel();
        let mut colors: Vec<u8> = t
            .slots()
            .iter()
            .filter(|s| s.status == SlotStatus::Occupied && s.team != ob)
            .map(|s| s.color)
            .collect();
        let before = colors.len();
        colors.sort_unstable();
        colors.dedup();
        assert_eq!(before, colors.len(), "controller colors must be distinct");
    }

    #[test]
    fn occupy_and_vacate() {
        let mut t = table();
        t.occupy(0, 1).unwrap();
        assert_eq!(t.sid_of_uid(1), Some(0));
        assert_eq!(t.occupied(), 1);
        assert!(t.dirty());
        t.clear_dirty();
        t.vacate(0).unwrap();
        assert_eq!(t.sid_of_uid(1), None);
        assert!(t.dirty());
    }

    #[test]
    fn uid_unique_per_slot() {
        let mut t = table();
        t.occupy(0, 1).unwrap();
        t.occupy(1, 2).unwrap();
        assert_eq!(t.sid_of_uid(1), Some(0));
        assert_eq!(t.sid_of_uid(2), Some(1));
        // No open or closed slot may hold a UID
        for s in t.slots() {
            if s.status != SlotStatus::Occupied {
                assert_eq!(s.uid, UID_NONE);
            }
        }
    }

    #[test]
    fn close_twice_fails_without_mutation() {
        let mut t = table();
        t.close(0).unwrap();
        t.clear_dirty();
        assert_eq!(t.close(0), Err(SlotError::OutOfRange));
        assert!(!t.dirty(), "failed mutation must not dirty the table");
    }

    #[test]
    fn duplicate_color_rejected() {
        let mut t = table();
        t.occupy(0, 1).unwrap();
        t.occupy(1, 2).unwrap();
        let taken = t.slots()[0].color;
        assert_eq!(t.set_color(1, taken), Err(SlotError::DuplicateColor));
        assert_colors_distinct(&t);
    }

    #[test]
    fn fixed_settings_lock_everything() {
        let slots = vec![Slot::open(0, 0, RACE_HUMAN), Slot::open(1, 1, RACE_ORC)];
        let mut t = SlotTable::new(slots, OBSERVER_SENTINEL_LEGACY, 2, true, true, false, None);
        assert_eq!(t.open(0), Err(SlotError::FixedSettings));
        assert_eq!(t.set_team(0, 1), Err(SlotError::FixedSettings));
        assert_eq!(t.set_color(0, 3), Err(SlotError::FixedSettings));
        assert_eq!(t.set_handicap(0, 50), Err(SlotError::FixedSettings));
    }

    #[test]
    fn custom_forces_keep_seat_teams_on_swap() {
        let mut slots = vec![Slot::open(0, 0, RACE_HUMAN), Slot::open(1, 1, RACE_ORC)];
        slots[0].status = SlotStatus::Occupied;
        slots[0].uid = 7;
        let mut t = SlotTable::new(slots, OBSERVER_SENTINEL_LEGACY, 2, false, true, false, None);
        t.swap(0, 1).unwrap();
        // Occupant moved, seat team stayed
        assert_eq!(t.slots()[1].uid, 7);
        assert_eq!(t.slots()[0].team, 0);
        assert_eq!(t.slots()[1].team, 1);
        assert_eq!(t.set_team(1, 0), Err(SlotError::CustomForces));
    }

    #[test]
    fn observer_mirrors_sentinel_color() {
        let mut t = table();
        t.occupy(0, 1).unwrap();
        t.occupy(1, 2).unwrap();
        t.set_team(0, OBSERVER_SENTINEL_LEGACY).unwrap();
        let s = &t.slots()[0];
        assert_eq!(s.team, OBSERVER_SENTINEL_LEGACY);
        assert_eq!(s.color, OBSERVER_SENTINEL_LEGACY);
    }

    #[test]
    fn last_controller_cannot_observe() {
        let mut t = table();
        t.occupy(0, 1).unwrap();
        assert_eq!(
            t.set_team(0, OBSERVER_SENTINEL_LEGACY),
            Err(SlotError::LastController)
        );
    }

    #[test]
    fn map_comm_slot_cannot_be_swapped() {
        let slots = vec![Slot::open(0, 0, RACE_HUMAN), Slot::open(1, 1, RACE_ORC)];
        let mut t = SlotTable::new(
            slots,
            OBSERVER_SENTINEL_LEGACY,
            2,
            false,
            false,
            false,
            Some(1),
        );
        assert_eq!(t.swap(0, 1), Err(SlotError::MapCommunicationSlot));
    }

    #[test]
    fn find_empty_slot_by_role() {
        let t = table();
        let player_sid = t.find_empty_slot(SlotRole::Player).unwrap();
        assert_ne!(t.slots()[player_sid as usize].team, t.observer_sentinel());
        let observer_sid = t.find_empty_slot(SlotRole::Observer).unwrap();
        assert_eq!(t.slots()[observer_sid as usize].team, t.observer_sentinel());
        assert_eq!(t.find_empty_slot(SlotRole::Any), Some(0));
    }

    #[test]
    fn layout_ffa_puts_everyone_apart() {
        let mut slots: Vec<Slot> = (0..4)
            .map(|i| Slot::open(0, i, RACE_RANDOM | RACE_SELECTABLE))
            .collect();
        for (i, s) in slots.iter_mut().enumerate() {
            s.status = SlotStatus::Occupied;
            s.uid = i as u8 + 1;
        }
        let mut t = SlotTable::new(slots, OBSERVER_SENTINEL_LEGACY, 4, false, false, false, None);
        t.layout(&LayoutPreset::FreeForAll).unwrap();
        assert_eq!(t.teams_represented(), 4);
    }

    #[test]
    fn layout_one_vs_all() {
        let mut slots: Vec<Slot> = (0..3)
            .map(|i| Slot::open(0, i, RACE_RANDOM | RACE_SELECTABLE))
            .collect();
        for (i, s) in slots.iter_mut().enumerate() {
            s.status = SlotStatus::Occupied;
            s.uid = i as u8 + 1;
        }
        let mut t = SlotTable::new(slots, OBSERVER_SENTINEL_LEGACY, 2, false, false, false, None);
        t.layout(&LayoutPreset::OneVsAll { seat: 1 }).unwrap();
        assert_eq!(t.slots()[1].team, 0);
        assert_eq!(t.slots()[0].team, 1);
        assert_eq!(t.slots()[2].team, 1);
    }

    #[test]
    fn layout_iso_splits_evenly() {
        let mut slots: Vec<Slot> = (0..4)
            .map(|i| Slot::open(0, i, RACE_RANDOM | RACE_SELECTABLE))
            .collect();
        for (i, s) in slots.iter_mut().enumerate() {
            s.status = SlotStatus::Occupied;
            s.uid = i as u8 + 1;
        }
        let mut t = SlotTable::new(slots, OBSERVER_SENTINEL_LEGACY, 2, false, false, false, None);
        t.layout(&LayoutPreset::IsoPlayers).unwrap();
        let team0 = t.slots().iter().filter(|s| s.team == 0).count();
        let team1 = t.slots().iter().filter(|s| s.team == 1).count();
        assert_eq!(team0, 2);
        assert_eq!(team1, 2);
    }

    #[test]
    fn shuffle_preserves_invariants() {
        let mut t = table();
        t.occupy(0, 1).unwrap();
        t.occupy(1, 2).unwrap();
        t.occupy(2, 3).unwrap();
        for _ in 0..16 {
            t.shuffle().unwrap();
            assert_colors_distinct(&t);
            assert_eq!(t.occupied(), 3);
            for uid in 1..=3 {
                assert!(t.sid_of_uid(uid).is_some());
            }
        }
    }

    #[test]
    fn hcl_fits_occupied_slots() {
        let mut t = table();
        t.occupy(0, 1).unwrap();
        t.occupy(1, 2).unwrap();
        assert!(t.encode_hcl("ap"));
        // Both handicaps moved off the valid grid
        assert!(!VALID_HANDICAPS.contains(&t.slots()[0].handicap));
        assert!(!VALID_HANDICAPS.contains(&t.slots()[1].handicap));
    }

    #[test]
    fn hcl_too_long_or_bad_chars() {
        let mut t = table();
        t.occupy(0, 1).unwrap();
        assert!(!t.encode_hcl("ab"), "one occupied slot cannot carry two chars");
        assert!(!t.encode_hcl("A"), "uppercase is outside the alphabet");
        // Nothing was touched
        assert_eq!(t.slots()[0].handicap, 100);
    }

    #[test]
    fn hcl_decodes_back() {
        // Mirror of the in-map decoder: find the table cell holding the
        // encoded value and split it into handicap and character indices
        let mut t = table();
        t.occupy(0, 1).unwrap();
        assert!(t.encode_hcl("x"));
        let encoded = t.slots()[0].handicap;
        let mut encoding = Vec::new();
        let mut j: u8 = 0;
        for _ in 0..=255u16 {
            if j == 0 || (j >= 50 && j <= 100 && j % 10 == 0) {
                j += 1;
            }
            encoding.push(j);
            j = j.wrapping_add(1);
        }
        let cell = encoding.iter().position(|&v| v == encoded).unwrap();
        assert_eq!(cell % 6, 5, "original handicap 100 has index 5");
        assert_eq!(HCL_CHARS.as_bytes()[cell / 6], b'x');
    }
}
