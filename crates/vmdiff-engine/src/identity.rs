//! Owner and group name resolution from the guest's passwd/group files

use std::collections::BTreeMap;
use tracing::debug;
use vmdiff_core::GuestSession;

pub const PASSWD_PATH: &str = "/etc/passwd";
pub const GROUP_PATH: &str = "/etc/group";

/// Parse colon-delimited `name:x:id:...` lines into `id -> name`
///
/// Blank lines, `#` comments, lines with fewer than three fields and lines
/// with a non-numeric or out-of-range id are skipped. A later duplicate id
/// replaces an earlier one.
pub fn parse_id_file(text: &str) -> BTreeMap<u32, String> {
    let mut ids = BTreeMap::new();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 3 {
            debug!("skipping short identity line: {:?}", line);
            continue;
        }

        match fields[2].trim().parse::<i64>().ok().and_then(owner_id) {
            Some(id) => {
                ids.insert(id, fields[0].to_string());
            }
            None => debug!("skipping identity line with bad id: {:?}", line),
        }
    }

    ids
}

/// Map a parsed id onto the 32-bit owner id space stat reports
///
/// Negative ids such as `-2` are stored by the kernel as their 32-bit
/// two's complement (`4294967294`).
fn owner_id(id: i64) -> Option<u32> {
    u32::try_from(id)
        .ok()
        .or_else(|| i32::try_from(id).ok().map(|id| id as u32))
}

/// Snapshot of `uid -> user` and `gid -> group`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityMap {
    users: BTreeMap<u32, String>,
    groups: BTreeMap<u32, String>,
}

impl IdentityMap {
    pub fn new(users: BTreeMap<u32, String>, groups: BTreeMap<u32, String>) -> Self {
        Self { users, groups }
    }

    pub fn from_text(passwd: &str, group: &str) -> Self {
        Self::new(parse_id_file(passwd), parse_id_file(group))
    }

    /// Read `/etc/passwd` and `/etc/group` from a mounted session
    ///
    /// A file that cannot be read contributes nothing.
    pub fn load(guest: &mut dyn GuestSession) -> Self {
        Self::new(read_ids(guest, PASSWD_PATH), read_ids(guest, GROUP_PATH))
    }

    pub fn users(&self) -> &BTreeMap<u32, String> {
        &self.users
    }

    pub fn groups(&self) -> &BTreeMap<u32, String> {
        &self.groups
    }

    /// User name for a uid, or `uid_<n>` when unknown
    pub fn user_name(&self, uid: u32) -> String {
        self.users
            .get(&uid)
            .cloned()
            .unwrap_or_else(|| format!("uid_{}", uid))
    }

    /// Group name for a gid, or `gid_<n>` when unknown
    pub fn group_name(&self, gid: u32) -> String {
        self.groups
            .get(&gid)
            .cloned()
            .unwrap_or_else(|| format!("gid_{}", gid))
    }
}

fn read_ids(guest: &mut dyn GuestSession, path: &str) -> BTreeMap<u32, String> {
    match guest.read_file(path) {
        Ok(bytes) => parse_id_file(&String::from_utf8_lossy(&bytes)),
        Err(e) => {
            debug!("no identities from {}: {}", path, e);
            BTreeMap::new()
        }
    }
}
