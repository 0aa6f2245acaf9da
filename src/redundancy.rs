//! Redundancy groups: per-group client slots with IP/port binding and A/B
//! path labels. Slot state sits behind one mutex; lookups hand out small
//! copies so audits are emitted after the lock is gone.

use crate::config::RedGroupConfig;
use std::{
    fmt,
    net::IpAddr,
    sync::Mutex,
};
use tracing::warn;

pub const MAX_CONNECTIONS_PER_GROUP: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathLetter {
    A,
    B,
}

impl PathLetter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }

    fn from_slot_order(index: usize) -> Self {
        if index == 0 {
            Self::A
        } else {
            Self::B
        }
    }
}

impl fmt::Display for PathLetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one group slot, handed out to the audit path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRef {
    pub group_index: usize,
    pub letter: PathLetter,
}

#[derive(Debug)]
struct Slot {
    ip: IpAddr,
    port: Option<u16>,
    letter: PathLetter,
    active: bool,
}

#[derive(Debug)]
struct Group {
    name: String,
    slots: Vec<Slot>,
}

#[derive(Debug, Default)]
pub struct RedundancyManager {
    groups: Mutex<Vec<Group>>,
    total_slots: usize,
}

impl RedundancyManager {
    pub fn from_config(configs: &[RedGroupConfig]) -> Self {
        let mut total_slots = 0;
        let groups = configs
            .iter()
            .map(|cfg| {
                if cfg.connections.len() > MAX_CONNECTIONS_PER_GROUP {
                    warn!(
                        group = %cfg.name,
                        configured = cfg.connections.len(),
                        "redundancy group supports at most two connections, extra slots ignored"
                    );
                }
                let slots: Vec<Slot> = cfg
                    .connections
                    .iter()
                    .take(MAX_CONNECTIONS_PER_GROUP)
                    .enumerate()
                    .map(|(i, con)| Slot {
                        ip: con.client_ip,
                        port: None,
                        letter: PathLetter::from_slot_order(i),
                        active: false,
                    })
                    .collect();
                total_slots += slots.len();
                Group {
                    name: cfg.name.clone(),
                    slots,
                }
            })
            .collect();
        Self {
            groups: Mutex::new(groups),
            total_slots,
        }
    }

    /// Sum of configured slots across all groups; the codec connection cap.
    #[inline]
    pub fn total_slots(&self) -> usize {
        self.total_slots
    }

    /// (index, configured slot count) per group, for the startup audits.
    pub fn overview(&self) -> Vec<(usize, usize)> {
        let groups = self.groups.lock().unwrap();
        groups
            .iter()
            .enumerate()
            .map(|(i, g)| (i, g.slots.len()))
            .collect()
    }

    pub fn group_name(&self, index: usize) -> Option<String> {
        let groups = self.groups.lock().unwrap();
        groups.get(index).map(|g| g.name.clone())
    }

    /// Connection admission: the peer IP must belong to a group and a slot
    /// for that IP must still be unbound.
    pub fn admit(&self, ip: IpAddr) -> bool {
        let groups = self.groups.lock().unwrap();
        groups
            .iter()
            .any(|g| g.slots.iter().any(|s| s.ip == ip && s.port.is_none()))
    }

    /// Find the slot bound to (ip, port); when none carries that port yet,
    /// bind the first free slot for the IP.
    pub fn bind_or_lookup(&self, ip: IpAddr, port: u16) -> Option<SlotRef> {
        let mut groups = self.groups.lock().unwrap();
        for (group_index, group) in groups.iter_mut().enumerate() {
            if !group.slots.iter().any(|s| s.ip == ip) {
                continue;
            }
            if let Some(slot) = group
                .slots
                .iter()
                .find(|s| s.ip == ip && s.port == Some(port))
            {
                return Some(SlotRef {
                    group_index,
                    letter: slot.letter,
                });
            }
            if let Some(slot) = group
                .slots
                .iter_mut()
                .find(|s| s.ip == ip && s.port.is_none())
            {
                slot.port = Some(port);
                return Some(SlotRef {
                    group_index,
                    letter: slot.letter,
                });
            }
            return None;
        }
        None
    }

    /// Clear a slot's binding, retaining its path letter.
    pub fn release(&self, ip: IpAddr, port: u16) -> Option<SlotRef> {
        let mut groups = self.groups.lock().unwrap();
        for (group_index, group) in groups.iter_mut().enumerate() {
            if let Some(slot) = group
                .slots
                .iter_mut()
                .find(|s| s.ip == ip && s.port == Some(port))
            {
                slot.port = None;
                slot.active = false;
                return Some(SlotRef {
                    group_index,
                    letter: slot.letter,
                });
            }
        }
        None
    }

    /// Mark a slot active or passive. Activation clears the sibling slot;
    /// at most one slot per group is active.
    pub fn set_active(&self, ip: IpAddr, port: u16, active: bool) -> Option<SlotRef> {
        let mut groups = self.groups.lock().unwrap();
        for (group_index, group) in groups.iter_mut().enumerate() {
            let Some(pos) = group
                .slots
                .iter()
                .position(|s| s.ip == ip && s.port == Some(port))
            else {
                continue;
            };
            if active {
                for slot in group.slots.iter_mut() {
                    slot.active = false;
                }
            }
            group.slots[pos].active = active;
            return Some(SlotRef {
                group_index,
                letter: group.slots[pos].letter,
            });
        }
        None
    }

    /// Whether any slot of any group still holds a live binding.
    pub fn any_connection_established(&self) -> bool {
        let groups = self.groups.lock().unwrap();
        groups
            .iter()
            .any(|g| g.slots.iter().any(|s| s.port.is_some()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedGroupConnectionConfig;

    fn manager() -> RedundancyManager {
        RedundancyManager::from_config(&[
            RedGroupConfig {
                name: "scada".into(),
                connections: vec![
                    RedGroupConnectionConfig {
                        client_ip: "10.0.0.1".parse().unwrap(),
                    },
                    RedGroupConnectionConfig {
                        client_ip: "10.0.0.2".parse().unwrap(),
                    },
                ],
            },
            RedGroupConfig {
                name: "backup".into(),
                connections: vec![RedGroupConnectionConfig {
                    client_ip: "10.0.1.1".parse().unwrap(),
                }],
            },
        ])
    }

    #[test]
    fn slot_order_assigns_path_letters() {
        let mgr = manager();
        let a = mgr.bind_or_lookup("10.0.0.1".parse().unwrap(), 5001).unwrap();
        assert_eq!(a.group_index, 0);
        assert_eq!(a.letter, PathLetter::A);
        let b = mgr.bind_or_lookup("10.0.0.2".parse().unwrap(), 5002).unwrap();
        assert_eq!(b.letter, PathLetter::B);
    }

    #[test]
    fn unknown_ip_is_refused() {
        let mgr = manager();
        assert!(!mgr.admit("10.9.9.9".parse().unwrap()));
        assert!(mgr.bind_or_lookup("10.9.9.9".parse().unwrap(), 1).is_none());
    }

    #[test]
    fn bound_slot_refuses_second_binding() {
        let mgr = manager();
        let ip: IpAddr = "10.0.1.1".parse().unwrap();
        assert!(mgr.admit(ip));
        assert!(mgr.bind_or_lookup(ip, 6000).is_some());
        // slot now taken, a second connection from the same IP has no slot
        assert!(!mgr.admit(ip));
        assert!(mgr.bind_or_lookup(ip, 6001).is_none());
        // but the existing binding is still found by its port
        assert!(mgr.bind_or_lookup(ip, 6000).is_some());
    }

    #[test]
    fn release_keeps_letter_and_frees_slot() {
        let mgr = manager();
        let ip: IpAddr = "10.0.1.1".parse().unwrap();
        mgr.bind_or_lookup(ip, 6000).unwrap();
        assert!(mgr.any_connection_established());

        let released = mgr.release(ip, 6000).unwrap();
        assert_eq!(released.letter, PathLetter::A);
        assert!(!mgr.any_connection_established());
        assert!(mgr.admit(ip));
    }

    #[test]
    fn activation_is_exclusive_within_group() {
        let mgr = manager();
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        mgr.bind_or_lookup(a, 5001).unwrap();
        mgr.bind_or_lookup(b, 5002).unwrap();

        mgr.set_active(a, 5001, true).unwrap();
        mgr.set_active(b, 5002, true).unwrap();

        let groups = mgr.groups.lock().unwrap();
        let active: Vec<bool> = groups[0].slots.iter().map(|s| s.active).collect();
        assert_eq!(active, vec![false, true]);
    }

    #[test]
    fn totals_cover_all_configured_slots() {
        let mgr = manager();
        assert_eq!(mgr.total_slots(), 3);
        assert_eq!(mgr.overview(), vec![(0, 2), (1, 1)]);
        assert_eq!(mgr.group_name(1).as_deref(), Some("backup"));
    }
}
