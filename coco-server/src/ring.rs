//! Consistent hashing of host names onto ring members.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;

/// Number of points every member occupies on the ring.
pub const DEFAULT_REPLICAS: usize = 20;

/// Hashes a key onto the ring, using the IEEE CRC-32 checksum.
fn hash_key(key: &str) -> u32 {
    crc32fast::hash(key.as_bytes())
}

/// A consistent hash ring.
///
/// Every member is placed at [`DEFAULT_REPLICAS`] points on a 32-bit circle, derived from the
/// replica index followed by the member's string form. A key belongs to the member owning the
/// first point strictly after the key's hash, wrapping around at the end of the circle. Adding a
/// member only moves the keys that fall into the intervals now owned by the new member.
///
/// When two points collide, the member inserted last owns the point.
#[derive(Clone, Debug)]
pub struct HashRing<K> {
    points: BTreeMap<u32, K>,
    members: Vec<K>,
    replicas: usize,
}

impl<K> Default for HashRing<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> HashRing<K> {
    /// Creates an empty ring.
    pub fn new() -> Self {
        Self {
            points: BTreeMap::new(),
            members: Vec::new(),
            replicas: DEFAULT_REPLICAS,
        }
    }

    /// Returns the number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns `true` if the ring has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Returns all members in insertion order.
    pub fn members(&self) -> &[K] {
        &self.members
    }
}

impl<K> HashRing<K>
where
    K: fmt::Display + Clone + Eq,
{
    fn replica_points(&self, member: &K) -> Vec<u32> {
        let member = member.to_string();
        (0..self.replicas)
            .map(|i| hash_key(&format!("{i}{member}")))
            .collect()
    }

    /// Adds a member to the ring.
    ///
    /// Adding a member that is already part of the ring has no effect.
    pub fn add(&mut self, member: K) {
        if self.members.contains(&member) {
            return;
        }

        for point in self.replica_points(&member) {
            self.points.insert(point, member.clone());
        }
        self.members.push(member);
    }

    /// Removes a member and all of its points from the ring.
    pub fn remove(&mut self, member: &K) {
        for point in self.replica_points(member) {
            if self.points.get(&point) == Some(member) {
                self.points.remove(&point);
            }
        }
        self.members.retain(|m| m != member);
    }

    /// Returns the member owning `key`, or `None` if the ring is empty.
    pub fn get(&self, key: &str) -> Option<&K> {
        let hash = hash_key(key);
        self.points
            .range((Bound::Excluded(hash), Bound::Unbounded))
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, member)| member)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use similar_asserts::assert_eq;

    use super::*;

    fn ring(members: &[&str]) -> HashRing<String> {
        let mut ring = HashRing::new();
        for member in members {
            ring.add((*member).to_owned());
        }
        ring
    }

    fn hosts(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("host-{i:05}.example.com")).collect()
    }

    #[test]
    fn test_empty() {
        let ring = HashRing::<String>::new();
        assert!(ring.is_empty());
        assert_eq!(ring.get("web-01"), None);
    }

    #[test]
    fn test_single_member_owns_everything() {
        let ring = ring(&["0"]);
        for host in hosts(100) {
            assert_eq!(ring.get(&host).map(String::as_str), Some("0"));
        }
    }

    #[test]
    fn test_lookup_is_stable() {
        let ring = ring(&["0", "1", "2"]);
        let again = ring.clone();

        for host in hosts(500) {
            assert_eq!(ring.get(&host), ring.get(&host));
            assert_eq!(ring.get(&host), again.get(&host));
        }
    }

    #[test]
    fn test_insertion_order_irrelevant() {
        let forward = ring(&["0", "1", "2", "3"]);
        let backward = ring(&["3", "2", "1", "0"]);

        for host in hosts(500) {
            assert_eq!(forward.get(&host), backward.get(&host));
        }
    }

    #[test]
    fn test_all_members_receive_keys() {
        let ring = ring(&["0", "1", "2", "3"]);
        let owners: BTreeSet<_> = hosts(2000).iter().filter_map(|h| ring.get(h)).collect();
        assert_eq!(owners.len(), 4);
    }

    #[test]
    fn test_adding_member_moves_few_keys() {
        let before = ring(&["0", "1", "2", "3"]);
        let mut after = before.clone();
        after.add("4".to_owned());

        let hosts = hosts(2000);
        let mut moved = 0;
        for host in &hosts {
            let old = before.get(host);
            let new = after.get(host);
            if old != new {
                // Keys only ever move to the new member.
                assert_eq!(new.map(String::as_str), Some("4"));
                moved += 1;
            }
        }

        // Expected share of the new member is 1/5.
        let bound = 1.0 / after.len() as f64 + 0.05;
        assert!(moved > 0);
        assert!(
            (moved as f64) / (hosts.len() as f64) <= bound,
            "moved {moved} of {} keys",
            hosts.len()
        );
    }

    #[test]
    fn test_remove_restores_assignment() {
        let before = ring(&["0", "1", "2"]);
        let mut ring = before.clone();
        ring.add("3".to_owned());
        ring.remove(&"3".to_owned());

        assert_eq!(ring.members(), before.members());
        for host in hosts(500) {
            assert_eq!(ring.get(&host), before.get(&host));
        }
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut ring = ring(&["0", "1"]);
        ring.add("1".to_owned());
        assert_eq!(ring.len(), 2);
    }
}
