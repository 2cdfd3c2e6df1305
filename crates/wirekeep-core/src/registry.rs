// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use std::net::Ipv4Addr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::interface::Interface;
use crate::peer::Peer;

pub trait Named {
    fn uuid(&self) -> Uuid;
    fn name(&self) -> &str;
}

/// Uuid-keyed collection kept sorted by name after every structural change.
///
/// Callers that rename an item through [`NamedMap::get_mut`] must call
/// [`NamedMap::sort`] afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedMap<T> {
    items: Vec<T>,
}

impl<T> Default for NamedMap<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: Named> NamedMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the item with the same uuid.
    pub fn insert(&mut self, item: T) -> Option<T> {
        let replaced = match self.position(item.uuid()) {
            Some(i) => Some(std::mem::replace(&mut self.items[i], item)),
            None => {
                self.items.push(item);
                None
            }
        };
        self.sort();
        replaced
    }

    pub fn remove(&mut self, uuid: Uuid) -> Option<T> {
        let i = self.position(uuid)?;
        Some(self.items.remove(i))
    }

    pub fn get(&self, uuid: Uuid) -> Option<&T> {
        self.items.iter().find(|i| i.uuid() == uuid)
    }

    pub fn get_mut(&mut self, uuid: Uuid) -> Option<&mut T> {
        self.items.iter_mut().find(|i| i.uuid() == uuid)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&T> {
        self.items.iter().find(|i| i.name() == name)
    }

    pub fn contains(&self, uuid: Uuid) -> bool {
        self.position(uuid).is_some()
    }

    pub fn sort(&mut self) {
        self.items.sort_by(|a, b| a.name().cmp(b.name()));
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }

    pub fn uuids(&self) -> Vec<Uuid> {
        self.items.iter().map(Named::uuid).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn position(&self, uuid: Uuid) -> Option<usize> {
        self.items.iter().position(|i| i.uuid() == uuid)
    }
}

impl<T: Named> From<Vec<T>> for NamedMap<T> {
    fn from(items: Vec<T>) -> Self {
        let mut map = Self { items };
        map.sort();
        map
    }
}

impl<T: Serialize> Serialize for NamedMap<T> {
    fn serialize<Se: Serializer>(&self, serializer: Se) -> Result<Se::Ok, Se::Error> {
        self.items.serialize(serializer)
    }
}

impl<'de, T: Named + Deserialize<'de>> Deserialize<'de> for NamedMap<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<T>::deserialize(deserializer).map(Self::from)
    }
}

/// The live interface registry.
pub type Interfaces = NamedMap<Interface>;

impl NamedMap<Interface> {
    pub fn all_peers(&self) -> impl Iterator<Item = &Peer> {
        self.values().flat_map(|iface| iface.peers.values())
    }

    pub fn peer(&self, uuid: Uuid) -> Option<&Peer> {
        self.all_peers().find(|p| p.uuid == uuid)
    }

    /// Interface that currently owns the peer.
    pub fn peer_owner(&self, uuid: Uuid) -> Option<&Interface> {
        self.values().find(|iface| iface.peers.contains(uuid))
    }

    /// Every address in use by an interface or a peer.
    pub fn used_ips(&self) -> Vec<Ipv4Addr> {
        self.values()
            .map(|iface| iface.ipv4_address.ip())
            .chain(self.all_peers().map(|p| p.ipv4_address.ip()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        uuid: Uuid,
        name: String,
    }

    impl Named for Item {
        fn uuid(&self) -> Uuid {
            self.uuid
        }
        fn name(&self) -> &str {
            &self.name
        }
    }

    fn item(name: &str) -> Item {
        Item {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
        }
    }

    fn names(map: &NamedMap<Item>) -> Vec<&str> {
        map.values().map(|i| i.name.as_str()).collect()
    }

    #[test]
    fn insert_keeps_name_order() {
        let mut map = NamedMap::new();
        map.insert(item("charlie"));
        map.insert(item("alpha"));
        map.insert(item("bravo"));
        assert_eq!(names(&map), ["alpha", "bravo", "charlie"]);
    }

    #[test]
    fn insert_replaces_same_uuid() {
        let mut map = NamedMap::new();
        let mut a = item("alpha");
        map.insert(a.clone());
        map.insert(item("bravo"));
        a.name = "zulu".into();
        let old = map.insert(a.clone()).unwrap();
        assert_eq!(old.name, "alpha");
        assert_eq!(map.len(), 2);
        assert_eq!(names(&map), ["bravo", "zulu"]);
    }

    #[test]
    fn remove_by_uuid() {
        let mut map = NamedMap::new();
        let a = item("alpha");
        map.insert(a.clone());
        map.insert(item("bravo"));
        assert_eq!(map.remove(a.uuid), Some(a.clone()));
        assert!(map.remove(a.uuid).is_none());
        assert!(!map.contains(a.uuid));
        assert_eq!(names(&map), ["bravo"]);
    }

    #[test]
    fn deserialized_maps_are_sorted() {
        let json = format!(
            r#"[{{"uuid":"{}","name":"b"}},{{"uuid":"{}","name":"a"}}]"#,
            Uuid::new_v4(),
            Uuid::new_v4()
        );
        let map: NamedMap<Item> = serde_json::from_str(&json).unwrap();
        assert_eq!(names(&map), ["a", "b"]);
    }
}
