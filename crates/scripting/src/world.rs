//! Object database seen by the evaluator
//!
//! The evaluator never owns game objects. It asks a [`World`] for names,
//! attributes and flags, and hands it notifications to deliver.
//! [`MemoryWorld`] is a self-contained implementation backed by a JSON
//! fixture, used by the server binary and the tests.

use crate::error::Result;
use bitflags::bitflags;
use mush_core::{Dbref, Gender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

bitflags! {
    /// Attribute flags that affect evaluation
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct AttrFlags: u32 {
        /// Always trace evaluation of this attribute
        const DEBUG = 1 << 0;
        /// Never trace evaluation of this attribute
        const NODEBUG = 1 << 1;
        /// Only the owner may evaluate it through u() and friends
        const PRIVATE = 1 << 2;
    }
}

/// An attribute fetched from an object
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub text: String,
    pub flags: AttrFlags,
}

/// Collaborator interface onto the object database
pub trait World: Send + Sync {
    fn is_valid(&self, obj: Dbref) -> bool;

    fn name(&self, obj: Dbref) -> Option<String>;

    /// Name including accent markup (`%~`)
    fn accented_name(&self, obj: Dbref) -> Option<String> {
        self.name(obj)
    }

    /// Display name with colour markup (`%k`)
    fn moniker(&self, obj: Dbref) -> Option<String> {
        self.name(obj)
    }

    fn location(&self, obj: Dbref) -> Dbref;

    fn owner(&self, obj: Dbref) -> Dbref;

    fn gender(&self, obj: Dbref) -> Gender;

    /// Creation time as seconds since the epoch (`%:`)
    fn creation_time(&self, obj: Dbref) -> i64;

    fn get_attribute(&self, obj: Dbref, name: &str) -> Option<Attribute>;

    /// May `who` evaluate `attr` stored on `obj`?
    fn can_evaluate(&self, who: Dbref, obj: Dbref, attr: &Attribute) -> bool {
        !attr.flags.contains(AttrFlags::PRIVATE) || self.owner(obj) == self.owner(who)
    }

    fn is_wizard(&self, obj: Dbref) -> bool;

    fn is_halted(&self, obj: Dbref) -> bool;

    /// Suppresses informational notices such as CPU warnings
    fn is_quiet(&self, obj: Dbref) -> bool;

    /// Object carries the DEBUG flag
    fn is_debugging(&self, obj: Dbref) -> bool;

    fn is_connected(&self, obj: Dbref) -> bool;

    /// Extra recipients of this object's debug output
    fn debug_forward_list(&self, obj: Dbref) -> Vec<Dbref>;

    fn notify(&self, target: Dbref, message: &str);
}

/// Permission predicate attached to a function
pub type Permission = fn(&dyn World, Dbref) -> bool;

/// Stock predicates
pub mod permissions {
    use super::World;
    use mush_core::Dbref;

    pub fn wizard(world: &dyn World, who: Dbref) -> bool {
        world.is_wizard(who)
    }

    pub fn nobody(_: &dyn World, _: Dbref) -> bool {
        false
    }
}

/// One object in a [`MemoryWorld`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectRecord {
    pub id: i32,
    pub name: String,
    pub owner: i32,
    pub location: i32,
    pub gender: Gender,
    pub created: i64,
    /// WIZARD, DEBUG, HALT, QUIET, CONNECTED
    pub flags: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    /// Attribute name -> DEBUG / NODEBUG / PRIVATE
    pub attribute_flags: BTreeMap<String, Vec<String>>,
    pub debug_forward: Vec<i32>,
}

impl ObjectRecord {
    pub fn new(id: i32, name: &str) -> Self {
        Self {
            id,
            name: name.into(),
            owner: id,
            location: -1,
            ..Self::default()
        }
    }

    fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f.eq_ignore_ascii_case(flag))
    }

    fn attr_flags(&self, name: &str) -> AttrFlags {
        let mut flags = AttrFlags::empty();
        for flag in self.attribute_flags.get(name).into_iter().flatten() {
            match flag.to_ascii_uppercase().as_str() {
                "DEBUG" => flags |= AttrFlags::DEBUG,
                "NODEBUG" => flags |= AttrFlags::NODEBUG,
                "PRIVATE" => flags |= AttrFlags::PRIVATE,
                other => tracing::debug!("Ignoring unknown attribute flag {}", other),
            }
        }
        flags
    }
}

#[derive(Debug, Deserialize)]
struct Fixture {
    objects: Vec<ObjectRecord>,
}

/// In-memory object database
#[derive(Debug, Default)]
pub struct MemoryWorld {
    objects: RwLock<HashMap<Dbref, ObjectRecord>>,
    notifications: Mutex<Vec<(Dbref, String)>>,
}

impl MemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a fixture of the form `{"objects": [ ... ]}`
    pub fn from_json(json: &str) -> Result<Self> {
        let fixture: Fixture = serde_json::from_str(json)?;
        let world = Self::new();
        for record in fixture.objects {
            world.add_object(record);
        }
        tracing::debug!("Loaded world fixture with {} objects", world.len());
        Ok(world)
    }

    pub fn add_object(&self, mut record: ObjectRecord) {
        record.attributes = record
            .attributes
            .into_iter()
            .map(|(k, v)| (k.to_ascii_uppercase(), v))
            .collect();
        record.attribute_flags = record
            .attribute_flags
            .into_iter()
            .map(|(k, v)| (k.to_ascii_uppercase(), v))
            .collect();
        self.objects.write().insert(Dbref(record.id), record);
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    pub fn set_attribute(&self, obj: Dbref, name: &str, text: &str) {
        if let Some(record) = self.objects.write().get_mut(&obj) {
            record.attributes.insert(name.to_ascii_uppercase(), text.into());
        }
    }

    pub fn set_attribute_flags(&self, obj: Dbref, name: &str, flags: &[&str]) {
        if let Some(record) = self.objects.write().get_mut(&obj) {
            record.attribute_flags.insert(
                name.to_ascii_uppercase(),
                flags.iter().map(|f| f.to_string()).collect(),
            );
        }
    }

    pub fn set_flag(&self, obj: Dbref, flag: &str, on: bool) {
        if let Some(record) = self.objects.write().get_mut(&obj) {
            record.flags.retain(|f| !f.eq_ignore_ascii_case(flag));
            if on {
                record.flags.push(flag.to_ascii_uppercase());
            }
        }
    }

    pub fn set_debug_forward(&self, obj: Dbref, targets: &[Dbref]) {
        if let Some(record) = self.objects.write().get_mut(&obj) {
            record.debug_forward = targets.iter().map(Dbref::get).collect();
        }
    }

    /// Drain the messages delivered to `target`
    pub fn take_notifications(&self, target: Dbref) -> Vec<String> {
        let mut all = self.notifications.lock();
        let (mine, rest): (Vec<_>, Vec<_>) = all.drain(..).partition(|(to, _)| *to == target);
        *all = rest;
        mine.into_iter().map(|(_, msg)| msg).collect()
    }

    /// Drain every pending message, oldest first
    pub fn take_all_notifications(&self) -> Vec<(Dbref, String)> {
        std::mem::take(&mut *self.notifications.lock())
    }

    fn with<T>(&self, obj: Dbref, f: impl FnOnce(&ObjectRecord) -> T) -> Option<T> {
        self.objects.read().get(&obj).map(f)
    }
}

impl World for MemoryWorld {
    fn is_valid(&self, obj: Dbref) -> bool {
        self.objects.read().contains_key(&obj)
    }

    fn name(&self, obj: Dbref) -> Option<String> {
        self.with(obj, |r| r.name.clone())
    }

    fn location(&self, obj: Dbref) -> Dbref {
        self.with(obj, |r| Dbref(r.location)).unwrap_or(Dbref::NOTHING)
    }

    fn owner(&self, obj: Dbref) -> Dbref {
        self.with(obj, |r| Dbref(r.owner)).unwrap_or(Dbref::NOTHING)
    }

    fn gender(&self, obj: Dbref) -> Gender {
        self.with(obj, |r| r.gender).unwrap_or_default()
    }

    fn creation_time(&self, obj: Dbref) -> i64 {
        self.with(obj, |r| r.created).unwrap_or(0)
    }

    fn get_attribute(&self, obj: Dbref, name: &str) -> Option<Attribute> {
        let name = name.to_ascii_uppercase();
        self.with(obj, |r| {
            r.attributes.get(&name).map(|text| Attribute {
                name: name.clone(),
                text: text.clone(),
                flags: r.attr_flags(&name),
            })
        })
        .flatten()
    }

    fn is_wizard(&self, obj: Dbref) -> bool {
        self.with(obj, |r| r.has_flag("WIZARD")).unwrap_or(false)
    }

    fn is_halted(&self, obj: Dbref) -> bool {
        self.with(obj, |r| r.has_flag("HALT")).unwrap_or(false)
    }

    fn is_quiet(&self, obj: Dbref) -> bool {
        self.with(obj, |r| r.has_flag("QUIET")).unwrap_or(false)
    }

    fn is_debugging(&self, obj: Dbref) -> bool {
        self.with(obj, |r| r.has_flag("DEBUG")).unwrap_or(false)
    }

    fn is_connected(&self, obj: Dbref) -> bool {
        self.with(obj, |r| r.has_flag("CONNECTED")).unwrap_or(false)
    }

    fn debug_forward_list(&self, obj: Dbref) -> Vec<Dbref> {
        self.with(obj, |r| r.debug_forward.iter().copied().map(Dbref).collect())
            .unwrap_or_default()
    }

    fn notify(&self, target: Dbref, message: &str) {
        tracing::trace!(target = %target, "notify: {}", message);
        self.notifications.lock().push((target, message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "objects": [
            {"id": 1, "name": "Wizard", "flags": ["WIZARD", "CONNECTED"], "gender": "female"},
            {"id": 5, "name": "Widget", "owner": 1, "location": 1,
             "attributes": {"greet": "Hello, %0!"},
             "attribute_flags": {"greet": ["debug"]}}
        ]
    }"#;

    #[test]
    fn test_fixture_loading() {
        let world = MemoryWorld::from_json(FIXTURE).unwrap();
        assert_eq!(world.len(), 2);
        assert!(world.is_wizard(Dbref(1)));
        assert!(!world.is_wizard(Dbref(5)));
        assert_eq!(world.gender(Dbref(1)), Gender::Female);
        assert_eq!(world.location(Dbref(5)), Dbref(1));
        assert_eq!(world.owner(Dbref(5)), Dbref(1));
        assert_eq!(world.location(Dbref(99)), Dbref::NOTHING);
    }

    #[test]
    fn test_attribute_lookup_is_case_insensitive() {
        let world = MemoryWorld::from_json(FIXTURE).unwrap();
        let attr = world.get_attribute(Dbref(5), "GREET").unwrap();
        assert_eq!(attr.text, "Hello, %0!");
        assert!(attr.flags.contains(AttrFlags::DEBUG));
        assert!(world.get_attribute(Dbref(5), "missing").is_none());
    }

    #[test]
    fn test_bad_fixture_is_error() {
        assert!(MemoryWorld::from_json("{\"objects\": 3}").is_err());
    }

    #[test]
    fn test_notifications_are_per_target() {
        let world = MemoryWorld::new();
        world.notify(Dbref(1), "one");
        world.notify(Dbref(2), "two");
        world.notify(Dbref(1), "three");
        assert_eq!(world.take_notifications(Dbref(1)), vec!["one", "three"]);
        assert!(world.take_notifications(Dbref(1)).is_empty());
        assert_eq!(world.take_notifications(Dbref(2)), vec!["two"]);
    }

    #[test]
    fn test_take_all_notifications_keeps_order() {
        let world = MemoryWorld::new();
        world.notify(Dbref(2), "two");
        world.notify(Dbref(1), "one");
        assert_eq!(
            world.take_all_notifications(),
            vec![(Dbref(2), "two".to_string()), (Dbref(1), "one".to_string())]
        );
        assert!(world.take_all_notifications().is_empty());
    }

    #[test]
    fn test_private_attribute_permission() {
        let world = MemoryWorld::new();
        world.add_object(ObjectRecord::new(1, "Owner"));
        world.add_object(ObjectRecord::new(2, "Stranger"));
        world.set_attribute(Dbref(1), "SECRET", "x");
        world.set_attribute_flags(Dbref(1), "secret", &["private"]);
        let attr = world.get_attribute(Dbref(1), "secret").unwrap();
        assert!(world.can_evaluate(Dbref(1), Dbref(1), &attr));
        assert!(!world.can_evaluate(Dbref(2), Dbref(1), &attr));
    }
}
