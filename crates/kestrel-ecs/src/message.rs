//! Per-entity message inboxes.
//!
//! Any `Send + Sync + 'static` value can be sent to an entity. It lands in
//! that entity's inbox with age 0 and every reconciliation ages it by one.
//! Messages are dropped once they reach [`MESSAGE_LIFETIME`], so a message
//! sent during a step is readable for the rest of that step and for the
//! whole of the next one. Systems that run before the sender therefore
//! still see it, one step late.

use std::any::{Any, TypeId};
use std::fmt;

/// Marker for types that can be sent to an entity's inbox.
pub trait Message: Any + Send + Sync {}

impl<T: Any + Send + Sync> Message for T {}

/// Reconciliations a message survives before it is dropped.
pub const MESSAGE_LIFETIME: u8 = 2;

pub(crate) struct MessageEntry {
    msg: Box<dyn Any + Send + Sync>,
    type_id: TypeId,
    age: u8,
}

impl MessageEntry {
    pub(crate) fn new<M: Message>(msg: M) -> Self {
        Self {
            msg: Box::new(msg),
            type_id: TypeId::of::<M>(),
            age: 0,
        }
    }

    pub(crate) fn downcast<M: Message>(&self) -> Option<&M> {
        if self.type_id == TypeId::of::<M>() {
            self.msg.downcast_ref::<M>()
        } else {
            None
        }
    }
}

impl fmt::Debug for MessageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageEntry")
            .field("type_id", &self.type_id)
            .field("age", &self.age)
            .finish()
    }
}

/// An entity's pending messages, oldest first.
#[derive(Debug, Default)]
pub(crate) struct Inbox {
    entries: Vec<MessageEntry>,
}

impl Inbox {
    pub(crate) fn push(&mut self, entry: MessageEntry) {
        self.entries.push(entry);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn iter<M: Message>(&self) -> impl Iterator<Item = &M> + '_ {
        self.entries.iter().filter_map(MessageEntry::downcast::<M>)
    }

    /// Age every message by one and drop the expired ones. Returns how many
    /// were dropped.
    pub(crate) fn age(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain_mut(|entry| {
            entry.age += 1;
            entry.age < MESSAGE_LIFETIME
        });
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Damage(u32);

    #[derive(Debug, PartialEq)]
    struct Heal(u32);

    #[test]
    fn iter_filters_by_type_in_send_order() {
        let mut inbox = Inbox::default();
        inbox.push(MessageEntry::new(Damage(3)));
        inbox.push(MessageEntry::new(Heal(1)));
        inbox.push(MessageEntry::new(Damage(5)));
        let damage: Vec<&Damage> = inbox.iter::<Damage>().collect();
        assert_eq!(damage, vec![&Damage(3), &Damage(5)]);
        assert_eq!(inbox.iter::<Heal>().count(), 1);
        assert_eq!(inbox.iter::<u64>().count(), 0);
    }

    #[test]
    fn messages_expire_after_lifetime() {
        let mut inbox = Inbox::default();
        inbox.push(MessageEntry::new(Damage(1)));
        assert_eq!(inbox.age(), 0);
        inbox.push(MessageEntry::new(Damage(2)));
        assert_eq!(inbox.len(), 2);

        assert_eq!(inbox.age(), 1);
        let left: Vec<&Damage> = inbox.iter::<Damage>().collect();
        assert_eq!(left, vec![&Damage(2)]);
        assert_eq!(inbox.age(), 1);
        assert!(inbox.is_empty());
    }
}
