//! Saved-contact lookup used as the admission allow-list.

use crate::number::normalize;
use std::collections::HashSet;
use std::sync::RwLock;

/// Answers whether a raw number belongs to a saved personal contact.
pub trait ContactResolver: Send + Sync {
    fn is_saved_contact(&self, raw_number: &str) -> bool;
}

/// Fixed allow-list compared on normalized numbers.
#[derive(Debug, Default)]
pub struct StaticContacts {
    numbers: RwLock<HashSet<String>>,
}

impl StaticContacts {
    pub fn new<S: AsRef<str>>(numbers: &[S]) -> Self {
        let contacts = Self::default();
        for number in numbers {
            contacts.insert(number.as_ref());
        }
        contacts
    }

    /// Add a contact. Blank numbers are ignored.
    pub fn insert(&self, raw_number: &str) {
        let normalized = normalize(raw_number);
        if normalized.is_empty() {
            return;
        }
        if let Ok(mut numbers) = self.numbers.write() {
            numbers.insert(normalized);
        }
    }

    pub fn len(&self) -> usize {
        self.numbers.read().map(|n| n.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ContactResolver for StaticContacts {
    fn is_saved_contact(&self, raw_number: &str) -> bool {
        let normalized = normalize(raw_number);
        if normalized.is_empty() {
            return false;
        }
        self.numbers
            .read()
            .map(|numbers| numbers.contains(&normalized))
            .unwrap_or(false)
    }
}

/// Resolver with no contacts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoContacts;

impl ContactResolver for NoContacts {
    fn is_saved_contact(&self, _raw_number: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_ignore_formatting() {
        let contacts = StaticContacts::new(&["+1 (555) 010-0000"]);
        assert!(contacts.is_saved_contact("+15550100000"));
        assert!(contacts.is_saved_contact("+1 555 010 0000"));
        assert!(!contacts.is_saved_contact("5550100000"));
    }

    #[test]
    fn blank_numbers_are_never_contacts() {
        let contacts = StaticContacts::new(&["", "()"]);
        assert!(contacts.is_empty());
        assert!(!contacts.is_saved_contact(""));
        assert!(!contacts.is_saved_contact("-"));
    }

    #[test]
    fn insert_extends_allow_list() {
        let contacts = StaticContacts::default();
        contacts.insert("555-0100");
        assert_eq!(contacts.len(), 1);
        assert!(contacts.is_saved_contact("5550100"));
    }

    #[test]
    fn no_contacts_allows_nothing() {
        assert!(!NoContacts.is_saved_contact("5550100"));
    }
}
