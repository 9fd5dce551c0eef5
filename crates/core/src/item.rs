use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExpenseId(pub i64);

impl fmt::Display for ExpenseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-assigned identity of a persisted item record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub i64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How much of one item a user has claimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub shares: u32,
}

/// One line of a receipt as produced by extraction. Its position in the
/// extracted sequence is its index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemTuple {
    pub name: String,
    pub price: Money,
}

impl ItemTuple {
    pub fn new(name: impl Into<String>, price: Money) -> Self {
        Self { name: name.into(), price }
    }
}

/// A persisted item belonging to an expense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: Option<ItemId>,
    pub index: u32,
    pub name: String,
    pub price: Money,
    pub users: BTreeMap<UserId, Assignment>,
}

impl ItemRecord {
    /// A fresh, unassigned record for the item at `index`.
    pub fn from_tuple(index: u32, tuple: &ItemTuple) -> Self {
        ItemRecord {
            id: None,
            index,
            name: tuple.name.clone(),
            price: tuple.price,
            users: BTreeMap::new(),
        }
    }

    /// Same content, ignoring store identity.
    pub fn same_content(&self, other: &ItemRecord) -> bool {
        self.index == other.index
            && self.name == other.name
            && self.price == other.price
            && self.users == other.users
    }
}
