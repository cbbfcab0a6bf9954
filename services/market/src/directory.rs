//! City ownership lookup
//!
//! Cities belong to the wider game; the market only needs to know who owns
//! one so a player cannot trade out of, or into, someone else's stockpile.

use dashmap::DashMap;
use types::ids::{CityId, UserId};

/// Source of truth for city ownership
pub trait CityDirectory: Send + Sync {
    fn owner_of(&self, city_id: CityId) -> Option<UserId>;

    fn is_owner(&self, user_id: UserId, city_id: CityId) -> bool {
        self.owner_of(city_id) == Some(user_id)
    }
}

/// Directory kept in memory, filled from seed data or by the caller
#[derive(Debug, Default)]
pub struct InMemoryCityDirectory {
    owners: DashMap<CityId, UserId>,
}

impl InMemoryCityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&self, city_id: CityId, owner: UserId) {
        self.owners.insert(city_id, owner);
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

impl CityDirectory for InMemoryCityDirectory {
    fn owner_of(&self, city_id: CityId) -> Option<UserId> {
        self.owners.get(&city_id).map(|owner| *owner)
    }
}
