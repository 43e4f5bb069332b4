//! Writing the configured policy into the store

use curfew_store::{Store, StoreResult};
use tracing::{debug, info};

use crate::PolicySeed;

impl PolicySeed {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.categories.is_empty()
    }

    /// Create or update every configured user, category, rule and app
    /// assignment. Used time and the extra time of existing categories are
    /// left alone.
    pub fn apply(&self, store: &dyn Store) -> StoreResult<()> {
        for user in &self.users {
            store.upsert_user(user)?;
        }

        for category in &self.categories {
            store.upsert_category(category)?;
        }

        for (category_id, rules) in &self.rules {
            store.set_rules(category_id, rules)?;
        }

        for app in &self.apps {
            store.assign_app(app)?;
            debug!(app_id = %app.app_id, category_id = %app.category_id, "Seeded app assignment");
        }

        if let Some(user_id) = &self.current_user {
            store.set_current_user(Some(user_id))?;
        }

        info!(
            users = self.users.len(),
            categories = self.categories.len(),
            apps = self.apps.len(),
            "Policy applied to store"
        );
        Ok(())
    }
}
