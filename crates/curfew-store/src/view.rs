//! Read-only view of one user's categories for a single tick

use curfew_api::{BlockingLevel, ForegroundApp};
use curfew_util::{AppId, CategoryId};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::{
    Category, CategoryApp, MAX_CATEGORY_DEPTH, Rule, SessionDurationItem, SessionDurationSlot,
    TimeSlot, UsedTimeItem, User,
};

/// Categories, rules, used time and app assignments of one user.
///
/// Built fresh for every tick; the evaluators never write through it.
#[derive(Debug, Clone)]
pub struct CategoryStore {
    user: User,
    first_day_of_week: i64,
    categories: BTreeMap<CategoryId, Category>,
    rules: HashMap<CategoryId, Vec<Rule>>,
    used_times: HashMap<CategoryId, Vec<UsedTimeItem>>,
    session_durations: HashMap<CategoryId, Vec<SessionDurationItem>>,
    apps: HashMap<(AppId, Option<String>), CategoryId>,
}

impl CategoryStore {
    pub fn new(user: User, first_day_of_week: i64) -> Self {
        Self {
            user,
            first_day_of_week,
            categories: BTreeMap::new(),
            rules: HashMap::new(),
            used_times: HashMap::new(),
            session_durations: HashMap::new(),
            apps: HashMap::new(),
        }
    }

    pub fn insert_category(&mut self, category: Category) {
        self.categories.insert(category.id.clone(), category);
    }

    pub fn insert_rule(&mut self, rule: Rule) {
        self.rules
            .entry(rule.category_id.clone())
            .or_default()
            .push(rule);
    }

    pub fn insert_used_time(&mut self, category_id: CategoryId, item: UsedTimeItem) {
        self.used_times.entry(category_id).or_default().push(item);
    }

    pub fn insert_session_duration(&mut self, category_id: CategoryId, item: SessionDurationItem) {
        self.session_durations
            .entry(category_id)
            .or_default()
            .push(item);
    }

    pub fn insert_app(&mut self, app: CategoryApp) {
        self.apps.insert((app.app_id, app.activity), app.category_id);
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn first_day_of_week(&self) -> i64 {
        self.first_day_of_week
    }

    pub fn category(&self, id: &CategoryId) -> Option<&Category> {
        self.categories.get(id)
    }

    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.categories.values()
    }

    pub fn rules(&self, id: &CategoryId) -> &[Rule] {
        self.rules.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn session_durations(&self, id: &CategoryId) -> &[SessionDurationItem] {
        self.session_durations
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn session_duration(
        &self,
        id: &CategoryId,
        key: &SessionDurationSlot,
    ) -> Option<&SessionDurationItem> {
        self.session_durations(id).iter().find(|item| item.key == *key)
    }

    /// Used milliseconds per weekday (0 = Monday) of the running week in `slot`
    pub fn used_time_by_day_of_week(&self, id: &CategoryId, slot: TimeSlot) -> [i64; 7] {
        let mut table = [0i64; 7];
        for item in self.used_times.get(id).into_iter().flatten() {
            let offset = item.day_of_epoch - self.first_day_of_week;
            if item.slot == slot && (0..7).contains(&offset) {
                table[offset as usize] += item.used_millis;
            }
        }
        table
    }

    /// `id` followed by its ancestors, root last.
    ///
    /// Stops at a missing parent. Cycles cannot be stored, but the walk is
    /// bounded all the same.
    pub fn parent_chain(&self, id: &CategoryId) -> Vec<CategoryId> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.categories.get(id);

        while let Some(category) = current {
            if chain.len() > MAX_CATEGORY_DEPTH || !seen.insert(&category.id) {
                break;
            }
            chain.push(category.id.clone());
            current = category
                .parent_id
                .as_ref()
                .and_then(|parent| self.categories.get(parent));
        }

        chain
    }

    /// Category explicitly assigned to a running app.
    ///
    /// Activity assignments win when the user has activity-level blocking.
    pub fn assigned_category(&self, app: &ForegroundApp) -> Option<(CategoryId, BlockingLevel)> {
        if self.user.activity_level_blocking {
            if let Some(activity) = &app.activity {
                let key = (app.app_id.clone(), Some(activity.clone()));
                if let Some(category_id) = self.apps.get(&key) {
                    return Some((category_id.clone(), BlockingLevel::Activity));
                }
            }
        }

        self.apps
            .get(&(app.app_id.clone(), None))
            .map(|category_id| (category_id.clone(), BlockingLevel::App))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curfew_api::UserType;

    fn child() -> User {
        User::new("child", "Kid", UserType::Child)
    }

    #[test]
    fn parent_chain_walks_to_root() {
        let mut store = CategoryStore::new(child(), 0);
        store.insert_category(Category::new("root", "child", "All"));
        store.insert_category(Category::new("games", "child", "Games").with_parent("root"));
        store.insert_category(Category::new("shooter", "child", "Shooter").with_parent("games"));

        let chain = store.parent_chain(&CategoryId::new("shooter"));
        assert_eq!(
            chain,
            vec![
                CategoryId::new("shooter"),
                CategoryId::new("games"),
                CategoryId::new("root")
            ]
        );
    }

    #[test]
    fn parent_chain_stops_at_cycle() {
        let mut store = CategoryStore::new(child(), 0);
        store.insert_category(Category::new("a", "child", "A").with_parent("b"));
        store.insert_category(Category::new("b", "child", "B").with_parent("a"));

        assert_eq!(store.parent_chain(&CategoryId::new("a")).len(), 2);
    }

    #[test]
    fn used_time_is_bucketed_by_weekday_and_slot() {
        let mut store = CategoryStore::new(child(), 100);
        let games = CategoryId::new("games");
        let evening = TimeSlot::new(1080, 1439).unwrap();

        for (day, slot, used) in [
            (99, TimeSlot::FULL_DAY, 5_000),
            (100, TimeSlot::FULL_DAY, 1_000),
            (102, TimeSlot::FULL_DAY, 2_000),
            (102, evening, 700),
            (107, TimeSlot::FULL_DAY, 9_000),
        ] {
            store.insert_used_time(
                games.clone(),
                UsedTimeItem {
                    day_of_epoch: day,
                    slot,
                    used_millis: used,
                },
            );
        }

        assert_eq!(
            store.used_time_by_day_of_week(&games, TimeSlot::FULL_DAY),
            [1_000, 0, 2_000, 0, 0, 0, 0]
        );
        assert_eq!(
            store.used_time_by_day_of_week(&games, evening),
            [0, 0, 700, 0, 0, 0, 0]
        );
    }

    #[test]
    fn activity_assignment_requires_activity_level_blocking() {
        let mut user = child();
        let mut store = CategoryStore::new(user.clone(), 0);
        store.insert_app(CategoryApp {
            category_id: CategoryId::new("browser"),
            app_id: AppId::new("firefox"),
            activity: None,
        });
        store.insert_app(CategoryApp {
            category_id: CategoryId::new("video"),
            app_id: AppId::new("firefox"),
            activity: Some("youtube".into()),
        });

        let app = ForegroundApp::new("firefox").with_activity("youtube");
        assert_eq!(
            store.assigned_category(&app),
            Some((CategoryId::new("browser"), BlockingLevel::App))
        );

        user.activity_level_blocking = true;
        store.user = user;
        assert_eq!(
            store.assigned_category(&app),
            Some((CategoryId::new("video"), BlockingLevel::Activity))
        );
        assert_eq!(store.assigned_category(&ForegroundApp::new("vlc")), None);
    }
}
