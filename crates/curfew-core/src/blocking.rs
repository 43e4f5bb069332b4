//! Blocking decisions for running applications

use curfew_api::{BlockingDecision, BlockingLevel, BlockingReason, ForegroundApp};
use curfew_host_api::UsageSample;
use curfew_store::{CategoryStore, DeviceState};
use curfew_util::{AppId, CategoryId};
use std::collections::BTreeSet;

use crate::CategoryHandlingCache;

/// How a running application is treated before any category is evaluated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppBaseHandling {
    /// No assignment and no category for unassigned apps
    BlockedDueToNoCategory,
    /// Evaluate the assigned category and its ancestors, leaf first
    UseCategories {
        categories: Vec<CategoryId>,
        level: BlockingLevel,
    },
    /// Internal or ignored application
    Whitelisted,
    /// On the device's temporarily allowed list
    TemporarilyAllowed,
    /// Engine disabled or the current user is not restricted
    LogicPaused,
    /// Nothing is running
    Idle,
    /// Usage cannot be sampled; every category of the user is counted
    CountEverything { categories: Vec<CategoryId> },
}

impl AppBaseHandling {
    /// Categories whose time this application consumes while it is allowed
    pub fn categories(&self) -> &[CategoryId] {
        match self {
            AppBaseHandling::UseCategories { categories, .. }
            | AppBaseHandling::CountEverything { categories } => categories,
            AppBaseHandling::BlockedDueToNoCategory
            | AppBaseHandling::Whitelisted
            | AppBaseHandling::TemporarilyAllowed
            | AppBaseHandling::LogicPaused
            | AppBaseHandling::Idle => &[],
        }
    }
}

/// Maps running applications to blocking reasons for one tick
pub struct BlockingDecisionEngine<'a> {
    store: &'a CategoryStore,
    device: &'a DeviceState,
    ignored_apps: &'a BTreeSet<AppId>,
}

impl<'a> BlockingDecisionEngine<'a> {
    pub fn new(
        store: &'a CategoryStore,
        device: &'a DeviceState,
        ignored_apps: &'a BTreeSet<AppId>,
    ) -> Self {
        Self {
            store,
            device,
            ignored_apps,
        }
    }

    fn logic_paused(&self) -> bool {
        !self.device.enabled || !self.store.user().user_type.is_restricted()
    }

    /// Classify a whole sample when it does not come down to single
    /// applications: missing usage access or nothing running.
    ///
    /// `None` means every sampled application is classified on its own.
    pub fn sample_handling(&self, sample: Option<&UsageSample>) -> Option<AppBaseHandling> {
        if self.logic_paused() {
            return Some(AppBaseHandling::LogicPaused);
        }

        match sample {
            None => Some(AppBaseHandling::CountEverything {
                categories: self.store.categories().map(|c| c.id.clone()).collect(),
            }),
            Some(sample) if sample.foreground.is_empty() && sample.audio.is_none() => {
                Some(AppBaseHandling::Idle)
            }
            Some(_) => None,
        }
    }

    /// Classify an application without evaluating any category
    pub fn base_handling(&self, app: &ForegroundApp) -> AppBaseHandling {
        if self.logic_paused() {
            return AppBaseHandling::LogicPaused;
        }
        if self.ignored_apps.contains(&app.app_id) {
            return AppBaseHandling::Whitelisted;
        }
        if self.device.temporarily_allowed_apps.contains(&app.app_id) {
            return AppBaseHandling::TemporarilyAllowed;
        }

        let user = self.store.user();
        let exists = |id: &CategoryId| self.store.category(id).is_some();
        let assigned = self
            .store
            .assigned_category(app)
            .filter(|(id, _)| exists(id))
            .or_else(|| {
                user.category_for_not_assigned_apps
                    .clone()
                    .filter(|id| exists(id))
                    .map(|id| (id, BlockingLevel::App))
            });

        match assigned {
            Some((id, level)) => AppBaseHandling::UseCategories {
                categories: self.store.parent_chain(&id),
                level,
            },
            None => AppBaseHandling::BlockedDueToNoCategory,
        }
    }

    /// Decide for one application, walking its category chain leaf first.
    ///
    /// The first category with a reason decides; its id is reported as the
    /// blocking category.
    pub fn decide(
        &self,
        app: &ForegroundApp,
        base: &AppBaseHandling,
        cache: &mut CategoryHandlingCache<'_>,
    ) -> BlockingDecision {
        match base {
            AppBaseHandling::LogicPaused
            | AppBaseHandling::Whitelisted
            | AppBaseHandling::TemporarilyAllowed
            | AppBaseHandling::Idle
            | AppBaseHandling::CountEverything { .. } => BlockingDecision::allowed(app.clone()),
            AppBaseHandling::BlockedDueToNoCategory => BlockingDecision {
                app: app.clone(),
                reason: Some(BlockingReason::NotPartOfAnCategory),
                category_id: None,
                level: BlockingLevel::App,
                block_notifications: true,
                notification_delay_millis: 0,
            },
            AppBaseHandling::UseCategories { categories, level } => {
                // The leaf-most category that blocks notifications sets the delay
                let mut notifications: Option<u64> = None;

                for id in categories {
                    let Some(handling) = cache.get(id) else {
                        continue;
                    };
                    if handling.block_all_notifications && notifications.is_none() {
                        notifications = Some(handling.notification_delay_millis);
                    }

                    if let Some(reason) = handling.blocking_reason {
                        return BlockingDecision {
                            app: app.clone(),
                            reason: Some(reason),
                            category_id: Some(id.clone()),
                            level: *level,
                            block_notifications: notifications.is_some(),
                            notification_delay_millis: notifications.unwrap_or(0),
                        };
                    }
                }

                BlockingDecision {
                    app: app.clone(),
                    reason: None,
                    category_id: categories.first().cloned(),
                    level: *level,
                    block_notifications: notifications.is_some(),
                    notification_delay_millis: notifications.unwrap_or(0),
                }
            }
        }
    }
}
