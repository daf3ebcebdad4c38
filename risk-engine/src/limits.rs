//! Risk limit storage: indexed mutation plus a short-TTL read cache.

use common::{RiskError, RiskResult, Symbol, Ts, UserId};
use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// A limit's identity.
pub type LimitId = Uuid;

/// The kind of threshold a [`RiskLimit`] enforces.
///
/// A tagged enum with one evaluation site per variant in the evaluator,
/// rather than a trait object per rule: keeps the pre-trade hot path
/// branch-predictable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LimitType {
    /// Maximum single-order quantity.
    OrderSize,
    /// Maximum absolute position quantity.
    Position,
    /// Maximum notional exposure.
    Exposure,
    /// Maximum cumulative daily loss.
    DailyLoss,
    /// Maximum drawdown from peak equity.
    Drawdown,
    /// Maximum gross-exposure-to-equity ratio.
    Leverage,
    /// Maximum single-symbol share of portfolio value.
    Concentration,
    /// Maximum parametric Value-at-Risk.
    VaR,
    /// Maximum order submission rate.
    TradeFrequency,
}

/// A single risk limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimit {
    /// Server-assigned identity.
    pub id: LimitId,
    /// Owning user; empty means this limit is not user-specific.
    pub user_id: UserId,
    /// Scoped symbol; empty means "all symbols" for the owning user.
    pub symbol: Symbol,
    /// The kind of threshold this limit enforces.
    pub limit_type: LimitType,
    /// The hard threshold. Must be `> 0`.
    pub value: f64,
    /// An optional soft threshold below `value` that produces a warning
    /// without failing the check.
    pub warning: Option<f64>,
    /// Whether this limit currently participates in evaluation.
    pub enabled: bool,
    /// Creation time, preserved across updates.
    pub created_at: Ts,
    /// Last mutation time.
    pub updated_at: Ts,
    /// Rolling window used by frequency/drawdown limit types, in seconds.
    pub time_window: Option<i64>,
}

impl RiskLimit {
    fn scope(&self) -> Scope {
        if !self.user_id.is_empty() {
            Scope::User(self.user_id.clone())
        } else if !self.symbol.is_empty() {
            Scope::Symbol(self.symbol.clone())
        } else {
            Scope::Global
        }
    }
}

#[derive(Clone)]
enum Scope {
    User(UserId),
    Symbol(Symbol),
    Global,
}

struct CacheEntry {
    inserted_at: Instant,
    limits: Vec<RiskLimit>,
}

const CACHE_TTL: Duration = Duration::from_secs(300);

/// Holds user, symbol, and global risk limits with a short-TTL
/// read-through cache in front of the three logical indexes.
pub struct LimitStore {
    limits: DashMap<LimitId, RiskLimit>,
    by_user: DashMap<UserId, Vec<LimitId>>,
    by_symbol: DashMap<Symbol, Vec<LimitId>>,
    global: RwLock<Vec<LimitId>>,
    cache: RwLock<FxHashMap<String, CacheEntry>>,
}

impl Default for LimitStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LimitStore {
    /// An empty limit store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            limits: DashMap::new(),
            by_user: DashMap::new(),
            by_symbol: DashMap::new(),
            global: RwLock::new(Vec::new()),
            cache: RwLock::new(FxHashMap::default()),
        }
    }

    /// Insert a new limit, assigning it an id and timestamps.
    ///
    /// # Errors
    /// Returns [`RiskError::InvalidArgument`] if `value <= 0`.
    pub fn add(&self, mut limit: RiskLimit) -> RiskResult<RiskLimit> {
        if limit.value <= 0.0 {
            return Err(RiskError::InvalidArgument(
                "limit value must be > 0".to_string(),
            ));
        }
        limit.id = Uuid::new_v4();
        let now = Ts::now();
        limit.created_at = now;
        limit.updated_at = now;
        self.insert_indexed(limit.clone());
        Ok(limit)
    }

    /// Replace an existing limit's mutable fields, preserving `id` and
    /// `created_at`.
    ///
    /// # Errors
    /// Returns [`RiskError::NotFound`] if no limit with `limit.id` exists,
    /// or [`RiskError::InvalidArgument`] if `value <= 0`.
    pub fn update(&self, mut limit: RiskLimit) -> RiskResult<RiskLimit> {
        if limit.value <= 0.0 {
            return Err(RiskError::InvalidArgument(
                "limit value must be > 0".to_string(),
            ));
        }
        let existing = self
            .limits
            .get(&limit.id)
            .ok_or_else(|| RiskError::NotFound(format!("limit {}", limit.id)))?
            .clone();

        self.remove_indexed(&existing);
        limit.created_at = existing.created_at;
        limit.updated_at = Ts::now();
        self.insert_indexed(limit.clone());
        Ok(limit)
    }

    /// Remove a limit owned by `user_id` (pass an empty `UserId` for a
    /// symbol-scoped or global limit).
    ///
    /// # Errors
    /// Returns [`RiskError::NotFound`] if the limit does not exist, or
    /// exists but is not owned by `user_id`.
    pub fn delete(&self, user_id: &UserId, limit_id: LimitId) -> RiskResult<()> {
        let existing = self
            .limits
            .get(&limit_id)
            .ok_or_else(|| RiskError::NotFound(format!("limit {limit_id}")))?
            .clone();
        if &existing.user_id != user_id {
            return Err(RiskError::NotFound(format!("limit {limit_id}")));
        }
        self.remove_indexed(&existing);
        Ok(())
    }

    /// Enable a limit owned by `user_id`.
    ///
    /// # Errors
    /// Returns [`RiskError::NotFound`] if the limit does not exist.
    pub fn enable(&self, user_id: &UserId, limit_id: LimitId) -> RiskResult<RiskLimit> {
        self.set_enabled(user_id, limit_id, true)
    }

    /// Disable a limit owned by `user_id`.
    ///
    /// # Errors
    /// Returns [`RiskError::NotFound`] if the limit does not exist.
    pub fn disable(&self, user_id: &UserId, limit_id: LimitId) -> RiskResult<RiskLimit> {
        self.set_enabled(user_id, limit_id, false)
    }

    fn set_enabled(&self, _user_id: &UserId, limit_id: LimitId, enabled: bool) -> RiskResult<RiskLimit> {
        let mut entry = self
            .limits
            .get_mut(&limit_id)
            .ok_or_else(|| RiskError::NotFound(format!("limit {limit_id}")))?;
        entry.enabled = enabled;
        entry.updated_at = Ts::now();
        let updated = entry.clone();
        drop(entry);
        self.invalidate(&updated);
        Ok(updated)
    }

    /// All limits owned by `user_id` (copy-out).
    #[must_use]
    pub fn get_for_user(&self, user_id: &UserId) -> Vec<RiskLimit> {
        let key = format!("user_limits:{user_id}");
        if let Some(cached) = self.cached(&key) {
            return cached;
        }
        let ids = self.by_user.get(user_id).map(|v| v.clone()).unwrap_or_default();
        let limits = self.resolve(&ids);
        self.store_cache(key, limits.clone());
        limits
    }

    /// All limits scoped to `symbol` (not user-specific).
    #[must_use]
    pub fn get_for_symbol(&self, symbol: &Symbol) -> Vec<RiskLimit> {
        let key = format!("symbol_limits:{symbol}");
        if let Some(cached) = self.cached(&key) {
            return cached;
        }
        let ids = self.by_symbol.get(symbol).map(|v| v.clone()).unwrap_or_default();
        let limits = self.resolve(&ids);
        self.store_cache(key, limits.clone());
        limits
    }

    /// All global limits (no user, no symbol).
    #[must_use]
    pub fn get_global(&self) -> Vec<RiskLimit> {
        let key = "global_limits".to_string();
        if let Some(cached) = self.cached(&key) {
            return cached;
        }
        let ids = self.global.read().clone();
        let limits = self.resolve(&ids);
        self.store_cache(key, limits.clone());
        limits
    }

    /// The first enabled limit of `limit_type` applicable to
    /// `(user_id, symbol)`, preferring a user-scoped limit, then a
    /// symbol-scoped limit, then a global limit.
    #[must_use]
    pub fn resolve_threshold(
        &self,
        user_id: &UserId,
        symbol: &Symbol,
        limit_type: LimitType,
    ) -> Option<RiskLimit> {
        self.get_for_user(user_id)
            .into_iter()
            .find(|l| l.enabled && l.limit_type == limit_type)
            .or_else(|| {
                self.get_for_symbol(symbol)
                    .into_iter()
                    .find(|l| l.enabled && l.limit_type == limit_type)
            })
            .or_else(|| {
                self.get_global()
                    .into_iter()
                    .find(|l| l.enabled && l.limit_type == limit_type)
            })
    }

    /// Coarse counts for observability.
    #[must_use]
    pub fn stats(&self) -> FxHashMap<String, i64> {
        let mut out = FxHashMap::default();
        out.insert("total".to_string(), i64::try_from(self.limits.len()).unwrap_or(i64::MAX));
        out.insert("users".to_string(), i64::try_from(self.by_user.len()).unwrap_or(i64::MAX));
        out.insert("symbols".to_string(), i64::try_from(self.by_symbol.len()).unwrap_or(i64::MAX));
        out.insert("global".to_string(), i64::try_from(self.global.read().len()).unwrap_or(i64::MAX));
        out
    }

    fn resolve(&self, ids: &[LimitId]) -> Vec<RiskLimit> {
        ids.iter()
            .filter_map(|id| self.limits.get(id).map(|e| e.clone()))
            .collect()
    }

    fn insert_indexed(&self, limit: RiskLimit) {
        let scope = limit.scope();
        let id = limit.id;
        self.invalidate(&limit);
        self.limits.insert(id, limit);
        match scope {
            Scope::User(user_id) => self.by_user.entry(user_id).or_default().push(id),
            Scope::Symbol(symbol) => self.by_symbol.entry(symbol).or_default().push(id),
            Scope::Global => self.global.write().push(id),
        }
    }

    fn remove_indexed(&self, limit: &RiskLimit) {
        self.limits.remove(&limit.id);
        match limit.scope() {
            Scope::User(user_id) => {
                if let Some(mut ids) = self.by_user.get_mut(&user_id) {
                    ids.retain(|id| *id != limit.id);
                }
            }
            Scope::Symbol(symbol) => {
                if let Some(mut ids) = self.by_symbol.get_mut(&symbol) {
                    ids.retain(|id| *id != limit.id);
                }
            }
            Scope::Global => self.global.write().retain(|id| *id != limit.id),
        }
        self.invalidate(limit);
    }

    fn invalidate(&self, limit: &RiskLimit) {
        let keys = [
            format!("user_limits:{}", limit.user_id),
            format!("symbol_limits:{}", limit.symbol),
            "global_limits".to_string(),
        ];
        self.invalidate_keys(&keys);
    }

    fn invalidate_keys(&self, keys: &[String]) {
        let mut cache = self.cache.write();
        for key in keys {
            cache.remove(key);
        }
    }

    fn cached(&self, key: &str) -> Option<Vec<RiskLimit>> {
        let cache = self.cache.read();
        let entry = cache.get(key)?;
        if entry.inserted_at.elapsed() < CACHE_TTL {
            Some(entry.limits.clone())
        } else {
            None
        }
    }

    fn store_cache(&self, key: String, limits: Vec<RiskLimit>) {
        self.cache.write().insert(
            key,
            CacheEntry {
                inserted_at: Instant::now(),
                limits,
            },
        );
    }
}

/// Construct a new limit ready for [`LimitStore::add`].
#[must_use]
pub fn new_limit(
    user_id: UserId,
    symbol: Symbol,
    limit_type: LimitType,
    value: f64,
    warning: Option<f64>,
) -> RiskLimit {
    RiskLimit {
        id: Uuid::nil(),
        user_id,
        symbol,
        limit_type,
        value,
        warning,
        enabled: true,
        created_at: Ts::now(),
        updated_at: Ts::now(),
        time_window: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(s: &str) -> UserId {
        UserId::from(s)
    }
    fn sym(s: &str) -> Symbol {
        Symbol::from(s)
    }

    #[test]
    fn add_rejects_nonpositive_value() {
        let store = LimitStore::new();
        let limit = new_limit(user("u1"), sym(""), LimitType::OrderSize, 0.0, None);
        assert!(matches!(store.add(limit), Err(RiskError::InvalidArgument(_))));
    }

    #[test]
    fn add_assigns_id_and_timestamps() {
        let store = LimitStore::new();
        let limit = new_limit(user("u1"), sym(""), LimitType::OrderSize, 1000.0, None);
        let stored = store.add(limit).unwrap();
        assert_ne!(stored.id, Uuid::nil());
        assert_eq!(stored.created_at, stored.updated_at);
    }

    #[test]
    fn user_scoped_limit_is_returned_for_user() {
        let store = LimitStore::new();
        let limit = new_limit(user("u1"), sym(""), LimitType::OrderSize, 1000.0, None);
        store.add(limit).unwrap();
        let limits = store.get_for_user(&user("u1"));
        assert_eq!(limits.len(), 1);
        assert_eq!(limits[0].limit_type, LimitType::OrderSize);
        assert!(store.get_for_user(&user("u2")).is_empty());
    }

    #[test]
    fn symbol_scoped_limit_applies_to_all_users() {
        let store = LimitStore::new();
        let limit = new_limit(user(""), sym("BTC-USD"), LimitType::Position, 5.0, None);
        store.add(limit).unwrap();
        assert_eq!(store.get_for_symbol(&sym("BTC-USD")).len(), 1);
        assert!(store.get_global().is_empty());
    }

    #[test]
    fn global_limit_has_empty_scope() {
        let store = LimitStore::new();
        let limit = new_limit(user(""), sym(""), LimitType::DailyLoss, 5000.0, None);
        store.add(limit).unwrap();
        assert_eq!(store.get_global().len(), 1);
    }

    #[test]
    fn update_preserves_id_and_created_at() {
        let store = LimitStore::new();
        let original = store
            .add(new_limit(user("u1"), sym(""), LimitType::OrderSize, 100.0, None))
            .unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let mut changed = original.clone();
        changed.value = 200.0;
        let updated = store.update(changed).unwrap();
        assert_eq!(updated.id, original.id);
        assert_eq!(updated.created_at, original.created_at);
        assert!(updated.updated_at.as_millis() >= original.updated_at.as_millis());
        assert_eq!(store.get_for_user(&user("u1"))[0].value, 200.0);
    }

    #[test]
    fn update_missing_limit_not_found() {
        let store = LimitStore::new();
        let missing = new_limit(user("u1"), sym(""), LimitType::OrderSize, 1.0, None);
        assert!(matches!(store.update(missing), Err(RiskError::NotFound(_))));
    }

    #[test]
    fn delete_requires_matching_owner() {
        let store = LimitStore::new();
        let stored = store
            .add(new_limit(user("u1"), sym(""), LimitType::OrderSize, 100.0, None))
            .unwrap();
        assert!(matches!(
            store.delete(&user("someone-else"), stored.id),
            Err(RiskError::NotFound(_))
        ));
        store.delete(&user("u1"), stored.id).unwrap();
        assert!(store.get_for_user(&user("u1")).is_empty());
    }

    #[test]
    fn disable_then_resolve_threshold_skips_it() {
        let store = LimitStore::new();
        let stored = store
            .add(new_limit(user("u1"), sym(""), LimitType::OrderSize, 100.0, None))
            .unwrap();
        store.disable(&user("u1"), stored.id).unwrap();
        assert!(store
            .resolve_threshold(&user("u1"), &sym("BTC-USD"), LimitType::OrderSize)
            .is_none());
    }

    #[test]
    fn resolve_threshold_prefers_user_over_symbol_over_global() {
        let store = LimitStore::new();
        store
            .add(new_limit(user(""), sym(""), LimitType::OrderSize, 1.0, None))
            .unwrap();
        store
            .add(new_limit(user(""), sym("BTC-USD"), LimitType::OrderSize, 2.0, None))
            .unwrap();
        store
            .add(new_limit(user("u1"), sym(""), LimitType::OrderSize, 3.0, None))
            .unwrap();

        let resolved = store
            .resolve_threshold(&user("u1"), &sym("BTC-USD"), LimitType::OrderSize)
            .unwrap();
        assert_eq!(resolved.value, 3.0);

        let resolved = store
            .resolve_threshold(&user("u2"), &sym("BTC-USD"), LimitType::OrderSize)
            .unwrap();
        assert_eq!(resolved.value, 2.0);

        let resolved = store
            .resolve_threshold(&user("u2"), &sym("ETH-USD"), LimitType::OrderSize)
            .unwrap();
        assert_eq!(resolved.value, 1.0);
    }

    #[test]
    fn mutation_invalidates_cache() {
        let store = LimitStore::new();
        let stored = store
            .add(new_limit(user("u1"), sym(""), LimitType::OrderSize, 100.0, None))
            .unwrap();
        assert_eq!(store.get_for_user(&user("u1"))[0].value, 100.0);
        let mut changed = stored.clone();
        changed.value = 500.0;
        store.update(changed).unwrap();
        assert_eq!(store.get_for_user(&user("u1"))[0].value, 500.0);
    }
}
