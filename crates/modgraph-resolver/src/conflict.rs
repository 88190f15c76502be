//! Per-module version conflict resolution.
//!
//! Each module moves through `Unresolved -> Resolving -> Resolved | Conflicted`.
//! Requests are keyed by the edge that produced them so they can be withdrawn
//! when the requesting node is evicted.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use modgraph_core::config::{ConflictStrategy, DynamicPolicyKind};
use modgraph_core::module::{ComponentId, ModuleIdentity};
use modgraph_util::errors::ModgraphError;
use tracing::debug;

use crate::metadata::ComponentMetadata;
use crate::selector::VersionSelector;
use crate::version::Version;

/// Identifies a request; the graph builder uses its edge ids.
pub type RequestId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Unresolved,
    Resolving,
    Resolved,
    Conflicted,
}

/// One version request for a module.
#[derive(Debug, Clone)]
pub struct VersionRequest {
    pub requester: ComponentId,
    pub selector: VersionSelector,
    pub rejection: Option<VersionSelector>,
    /// The version this request proposes. `None` when nothing available
    /// satisfies the selector.
    pub candidate: Option<Version>,
    pub forced: bool,
}

/// The selection before and after a request was added or removed.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub previous: Option<Version>,
    pub current: Option<Version>,
}

impl Selection {
    pub fn changed(&self) -> bool {
        match (&self.previous, &self.current) {
            (Some(a), Some(b)) => a.as_str() != b.as_str(),
            (None, None) => false,
            _ => true,
        }
    }
}

/// Why a module could not be resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictDetail {
    pub requesters: Vec<String>,
    pub reason: String,
}

/// Tie-break between dynamic selectors when no exact or forced request exists.
pub trait DynamicVersionPolicy: Send + Sync + fmt::Debug {
    /// Pick one of `candidates` given the dynamic selectors in force.
    fn choose(&self, candidates: &[&Version], selectors: &[&VersionSelector]) -> Option<Version>;
}

/// Highest candidate accepted by every dynamic selector, else the highest.
#[derive(Debug, Default)]
pub struct HighestAccepted;

impl DynamicVersionPolicy for HighestAccepted {
    fn choose(&self, candidates: &[&Version], selectors: &[&VersionSelector]) -> Option<Version> {
        let mut sorted: Vec<&Version> = candidates.to_vec();
        sorted.sort_by(|a, b| b.cmp(a));
        sorted
            .iter()
            .find(|v| selectors.iter().all(|s| s.accept(v)))
            .or(sorted.first())
            .map(|v| (*v).clone())
    }
}

/// Lowest candidate accepted by every dynamic selector, else the lowest.
#[derive(Debug, Default)]
pub struct LowestAccepted;

impl DynamicVersionPolicy for LowestAccepted {
    fn choose(&self, candidates: &[&Version], selectors: &[&VersionSelector]) -> Option<Version> {
        let mut sorted: Vec<&Version> = candidates.to_vec();
        sorted.sort();
        sorted
            .iter()
            .find(|v| selectors.iter().all(|s| s.accept(v)))
            .or(sorted.first())
            .map(|v| (*v).clone())
    }
}

pub fn policy_for(kind: DynamicPolicyKind) -> Box<dyn DynamicVersionPolicy> {
    match kind {
        DynamicPolicyKind::Highest => Box::new(HighestAccepted),
        DynamicPolicyKind::Lowest => Box::new(LowestAccepted),
    }
}

#[derive(Debug)]
struct ModuleResolution {
    state: ModuleState,
    requests: BTreeMap<RequestId, VersionRequest>,
    selected: Option<Version>,
    reason: &'static str,
    conflict: Option<ConflictDetail>,
    reselections: u32,
    /// Versions whose metadata failed a selector, with the failure reason.
    metadata_rejected: BTreeMap<String, String>,
}

impl ModuleResolution {
    fn new() -> Self {
        Self {
            state: ModuleState::Unresolved,
            requests: BTreeMap::new(),
            selected: None,
            reason: "",
            conflict: None,
            reselections: 0,
            metadata_rejected: BTreeMap::new(),
        }
    }

    fn requesters(&self) -> Vec<String> {
        let set: BTreeSet<String> = self
            .requests
            .values()
            .map(|r| format!("{} ({})", r.requester, r.selector))
            .collect();
        set.into_iter().collect()
    }
}

enum Outcome {
    Selected(Version, &'static str),
    Conflict(String),
    Unresolved,
}

/// Chooses one version per module from all requests seen so far.
#[derive(Debug)]
pub struct ConflictResolver {
    modules: BTreeMap<ModuleIdentity, ModuleResolution>,
    strategy: ConflictStrategy,
    policy: Box<dyn DynamicVersionPolicy>,
    max_reselections: u32,
}

impl ConflictResolver {
    pub fn new(
        strategy: ConflictStrategy,
        policy: Box<dyn DynamicVersionPolicy>,
        max_reselections: u32,
    ) -> Self {
        Self {
            modules: BTreeMap::new(),
            strategy,
            policy,
            max_reselections,
        }
    }

    pub fn add_request(
        &mut self,
        module: &ModuleIdentity,
        id: RequestId,
        request: VersionRequest,
    ) -> Result<Selection, ModgraphError> {
        self.modules
            .entry(module.clone())
            .or_insert_with(ModuleResolution::new)
            .requests
            .insert(id, request);
        self.reselect(module)
    }

    pub fn remove_request(
        &mut self,
        module: &ModuleIdentity,
        id: RequestId,
    ) -> Result<Selection, ModgraphError> {
        let removed = self
            .modules
            .get_mut(module)
            .is_some_and(|entry| entry.requests.remove(&id).is_some());
        if removed {
            return self.reselect(module);
        }
        let current = self.selected(module).cloned();
        Ok(Selection {
            previous: current.clone(),
            current,
        })
    }

    pub fn state(&self, module: &ModuleIdentity) -> ModuleState {
        self.modules
            .get(module)
            .map_or(ModuleState::Unresolved, |m| m.state)
    }

    pub fn selected(&self, module: &ModuleIdentity) -> Option<&Version> {
        self.modules.get(module).and_then(|m| m.selected.as_ref())
    }

    pub fn conflict(&self, module: &ModuleIdentity) -> Option<&ConflictDetail> {
        self.modules.get(module).and_then(|m| m.conflict.as_ref())
    }

    /// Check the selected version's metadata against selectors that need it.
    /// A failing check turns the module into a conflict.
    pub fn verify_metadata(
        &mut self,
        module: &ModuleIdentity,
        metadata: &ComponentMetadata,
    ) -> Result<Selection, ModgraphError> {
        let Some(entry) = self.modules.get_mut(module) else {
            return Ok(Selection {
                previous: None,
                current: None,
            });
        };
        let unchanged = Selection {
            previous: entry.selected.clone(),
            current: entry.selected.clone(),
        };
        let is_selected = entry
            .selected
            .as_ref()
            .is_some_and(|v| v.as_str() == metadata.id.version);
        if !is_selected || entry.requests.values().any(|r| r.forced) {
            return Ok(unchanged);
        }
        let failing: Vec<String> = entry
            .requests
            .values()
            .filter(|r| {
                let needs_check = r.selector.requires_metadata() || r.selector.is_filter();
                (needs_check && !r.selector.accept_metadata(metadata))
                    || r.rejection.as_ref().is_some_and(|s| !s.accept_metadata(metadata))
            })
            .map(|r| format!("{} ({})", r.requester, r.selector))
            .collect();
        if failing.is_empty() {
            return Ok(unchanged);
        }
        let reason = format!(
            "{} with status {} is not accepted by {}",
            metadata.id,
            metadata.status,
            failing.join(", ")
        );
        entry
            .metadata_rejected
            .insert(metadata.id.version.clone(), reason);
        self.reselect(module)
    }

    /// Mark every module still resolving as resolved and return the
    /// selected versions.
    pub fn freeze(&mut self) -> BTreeMap<ModuleIdentity, Version> {
        let mut resolved = BTreeMap::new();
        for (module, entry) in &mut self.modules {
            if entry.state == ModuleState::Resolving {
                entry.state = ModuleState::Resolved;
            }
            if entry.state == ModuleState::Resolved {
                if let Some(ref v) = entry.selected {
                    resolved.insert(module.clone(), v.clone());
                }
            }
        }
        resolved
    }

    /// Every module that ended up conflicted.
    pub fn conflicts(&self) -> Vec<(ModuleIdentity, ConflictDetail)> {
        self.modules
            .iter()
            .filter(|(_, e)| e.state == ModuleState::Conflicted)
            .filter_map(|(m, e)| e.conflict.clone().map(|c| (m.clone(), c)))
            .collect()
    }

    /// Requests that did not get the version they asked for.
    pub fn report(&self) -> ConflictReport {
        let mut report = ConflictReport::new();
        for (module, entry) in &self.modules {
            let Some(ref selected) = entry.selected else {
                continue;
            };
            let mut seen = BTreeSet::new();
            for request in entry.requests.values() {
                let Some(ref candidate) = request.candidate else {
                    continue;
                };
                if candidate.as_str() == selected.as_str()
                    || !seen.insert(request.selector.to_string())
                {
                    continue;
                }
                report.add(ResolvedConflict {
                    module: module.clone(),
                    requested: request.selector.to_string(),
                    resolved: selected.to_string(),
                    reason: entry.reason.to_string(),
                });
            }
        }
        report
    }

    fn reselect(&mut self, module: &ModuleIdentity) -> Result<Selection, ModgraphError> {
        let Some(entry) = self.modules.get(module) else {
            return Ok(Selection {
                previous: None,
                current: None,
            });
        };
        let outcome = self.select(entry);
        let max = self.max_reselections;
        let Some(entry) = self.modules.get_mut(module) else {
            return Ok(Selection {
                previous: None,
                current: None,
            });
        };
        let previous = entry.selected.clone();
        match outcome {
            Outcome::Selected(version, reason) => {
                entry.state = ModuleState::Resolving;
                entry.selected = Some(version);
                entry.reason = reason;
                entry.conflict = None;
            }
            Outcome::Conflict(reason) => {
                debug!("{module}: conflict: {reason}");
                entry.state = ModuleState::Conflicted;
                entry.selected = None;
                entry.conflict = Some(ConflictDetail {
                    requesters: entry.requesters(),
                    reason,
                });
            }
            Outcome::Unresolved => {
                entry.state = ModuleState::Unresolved;
                entry.selected = None;
                entry.conflict = None;
            }
        }
        let selection = Selection {
            previous,
            current: entry.selected.clone(),
        };
        if selection.changed() && selection.previous.is_some() {
            entry.reselections += 1;
            debug!(
                "{module}: selection {:?} -> {:?}",
                selection.previous.as_ref().map(Version::as_str),
                selection.current.as_ref().map(Version::as_str)
            );
            if entry.reselections > max {
                return Err(ModgraphError::UnstableGraph {
                    module: module.to_string(),
                    count: entry.reselections,
                });
            }
        }
        Ok(selection)
    }

    fn select(&self, entry: &ModuleResolution) -> Outcome {
        let requests: Vec<&VersionRequest> = entry.requests.values().collect();
        if requests.is_empty() {
            return Outcome::Unresolved;
        }

        if let Some(winner) = requests
            .iter()
            .filter(|r| r.forced)
            .filter_map(|r| r.candidate.as_ref())
            .max()
        {
            return Outcome::Selected(winner.clone(), "forced");
        }

        let positives: Vec<&VersionRequest> = requests
            .iter()
            .copied()
            .filter(|r| !r.selector.is_filter() && r.candidate.is_some())
            .collect();

        if self.strategy == ConflictStrategy::Fail {
            let distinct: BTreeSet<&str> = positives
                .iter()
                .filter_map(|r| r.candidate.as_ref())
                .map(Version::as_str)
                .collect();
            if distinct.len() > 1 {
                return Outcome::Conflict(format!(
                    "conflict strategy is 'fail' and versions {} were requested",
                    distinct.into_iter().collect::<Vec<_>>().join(", ")
                ));
            }
        }

        let mut exact_by_requester: BTreeMap<&ComponentId, BTreeSet<&str>> = BTreeMap::new();
        for r in positives.iter().filter(|r| r.selector.matches_unique_version()) {
            if let Some(ref c) = r.candidate {
                exact_by_requester
                    .entry(&r.requester)
                    .or_default()
                    .insert(c.as_str());
            }
        }
        if let Some((requester, versions)) = exact_by_requester.iter().find(|(_, v)| v.len() > 1) {
            return Outcome::Conflict(format!(
                "{requester} requires both {}",
                versions.iter().copied().collect::<Vec<_>>().join(" and ")
            ));
        }

        let exact_winner = positives
            .iter()
            .filter(|r| r.selector.matches_unique_version())
            .filter_map(|r| r.candidate.as_ref())
            .max();

        let (winner, reason) = if let Some(v) = exact_winner {
            (v.clone(), "highest exact version wins")
        } else if !positives.is_empty() {
            let candidates: Vec<&Version> =
                positives.iter().filter_map(|r| r.candidate.as_ref()).collect();
            let selectors: Vec<&VersionSelector> = positives.iter().map(|r| &r.selector).collect();
            match self.policy.choose(&candidates, &selectors) {
                Some(v) => (v, "dynamic version policy"),
                None => return Outcome::Unresolved,
            }
        } else {
            // Only filters: pick among the versions they allow.
            let candidates: Vec<&Version> =
                requests.iter().filter_map(|r| r.candidate.as_ref()).collect();
            match self.policy.choose(&candidates, &[]) {
                Some(v) => (v, "only filters requested"),
                None => return Outcome::Unresolved,
            }
        };

        let rejecting: Vec<String> = requests
            .iter()
            .filter(|r| {
                let checks = r.selector.is_dynamic() || r.selector.is_filter();
                (checks && !r.selector.accept(&winner))
                    || r.rejection.as_ref().is_some_and(|s| !s.accept(&winner))
            })
            .map(|r| format!("{} ({})", r.requester, r.selector))
            .collect();
        if !rejecting.is_empty() {
            return Outcome::Conflict(format!(
                "selected {winner} is rejected by {}",
                rejecting.join(", ")
            ));
        }
        if let Some(reason) = entry.metadata_rejected.get(winner.as_str()) {
            return Outcome::Conflict(reason.clone());
        }
        Outcome::Selected(winner, reason)
    }
}

/// A report of requests that were overridden during resolution.
#[derive(Debug, Default)]
pub struct ConflictReport {
    pub conflicts: Vec<ResolvedConflict>,
}

/// A request whose version lost to another request for the same module.
#[derive(Debug, Clone)]
pub struct ResolvedConflict {
    pub module: ModuleIdentity,
    pub requested: String,
    pub resolved: String,
    pub reason: String,
}

impl ConflictReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, conflict: ResolvedConflict) {
        self.conflicts.push(conflict);
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.conflicts.is_empty() {
            return write!(f, "No version conflicts.");
        }
        writeln!(f, "Version conflicts ({}):", self.conflicts.len())?;
        for c in &self.conflicts {
            writeln!(f, "  {c}")?;
        }
        Ok(())
    }
}

impl fmt::Display for ResolvedConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} requested {} but resolved {} ({})",
            self.module, self.requested, self.resolved, self.reason
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Status;

    fn m() -> ModuleIdentity {
        ModuleIdentity::new("org.example", "lib")
    }

    fn requester(name: &str) -> ComponentId {
        ComponentId::parse(&format!("org.req:{name}:1.0")).unwrap()
    }

    fn exact(from: &str, v: &str) -> VersionRequest {
        VersionRequest {
            requester: requester(from),
            selector: VersionSelector::exact(v),
            rejection: None,
            candidate: Some(Version::parse(v)),
            forced: false,
        }
    }

    fn dynamic(from: &str, notation: &str, candidate: &str) -> VersionRequest {
        VersionRequest {
            requester: requester(from),
            selector: VersionSelector::parse(notation).unwrap(),
            rejection: None,
            candidate: Some(Version::parse(candidate)),
            forced: false,
        }
    }

    fn resolver() -> ConflictResolver {
        ConflictResolver::new(ConflictStrategy::Latest, Box::new(HighestAccepted), 32)
    }

    fn selected(r: &ConflictResolver) -> Option<&str> {
        r.selected(&m()).map(Version::as_str)
    }

    #[test]
    fn first_request_moves_to_resolving() {
        let mut r = resolver();
        assert_eq!(r.state(&m()), ModuleState::Unresolved);
        let sel = r.add_request(&m(), 0, exact("a", "1.0")).unwrap();
        assert!(sel.changed());
        assert_eq!(r.state(&m()), ModuleState::Resolving);
        assert_eq!(selected(&r), Some("1.0"));
    }

    #[test]
    fn highest_exact_wins() {
        let mut r = resolver();
        r.add_request(&m(), 0, exact("a", "2.0")).unwrap();
        let sel = r.add_request(&m(), 1, exact("b", "1.0")).unwrap();
        assert!(!sel.changed());
        assert_eq!(selected(&r), Some("2.0"));
        assert_eq!(r.freeze().get(&m()).map(Version::as_str), Some("2.0"));
        assert_eq!(r.state(&m()), ModuleState::Resolved);
    }

    #[test]
    fn forced_wins_over_higher() {
        let mut r = resolver();
        r.add_request(&m(), 0, exact("a", "2.0")).unwrap();
        let mut forced = exact("b", "1.0");
        forced.forced = true;
        let sel = r.add_request(&m(), 1, forced).unwrap();
        assert!(sel.changed());
        assert_eq!(selected(&r), Some("1.0"));
        assert_eq!(r.report().len(), 1);
    }

    #[test]
    fn dynamic_never_overrides_exact_but_must_accept() {
        let mut r = resolver();
        r.add_request(&m(), 0, exact("a", "1.5")).unwrap();
        r.add_request(&m(), 1, dynamic("b", "[1.0,2.0)", "1.9")).unwrap();
        assert_eq!(selected(&r), Some("1.5"));

        r.add_request(&m(), 2, dynamic("c", "[2.0,3.0)", "2.5")).unwrap();
        assert_eq!(r.state(&m()), ModuleState::Conflicted);
        assert_eq!(selected(&r), None);
        let detail = r.conflict(&m()).unwrap();
        assert_eq!(detail.requesters.len(), 3);
    }

    #[test]
    fn negation_filters_without_proposing() {
        let mut r = resolver();
        r.add_request(&m(), 0, exact("a", "1.0")).unwrap();
        let not = VersionRequest {
            requester: requester("b"),
            selector: VersionSelector::parse("!1.0").unwrap(),
            rejection: None,
            candidate: Some(Version::parse("3.0")),
            forced: false,
        };
        r.add_request(&m(), 1, not).unwrap();
        assert_eq!(r.state(&m()), ModuleState::Conflicted);
        r.remove_request(&m(), 0).unwrap();
        assert_eq!(selected(&r), Some("3.0"));
    }

    #[test]
    fn same_requester_contradiction() {
        let mut r = resolver();
        r.add_request(&m(), 0, exact("root", "1.0")).unwrap();
        r.add_request(&m(), 1, exact("root", "2.0")).unwrap();
        assert_eq!(r.state(&m()), ModuleState::Conflicted);
        assert!(r.freeze().is_empty());
        let (_, detail) = &r.conflicts()[0];
        assert!(detail.reason.contains("1.0 and 2.0"));
    }

    #[test]
    fn fail_strategy_rejects_any_difference() {
        let mut r = ConflictResolver::new(ConflictStrategy::Fail, Box::new(HighestAccepted), 32);
        r.add_request(&m(), 0, exact("a", "1.0")).unwrap();
        r.add_request(&m(), 1, exact("b", "1.0")).unwrap();
        assert_eq!(selected(&r), Some("1.0"));
        r.add_request(&m(), 2, exact("c", "2.0")).unwrap();
        assert_eq!(r.state(&m()), ModuleState::Conflicted);
    }

    #[test]
    fn dynamic_policy_is_pluggable() {
        let mut high = resolver();
        let mut low = ConflictResolver::new(ConflictStrategy::Latest, Box::new(LowestAccepted), 32);
        for r in [&mut high, &mut low] {
            r.add_request(&m(), 0, dynamic("a", "[1.0,3.0)", "2.5")).unwrap();
            r.add_request(&m(), 1, dynamic("b", "[1.0,2.0)", "1.9")).unwrap();
        }
        // 2.5 is outside [1.0,2.0), so both policies settle on 1.9
        assert_eq!(selected(&high), Some("1.9"));
        assert_eq!(selected(&low), Some("1.9"));

        let mut high = resolver();
        let mut low = ConflictResolver::new(ConflictStrategy::Latest, Box::new(LowestAccepted), 32);
        for r in [&mut high, &mut low] {
            r.add_request(&m(), 0, dynamic("a", "1.+", "1.8")).unwrap();
            r.add_request(&m(), 1, dynamic("b", "[1.0,2.0)", "1.9")).unwrap();
        }
        assert_eq!(selected(&high), Some("1.9"));
        assert_eq!(selected(&low), Some("1.8"));
    }

    #[test]
    fn rejection_list_applies_to_winner() {
        let mut r = resolver();
        r.add_request(&m(), 0, exact("a", "1.3")).unwrap();
        let mut req = exact("b", "1.2");
        req.rejection = Some(VersionSelector::rejecting(&["1.3"]).unwrap());
        r.add_request(&m(), 1, req).unwrap();
        assert_eq!(r.state(&m()), ModuleState::Conflicted);
    }

    #[test]
    fn metadata_verification_can_conflict() {
        let mut r = resolver();
        r.add_request(&m(), 0, exact("a", "2.0")).unwrap();
        r.add_request(&m(), 1, dynamic("b", "latest.release", "1.0")).unwrap();
        assert_eq!(selected(&r), Some("2.0"));
        let meta = ComponentMetadata::new(ComponentId::new(m(), "2.0")).with_status(Status::Integration);
        let sel = r.verify_metadata(&m(), &meta).unwrap();
        assert!(sel.changed());
        assert_eq!(r.state(&m()), ModuleState::Conflicted);
    }

    #[test]
    fn oscillation_is_bounded() {
        let mut r = ConflictResolver::new(ConflictStrategy::Latest, Box::new(HighestAccepted), 3);
        r.add_request(&m(), 0, exact("a", "1.0")).unwrap();
        let mut result = Ok(());
        for i in 0..10 {
            result = r
                .add_request(&m(), 1, exact("b", if i % 2 == 0 { "2.0" } else { "0.5" }))
                .map(|_| ());
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(ModgraphError::UnstableGraph { .. })));
    }

    #[test]
    fn removing_last_request_unresolves() {
        let mut r = resolver();
        r.add_request(&m(), 7, exact("a", "1.0")).unwrap();
        let sel = r.remove_request(&m(), 7).unwrap();
        assert!(sel.changed());
        assert_eq!(r.state(&m()), ModuleState::Unresolved);
    }

    #[test]
    fn removing_a_request_reselects_or_keeps_selection() {
        let mut r = resolver();
        r.add_request(&m(), 0, exact("a", "1.0")).unwrap();
        r.add_request(&m(), 1, exact("b", "2.0")).unwrap();

        let sel = r.remove_request(&m(), 1).unwrap();
        assert!(sel.changed());
        assert_eq!(sel.current.as_ref().map(Version::as_str), Some("1.0"));

        // Unknown ids and modules leave everything as it was.
        let sel = r.remove_request(&m(), 42).unwrap();
        assert!(!sel.changed());
        assert_eq!(selected(&r), Some("1.0"));
        let other = ModuleIdentity::new("org.other", "lib");
        let sel = r.remove_request(&other, 0).unwrap();
        assert!(!sel.changed());
        assert!(sel.current.is_none());
    }

    #[test]
    fn empty_report_display() {
        let report = ConflictReport::new();
        assert!(report.is_empty());
        assert_eq!(report.to_string(), "No version conflicts.");
    }
}
