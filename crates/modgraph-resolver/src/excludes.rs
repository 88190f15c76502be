//! Exclude rules and their boolean algebra.
//!
//! An [`ExcludeSpec`] is evaluated per path: exclusions accumulate by
//! [`union`](ExcludeSpec::union) along a path, and paths converging on one
//! node combine by [`intersect`](ExcludeSpec::intersect), so a module or
//! artifact is only excluded at a node when every path reaching it excludes it.

use std::collections::BTreeSet;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use globset::{Glob, GlobMatcher};
use modgraph_core::module::{ArtifactName, ModuleIdentity};
use modgraph_core::requirements::ExcludeDecl;
use modgraph_util::errors::ModgraphError;

/// A compiled glob over one coordinate part (group, module or artifact name).
#[derive(Clone)]
pub struct Pattern {
    source: String,
    matcher: GlobMatcher,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, ModgraphError> {
        let invalid = |reason: String| ModgraphError::Pattern {
            pattern: source.to_string(),
            reason,
        };
        if source.trim().is_empty() {
            return Err(invalid("empty pattern".to_string()));
        }
        if source.contains(':') || source.chars().any(char::is_whitespace) {
            return Err(invalid("a pattern covers a single coordinate part".to_string()));
        }
        let glob = Glob::new(source).map_err(|e| invalid(e.to_string()))?;
        Ok(Self {
            source: source.to_string(),
            matcher: glob.compile_matcher(),
        })
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.matcher.is_match(value)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pattern({:?})", self.source)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Pattern {}

impl PartialOrd for Pattern {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pattern {
    fn cmp(&self, other: &Self) -> Ordering {
        self.source.cmp(&other.source)
    }
}

impl Hash for Pattern {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
    }
}

/// A single exclusion over `(group, module, artifact)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExcludeRule {
    /// Every module of a matching group.
    Group(Pattern),
    /// Every module with a matching name, whatever its group.
    Module(Pattern),
    ModuleId { group: Pattern, module: Pattern },
    /// Matching artifacts only; the owning module stays in the graph.
    Artifact {
        group: Option<Pattern>,
        module: Option<Pattern>,
        artifact: Pattern,
    },
}

impl ExcludeRule {
    pub fn excludes_module(&self, module: &ModuleIdentity) -> bool {
        match self {
            Self::Group(g) => g.is_match(&module.group),
            Self::Module(m) => m.is_match(&module.name),
            Self::ModuleId { group, module: name } => {
                group.is_match(&module.group) && name.is_match(&module.name)
            }
            Self::Artifact { .. } => false,
        }
    }

    pub fn excludes_artifact(&self, module: &ModuleIdentity, artifact: &ArtifactName) -> bool {
        match self {
            Self::Artifact {
                group,
                module: name,
                artifact: pattern,
            } => {
                group.as_ref().map_or(true, |g| g.is_match(&module.group))
                    && name.as_ref().map_or(true, |n| n.is_match(&module.name))
                    && pattern.is_match(&artifact.name)
            }
            _ => self.excludes_module(module),
        }
    }
}

impl fmt::Display for ExcludeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let part = |p: &Option<Pattern>| p.as_ref().map_or("*", |p| p.as_str()).to_string();
        match self {
            Self::Group(g) => write!(f, "{}:*", g.as_str()),
            Self::Module(m) => write!(f, "*:{}", m.as_str()),
            Self::ModuleId { group, module } => write!(f, "{}:{}", group.as_str(), module.as_str()),
            Self::Artifact {
                group,
                module,
                artifact,
            } => write!(f, "{}:{}!{}", part(group), part(module), artifact.as_str()),
        }
    }
}

/// A set of modules used to scope a rule to part of the graph.
///
/// The empty set is represented canonically by `modules == None` and means
/// "unconstrained".
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubgraphConstraints {
    modules: Option<Arc<BTreeSet<ModuleIdentity>>>,
}

impl SubgraphConstraints {
    pub fn empty() -> Self {
        Self { modules: None }
    }

    pub fn from_modules(modules: impl IntoIterator<Item = ModuleIdentity>) -> Self {
        let set: BTreeSet<ModuleIdentity> = modules.into_iter().collect();
        if set.is_empty() {
            Self::empty()
        } else {
            Self {
                modules: Some(Arc::new(set)),
            }
        }
    }

    /// Parse `group:name` entries as written in a `within` list.
    pub fn parse(entries: &[String]) -> Result<Self, ModgraphError> {
        let modules = entries
            .iter()
            .map(|e| {
                ModuleIdentity::parse(e).ok_or_else(|| ModgraphError::Pattern {
                    pattern: e.clone(),
                    reason: "'within' entries must be group:name".to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_modules(modules))
    }

    /// Union of two constraint sets.
    pub fn of(a: &Self, b: &Self) -> Self {
        match (&a.modules, &b.modules) {
            (None, _) => b.clone(),
            (_, None) => a.clone(),
            (Some(x), Some(y)) if Arc::ptr_eq(x, y) => a.clone(),
            (Some(x), Some(y)) => Self {
                modules: Some(Arc::new(x.union(y).cloned().collect())),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_none()
    }

    pub fn contains(&self, module: &ModuleIdentity) -> bool {
        self.modules.as_ref().is_some_and(|m| m.contains(module))
    }

    /// True when a rule scoped by these constraints applies to `module`.
    pub fn matches(&self, module: &ModuleIdentity) -> bool {
        self.is_empty() || self.contains(module)
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleIdentity> {
        self.modules.iter().flat_map(|m| m.iter())
    }
}

/// A rule restricted to target modules within a subgraph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopedRule {
    pub rule: ExcludeRule,
    pub within: SubgraphConstraints,
}

/// Immutable boolean combination of exclude rules.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ExcludeSpec {
    #[default]
    Nothing,
    Rule(Arc<ScopedRule>),
    /// Excludes what any member excludes.
    AnyOf(Arc<BTreeSet<ExcludeSpec>>),
    /// Excludes what every member excludes.
    AllOf(Arc<BTreeSet<ExcludeSpec>>),
}

impl ExcludeSpec {
    pub fn rule(rule: ExcludeRule) -> Self {
        Self::scoped(rule, SubgraphConstraints::empty())
    }

    pub fn scoped(rule: ExcludeRule, within: SubgraphConstraints) -> Self {
        Self::Rule(Arc::new(ScopedRule { rule, within }))
    }

    /// Compile declared exclusions into one spec. Malformed patterns fail here.
    pub fn from_decls(decls: &[ExcludeDecl]) -> Result<Self, ModgraphError> {
        let mut spec = Self::Nothing;
        for decl in decls {
            spec = spec.union(&Self::from_decl(decl)?);
        }
        Ok(spec)
    }

    fn from_decl(decl: &ExcludeDecl) -> Result<Self, ModgraphError> {
        let pattern = |p: &Option<String>| p.as_deref().map(Pattern::new).transpose();
        let group = pattern(&decl.group)?;
        let module = pattern(&decl.module)?;
        let artifact = pattern(&decl.artifact)?;
        let rule = match (group, module, artifact) {
            (group, module, Some(artifact)) => ExcludeRule::Artifact {
                group,
                module,
                artifact,
            },
            (Some(group), Some(module), None) => ExcludeRule::ModuleId { group, module },
            (Some(group), None, None) => ExcludeRule::Group(group),
            (None, Some(module), None) => ExcludeRule::Module(module),
            (None, None, None) => {
                return Err(ModgraphError::Pattern {
                    pattern: String::new(),
                    reason: "an exclude needs a group, module or artifact".to_string(),
                })
            }
        };
        Ok(Self::scoped(rule, SubgraphConstraints::parse(&decl.within)?))
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self, Self::Nothing)
    }

    /// Exclusions of either spec; used when extending a path by one edge.
    pub fn union(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Nothing, x) | (x, Self::Nothing) => x.clone(),
            (a, b) if a == b => a.clone(),
            (a, b) => {
                let mut members = BTreeSet::new();
                for spec in [a, b] {
                    match spec {
                        Self::AnyOf(inner) => members.extend(inner.iter().cloned()),
                        other => {
                            members.insert(other.clone());
                        }
                    }
                }
                // a | (a & b) == a
                let absorbed: Vec<Self> = members
                    .iter()
                    .filter(|m| match m {
                        Self::AllOf(inner) => members.iter().any(|o| inner.contains(o)),
                        _ => false,
                    })
                    .cloned()
                    .collect();
                for m in absorbed {
                    members.remove(&m);
                }
                Self::collapse(members, Self::AnyOf)
            }
        }
    }

    /// Exclusions common to both specs; used where paths converge.
    pub fn intersect(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Nothing, _) | (_, Self::Nothing) => Self::Nothing,
            (a, b) if a == b => a.clone(),
            (a, b) => {
                let mut members = BTreeSet::new();
                for spec in [a, b] {
                    match spec {
                        Self::AllOf(inner) => members.extend(inner.iter().cloned()),
                        other => {
                            members.insert(other.clone());
                        }
                    }
                }
                // a & (a | b) == a
                let absorbed: Vec<Self> = members
                    .iter()
                    .filter(|m| match m {
                        Self::AnyOf(inner) => members.iter().any(|o| inner.contains(o)),
                        _ => false,
                    })
                    .cloned()
                    .collect();
                for m in absorbed {
                    members.remove(&m);
                }
                Self::collapse(members, Self::AllOf)
            }
        }
    }

    fn collapse(mut members: BTreeSet<Self>, wrap: fn(Arc<BTreeSet<Self>>) -> Self) -> Self {
        if members.len() == 1 {
            if let Some(only) = members.pop_first() {
                return only;
            }
        }
        wrap(Arc::new(members))
    }

    pub fn excludes_module(&self, module: &ModuleIdentity) -> bool {
        match self {
            Self::Nothing => false,
            Self::Rule(r) => r.within.matches(module) && r.rule.excludes_module(module),
            Self::AnyOf(specs) => specs.iter().any(|s| s.excludes_module(module)),
            Self::AllOf(specs) => specs.iter().all(|s| s.excludes_module(module)),
        }
    }

    /// Module rules exclude every artifact of the modules they match.
    pub fn excludes_artifact(&self, module: &ModuleIdentity, artifact: &ArtifactName) -> bool {
        match self {
            Self::Nothing => false,
            Self::Rule(r) => r.within.matches(module) && r.rule.excludes_artifact(module, artifact),
            Self::AnyOf(specs) => specs.iter().any(|s| s.excludes_artifact(module, artifact)),
            Self::AllOf(specs) => specs.iter().all(|s| s.excludes_artifact(module, artifact)),
        }
    }

    /// False when no artifact can be excluded, so filtering may be skipped.
    pub fn may_exclude_artifacts(&self) -> bool {
        match self {
            Self::Nothing => false,
            Self::Rule(_) => true,
            Self::AnyOf(specs) | Self::AllOf(specs) => specs.iter().any(Self::may_exclude_artifacts),
        }
    }
}

impl fmt::Display for ExcludeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, specs: &BTreeSet<ExcludeSpec>, op: &str| {
            f.write_str("(")?;
            for (i, s) in specs.iter().enumerate() {
                if i > 0 {
                    write!(f, " {op} ")?;
                }
                write!(f, "{s}")?;
            }
            f.write_str(")")
        };
        match self {
            Self::Nothing => f.write_str("nothing"),
            Self::Rule(r) if r.within.is_empty() => write!(f, "{}", r.rule),
            Self::Rule(r) => {
                let within: Vec<String> = r.within.modules().map(|m| m.to_string()).collect();
                write!(f, "{} within [{}]", r.rule, within.join(", "))
            }
            Self::AnyOf(specs) => join(f, specs, "|"),
            Self::AllOf(specs) => join(f, specs, "&"),
        }
    }
}
