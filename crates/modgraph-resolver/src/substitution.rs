//! Substitution rules, applied to each dependency before it becomes a
//! version request.

use modgraph_core::module::ModuleIdentity;
use modgraph_core::requirements::SubstitutionDecl;
use modgraph_util::errors::ModgraphError;
use tracing::debug;

use crate::excludes::{Pattern, SubgraphConstraints};
use crate::metadata::DependencyMetadata;
use crate::selector::VersionSelector;

#[derive(Debug, Clone)]
pub enum SubstitutionAction {
    /// Keep the module, replace its version selector.
    UseVersion(VersionSelector),
    /// Redirect the request to another module.
    UseModule {
        module: ModuleIdentity,
        selector: Option<VersionSelector>,
    },
    /// Only force the request as declared.
    ForceOnly,
}

#[derive(Debug, Clone)]
pub struct SubstitutionRule {
    pub group: Pattern,
    pub name: Pattern,
    pub within: SubgraphConstraints,
    pub action: SubstitutionAction,
    pub force: bool,
    pub reason: Option<String>,
}

impl SubstitutionRule {
    pub fn from_decl(decl: &SubstitutionDecl) -> Result<Self, ModgraphError> {
        let (group, name) = decl.module.split_once(':').ok_or_else(|| ModgraphError::Pattern {
            pattern: decl.module.clone(),
            reason: "substitutions match group:name".to_string(),
        })?;
        let selector = decl
            .use_version
            .as_deref()
            .map(VersionSelector::parse)
            .transpose()?;
        let action = match (&decl.use_module, selector) {
            (Some(target), selector) => SubstitutionAction::UseModule {
                module: ModuleIdentity::parse(target).ok_or_else(|| ModgraphError::Manifest {
                    message: format!("use-module '{target}' is not a group:name identifier"),
                })?,
                selector,
            },
            (None, Some(selector)) => SubstitutionAction::UseVersion(selector),
            (None, None) if decl.force => SubstitutionAction::ForceOnly,
            (None, None) => {
                return Err(ModgraphError::Manifest {
                    message: format!(
                        "substitution for '{}' needs use-module, use-version or force",
                        decl.module
                    ),
                })
            }
        };
        Ok(Self {
            group: Pattern::new(group)?,
            name: Pattern::new(name)?,
            within: SubgraphConstraints::parse(&decl.within)?,
            action,
            force: decl.force,
            reason: decl.reason.clone(),
        })
    }

    pub fn matches(&self, module: &ModuleIdentity) -> bool {
        self.group.is_match(&module.group)
            && self.name.is_match(&module.name)
            && self.within.matches(module)
    }
}

/// Ordered rules; the first match wins.
#[derive(Debug, Clone, Default)]
pub struct SubstitutionRules {
    rules: Vec<SubstitutionRule>,
}

impl SubstitutionRules {
    pub fn new(rules: Vec<SubstitutionRule>) -> Self {
        Self { rules }
    }

    pub fn from_decls(decls: &[SubstitutionDecl]) -> Result<Self, ModgraphError> {
        Ok(Self::new(
            decls
                .iter()
                .map(SubstitutionRule::from_decl)
                .collect::<Result<Vec<_>, _>>()?,
        ))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The dependency as rewritten by the first matching rule, if any.
    pub fn apply(&self, dependency: &DependencyMetadata) -> Option<DependencyMetadata> {
        let rule = self.rules.iter().find(|r| r.matches(&dependency.module))?;
        let mut substituted = dependency.clone();
        match rule.action {
            SubstitutionAction::UseVersion(ref selector) => substituted.selector = selector.clone(),
            SubstitutionAction::UseModule {
                ref module,
                ref selector,
            } => {
                substituted.module = module.clone();
                if let Some(selector) = selector {
                    substituted.selector = selector.clone();
                }
            }
            SubstitutionAction::ForceOnly => {}
        }
        substituted.forced |= rule.force;
        debug!(
            "substituted {dependency} with {substituted}{}",
            rule.reason
                .as_deref()
                .map(|r| format!(" ({r})"))
                .unwrap_or_default()
        );
        Some(substituted)
    }
}
