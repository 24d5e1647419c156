//! Permission checks applied to every cluster-mutating call.
//!
//! Nothing here is cached by callers: the engine asks on each call, so a
//! setter takes effect on the very next mutation.

use crate::error::{DeployError, Result};
use shipwright_core::config::DeployConfig;
use shipwright_core::deployment::ActionKind;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug)]
pub struct Guardrails {
    namespaces: RwLock<BTreeSet<String>>,
    actions: RwLock<BTreeSet<ActionKind>>,
    dry_run: AtomicBool,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Guardrails {
    pub fn new<N, A>(namespaces: N, actions: A, dry_run: bool) -> Self
    where
        N: IntoIterator<Item = String>,
        A: IntoIterator<Item = ActionKind>,
    {
        Self {
            namespaces: RwLock::new(namespaces.into_iter().collect()),
            actions: RwLock::new(actions.into_iter().collect()),
            dry_run: AtomicBool::new(dry_run),
        }
    }

    pub fn from_config(config: &DeployConfig) -> Self {
        Self::new(
            config.allowed_namespaces.iter().cloned(),
            config.allowed_actions.iter().copied(),
            config.dry_run,
        )
    }

    /// Namespace first, then action.
    pub fn check(&self, action: ActionKind, namespace: &str) -> Result<()> {
        if !read(&self.namespaces).contains(namespace) {
            return Err(DeployError::NamespaceNotAllowed(namespace.to_string()));
        }
        if !read(&self.actions).contains(&action) {
            return Err(DeployError::ActionNotAllowed(action));
        }
        Ok(())
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run.load(Ordering::SeqCst)
    }

    pub fn set_dry_run(&self, on: bool) {
        self.dry_run.store(on, Ordering::SeqCst);
    }

    pub fn allow_namespace(&self, namespace: impl Into<String>) {
        write(&self.namespaces).insert(namespace.into());
    }

    pub fn revoke_namespace(&self, namespace: &str) -> bool {
        write(&self.namespaces).remove(namespace)
    }

    pub fn set_allowed_actions(&self, actions: impl IntoIterator<Item = ActionKind>) {
        *write(&self.actions) = actions.into_iter().collect();
    }

    pub fn allowed_namespaces(&self) -> Vec<String> {
        read(&self.namespaces).iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> Guardrails {
        Guardrails::new(
            vec!["default".to_string()],
            vec![ActionKind::CreateDeployment, ActionKind::CreateService],
            false,
        )
    }

    #[test]
    fn namespace_checked_before_action() {
        let g = guard();
        assert!(g.check(ActionKind::CreateDeployment, "default").is_ok());
        assert!(matches!(
            g.check(ActionKind::Scale, "kube-system"),
            Err(DeployError::NamespaceNotAllowed(ns)) if ns == "kube-system"
        ));
        assert!(matches!(
            g.check(ActionKind::Scale, "default"),
            Err(DeployError::ActionNotAllowed(ActionKind::Scale))
        ));
    }

    #[test]
    fn changes_apply_to_next_check() {
        let g = guard();
        g.allow_namespace("staging");
        assert!(g.check(ActionKind::CreateService, "staging").is_ok());
        assert!(g.revoke_namespace("staging"));
        assert!(g.check(ActionKind::CreateService, "staging").is_err());

        g.set_allowed_actions([ActionKind::Scale]);
        assert!(g.check(ActionKind::Scale, "default").is_ok());
        assert!(g.check(ActionKind::CreateDeployment, "default").is_err());

        assert!(!g.is_dry_run());
        g.set_dry_run(true);
        assert!(g.is_dry_run());
    }

    #[test]
    fn from_config_defaults() {
        let g = Guardrails::from_config(&DeployConfig::default());
        assert_eq!(g.allowed_namespaces(), vec!["default".to_string()]);
        for action in ActionKind::all() {
            assert!(g.check(*action, "default").is_ok());
        }
    }
}
