//! The per-action execution context and the apply-handler registry.
//!
//! The action-execution sandbox is external to the controller; it plugs in
//! deterministic handlers per `(receiver, scope, action)`. A handler gets
//! mutable access to the store (inside the enclosing session), may write
//! contract tables, emit console output, and enqueue deferred
//! transactions on the context.

use crate::error::ChainError;
use crate::skip::SkipFlags;
use crate::trace::DeferredTransaction;
use crate::transaction::{Action, Transaction};
use cascade_store::Store;
use cascade_types::params::all_scope;
use cascade_types::{AccountName, ActionName};
use std::collections::HashMap;
use std::sync::Arc;

/// A deterministic native action handler.
pub type ApplyHandler = Arc<dyn Fn(&mut ApplyContext<'_>) -> Result<(), ChainError> + Send + Sync>;

/// Handlers registered per `(receiver, scope, action)`.
#[derive(Clone, Default)]
pub struct ApplyHandlerRegistry {
    handlers: HashMap<(AccountName, AccountName, ActionName), ApplyHandler>,
}

impl ApplyHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_apply_handler(
        &mut self,
        receiver: AccountName,
        scope: AccountName,
        action: ActionName,
        handler: ApplyHandler,
    ) {
        self.handlers.insert((receiver, scope, action), handler);
    }

    pub fn find(
        &self,
        receiver: &AccountName,
        scope: &AccountName,
        action: &ActionName,
    ) -> Option<&ApplyHandler> {
        self.handlers
            .get(&(receiver.clone(), scope.clone(), action.clone()))
    }
}

/// Execution context for one action delivery.
pub struct ApplyContext<'a> {
    pub store: &'a mut Store,
    pub trx: &'a Transaction,
    pub act: &'a Action,
    pub receiver: AccountName,
    skip: SkipFlags,
    console: String,
    deferred: Vec<DeferredTransaction>,
}

impl<'a> ApplyContext<'a> {
    pub fn new(
        store: &'a mut Store,
        trx: &'a Transaction,
        act: &'a Action,
        receiver: AccountName,
        skip: SkipFlags,
    ) -> Self {
        Self {
            store,
            trx,
            act,
            receiver,
            skip,
            console: String::new(),
            deferred: Vec::new(),
        }
    }

    /// Assert the transaction declared write access to `scope`. Handlers
    /// call this before touching state under that scope.
    pub fn require_write_scope(&self, scope: &AccountName) -> Result<(), ChainError> {
        if self.skip.contains(SkipFlags::SCOPE_CHECK) {
            return Ok(());
        }
        let all = all_scope();
        if self
            .trx
            .write_scope
            .iter()
            .any(|s| s == scope || *s == all)
        {
            return Ok(());
        }
        Err(ChainError::transaction(format!(
            "transaction has no write scope for {scope}"
        )))
    }

    pub fn require_read_scope(&self, scope: &AccountName) -> Result<(), ChainError> {
        if self.skip.contains(SkipFlags::SCOPE_CHECK) {
            return Ok(());
        }
        let all = all_scope();
        if self
            .trx
            .read_scope
            .iter()
            .chain(self.trx.write_scope.iter())
            .any(|s| s == scope || *s == all)
        {
            return Ok(());
        }
        Err(ChainError::transaction(format!(
            "transaction has no read scope for {scope}"
        )))
    }

    /// Append diagnostics visible in the action trace.
    pub fn console_append(&mut self, text: &str) {
        self.console.push_str(text);
    }

    /// Enqueue a generated transaction. It is recorded into the store when
    /// the enclosing cycle is finalized; nothing dispatches it yet.
    pub fn defer(&mut self, transaction: DeferredTransaction) {
        self.deferred.push(transaction);
    }

    /// Tear down into the pieces the transaction applier folds into traces.
    pub fn finish(self) -> (String, Vec<DeferredTransaction>) {
        (self.console, self.deferred)
    }
}
