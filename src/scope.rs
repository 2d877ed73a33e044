use std::{collections::HashMap, sync::Arc};

use crate::value::Value;

/// One frame of the variable chain used while rendering.
///
/// Frames are immutable once built. Entering a loop iteration or a block
/// creates a child frame, leaving it drops back to the parent. Lambdas keep
/// their defining frame alive by holding an `Arc` to it.
#[derive(Debug, Default)]
pub(crate) struct Scope {
    vars: HashMap<String, Value>,
    parent: Option<Arc<Scope>>,
}

impl Scope {
    pub(crate) fn root(vars: HashMap<String, Value>) -> Arc<Self> {
        Arc::new(Self { vars, parent: None })
    }

    pub(crate) fn child(parent: &Arc<Self>, vars: HashMap<String, Value>) -> Arc<Self> {
        Arc::new(Self {
            vars,
            parent: Some(Arc::clone(parent)),
        })
    }

    /// Looks `name` up innermost-first.
    pub(crate) fn lookup(&self, name: &str) -> Option<&Value> {
        let mut frame = self;
        loop {
            if let Some(value) = frame.vars.get(name) {
                return Some(value);
            }
            frame = frame.parent.as_deref()?;
        }
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        let mut depth = 1;
        let mut frame = self;
        while let Some(parent) = frame.parent.as_deref() {
            depth += 1;
            frame = parent;
        }
        depth
    }
}
