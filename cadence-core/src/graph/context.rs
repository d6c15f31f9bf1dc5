//! Evaluation Context
//!
//! Tracks which nodes are currently being evaluated on this thread. Node
//! evaluation is recursive (a node pulls values from its children), so the
//! stack depth is the length of the dependency path being walked.
//!
//! # Implementation
//!
//! A thread-local stack of node ids. Entering a node's evaluation pushes its
//! id and returns a guard; dropping the guard pops it. The registry does not
//! reject cycles, so a cyclic graph would otherwise recurse until the stack
//! overflows: `enter` refuses to go deeper than the configured limit and
//! reports the node that hit it.

use std::cell::RefCell;

use super::NodeId;
use crate::error::{GraphError, Result};

thread_local! {
    static EVALUATION_STACK: RefCell<Vec<NodeId>> = const { RefCell::new(Vec::new()) };
}

/// Guard for one node evaluation. Pops the stack when dropped, so the stack
/// stays balanced even if evaluation unwinds.
#[derive(Debug)]
pub struct EvaluationFrame {
    id: NodeId,
}

impl EvaluationFrame {
    /// Enter the evaluation of `id`.
    ///
    /// Fails with [`GraphError::EvaluationDepthExceeded`] when `max_depth`
    /// evaluations are already in flight.
    pub fn enter(id: NodeId, max_depth: usize) -> Result<Self> {
        EVALUATION_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.len() >= max_depth {
                return Err(GraphError::EvaluationDepthExceeded {
                    id,
                    depth: max_depth,
                });
            }
            stack.push(id);
            Ok(Self { id })
        })
    }

    /// Number of evaluations in flight on this thread.
    pub fn depth() -> usize {
        EVALUATION_STACK.with(|stack| stack.borrow().len())
    }

    /// The node currently being evaluated, if any.
    pub fn current() -> Option<NodeId> {
        EVALUATION_STACK.with(|stack| stack.borrow().last().copied())
    }
}

impl Drop for EvaluationFrame {
    fn drop(&mut self) {
        EVALUATION_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            debug_assert_eq!(
                popped,
                Some(self.id),
                "EvaluationFrame mismatch: expected {:?}, got {:?}",
                self.id,
                popped
            );
        });
    }
}
