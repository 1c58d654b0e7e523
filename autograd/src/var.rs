use std::cell::{Ref, RefCell};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::rc::Rc;

use ndarray::Array2;

use crate::ops::{self, Op};

/// A recorded operation: the op itself, the variables it consumed and its
/// position in the topological order.
pub(crate) struct Node {
    pub(crate) op: Box<dyn Op>,
    pub(crate) inputs: Vec<Var>,
    pub(crate) generation: usize,
}

struct Inner {
    data: Array2<f64>,
    grad: Option<Var>,
    creator: Option<Rc<Node>>,
    generation: usize,
}

/// A variable in the computation graph: a shared handle to a 2-D batch of
/// values, the operation that produced it (if any) and its gradient.
///
/// Gradients are themselves `Var`s, so a backward pass records a new graph
/// and can be differentiated again. This is what turns two reverse passes
/// into exact second derivatives.
#[derive(Clone)]
pub struct Var(Rc<RefCell<Inner>>);

impl Var {
    /// Creates a leaf variable holding `data`.
    pub fn new(data: Array2<f64>) -> Self {
        Self(Rc::new(RefCell::new(Inner {
            data,
            grad: None,
            creator: None,
            generation: 0,
        })))
    }

    /// Creates a 1x1 leaf variable holding `value`.
    pub fn scalar(value: f64) -> Self {
        Self::new(Array2::from_elem((1, 1), value))
    }

    pub(crate) fn from_op(op: Box<dyn Op>, inputs: Vec<Var>, data: Array2<f64>) -> Self {
        let generation = inputs.iter().map(Var::generation).max().unwrap_or(0);
        let node = Node {
            op,
            inputs,
            generation,
        };

        Self(Rc::new(RefCell::new(Inner {
            data,
            grad: None,
            creator: Some(Rc::new(node)),
            generation: generation + 1,
        })))
    }

    pub(crate) fn array(&self) -> Ref<'_, Array2<f64>> {
        Ref::map(self.0.borrow(), |inner| &inner.data)
    }

    /// Returns a copy of the held values.
    pub fn value(&self) -> Array2<f64> {
        self.0.borrow().data.clone()
    }

    /// Returns the single held value. Panics if the variable is not 1x1.
    pub fn item(&self) -> f64 {
        let inner = self.0.borrow();
        assert_eq!(inner.data.dim(), (1, 1), "item: variable is not a scalar");
        inner.data[[0, 0]]
    }

    /// Returns the `(rows, columns)` shape.
    pub fn shape(&self) -> (usize, usize) {
        self.0.borrow().data.dim()
    }

    /// Returns the number of held elements.
    pub fn len(&self) -> usize {
        self.0.borrow().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrites the held values in place. The shape is fixed at
    /// construction and must match.
    pub fn set_value(&self, data: Array2<f64>) {
        let mut inner = self.0.borrow_mut();
        assert_eq!(
            inner.data.dim(),
            data.dim(),
            "set_value: shape is immutable after construction"
        );
        inner.data = data;
    }

    /// Returns the accumulated gradient, if any.
    pub fn grad(&self) -> Option<Var> {
        self.0.borrow().grad.clone()
    }

    /// Removes and returns the accumulated gradient.
    pub fn take_grad(&self) -> Option<Var> {
        self.0.borrow_mut().grad.take()
    }

    /// Drops the accumulated gradient.
    pub fn clear_grad(&self) {
        self.0.borrow_mut().grad = None;
    }

    /// Whether two handles refer to the same variable.
    pub fn ptr_eq(&self, other: &Var) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn generation(&self) -> usize {
        self.0.borrow().generation
    }

    pub(crate) fn creator(&self) -> Option<Rc<Node>> {
        self.0.borrow().creator.clone()
    }

    pub(crate) fn accumulate_grad(&self, g: Var) {
        let acc = match self.take_grad() {
            Some(prev) => ops::add(&prev, &g),
            None => g,
        };
        self.0.borrow_mut().grad = Some(acc);
    }

    /// Propagates gradients from this variable back to the leaves, seeding
    /// with ones when no gradient has been set.
    ///
    /// Gradients of intermediate variables are dropped once their creator
    /// has been processed; only leaves keep theirs.
    pub fn backward(&self) {
        self.backward_watching(&[]);
    }

    /// Like [`backward`](Self::backward), but also retains gradients on the
    /// `watched` variables even when they are produced by an operation.
    /// This is how a derivative is taken with respect to a mid-graph input,
    /// such as a masked view of a batch.
    pub fn backward_watching(&self, watched: &[&Var]) {
        {
            let mut inner = self.0.borrow_mut();
            if inner.grad.is_none() {
                inner.grad = Some(Var::new(Array2::ones(inner.data.dim())));
            }
        }

        let mut pending = BinaryHeap::new();
        let mut seen = HashSet::new();

        if let Some(node) = self.creator() {
            seen.insert(Rc::as_ptr(&node) as usize);
            pending.push(Pending {
                generation: node.generation,
                output: self.clone(),
            });
        }

        // Highest generation first: every consumer of a variable sits at a
        // strictly higher generation than the variable's creator, so each
        // gradient is complete before it is propagated further.
        while let Some(Pending { output, .. }) = pending.pop() {
            let node = output.creator().expect("queued variables have a creator");
            let gy = output
                .grad()
                .expect("gradient is complete before its creator is processed");

            if !watched.iter().any(|w| w.ptr_eq(&output)) {
                output.clear_grad();
            }

            let gxs = node.op.backward(&node.inputs, &gy);
            debug_assert_eq!(gxs.len(), node.inputs.len());

            for (input, gx) in node.inputs.iter().zip(gxs) {
                input.accumulate_grad(gx);

                if let Some(creator) = input.creator() {
                    if seen.insert(Rc::as_ptr(&creator) as usize) {
                        pending.push(Pending {
                            generation: creator.generation,
                            output: input.clone(),
                        });
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Var {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.0.borrow();
        let mut dbg = f.debug_struct("Var");
        dbg.field("shape", &inner.data.dim());
        if let Some(creator) = &inner.creator {
            dbg.field("op", &creator.op.name());
        }
        dbg.finish()
    }
}

struct Pending {
    generation: usize,
    output: Var,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.generation == other.generation
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.generation.cmp(&other.generation)
    }
}

impl std::ops::Add for &Var {
    type Output = Var;

    fn add(self, rhs: &Var) -> Var {
        ops::add(self, rhs)
    }
}

impl std::ops::Sub for &Var {
    type Output = Var;

    fn sub(self, rhs: &Var) -> Var {
        ops::sub(self, rhs)
    }
}

impl std::ops::Mul for &Var {
    type Output = Var;

    fn mul(self, rhs: &Var) -> Var {
        ops::mul(self, rhs)
    }
}
