//! A flat batch of states.
use anyhow::Result;
use gfn_core::{util::check_indices, Container, GfnError, ObjectKind};
use ndarray::{concatenate, Array1, Array2, ArrayView1, Axis};

/// A flat batch of states together with their action masks.
///
/// States are created by an [`Env`](crate::env::Env), which computes the
/// masks. The last column of the forward masks is the exit action. Sink
/// states have all-false masks.
#[derive(Clone, Debug, PartialEq)]
pub struct States {
    tensor: Array2<i64>,
    forward_masks: Array2<bool>,
    backward_masks: Array2<bool>,
    source: Array1<i64>,
    sink: Array1<i64>,
}

impl States {
    /// Builds a batch of states.
    ///
    /// `forward_masks` must have one more column than `backward_masks`.
    pub fn new(
        tensor: Array2<i64>,
        forward_masks: Array2<bool>,
        backward_masks: Array2<bool>,
        source: Array1<i64>,
        sink: Array1<i64>,
    ) -> Result<Self> {
        let n = tensor.nrows();
        let dim = tensor.ncols();
        if forward_masks.nrows() != n || backward_masks.nrows() != n {
            return Err(GfnError::ShapeMismatch(format!(
                "{} states with {} forward masks and {} backward masks",
                n,
                forward_masks.nrows(),
                backward_masks.nrows()
            ))
            .into());
        }
        if forward_masks.ncols() != backward_masks.ncols() + 1 {
            return Err(GfnError::ShapeMismatch(format!(
                "{} forward actions for {} backward actions",
                forward_masks.ncols(),
                backward_masks.ncols()
            ))
            .into());
        }
        if source.len() != dim || sink.len() != dim {
            return Err(GfnError::ShapeMismatch(format!(
                "source and sink states must have dimension {}",
                dim
            ))
            .into());
        }

        Ok(Self {
            tensor,
            forward_masks,
            backward_masks,
            source,
            sink,
        })
    }

    /// Raw states, shape `(n, state_dim)`.
    pub fn tensor(&self) -> &Array2<i64> {
        &self.tensor
    }

    /// Legal forward actions, shape `(n, n_actions)`.
    pub fn forward_masks(&self) -> &Array2<bool> {
        &self.forward_masks
    }

    /// Legal backward actions, shape `(n, n_actions - 1)`.
    pub fn backward_masks(&self) -> &Array2<bool> {
        &self.backward_masks
    }

    /// The source state of the environment.
    pub fn source_state(&self) -> ArrayView1<'_, i64> {
        self.source.view()
    }

    /// The sink state of the environment.
    pub fn sink_state(&self) -> ArrayView1<'_, i64> {
        self.sink.view()
    }

    /// Dimension of a state.
    pub fn state_dim(&self) -> usize {
        self.tensor.ncols()
    }

    /// Number of forward actions, the exit action included.
    pub fn n_actions(&self) -> usize {
        self.forward_masks.ncols()
    }

    /// Returns `true` for each row equal to the sink state.
    pub fn is_sink_state(&self) -> Array1<bool> {
        self.tensor
            .outer_iter()
            .map(|row| row == self.sink.view())
            .collect()
    }

    /// Returns `true` for each row equal to the source state.
    pub fn is_initial_state(&self) -> Array1<bool> {
        self.tensor
            .outer_iter()
            .map(|row| row == self.source.view())
            .collect()
    }

    /// Concatenates batches along the batch axis.
    pub fn stack(parts: &[States]) -> Result<Self> {
        let first = parts
            .first()
            .ok_or_else(|| GfnError::ShapeMismatch("cannot stack zero batches".into()))?;
        let tensors = parts.iter().map(|s| s.tensor.view()).collect::<Vec<_>>();
        let fms = parts
            .iter()
            .map(|s| s.forward_masks.view())
            .collect::<Vec<_>>();
        let bms = parts
            .iter()
            .map(|s| s.backward_masks.view())
            .collect::<Vec<_>>();

        Self::new(
            concatenate(Axis(0), &tensors)?,
            concatenate(Axis(0), &fms)?,
            concatenate(Axis(0), &bms)?,
            first.source.clone(),
            first.sink.clone(),
        )
    }

    /// Collects row `i` of `batches[t]` for each `(t, i)` in `picks`.
    pub(crate) fn gather(batches: &[States], picks: &[(usize, usize)]) -> Result<Self> {
        let first = batches
            .first()
            .ok_or_else(|| GfnError::ShapeMismatch("cannot gather from zero batches".into()))?;
        let (dim, n_actions) = (first.state_dim(), first.n_actions());
        let mut tensor = Vec::with_capacity(picks.len() * dim);
        let mut fm = Vec::with_capacity(picks.len() * n_actions);
        let mut bm = Vec::with_capacity(picks.len() * (n_actions - 1));

        for &(t, i) in picks {
            let s = batches.get(t).ok_or_else(|| {
                GfnError::ShapeMismatch(format!("step {} out of {}", t, batches.len()))
            })?;
            check_indices(&[i], s.len())?;
            tensor.extend(s.tensor.row(i).iter().copied());
            fm.extend(s.forward_masks.row(i).iter().copied());
            bm.extend(s.backward_masks.row(i).iter().copied());
        }

        let n = picks.len();
        Self::new(
            Array2::from_shape_vec((n, dim), tensor)?,
            Array2::from_shape_vec((n, n_actions), fm)?,
            Array2::from_shape_vec((n, n_actions - 1), bm)?,
            first.source.clone(),
            first.sink.clone(),
        )
    }
}

impl Container for States {
    fn kind(&self) -> ObjectKind {
        ObjectKind::States
    }

    fn len(&self) -> usize {
        self.tensor.nrows()
    }

    fn select(&self, ixs: &[usize]) -> Result<Self> {
        check_indices(ixs, self.len())?;
        Ok(Self {
            tensor: self.tensor.select(Axis(0), ixs),
            forward_masks: self.forward_masks.select(Axis(0), ixs),
            backward_masks: self.backward_masks.select(Axis(0), ixs),
            source: self.source.clone(),
            sink: self.sink.clone(),
        })
    }

    fn extend(&mut self, other: &Self) -> Result<()> {
        *self = Self::stack(&[self.clone(), other.clone()])?;
        Ok(())
    }
}
