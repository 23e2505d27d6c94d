//! # Run Buffers
//!
//! One allocation of `a`, `b`, `sum` and the validator's `expected` buffer
//! per run. The coordinator owns them; executors only ever see a `Lanes`
//! view over one `SubRange`. Co-processing views are carved out with
//! `split_at_mut`, so the host and device paths cannot alias each other.

use crate::error::{CoprocError, Result};
use crate::partition::SubRange;

/// Borrowed inputs and output for one contiguous range.
#[derive(Debug)]
pub struct Lanes<'a> {
    pub a: &'a [i32],
    pub b: &'a [i32],
    pub sum: &'a mut [i32],
    pub range: SubRange,
}

impl Lanes<'_> {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// The four equal-length buffers of a run.
#[derive(Debug)]
pub struct Buffers {
    a: Vec<i32>,
    b: Vec<i32>,
    sum: Vec<i32>,
    expected: Vec<i32>,
}

impl Buffers {
    /// Allocate zeroed buffers of `elements` integers each.
    ///
    /// Allocation failure is reported instead of aborting; whatever was
    /// allocated before the failing buffer is dropped on return.
    pub fn allocate(elements: usize) -> Result<Self> {
        Ok(Self {
            a: try_alloc("a", elements)?,
            b: try_alloc("b", elements)?,
            sum: try_alloc("sum", elements)?,
            expected: try_alloc("expected", elements)?,
        })
    }

    /// Allocate and fill the inputs with `a[i] = b[i] = i`.
    pub fn with_ramp(elements: usize) -> Result<Self> {
        let mut buffers = Self::allocate(elements)?;
        buffers.fill_ramp();
        Ok(buffers)
    }

    /// Fill both inputs with their index.
    pub fn fill_ramp(&mut self) {
        for (i, (a, b)) in self.a.iter_mut().zip(self.b.iter_mut()).enumerate() {
            *a = i as i32;
            *b = i as i32;
        }
    }

    pub fn len(&self) -> usize {
        self.a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }

    pub fn a(&self) -> &[i32] {
        &self.a
    }

    pub fn b(&self) -> &[i32] {
        &self.b
    }

    pub fn sum(&self) -> &[i32] {
        &self.sum
    }

    /// Mutable access to the output, e.g. to inject a fault in tests.
    pub fn sum_mut(&mut self) -> &mut [i32] {
        &mut self.sum
    }

    /// View over `range` writing into `sum`.
    pub fn lanes(&mut self, range: SubRange) -> Result<Lanes<'_>> {
        let range = SubRange::new(range.start(), range.len(), self.len())?;
        let span = range.start()..range.end();
        Ok(Lanes {
            a: &self.a[span.clone()],
            b: &self.b[span.clone()],
            sum: &mut self.sum[span],
            range,
        })
    }

    /// View over the whole vector writing into the scratch `expected` buffer.
    ///
    /// Used for the warm-up submission so its output can never stand in for
    /// missing writes to `sum`.
    pub fn scratch_lanes(&mut self) -> Lanes<'_> {
        let range = SubRange::full(self.len());
        Lanes {
            a: &self.a,
            b: &self.b,
            sum: &mut self.expected,
            range,
        }
    }

    /// Disjoint views `[0, boundary)` and `[boundary, len)` over `sum`.
    pub fn split(&mut self, boundary: usize) -> Result<(Lanes<'_>, Lanes<'_>)> {
        let len = self.len();
        let low = SubRange::between(0, boundary, len)?;
        let high = SubRange::between(boundary, len, len)?;

        let (a_low, a_high) = self.a.split_at(boundary);
        let (b_low, b_high) = self.b.split_at(boundary);
        let (sum_low, sum_high) = self.sum.split_at_mut(boundary);

        Ok((
            Lanes {
                a: a_low,
                b: b_low,
                sum: sum_low,
                range: low,
            },
            Lanes {
                a: a_high,
                b: b_high,
                sum: sum_high,
                range: high,
            },
        ))
    }

    /// Inputs, the baseline buffer, and the produced sum, for validation.
    pub fn validation_parts(&mut self) -> (&[i32], &[i32], &mut [i32], &[i32]) {
        (&self.a, &self.b, &mut self.expected, &self.sum)
    }
}

fn try_alloc(buffer: &'static str, elements: usize) -> Result<Vec<i32>> {
    let mut data = Vec::new();
    data.try_reserve_exact(elements)
        .map_err(|_| CoprocError::Allocation { buffer, elements })?;
    data.resize(elements, 0);
    Ok(data)
}
