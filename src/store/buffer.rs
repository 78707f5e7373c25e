//! Pre-sized growable element buffers backing typed-array indexes.
//!
//! Buffers are sized ahead of the write cursor and grow in bounded steps:
//! capacity increases by `min(current, GROW_STEP_MAX)` elements, so growth
//! doubles while small and becomes linear once large.

/// Upper bound on a single capacity growth step, in elements
const GROW_STEP_MAX: u32 = 65_536;

/// Capacity of a freshly created buffer
const INITIAL_CAPACITY: u32 = 1_024;

/// Fixed-capacity element buffer with an explicit live count
#[derive(Debug, Clone, Default)]
pub struct ElementBuf<T: Copy + Default> {
    elements: Vec<T>,
    count: u32,
}

/// Buffer of `u32` elements (offset, sequence and prefix indexes)
pub type U32Arr = ElementBuf<u32>;

/// Buffer of `f64` elements (timestamp index)
pub type F64Arr = ElementBuf<f64>;

impl<T: Copy + Default> ElementBuf<T> {
    /// Creates an empty buffer with the initial capacity
    pub fn new() -> Self {
        Self {
            elements: vec![T::default(); INITIAL_CAPACITY as usize],
            count: 0,
        }
    }

    /// Rebuilds a buffer from persisted elements; all of them are live
    pub fn with_elements(elements: Vec<T>) -> Self {
        let count = elements.len() as u32;
        Self { elements, count }
    }

    /// Writes `value` at `offset`, growing capacity as needed. The live
    /// count covers every offset written so far.
    pub fn set(&mut self, offset: u32, value: T) {
        self.grow_for(offset);
        self.elements[offset as usize] = value;
        if offset >= self.count {
            self.count = offset + 1;
        }
    }

    /// Reads the element at `offset` if it is live
    pub fn get(&self, offset: u32) -> Option<T> {
        if offset < self.count {
            Some(self.elements[offset as usize])
        } else {
            None
        }
    }

    /// Number of live elements
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Live elements as a slice
    pub fn live(&self) -> &[T] {
        &self.elements[..self.count as usize]
    }

    /// Discards every element at or beyond `count`
    pub fn truncate(&mut self, count: u32) {
        if count < self.count {
            self.count = count;
        }
    }

    fn grow_for(&mut self, offset: u32) {
        let mut capacity = self.elements.len() as u32;
        while capacity <= offset {
            let step = if capacity == 0 {
                INITIAL_CAPACITY
            } else {
                capacity.min(GROW_STEP_MAX)
            };
            capacity += step;
        }
        if capacity as usize > self.elements.len() {
            self.elements.resize(capacity as usize, T::default());
        }
    }
}

impl ElementBuf<u32> {
    /// Binary search over the live elements, which must be sorted ascending.
    /// The offset core index satisfies this by construction: seqs increase
    /// with append order.
    pub fn position_of(&self, value: u32) -> Option<u32> {
        self.live().binary_search(&value).ok().map(|i| i as u32)
    }
}
