use super::Query;

/// FIFO of queries awaiting submission. The buffer itself is not
/// synchronized; the executor serializes access behind its mutex.
#[derive(Debug, Default)]
pub struct PacketBuffer {
    queries: Vec<Query>,
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append queries and return the new length.
    pub fn write<I>(&mut self, queries: I) -> usize
    where
        I: IntoIterator<Item = Query>,
    {
        self.queries.extend(queries);
        self.queries.len()
    }

    /// Take everything, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<Query> {
        std::mem::take(&mut self.queries)
    }

    /// Return a failed batch to the front, preserving capture order for
    /// the next flush.
    pub fn put_back(&mut self, mut queries: Vec<Query>) {
        queries.append(&mut self.queries);
        self.queries = queries;
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}
