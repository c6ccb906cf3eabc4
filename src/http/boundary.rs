const BOUNDARY_PREFIX: &[u8] = b"\r\n--";

/// Assembles multipart delimiters of the form `"\r\n--" + boundary`.
///
/// The buffer is reused between calls and only grows, always to the next
/// power of two, so the prefix is written once per resize.
#[derive(Debug, Default)]
pub struct BoundaryAugmenter {
    buf: Vec<u8>,
    len: usize,
}

impl BoundaryAugmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the delimiter for `boundary`.
    pub fn of(&mut self, boundary: &[u8]) -> &[u8] {
        let len = BOUNDARY_PREFIX.len() + boundary.len();
        if len > self.buf.len() {
            self.resize(len);
        }
        self.buf[BOUNDARY_PREFIX.len()..len].copy_from_slice(boundary);
        self.len = len;
        &self.buf[..self.len]
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Releases the buffer.
    pub fn close(&mut self) {
        self.buf = Vec::new();
        self.len = 0;
    }

    fn resize(&mut self, len: usize) {
        let capacity = len.next_power_of_two();
        self.buf.resize(capacity, 0);
        self.buf[..BOUNDARY_PREFIX.len()].copy_from_slice(BOUNDARY_PREFIX);
    }
}
