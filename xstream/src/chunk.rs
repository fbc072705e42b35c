//! Units of data moving through a pipe.

/// An opaque, ordered unit of data.
///
/// `size` feeds high-water-mark accounting. Byte containers report their
/// length, so a zero-length chunk has size 0 but is still a chunk: it is
/// queued, forwarded and counted like any other.
pub trait Chunk: 'static {
    fn size(&self) -> usize;
}

impl Chunk for Vec<u8> {
    fn size(&self) -> usize {
        self.len()
    }
}

impl Chunk for Box<[u8]> {
    fn size(&self) -> usize {
        self.len()
    }
}

impl Chunk for String {
    fn size(&self) -> usize {
        self.len()
    }
}

impl Chunk for &'static str {
    fn size(&self) -> usize {
        self.len()
    }
}

impl Chunk for &'static [u8] {
    fn size(&self) -> usize {
        self.len()
    }
}
