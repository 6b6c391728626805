//! An implementation of `ByteBuf` based on a plain `Vec`.

pub struct ByteBuf {
    buf: Vec<u8>,
}

impl ByteBuf {
    pub fn new(len: usize) -> Self {
        ByteBuf { buf: vec![0u8; len] }
    }

    pub fn realloc(&mut self, new_len: usize) {
        self.buf.resize(new_len, 0u8);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_ref()
    }

    pub fn as_slice_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut()
    }
}
