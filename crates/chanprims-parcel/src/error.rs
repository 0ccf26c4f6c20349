/// Errors that can occur while reading or writing a parcel.
#[derive(Debug, thiserror::Error)]
pub enum ParcelError {
    /// A read ran past the end of the data buffer.
    #[error("parcel underrun at offset {offset}: needed {needed} bytes, {available} available")]
    Underrun {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// A string payload is not valid UTF-8.
    #[error("string at offset {offset} is not valid UTF-8")]
    InvalidUtf8 { offset: usize },

    /// A descriptor reference does not name an attached descriptor.
    #[error("descriptor index {index} out of range ({count} attached)")]
    BadDescriptorIndex { index: i32, count: usize },

    /// A value is too large to be length-prefixed.
    #[error("value too large for parcel ({size} bytes)")]
    TooLarge { size: usize },

    /// The requested data position lies beyond the written data.
    #[error("data position {position} beyond data size {size}")]
    BadPosition { position: usize, size: usize },

    /// Duplicating a descriptor into or out of the parcel failed.
    #[error("descriptor duplication failed: {0}")]
    Descriptor(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ParcelError>;
