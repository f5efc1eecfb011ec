use derive_more::Display;

/// Sample formats a block can be stored in.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SampleFormat {
    #[display("int16")]
    Int16,
    #[display("int24")]
    Int24,
    #[default]
    #[display("float")]
    Float,
}

impl SampleFormat {
    /// Bytes per sample in a `.au` data section. 24-bit samples are packed.
    pub const fn bytes_per_sample(&self) -> usize {
        match self {
            Self::Int16 => 2,
            Self::Int24 => 3,
            Self::Float => 4,
        }
    }

    /// Encoding number in the `.au` header.
    pub(crate) const fn au_encoding(&self) -> u32 {
        match self {
            Self::Int16 => 3,
            Self::Int24 => 4,
            Self::Float => 6,
        }
    }

    pub(crate) const fn from_au_encoding(encoding: u32) -> Option<Self> {
        match encoding {
            3 => Some(Self::Int16),
            4 => Some(Self::Int24),
            6 => Some(Self::Float),
            _ => None,
        }
    }
}
