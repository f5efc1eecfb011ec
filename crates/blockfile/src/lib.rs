mod alias;
pub mod au;
mod block;
pub mod error;
mod format;
pub mod legacy;
pub mod name;
mod registry;
pub mod xml;

pub use crate::block::{AliasSource, BlockFile, BlockKind, BlockTarget};
pub use crate::format::SampleFormat;
pub use crate::name::BlockName;
pub use crate::registry::{
    Deserializer, LEGACY_ALIAS_TAG, LoadOptions, PCM_ALIAS_TAG, Registry, SILENT_TAG, SIMPLE_TAG, declared_len,
};
pub use crate::xml::{Attributes, XmlTagHandler, XmlWriter};
